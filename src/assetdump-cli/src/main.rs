//! assetdump - list container paths and object types in Unity content

mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use assetdump::pipeline::load_class_package;
use assetdump::{collect_inputs, HtmlReport, JsonReport, Pipeline, ReportSink, VersionProbe};
use assetdump_unity::AssetsManager;

use cli::Cli;
use config::{Config, Settings, CONFIG_FILE};

/// Exit status for every fatal condition
const FATAL: u8 = 255;

fn init_tracing(cli: &Cli) {
    let filter = match cli.log_filter() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli, Path::new(CONFIG_FILE)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(FATAL)
        }
    }
}

/// Validate the input, then load `config_path` and process every file
fn run(cli: &Cli, config_path: &Path) -> Result<ExitCode> {
    let Some(input) = &cli.input else {
        println!("No file/directory specified");
        return Ok(ExitCode::from(FATAL));
    };

    let inputs = match collect_inputs(input) {
        Ok(inputs) => inputs,
        Err(assetdump::Error::InvalidInputPath(_)) => {
            println!("Specified file/directory was not found");
            return Ok(ExitCode::from(FATAL));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(input = %input.display(), files = inputs.len(), "collected inputs");

    let config = Config::load_from(config_path)?;
    let settings = Settings::resolve(cli, config);
    let mut manager = AssetsManager::new();
    load_class_package(&mut manager, &settings.classdata)?;

    let html = File::create(&settings.output)
        .with_context(|| format!("Failed to create {}", settings.output.display()))?;
    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(HtmlReport::new(BufWriter::new(html)))];
    if let Some(json) = &settings.json {
        let file = File::create(json)
            .with_context(|| format!("Failed to create {}", json.display()))?;
        sinks.push(Box::new(JsonReport::new(BufWriter::new(file))));
    }

    let probe = if cli.legacy_probe {
        VersionProbe::FirstChar
    } else {
        VersionProbe::Full
    };
    let summary = Pipeline::new(&mut manager, probe)
        .run(&inputs, &mut sinks)
        .context("Failed to write report")?;

    eprintln!("{}", summary);
    println!("Done");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetdump_unity::testing::{fixtures, BundleBuilder, SerializedFileBuilder, TpkBuilder};
    use assetdump_unity::tpk::PackageCompression;
    use assetdump_unity::{ClassId, ObjectRef};

    fn args(dir: &Path, input: &Path) -> Vec<String> {
        vec![
            "assetdump".to_string(),
            input.display().to_string(),
            "--classdata".to_string(),
            dir.join("classdata.tpk").display().to_string(),
            "--output".to_string(),
            dir.join("report.html").display().to_string(),
            "--json".to_string(),
            dir.join("report.json").display().to_string(),
        ]
    }

    fn write_class_package(dir: &Path) {
        let package = TpkBuilder::new()
            .class(ClassId::MESH, "2019.1.0f1", "Mesh", &fixtures::named_object_tree("Mesh"))
            .build(PackageCompression::None);
        std::fs::write(dir.join("classdata.tpk"), package).unwrap();
    }

    fn write_bundle(path: &Path) {
        let mut cab = SerializedFileBuilder::new("2019.4.31f1");
        let mesh = cab.add_type(ClassId::MESH, fixtures::named_object_tree("Mesh"));
        let bundle = cab.add_type(ClassId::ASSET_BUNDLE, fixtures::asset_bundle_tree());
        cab.add_object(2, mesh, fixtures::named_object("rock"));
        cab.add_object(
            1,
            bundle,
            fixtures::asset_bundle("props", &[("assets/rock.fbx", ObjectRef::new(0, 2))]),
        );
        let bytes = BundleBuilder::new("2019.4.31f1")
            .file("CAB-props", cab.build(), true)
            .build();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_run_writes_reports() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("Data");
        std::fs::create_dir(&data).unwrap();
        write_bundle(&data.join("props.bundle"));
        write_class_package(dir.path());

        let cli = Cli::try_parse_from(args(dir.path(), &data)).unwrap();
        let code = run(&cli, &dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        let html = std::fs::read_to_string(dir.path().join("report.html")).unwrap();
        assert!(html.contains("<h1>props.bundle</h1>"));
        assert!(html.contains("<td>assets/rock.fbx</td><td>Mesh</td>"));

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("report.json")).unwrap()).unwrap();
        assert_eq!(json[0]["paths"]["assets/rock.fbx"]["Mesh"], 1);
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from(["assetdump"]).unwrap();
        assert_eq!(run(&cli, &dir.path().join(CONFIG_FILE)).unwrap(), ExitCode::from(FATAL));

        let cli = Cli::try_parse_from(args(dir.path(), &dir.path().join("nowhere"))).unwrap();
        assert_eq!(run(&cli, &dir.path().join(CONFIG_FILE)).unwrap(), ExitCode::from(FATAL));
        assert!(!dir.path().join("report.html").exists());
    }

    #[test]
    fn test_input_is_checked_before_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join(CONFIG_FILE);
        std::fs::write(&config, "classdata = [not toml").unwrap();

        let cli = Cli::try_parse_from(["assetdump"]).unwrap();
        assert_eq!(run(&cli, &config).unwrap(), ExitCode::from(FATAL));

        let cli = Cli::try_parse_from(args(dir.path(), &dir.path().join("nowhere"))).unwrap();
        assert_eq!(run(&cli, &config).unwrap(), ExitCode::from(FATAL));

        let input = dir.path().join("props.bundle");
        write_bundle(&input);
        let cli = Cli::try_parse_from(args(dir.path(), &input)).unwrap();
        let err = run(&cli, &config).unwrap_err();
        assert!(format!("{:#}", err).contains(CONFIG_FILE));
    }

    #[test]
    fn test_missing_class_package_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("props.bundle");
        write_bundle(&input);

        let cli = Cli::try_parse_from(args(dir.path(), &input)).unwrap();
        let err = run(&cli, &dir.path().join(CONFIG_FILE)).unwrap_err();
        assert!(format!("{:#}", err).contains("classdata.tpk"));
        assert!(!dir.path().join("report.html").exists());
    }
}
