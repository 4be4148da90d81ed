//! CLI argument definitions for assetdump

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "assetdump")]
#[command(about = "Dump Unity container paths and the object types stored under them", long_about = None)]
pub struct Cli {
    /// Bundle, globalgamemanagers file, or directory to scan recursively
    pub input: Option<PathBuf>,

    /// Class package with type trees for files that omit them [default: classdata.tpk]
    #[arg(long, env = "ASSETDUMP_CLASSDATA")]
    pub classdata: Option<PathBuf>,

    /// HTML report to write [default: assetPathsDump.html]
    #[arg(short, long, env = "ASSETDUMP_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Also write the indexes as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Check only the first character of the engine version when classifying
    #[arg(long)]
    pub legacy_probe: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Log filter implied by `-v` flags, if any were given
    pub fn log_filter(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "assetdump",
            "Game_Data",
            "--classdata",
            "db/classdata.tpk",
            "-o",
            "out.html",
            "--json",
            "out.json",
            "--legacy-probe",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.input, Some(PathBuf::from("Game_Data")));
        assert_eq!(cli.classdata, Some(PathBuf::from("db/classdata.tpk")));
        assert_eq!(cli.output, Some(PathBuf::from("out.html")));
        assert_eq!(cli.json, Some(PathBuf::from("out.json")));
        assert!(cli.legacy_probe);
        assert_eq!(cli.log_filter(), Some("debug"));
    }

    #[test]
    fn test_input_is_optional() {
        let cli = Cli::try_parse_from(["assetdump"]).unwrap();
        assert!(cli.input.is_none());
        assert_eq!(cli.log_filter(), None);
    }
}
