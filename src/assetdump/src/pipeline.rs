//! Per-file driver
//!
//! Each input file is classified, loaded, extracted and aggregated inside
//! its own failure boundary; nothing one file does can stop the batch.
//! Loaded files are released after every input, type databases are kept.

use std::fmt;
use std::path::{Path, PathBuf};

use assetdump_unity::{AssetsManager, ClassId, FileId};

use crate::classify::{classify_file, FileClassification, VersionProbe};
use crate::container::extract;
use crate::index::{PathTypeAggregator, PathTypeIndex};
use crate::report::ReportSink;
use crate::{Error, Result};

/// Only serialized file indexed outside bundles
pub const GLOBAL_GAME_MANAGERS: &str = "globalgamemanagers";

/// Load the class package, the one fatal precondition of a run
pub fn load_class_package(manager: &mut AssetsManager, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    manager
        .load_class_package(path)
        .map_err(|source| Error::MissingClassDatabase {
            path: path.to_path_buf(),
            source,
        })
}

/// Expand an input path into the files to process
///
/// Directories are walked recursively and sorted by path.
pub fn collect_inputs(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(Error::InvalidInputPath(path.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Index and statistics for one processed file
#[derive(Debug, Clone)]
pub struct FileReport {
    pub name: String,
    pub index: PathTypeIndex,
    pub unresolved: usize,
    pub malformed: usize,
}

/// What happened to one input file
#[derive(Debug)]
pub enum Outcome {
    Indexed(FileReport),
    /// Left out of the report without being an error
    Skipped(Error),
    Failed(Error),
}

/// Per-run totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} indexed, {} skipped, {} failed",
            self.indexed, self.skipped, self.failed
        )
    }
}

/// Owner object and container source for one kind of input
struct Source {
    owner_class: ClassId,
    files: Vec<FileId>,
}

pub struct Pipeline<'m> {
    manager: &'m mut AssetsManager,
    probe: VersionProbe,
}

impl<'m> Pipeline<'m> {
    pub fn new(manager: &'m mut AssetsManager, probe: VersionProbe) -> Self {
        Self { manager, probe }
    }

    /// Process every input, handing indexed files to `sink` in input order
    ///
    /// Only sink errors abort the run.
    pub fn run(&mut self, inputs: &[PathBuf], sink: &mut dyn ReportSink) -> Result<Summary> {
        let mut summary = Summary::default();
        for path in inputs {
            match self.process_file(path) {
                Outcome::Indexed(report) => {
                    tracing::info!(
                        file = %path.display(),
                        paths = report.index.len(),
                        entries = report.index.total(),
                        unresolved = report.unresolved,
                        malformed = report.malformed,
                        "indexed"
                    );
                    sink.write_section(&report.name, &report.index)?;
                    summary.indexed += 1;
                }
                Outcome::Skipped(reason) => {
                    tracing::debug!(file = %path.display(), %reason, "skipped");
                    summary.skipped += 1;
                }
                Outcome::Failed(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "failed");
                    summary.failed += 1;
                }
            }
        }
        sink.finish()?;
        Ok(summary)
    }

    /// Failure boundary for one input file
    pub fn process_file(&mut self, path: &Path) -> Outcome {
        let result = self.index_file(path);
        self.manager.unload_files();
        match result {
            Ok(report) => Outcome::Indexed(report),
            Err(e) if e.is_skip() => Outcome::Skipped(e),
            Err(e) => Outcome::Failed(e),
        }
    }

    fn index_file(&mut self, path: &Path) -> Result<FileReport> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let source = match classify_file(path, self.probe)? {
            FileClassification::BundleArchive => {
                let bundle = self.manager.load_bundle(path)?;
                Source {
                    owner_class: ClassId::ASSET_BUNDLE,
                    files: self.manager.bundle_assets_files(bundle)?,
                }
            }
            FileClassification::SerializedObjectFile => {
                if !name.eq_ignore_ascii_case(GLOBAL_GAME_MANAGERS) {
                    return Err(Error::IneligibleFile(path.to_path_buf()));
                }
                Source {
                    owner_class: ClassId::RESOURCE_MANAGER,
                    files: vec![self.manager.load_assets_file(path)?],
                }
            }
            FileClassification::Unrecognized => {
                return Err(Error::UnrecognizedFileFormat(path.to_path_buf()));
            }
        };

        let mut aggregator = PathTypeAggregator::new();
        let mut report = FileReport {
            name,
            index: PathTypeIndex::default(),
            unresolved: 0,
            malformed: 0,
        };
        let mut owners = 0;
        let mut containers = 0;

        for file in source.files {
            self.load_database(file);

            let Some(owner) = self
                .manager
                .objects_of_class(file, source.owner_class)?
                .into_iter()
                .next()
            else {
                tracing::debug!(file = self.manager.file_name(file)?, "no {} object", source.owner_class);
                continue;
            };
            owners += 1;

            let extraction = extract(&mut *self.manager, owner)?;
            if !extraction.container_present {
                continue;
            }
            containers += 1;
            report.unresolved += extraction.unresolved;
            report.malformed += extraction.malformed;
            for (path, label) in &extraction.entries {
                aggregator.observe(path, label);
            }
        }

        if owners == 0 {
            return Err(Error::MissingEligibleObject {
                file: report.name,
                class: source.owner_class,
            });
        }
        if containers == 0 {
            return Err(Error::MissingContainerField { file: report.name });
        }

        report.index = aggregator.finalize();
        Ok(report)
    }

    /// Make the type database for a file's engine version available
    ///
    /// Files with embedded type trees do not need it, so failures are logged
    /// and left to surface when an object cannot be decoded.
    fn load_database(&mut self, file: FileId) {
        let loaded = self
            .manager
            .unity_version(file)
            .and_then(|version| self.manager.load_class_database(&version));
        if let Err(e) = loaded {
            tracing::debug!(error = %e, "no type database");
        }
    }
}
