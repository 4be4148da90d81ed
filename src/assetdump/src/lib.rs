//! # assetdump
//!
//! Builds, for a set of Unity content archives, an index from each declared
//! container path to the object types stored under it and how often each
//! type occurs.
//!
//! ## Pipeline
//!
//! 1. [`classify`] decides from header bytes whether a file is a UnityFS
//!    bundle, a serialized object file, or neither.
//! 2. Eligible files are parsed through an [`assetdump_unity::AssetsManager`];
//!    bundles contribute their first `AssetBundle` object per sub-file,
//!    `globalgamemanagers` its first `ResourceManager`.
//! 3. [`container`] walks the owner's `m_Container` table and [`resolve`]
//!    turns each row's reference into a type label, following
//!    `MonoBehaviour` objects to their script class name.
//! 4. [`index`] aggregates (path, label) pairs in first-seen order.
//! 5. [`report`] renders each file's index as HTML and optionally JSON.
//!
//! ## Example
//!
//! ```no_run
//! use assetdump::{classify::VersionProbe, pipeline, report::HtmlReport};
//! use assetdump_unity::AssetsManager;
//!
//! # fn main() -> assetdump::Result<()> {
//! let mut manager = AssetsManager::new();
//! pipeline::load_class_package(&mut manager, "classdata.tpk")?;
//!
//! let inputs = pipeline::collect_inputs("Game_Data")?;
//! let mut report = HtmlReport::new(std::fs::File::create("assetPathsDump.html")?);
//! let summary = pipeline::Pipeline::new(&mut manager, VersionProbe::Full).run(&inputs, &mut report)?;
//! eprintln!("{}", summary);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use assetdump_unity::{ClassId, ObjectRef};

pub mod classify;
pub mod container;
pub mod index;
pub mod pipeline;
pub mod report;
pub mod resolve;

#[doc(inline)]
pub use classify::{classify, classify_file, FileClassification, VersionProbe};
#[doc(inline)]
pub use container::{extract, ContainerEntry, Extraction};
#[doc(inline)]
pub use index::{PathTypeAggregator, PathTypeIndex};
#[doc(inline)]
pub use pipeline::{collect_inputs, FileReport, Outcome, Pipeline, Summary};
#[doc(inline)]
pub use report::{HtmlReport, JsonReport, ReportSink};
#[doc(inline)]
pub use resolve::{resolve, Resolution};

/// Errors from building path/type indexes
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Input path {0} is neither a file nor a directory")]
    InvalidInputPath(PathBuf),

    #[error("Failed to load class database {path}: {source}")]
    MissingClassDatabase {
        path: PathBuf,
        source: assetdump_unity::Error,
    },

    #[error("{0} is not a bundle or serialized file")]
    UnrecognizedFileFormat(PathBuf),

    #[error("{0} is not an indexed serialized file")]
    IneligibleFile(PathBuf),

    #[error("{file} contains no {class} object")]
    MissingEligibleObject { file: String, class: ClassId },

    #[error("{file} has no m_Container field")]
    MissingContainerField { file: String },

    #[error("Cannot resolve reference {reference}: {source}")]
    UnresolvableReference {
        reference: ObjectRef,
        source: assetdump_unity::Error,
    },

    #[error("Script {0} has no class name")]
    MissingScriptClass(ObjectRef),

    #[error(transparent)]
    Store(#[from] assetdump_unity::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Conditions that leave a file out of the report without counting as a failure
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Error::UnrecognizedFileFormat(_)
                | Error::IneligibleFile(_)
                | Error::MissingEligibleObject { .. }
                | Error::MissingContainerField { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
