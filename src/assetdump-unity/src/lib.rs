//! Unity content reader backing assetdump
//!
//! Parses UnityFS bundles and serialized object files, decodes objects through
//! their type trees, and loads the `classdata.tpk` type-database package.
//!
//! # Format Overview
//!
//! ## UnityFS bundle (`UnityFS\0`)
//!
//! - Big-endian header: format version, engine version, engine revision
//! - Block info (hash, block table, directory), optionally compressed
//! - Data blocks (none / LZMA / LZ4), concatenated into one virtual stream
//! - Directory nodes slice the stream into sub-files (`CAB-…`, `.resS`)
//!
//! ## Serialized file
//!
//! - Big-endian header (format version at 0x08, engine version string at 0x14
//!   for formats before 22)
//! - Type table with optional embedded type trees
//! - Object table (path id → offset, size, type)
//! - External file table used by cross-file references
//!
//! ## Class package (`TPK*`)
//!
//! - Little-endian header and optionally compressed payload
//! - Version-ranged class entries sharing one node and string buffer

pub mod bundle;
mod class_id;
mod common_strings;
pub mod compression;
mod manager;
pub mod reader;
pub mod serialized;
mod store;
pub mod tpk;
pub mod type_tree;
mod value;
mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use bundle::Bundle;
pub use class_id::ClassId;
pub use common_strings::{common_offset, common_string};
pub use manager::{AssetsManager, BundleId};
pub use serialized::SerializedFile;
pub use store::{FileId, ObjectHandle, ObjectStore};
pub use tpk::{ClassDatabase, ClassPackage};
pub use type_tree::TypeNode;
pub use value::{Field, ObjectRef, Value};
pub use version::UnityVersion;

/// Errors from reading Unity content
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected end of data at offset {offset}: need {needed} bytes, {available} available")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Invalid signature: {0:?}")]
    InvalidSignature(String),

    #[error("Unsupported bundle format version {0}")]
    UnsupportedBundleVersion(u32),

    #[error("Unsupported serialized file format version {0}")]
    UnsupportedFileVersion(u32),

    #[error("Unsupported compression type {0}")]
    UnsupportedCompression(u32),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Decompression size mismatch: expected {expected}, got {actual}")]
    DecompressionSize { expected: usize, actual: usize },

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Invalid serialized file: {0}")]
    InvalidSerializedFile(String),

    #[error("Invalid type tree: {0}")]
    InvalidTypeTree(String),

    #[error("Invalid array size {size} for field '{field}'")]
    InvalidArraySize { field: String, size: i64 },

    #[error("No type tree available for class {0}")]
    MissingTypeTree(ClassId),

    #[error("Null object reference")]
    NullReference,

    #[error("Object {path_id} not found in {file}")]
    ObjectNotFound { file: String, path_id: i64 },

    #[error("External file {file_id} of {file} is not loaded")]
    ExternalNotFound { file: String, file_id: i32 },

    #[error("Unknown file handle {0}")]
    UnknownFile(usize),

    #[error("Invalid class package: {0}")]
    InvalidClassPackage(String),

    #[error("No class package loaded")]
    NoClassPackage,

    #[error("Invalid engine version: {0:?}")]
    InvalidVersion(String),
}

pub type Result<T> = std::result::Result<T, Error>;
