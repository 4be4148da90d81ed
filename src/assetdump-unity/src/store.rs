//! Parsed-object API consumed by the path dumper

use crate::class_id::ClassId;
use crate::value::{Field, ObjectRef};
use crate::Result;

/// Index of a loaded file within a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub usize);

/// Absolute location of an object inside a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    pub file: FileId,
    pub path_id: i64,
}

impl ObjectHandle {
    pub fn new(file: FileId, path_id: i64) -> Self {
        Self { file, path_id }
    }
}

/// Lookup of objects by reference
///
/// References are relative to the file that contains them: `file_id` 0 is
/// that file, `n > 0` is entry `n - 1` of its external table.
pub trait ObjectStore {
    /// Turn a file-relative reference into an absolute handle
    ///
    /// Implementations may load the external file on demand, hence `&mut`.
    fn resolve(&mut self, from: FileId, reference: ObjectRef) -> Result<ObjectHandle>;

    /// Class id of an object, read from the object table
    fn class_id(&self, object: ObjectHandle) -> Result<ClassId>;

    /// Decode an object into its field tree
    fn read_object(&mut self, object: ObjectHandle) -> Result<Field>;
}
