//! Loaded-file context: bundles, serialized files and type databases

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bundle::Bundle;
use crate::class_id::ClassId;
use crate::serialized::{ObjectInfo, SerializedFile};
use crate::store::{FileId, ObjectHandle, ObjectStore};
use crate::tpk::{ClassDatabase, ClassPackage};
use crate::type_tree::TypeNode;
use crate::value::{Field, ObjectRef};
use crate::version::UnityVersion;
use crate::{Error, Result};

/// Index of a loaded bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleId(pub usize);

struct LoadedFile {
    name: String,
    /// Location on disk, for files not read from a bundle
    path: Option<PathBuf>,
    bundle: Option<BundleId>,
    file: SerializedFile,
}

struct LoadedBundle {
    path: PathBuf,
    bundle: Bundle,
    files: Option<Vec<FileId>>,
}

/// Owns every loaded file and the per-version type database cache
///
/// Files live until [`AssetsManager::unload_files`]; databases live as long
/// as the manager.
#[derive(Default)]
pub struct AssetsManager {
    package: Option<ClassPackage>,
    databases: HashMap<String, Arc<ClassDatabase>>,
    files: Vec<LoadedFile>,
    bundles: Vec<LoadedBundle>,
}

impl AssetsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_class_package(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let package = ClassPackage::load(path.as_ref())?;
        self.set_class_package(package);
        Ok(())
    }

    /// Replace the class package, dropping databases built from the old one
    pub fn set_class_package(&mut self, package: ClassPackage) {
        self.package = Some(package);
        self.databases.clear();
    }

    /// Type database for an engine version, built once and cached
    pub fn load_class_database(&mut self, version: &str) -> Result<Arc<ClassDatabase>> {
        if let Some(db) = self.databases.get(version) {
            return Ok(Arc::clone(db));
        }
        let package = self.package.as_ref().ok_or(Error::NoClassPackage)?;
        let parsed: UnityVersion = version.parse()?;
        let db = Arc::new(package.database(parsed)?);
        tracing::debug!(version, classes = db.len(), "built type database");
        self.databases.insert(version.to_string(), Arc::clone(&db));
        Ok(db)
    }

    pub fn cached_databases(&self) -> usize {
        self.databases.len()
    }

    pub fn load_bundle(&mut self, path: impl AsRef<Path>) -> Result<BundleId> {
        let path = path.as_ref();
        if let Some(i) = self.bundles.iter().position(|b| b.path == path) {
            return Ok(BundleId(i));
        }
        let bytes = std::fs::read(path)?;
        let bundle = Bundle::parse(&bytes)?;
        self.bundles.push(LoadedBundle {
            path: path.to_path_buf(),
            bundle,
            files: None,
        });
        Ok(BundleId(self.bundles.len() - 1))
    }

    /// Load the serialized sub-files of a bundle
    ///
    /// Nodes flagged as serialized are parsed strictly. Unflagged nodes
    /// without an extension are probed and kept only if they parse.
    pub fn bundle_assets_files(&mut self, bundle: BundleId) -> Result<Vec<FileId>> {
        let loaded = self
            .bundles
            .get(bundle.0)
            .ok_or(Error::UnknownFile(bundle.0))?;
        if let Some(files) = &loaded.files {
            return Ok(files.clone());
        }

        let mut parsed = Vec::new();
        for node in &loaded.bundle.nodes {
            let data = loaded.bundle.node_data(node).to_vec();
            let name = base_name(&node.path).to_string();
            if node.is_serialized() {
                parsed.push((name, SerializedFile::parse(data)?));
            } else if !name.contains('.') {
                match SerializedFile::parse(data) {
                    Ok(file) => parsed.push((name, file)),
                    Err(e) => tracing::debug!(node = %node.path, error = %e, "not a serialized file"),
                }
            }
        }

        let mut ids = Vec::with_capacity(parsed.len());
        for (name, file) in parsed {
            ids.push(self.push_file(name, None, Some(bundle), file));
        }
        self.bundles[bundle.0].files = Some(ids.clone());
        Ok(ids)
    }

    pub fn load_assets_file(&mut self, path: impl AsRef<Path>) -> Result<FileId> {
        let path = path.as_ref();
        if let Some(i) = self
            .files
            .iter()
            .position(|f| f.path.as_deref() == Some(path))
        {
            return Ok(FileId(i));
        }
        let bytes = std::fs::read(path)?;
        let file = SerializedFile::parse(bytes)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.push_file(name, Some(path.to_path_buf()), None, file))
    }

    fn push_file(
        &mut self,
        name: String,
        path: Option<PathBuf>,
        bundle: Option<BundleId>,
        file: SerializedFile,
    ) -> FileId {
        tracing::debug!(
            file = %name,
            version = %file.unity_version,
            objects = file.objects.len(),
            "loaded serialized file"
        );
        self.files.push(LoadedFile {
            name,
            path,
            bundle,
            file,
        });
        FileId(self.files.len() - 1)
    }

    /// Objects of one class, in object table order
    pub fn objects_of_class(&self, file: FileId, class_id: ClassId) -> Result<Vec<ObjectHandle>> {
        let loaded = self.file(file)?;
        Ok(loaded
            .file
            .objects_of_class(class_id)
            .map(|o| ObjectHandle::new(file, o.path_id))
            .collect())
    }

    /// Engine version of a file
    ///
    /// Release builds may strip the version to "0.0.0"; the bundle revision
    /// stands in for it when the file came from a bundle.
    pub fn unity_version(&self, file: FileId) -> Result<String> {
        let loaded = self.file(file)?;
        Ok(self.effective_version(loaded).to_string())
    }

    fn effective_version<'a>(&'a self, loaded: &'a LoadedFile) -> &'a str {
        let stripped = loaded
            .file
            .unity_version
            .parse::<UnityVersion>()
            .map_or(true, |v| v.is_stripped());
        match loaded.bundle.and_then(|b| self.bundles.get(b.0)) {
            Some(bundle) if stripped => &bundle.bundle.header.engine_revision,
            _ => &loaded.file.unity_version,
        }
    }

    pub fn file_name(&self, file: FileId) -> Result<&str> {
        Ok(&self.file(file)?.name)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Drop every loaded file and bundle, keeping the type databases
    pub fn unload_files(&mut self) {
        self.files.clear();
        self.bundles.clear();
    }

    fn file(&self, file: FileId) -> Result<&LoadedFile> {
        self.files.get(file.0).ok_or(Error::UnknownFile(file.0))
    }

    fn object(&self, handle: ObjectHandle) -> Result<(&LoadedFile, &ObjectInfo)> {
        let loaded = self.file(handle.file)?;
        let info = loaded
            .file
            .object(handle.path_id)
            .ok_or_else(|| Error::ObjectNotFound {
                file: loaded.name.clone(),
                path_id: handle.path_id,
            })?;
        Ok((loaded, info))
    }

    fn find_file(&self, name: &str) -> Option<FileId> {
        self.files
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
            .map(FileId)
    }

    /// Locate the file an external reference points at, reading it from
    /// next to the referencing file when it is not loaded yet
    fn external_file(&mut self, from: FileId, file_id: i32) -> Result<FileId> {
        let loaded = self.file(from)?;
        let not_found = || Error::ExternalNotFound {
            file: loaded.name.clone(),
            file_id,
        };
        let external = file_id
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| loaded.file.externals.get(i))
            .ok_or_else(not_found)?;
        let name = base_name(&external.path).to_string();

        if let Some(id) = self.find_file(&name) {
            return Ok(id);
        }

        let candidate = loaded
            .path
            .as_deref()
            .and_then(Path::parent)
            .and_then(|dir| find_in_dir(dir, &name));
        let Some(candidate) = candidate else {
            return Err(not_found());
        };

        tracing::debug!(path = %candidate.display(), "loading dependency");
        self.load_assets_file(&candidate)
    }

    fn type_tree(&self, loaded: &LoadedFile, info: &ObjectInfo) -> Option<Arc<TypeNode>> {
        if let Some(tree) = loaded.file.type_tree(info) {
            return Some(tree);
        }
        let version = self.effective_version(loaded);
        self.databases
            .get(version)
            .and_then(|db| db.type_tree(info.class_id))
    }
}

impl ObjectStore for AssetsManager {
    fn resolve(&mut self, from: FileId, reference: ObjectRef) -> Result<ObjectHandle> {
        if reference.is_null() {
            return Err(Error::NullReference);
        }
        let file = if reference.file_id == 0 {
            self.file(from)?;
            from
        } else {
            self.external_file(from, reference.file_id)?
        };
        let handle = ObjectHandle::new(file, reference.path_id);
        self.object(handle)?;
        Ok(handle)
    }

    fn class_id(&self, object: ObjectHandle) -> Result<ClassId> {
        Ok(self.object(object)?.1.class_id)
    }

    fn read_object(&mut self, object: ObjectHandle) -> Result<Field> {
        let (loaded, info) = self.object(object)?;
        let tree = self
            .type_tree(loaded, info)
            .ok_or(Error::MissingTypeTree(info.class_id))?;
        let data = loaded.file.object_data(info)?;
        tree.read_object(data, loaded.file.endian)
    }
}

/// Case-insensitive lookup of a file name inside a directory
fn find_in_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.is_file()
                && path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(name))
        })
}

/// File name with `archive:/CAB-…/` style directories removed
fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
