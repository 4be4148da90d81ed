//! Class package (`classdata.tpk`) loading
//!
//! # Layout
//!
//! All integers are little-endian.
//!
//! - Header (20 bytes): magic `TPK*`, version byte (1), compression byte,
//!   data type byte (0 = type tree information), reserved byte, reserved u32,
//!   compressed size i32, uncompressed size i32
//! - Payload (after decompression):
//!   - creation time (i64)
//!   - engine versions (i32 count, packed u64 each)
//!   - class information (i32 count): class id (i32), then (i32 count) of
//!     packed version (u64), present flag (u8) and, when present, name (u16),
//!     base (u16), flags (u8), editor root (u16, flag 0x40), release root
//!     (u16, flag 0x80)
//!   - common strings: (i32 count) of (packed version, u8 count), then
//!     (i32 count) of u16 string indices
//!   - node buffer (i32 count): type name (u16), name (u16), byte size (i32),
//!     version (i16), type flags (u8), meta flag (u32), sub nodes (u16 count,
//!     u16 each)
//!   - string buffer (i32 count) of 7-bit length prefixed UTF-8 strings

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::class_id::ClassId;
use crate::compression::{lzma_alone, lzma_raw};
use crate::reader::{Endian, Reader};
use crate::type_tree::TypeNode;
use crate::version::UnityVersion;
use crate::{Error, Result};

/// `TPK*` read as a little-endian u32
pub const MAGIC: u32 = 0x2A4B_5054;

pub const HEADER_SIZE: usize = 20;

const FLAG_HAS_EDITOR_ROOT: u8 = 0x40;
const FLAG_HAS_RELEASE_ROOT: u8 = 0x80;

/// Deepest node nesting accepted when building a tree
const MAX_TREE_DEPTH: usize = 64;

/// Payload compression of a class package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageCompression {
    None,
    Lz4,
    Lzma,
}

impl PackageCompression {
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(PackageCompression::None),
            1 => Ok(PackageCompression::Lz4),
            2 => Ok(PackageCompression::Lzma),
            other => Err(Error::UnsupportedCompression(other as u32)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PackageCompression::None => 0,
            PackageCompression::Lz4 => 1,
            PackageCompression::Lzma => 2,
        }
    }
}

#[derive(Debug, Clone)]
struct PackageClass {
    name: u16,
    base: u16,
    release_root: Option<u16>,
}

#[derive(Debug, Clone)]
struct ClassHistory {
    class_id: ClassId,
    /// Ascending by version; `None` where the class does not exist
    entries: Vec<(UnityVersion, Option<PackageClass>)>,
}

#[derive(Debug, Clone)]
struct PackageNode {
    type_name: u16,
    name: u16,
    byte_size: i32,
    type_flags: u8,
    meta_flag: u32,
    children: Vec<u16>,
}

/// Parsed class package covering many engine versions
#[derive(Debug)]
pub struct ClassPackage {
    pub versions: Vec<UnityVersion>,
    classes: Vec<ClassHistory>,
    nodes: Vec<PackageNode>,
    strings: Vec<String>,
}

impl ClassPackage {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let payload = read_payload(bytes)?;
        let mut reader = Reader::new(&payload, Endian::Little);

        let _creation_time = reader.read_i64()?;

        let version_count = read_count(&mut reader, 8)?;
        let mut versions = Vec::with_capacity(version_count);
        for _ in 0..version_count {
            versions.push(UnityVersion::from_packed(reader.read_u64()?));
        }

        let class_count = read_count(&mut reader, 8)?;
        let mut classes = Vec::with_capacity(class_count);
        for _ in 0..class_count {
            classes.push(read_class_history(&mut reader)?);
        }

        let common_version_count = read_count(&mut reader, 9)?;
        reader.skip(common_version_count * 9)?;
        let common_index_count = read_count(&mut reader, 2)?;
        reader.skip(common_index_count * 2)?;

        let node_count = read_count(&mut reader, 17)?;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            nodes.push(read_node(&mut reader)?);
        }

        let string_count = read_count(&mut reader, 1)?;
        let mut strings = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            strings.push(read_prefixed_string(&mut reader)?);
        }

        tracing::debug!(
            versions = versions.len(),
            classes = classes.len(),
            nodes = nodes.len(),
            "loaded class package"
        );

        Ok(Self {
            versions,
            classes,
            nodes,
            strings,
        })
    }

    /// Build the type database for one engine version
    ///
    /// Each class uses the newest entry not newer than `version`; versions
    /// older than every entry use the oldest one.
    pub fn database(&self, version: UnityVersion) -> Result<ClassDatabase> {
        let mut classes = HashMap::new();
        for history in &self.classes {
            let Some(entry) = select_entry(&history.entries, version) else {
                continue;
            };
            let Some(class) = entry else {
                continue;
            };

            let name = self.string(class.name)?.to_string();
            let base = self.string(class.base)?;
            let tree = match class.release_root {
                Some(root) => Some(Arc::new(self.build_node(root, 0)?)),
                None => None,
            };
            classes.insert(
                history.class_id,
                ClassInfo {
                    name,
                    base: (!base.is_empty()).then(|| base.to_string()),
                    tree,
                },
            );
        }

        Ok(ClassDatabase { version, classes })
    }

    fn string(&self, index: u16) -> Result<&str> {
        self.strings
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| Error::InvalidClassPackage(format!("string index {} out of range", index)))
    }

    fn build_node(&self, index: u16, depth: usize) -> Result<TypeNode> {
        if depth > MAX_TREE_DEPTH {
            return Err(Error::InvalidClassPackage(format!(
                "node {} nested deeper than {}",
                index, MAX_TREE_DEPTH
            )));
        }
        let node = self
            .nodes
            .get(index as usize)
            .ok_or_else(|| Error::InvalidClassPackage(format!("node index {} out of range", index)))?;

        let mut children = Vec::with_capacity(node.children.len());
        for &child in &node.children {
            children.push(self.build_node(child, depth + 1)?);
        }

        Ok(TypeNode {
            type_name: self.string(node.type_name)?.to_string(),
            name: self.string(node.name)?.to_string(),
            byte_size: node.byte_size,
            type_flags: node.type_flags as u32,
            meta_flag: node.meta_flag,
            children,
        })
    }
}

fn select_entry<T>(entries: &[(UnityVersion, T)], version: UnityVersion) -> Option<&T> {
    entries
        .iter()
        .rev()
        .find(|(v, _)| *v <= version)
        .or_else(|| entries.first())
        .map(|(_, entry)| entry)
}

/// One class as it exists in a specific engine version
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    pub tree: Option<Arc<TypeNode>>,
}

/// Release type trees for one engine version
#[derive(Debug)]
pub struct ClassDatabase {
    version: UnityVersion,
    classes: HashMap<ClassId, ClassInfo>,
}

impl ClassDatabase {
    pub fn version(&self) -> UnityVersion {
        self.version
    }

    pub fn class(&self, class_id: ClassId) -> Option<&ClassInfo> {
        self.classes.get(&class_id)
    }

    pub fn type_tree(&self, class_id: ClassId) -> Option<Arc<TypeNode>> {
        self.classes.get(&class_id).and_then(|c| c.tree.clone())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

fn read_payload(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::new(bytes, Endian::Little);
    let magic = reader.read_u32()?;
    if magic != MAGIC {
        return Err(Error::InvalidClassPackage(format!(
            "bad magic 0x{:08x}",
            magic
        )));
    }
    let version = reader.read_u8()?;
    if version != 1 {
        return Err(Error::InvalidClassPackage(format!(
            "unsupported package version {}",
            version
        )));
    }
    let compression = reader.read_u8()?;
    let data_type = reader.read_u8()?;
    if data_type != 0 {
        return Err(Error::InvalidClassPackage(format!(
            "data type {} is not type tree information",
            data_type
        )));
    }
    let _reserved = reader.read_u8()?;
    let _reserved = reader.read_u32()?;
    let compressed_size = reader.read_i32()?;
    let uncompressed_size = reader.read_i32()?;
    if compressed_size < 0 || uncompressed_size < 0 {
        return Err(Error::InvalidClassPackage(format!(
            "negative payload size {} / {}",
            compressed_size, uncompressed_size
        )));
    }
    let compressed = reader.read_bytes(compressed_size as usize)?;
    let expected = uncompressed_size as usize;

    let payload = match PackageCompression::from_byte(compression)? {
        PackageCompression::None => compressed.to_vec(),
        PackageCompression::Lz4 => lz4_flex::decompress(compressed, expected)
            .map_err(|e| Error::Decompression(format!("lz4: {}", e)))?,
        PackageCompression::Lzma => {
            lzma_alone(compressed, expected).or_else(|_| lzma_raw(compressed, expected))?
        }
    };

    if payload.len() != expected {
        return Err(Error::DecompressionSize {
            expected,
            actual: payload.len(),
        });
    }
    Ok(payload)
}

fn read_class_history(reader: &mut Reader<'_>) -> Result<ClassHistory> {
    let class_id = ClassId(reader.read_i32()?);
    let count = read_count(reader, 9)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let version = UnityVersion::from_packed(reader.read_u64()?);
        let class = if reader.read_bool()? {
            let name = reader.read_u16()?;
            let base = reader.read_u16()?;
            let flags = reader.read_u8()?;
            if flags & FLAG_HAS_EDITOR_ROOT != 0 {
                let _editor_root = reader.read_u16()?;
            }
            let release_root = if flags & FLAG_HAS_RELEASE_ROOT != 0 {
                Some(reader.read_u16()?)
            } else {
                None
            };
            Some(PackageClass {
                name,
                base,
                release_root,
            })
        } else {
            None
        };
        entries.push((version, class));
    }
    Ok(ClassHistory { class_id, entries })
}

fn read_node(reader: &mut Reader<'_>) -> Result<PackageNode> {
    let type_name = reader.read_u16()?;
    let name = reader.read_u16()?;
    let byte_size = reader.read_i32()?;
    let _version = reader.read_i16()?;
    let type_flags = reader.read_u8()?;
    let meta_flag = reader.read_u32()?;
    let child_count = reader.read_u16()? as usize;
    let mut children = Vec::with_capacity(child_count.min(reader.remaining() / 2));
    for _ in 0..child_count {
        children.push(reader.read_u16()?);
    }
    Ok(PackageNode {
        type_name,
        name,
        byte_size,
        type_flags,
        meta_flag,
        children,
    })
}

/// String with a 7-bit encoded length prefix
fn read_prefixed_string(reader: &mut Reader<'_>) -> Result<String> {
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8()?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 28 {
            return Err(Error::InvalidClassPackage("string length prefix too long".into()));
        }
    }
    reader.read_string(len)
}

fn read_count(reader: &mut Reader<'_>, min_entry_size: usize) -> Result<usize> {
    let count = reader.read_i32()?;
    if count < 0 || (count as usize).saturating_mul(min_entry_size) > reader.remaining() {
        return Err(Error::InvalidClassPackage(format!(
            "table size {} exceeds remaining payload",
            count
        )));
    }
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, TpkBuilder};

    fn version(s: &str) -> UnityVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_database_picks_newest_entry_not_newer() {
        let old_tree = fixtures::named_object_tree("Texture2D");
        let new_tree = fixtures::texture_tree_with_dimensions();
        let bytes = TpkBuilder::new()
            .class(ClassId::TEXTURE_2D, "5.6.0f1", "Texture2D", &old_tree)
            .class(ClassId::TEXTURE_2D, "2019.1.0f1", "Texture2D", &new_tree)
            .build(PackageCompression::None);
        let package = ClassPackage::parse(&bytes).unwrap();

        let db = package.database(version("2019.4.31f1")).unwrap();
        assert_eq!(db.type_tree(ClassId::TEXTURE_2D).as_deref(), Some(&new_tree));

        let db = package.database(version("2018.4.36f1")).unwrap();
        assert_eq!(db.type_tree(ClassId::TEXTURE_2D).as_deref(), Some(&old_tree));

        let db = package.database(version("4.7.2f1")).unwrap();
        assert_eq!(db.type_tree(ClassId::TEXTURE_2D).as_deref(), Some(&old_tree));
        assert_eq!(db.class(ClassId::TEXTURE_2D).unwrap().name, "Texture2D");
    }

    #[test]
    fn test_removed_class_is_absent() {
        let tree = fixtures::named_object_tree("Texture2D");
        let bytes = TpkBuilder::new()
            .class(ClassId::TEXTURE_2D, "5.6.0f1", "Texture2D", &tree)
            .removed(ClassId::TEXTURE_2D, "2020.1.0f1")
            .build(PackageCompression::None);
        let package = ClassPackage::parse(&bytes).unwrap();

        assert!(package.database(version("2019.4.0f1")).unwrap().class(ClassId::TEXTURE_2D).is_some());
        let db = package.database(version("2021.3.0f1")).unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn test_lz4_payload() {
        let tree = fixtures::mono_script_tree();
        let builder = TpkBuilder::new().class(ClassId::MONO_SCRIPT, "2019.4.0f1", "MonoScript", &tree);
        let plain = ClassPackage::parse(&builder.build(PackageCompression::None)).unwrap();
        let packed = ClassPackage::parse(&builder.build(PackageCompression::Lz4)).unwrap();

        let v = version("2019.4.31f1");
        assert_eq!(
            plain.database(v).unwrap().type_tree(ClassId::MONO_SCRIPT),
            packed.database(v).unwrap().type_tree(ClassId::MONO_SCRIPT)
        );
    }

    #[test]
    fn test_lzma_payload() {
        let tree = fixtures::resource_manager_tree();
        let bytes = TpkBuilder::new()
            .class(ClassId::RESOURCE_MANAGER, "2018.4.0f1", "ResourceManager", &tree)
            .build(PackageCompression::Lzma);
        let package = ClassPackage::parse(&bytes).unwrap();
        let db = package.database(version("2019.4.31f1")).unwrap();
        assert_eq!(db.type_tree(ClassId::RESOURCE_MANAGER).as_deref(), Some(&tree));
    }

    #[test]
    fn test_rejects_bad_magic_and_brotli() {
        let tree = fixtures::mono_script_tree();
        let mut bytes = TpkBuilder::new()
            .class(ClassId::MONO_SCRIPT, "2019.4.0f1", "MonoScript", &tree)
            .build(PackageCompression::None);

        let mut brotli = bytes.clone();
        brotli[5] = 3;
        assert!(matches!(
            ClassPackage::parse(&brotli),
            Err(Error::UnsupportedCompression(3))
        ));

        bytes[0] = b'X';
        assert!(matches!(
            ClassPackage::parse(&bytes),
            Err(Error::InvalidClassPackage(_))
        ));
    }

    #[test]
    fn test_prefixed_string_lengths() {
        let mut data = vec![0x81, 0x01];
        data.extend(std::iter::repeat_n(b'a', 129));
        let mut reader = Reader::new(&data, Endian::Little);
        assert_eq!(read_prefixed_string(&mut reader).unwrap().len(), 129);
    }
}
