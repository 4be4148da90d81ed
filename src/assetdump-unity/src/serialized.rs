//! Serialized object files (`.assets`, `globalgamemanagers`, bundle CABs)
//!
//! # Layout
//!
//! - Header (big-endian): metadata size, file size, format version, data
//!   offset; from format 9 an endianness byte and 3 reserved bytes; from
//!   format 22 the sizes and offset are repeated as 64-bit values.
//! - Metadata (file endianness): engine version, target platform, type
//!   table with optional embedded type trees, object table, script table,
//!   external file table, reference types, user information.
//! - Object data at `data_offset + byte_start`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::class_id::ClassId;
use crate::reader::{Endian, Reader};
use crate::type_tree::{build_tree, read_blob, read_legacy, TypeNode};
use crate::{Error, Result};

/// Oldest and newest format versions this reader understands
pub const MIN_FORMAT_VERSION: u32 = 9;
pub const MAX_FORMAT_VERSION: u32 = 23;

/// Entry of the type table
#[derive(Debug, Clone)]
pub struct SerializedType {
    pub class_id: ClassId,
    pub is_stripped: bool,
    pub script_type_index: i16,
    pub script_id: Option<[u8; 16]>,
    pub type_hash: Option<[u8; 16]>,
    pub tree: Option<Arc<TypeNode>>,
}

/// Entry of the object table
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub path_id: i64,
    /// Absolute offset of the object data within the file
    pub offset: u64,
    pub size: u32,
    pub type_index: i32,
    pub class_id: ClassId,
}

/// Entry of the external file table
#[derive(Debug, Clone)]
pub struct External {
    pub guid: [u8; 16],
    pub kind: i32,
    pub path: String,
}

impl External {
    /// Base file name of the external, with `archive:/CAB-…/` prefixes removed
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.path)
    }
}

/// Parsed serialized file, owning its bytes
#[derive(Debug)]
pub struct SerializedFile {
    pub format_version: u32,
    pub endian: Endian,
    pub unity_version: String,
    pub target_platform: i32,
    pub enable_type_tree: bool,
    pub types: Vec<SerializedType>,
    pub objects: Vec<ObjectInfo>,
    pub externals: Vec<External>,
    by_path_id: HashMap<i64, usize>,
    bytes: Vec<u8>,
}

impl SerializedFile {
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let parsed = {
            let mut reader = Reader::new(&bytes, Endian::Big);
            Metadata::read(&mut reader)?
        };

        let by_path_id = parsed
            .objects
            .iter()
            .enumerate()
            .map(|(i, o)| (o.path_id, i))
            .collect();

        Ok(Self {
            format_version: parsed.format_version,
            endian: parsed.endian,
            unity_version: parsed.unity_version,
            target_platform: parsed.target_platform,
            enable_type_tree: parsed.enable_type_tree,
            types: parsed.types,
            objects: parsed.objects,
            externals: parsed.externals,
            by_path_id,
            bytes,
        })
    }

    pub fn object(&self, path_id: i64) -> Option<&ObjectInfo> {
        self.by_path_id.get(&path_id).map(|&i| &self.objects[i])
    }

    /// Objects of one class, in table order
    pub fn objects_of_class(&self, class_id: ClassId) -> impl Iterator<Item = &ObjectInfo> + '_ {
        self.objects.iter().filter(move |o| o.class_id == class_id)
    }

    pub fn object_data(&self, object: &ObjectInfo) -> Result<&[u8]> {
        let start = usize::try_from(object.offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(object.size as usize);
        self.bytes.get(start..end).ok_or(Error::UnexpectedEof {
            offset: start,
            needed: object.size as usize,
            available: self.bytes.len().saturating_sub(start),
        })
    }

    /// Embedded type tree describing `object`, if the file carries type trees
    pub fn type_tree(&self, object: &ObjectInfo) -> Option<Arc<TypeNode>> {
        if !self.enable_type_tree {
            return None;
        }
        let entry = if self.format_version >= 16 {
            usize::try_from(object.type_index)
                .ok()
                .and_then(|i| self.types.get(i))
        } else {
            self.types
                .iter()
                .find(|t| t.class_id.0 == object.type_index)
        };
        entry.and_then(|t| t.tree.clone())
    }
}

struct Metadata {
    format_version: u32,
    endian: Endian,
    unity_version: String,
    target_platform: i32,
    enable_type_tree: bool,
    types: Vec<SerializedType>,
    objects: Vec<ObjectInfo>,
    externals: Vec<External>,
}

impl Metadata {
    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let _metadata_size = reader.read_u32()?;
        let _file_size = reader.read_u32()?;
        let format_version = reader.read_u32()?;
        let mut data_offset = reader.read_u32()? as u64;

        if !(MIN_FORMAT_VERSION..=MAX_FORMAT_VERSION).contains(&format_version) {
            return Err(Error::UnsupportedFileVersion(format_version));
        }

        let endian = if reader.read_u8()? == 0 {
            Endian::Little
        } else {
            Endian::Big
        };
        reader.skip(3)?;

        if format_version >= 22 {
            let _metadata_size = reader.read_u32()?;
            let _file_size = reader.read_u64()?;
            data_offset = reader.read_u64()?;
            let _unknown = reader.read_u64()?;
        }

        reader.set_endian(endian);

        let unity_version = reader.read_cstring()?;
        let target_platform = reader.read_i32()?;
        let enable_type_tree = if format_version >= 13 {
            reader.read_bool()?
        } else {
            true
        };

        let mut meta = Metadata {
            format_version,
            endian,
            unity_version,
            target_platform,
            enable_type_tree,
            types: Vec::new(),
            objects: Vec::new(),
            externals: Vec::new(),
        };

        let type_count = read_count(reader, 4)?;
        for _ in 0..type_count {
            let ty = meta.read_type(reader, false)?;
            meta.types.push(ty);
        }

        let big_ids = (7..14).contains(&format_version) && reader.read_i32()? != 0;

        let object_count = read_count(reader, 20)?;
        for _ in 0..object_count {
            let object = meta.read_object(reader, big_ids, data_offset)?;
            meta.objects.push(object);
        }

        if format_version >= 11 {
            let script_count = read_count(reader, 8)?;
            for _ in 0..script_count {
                let _file_index = reader.read_i32()?;
                if format_version >= 14 {
                    reader.align(4);
                    let _local_id = reader.read_i64()?;
                } else {
                    let _local_id = reader.read_i32()?;
                }
            }
        }

        let external_count = read_count(reader, 22)?;
        for _ in 0..external_count {
            let _asset_path = reader.read_cstring()?;
            let guid = reader.read_array()?;
            let kind = reader.read_i32()?;
            let path = reader.read_cstring()?;
            meta.externals.push(External { guid, kind, path });
        }

        if format_version >= 20 {
            let ref_count = read_count(reader, 4)?;
            for _ in 0..ref_count {
                meta.read_type(reader, true)?;
            }
        }

        let _user_information = reader.read_cstring()?;

        Ok(meta)
    }

    fn read_type(&self, reader: &mut Reader<'_>, is_ref_type: bool) -> Result<SerializedType> {
        let version = self.format_version;
        let class_id = ClassId(reader.read_i32()?);
        let is_stripped = if version >= 16 {
            reader.read_bool()?
        } else {
            false
        };
        let script_type_index = if version >= 17 {
            reader.read_i16()?
        } else {
            -1
        };

        let mut script_id = None;
        let mut type_hash = None;
        if version >= 13 {
            let has_script_id = (is_ref_type && script_type_index >= 0)
                || (version < 16 && class_id.0 < 0)
                || (version >= 16 && class_id == ClassId::MONO_BEHAVIOUR);
            if has_script_id {
                script_id = Some(reader.read_array()?);
            }
            type_hash = Some(reader.read_array()?);
        }

        let mut tree = None;
        if self.enable_type_tree {
            let nodes = if version >= 12 || version == 10 {
                read_blob(reader, version)?
            } else {
                read_legacy(reader, version)?
            };
            tree = Some(Arc::new(build_tree(&nodes)?));

            if version >= 21 {
                if is_ref_type {
                    let _class_name = reader.read_cstring()?;
                    let _namespace = reader.read_cstring()?;
                    let _assembly = reader.read_cstring()?;
                } else {
                    let dependency_count = read_count(reader, 4)?;
                    reader.skip(dependency_count * 4)?;
                }
            }
        }

        Ok(SerializedType {
            class_id,
            is_stripped,
            script_type_index,
            script_id,
            type_hash,
            tree,
        })
    }

    fn read_object(
        &self,
        reader: &mut Reader<'_>,
        big_ids: bool,
        data_offset: u64,
    ) -> Result<ObjectInfo> {
        let version = self.format_version;
        let path_id = if big_ids {
            reader.read_i64()?
        } else if version < 14 {
            reader.read_i32()? as i64
        } else {
            reader.align(4);
            reader.read_i64()?
        };

        let byte_start = if version >= 22 {
            reader.read_i64()? as u64
        } else {
            reader.read_u32()? as u64
        };
        let size = reader.read_u32()?;
        let type_index = reader.read_i32()?;

        let class_id = if version < 16 {
            ClassId(reader.read_u16()? as i32)
        } else {
            let entry = usize::try_from(type_index)
                .ok()
                .and_then(|i| self.types.get(i))
                .ok_or_else(|| {
                    Error::InvalidSerializedFile(format!(
                        "object {} uses unknown type index {}",
                        path_id, type_index
                    ))
                })?;
            entry.class_id
        };

        if version < 11 {
            let _is_destroyed = reader.read_u16()?;
        }
        if (11..17).contains(&version) {
            let _script_type_index = reader.read_i16()?;
        }
        if version == 15 || version == 16 {
            let _stripped = reader.read_u8()?;
        }

        Ok(ObjectInfo {
            path_id,
            offset: data_offset.saturating_add(byte_start),
            size,
            type_index,
            class_id,
        })
    }
}

fn read_count(reader: &mut Reader<'_>, min_entry_size: usize) -> Result<usize> {
    let count = reader.read_i32()?;
    if count < 0 || (count as usize).saturating_mul(min_entry_size) > reader.remaining() {
        return Err(Error::InvalidSerializedFile(format!(
            "table size {} exceeds remaining metadata",
            count
        )));
    }
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, ObjectWriter, SerializedFileBuilder};
    use crate::value::{Field, ObjectRef};

    fn sample() -> Vec<u8> {
        let mut builder = SerializedFileBuilder::new("2019.4.31f1");
        let texture = builder.add_type(ClassId::TEXTURE_2D, fixtures::named_object_tree("Texture2D"));
        let script = builder.add_type(ClassId::MONO_SCRIPT, fixtures::mono_script_tree());
        builder.add_object(1, texture, fixtures::named_object("hero"));
        builder.add_object(
            -7,
            script,
            fixtures::mono_script("PlayerController", "Game"),
        );
        builder.add_external("archive:/CAB-ffff/CAB-ffff");
        builder.build()
    }

    #[test]
    fn test_parse_tables() {
        let file = SerializedFile::parse(sample()).unwrap();
        assert_eq!(file.format_version, 22);
        assert_eq!(file.endian, Endian::Little);
        assert_eq!(file.unity_version, "2019.4.31f1");
        assert!(file.enable_type_tree);
        assert_eq!(file.types.len(), 2);
        assert_eq!(file.objects.len(), 2);
        assert_eq!(file.object(-7).unwrap().class_id, ClassId::MONO_SCRIPT);
        assert_eq!(file.externals[0].file_name(), "CAB-ffff");
        assert!(file.object(99).is_none());
    }

    #[test]
    fn test_read_object_through_type_tree() {
        let file = SerializedFile::parse(sample()).unwrap();
        let info = file.object(-7).unwrap();
        let tree = file.type_tree(info).unwrap();
        let field = tree
            .read_object(file.object_data(info).unwrap(), file.endian)
            .unwrap();
        assert_eq!(
            field.get("m_ClassName").and_then(Field::as_str),
            Some("PlayerController")
        );
        assert_eq!(field.get("m_Namespace").and_then(Field::as_str), Some("Game"));
    }

    #[test]
    fn test_objects_of_class_in_table_order() {
        let mut builder = SerializedFileBuilder::new("2019.4.31f1");
        let bundle = builder.add_type(ClassId::ASSET_BUNDLE, fixtures::asset_bundle_tree());
        let empty: Vec<(&str, ObjectRef)> = Vec::new();
        builder.add_object(5, bundle, fixtures::asset_bundle("b", &empty));
        builder.add_object(2, bundle, fixtures::asset_bundle("a", &empty));
        let file = SerializedFile::parse(builder.build()).unwrap();

        let ids: Vec<i64> = file
            .objects_of_class(ClassId::ASSET_BUNDLE)
            .map(|o| o.path_id)
            .collect();
        assert_eq!(ids, vec![5, 2]);
    }

    #[test]
    fn test_without_type_trees() {
        let mut builder = SerializedFileBuilder::new("2019.4.31f1").without_type_trees();
        let ty = builder.add_type(ClassId::RESOURCE_MANAGER, fixtures::resource_manager_tree());
        let mut data = ObjectWriter::new();
        data.i32(0).i32(0);
        builder.add_object(1, ty, data.finish());
        let file = SerializedFile::parse(builder.build()).unwrap();

        assert!(!file.enable_type_tree);
        let info = file.object(1).unwrap();
        assert_eq!(info.class_id, ClassId::RESOURCE_MANAGER);
        assert!(file.type_tree(info).is_none());
        assert_eq!(file.object_data(info).unwrap().len(), 8);
    }

    #[test]
    fn test_parse_format_17() {
        let mut builder = SerializedFileBuilder::new("2017.4.40f1").format(17);
        let ty = builder.add_type(ClassId::MATERIAL, fixtures::named_object_tree("Material"));
        builder.add_object(3, ty, fixtures::named_object("skin"));
        let bytes = builder.build();
        assert_eq!(&bytes[0x14..0x1f], b"2017.4.40f1");

        let file = SerializedFile::parse(bytes).unwrap();
        assert_eq!(file.format_version, 17);
        let info = file.object(3).unwrap();
        assert_eq!(info.class_id, ClassId::MATERIAL);
        let field = file
            .type_tree(info)
            .unwrap()
            .read_object(file.object_data(info).unwrap(), file.endian)
            .unwrap();
        assert_eq!(field.get("m_Name").and_then(Field::as_str), Some("skin"));
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let mut bytes = sample();
        bytes[8..12].copy_from_slice(&5u32.to_be_bytes());
        assert!(matches!(
            SerializedFile::parse(bytes),
            Err(Error::UnsupportedFileVersion(5))
        ));
    }

    #[test]
    fn test_rejects_truncated_metadata() {
        let bytes = sample();
        assert!(SerializedFile::parse(bytes[..60].to_vec()).is_err());
    }
}
