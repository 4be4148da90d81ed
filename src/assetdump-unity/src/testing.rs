//! Byte-level builders for synthetic bundles, serialized files and class
//! packages
//!
//! Everything here writes the formats the readers in this crate parse, with
//! little-endian metadata and embedded type trees by default.

use std::collections::HashMap;
use std::io::Read;

use crate::class_id::ClassId;
use crate::common_strings::{common_offset, COMMON_STRING_FLAG};
use crate::tpk::{PackageCompression, HEADER_SIZE, MAGIC};
use crate::type_tree::{TypeNode, ALIGN_FLAG, ARRAY_FLAG};
use crate::value::ObjectRef;
use crate::version::UnityVersion;

/// Little-endian object data writer
#[derive(Debug, Default, Clone)]
pub struct ObjectWriter {
    buf: Vec<u8>,
}

impl ObjectWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Length-prefixed string followed by 4-byte alignment
    pub fn string(&mut self, value: &str) -> &mut Self {
        self.i32(value.len() as i32);
        self.buf.extend_from_slice(value.as_bytes());
        self.align()
    }

    pub fn pptr(&mut self, reference: ObjectRef) -> &mut Self {
        self.i32(reference.file_id).i64(reference.path_id)
    }

    pub fn align(&mut self) -> &mut Self {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Type trees and matching object encoders for common classes
pub mod fixtures {
    use super::*;

    pub fn node(type_name: &str, name: &str, byte_size: i32, children: Vec<TypeNode>) -> TypeNode {
        TypeNode {
            type_name: type_name.to_string(),
            name: name.to_string(),
            byte_size,
            type_flags: 0,
            meta_flag: 0,
            children,
        }
    }

    fn aligned(mut node: TypeNode) -> TypeNode {
        node.meta_flag |= ALIGN_FLAG;
        node
    }

    fn array(data: TypeNode) -> TypeNode {
        TypeNode {
            type_flags: ARRAY_FLAG,
            ..node("Array", "Array", -1, vec![node("int", "size", 4, vec![]), data])
        }
    }

    pub fn int(name: &str) -> TypeNode {
        node("int", name, 4, vec![])
    }

    pub fn string(name: &str) -> TypeNode {
        let mut chars = array(node("char", "data", 1, vec![]));
        chars.meta_flag = ALIGN_FLAG;
        node("string", name, -1, vec![chars])
    }

    pub fn pptr(name: &str, target: &str) -> TypeNode {
        node(
            &format!("PPtr<{}>", target),
            name,
            12,
            vec![int("m_FileID"), node("SInt64", "m_PathID", 8, vec![])],
        )
    }

    pub fn vector(name: &str, element: TypeNode) -> TypeNode {
        aligned(node("vector", name, -1, vec![array(element)]))
    }

    pub fn map(name: &str, first: TypeNode, second: TypeNode) -> TypeNode {
        let pair = node("pair", "data", -1, vec![first, second]);
        aligned(node("map", name, -1, vec![array(pair)]))
    }

    /// `{ m_Name }`, shared by textures, materials, meshes and the like
    pub fn named_object_tree(type_name: &str) -> TypeNode {
        node(type_name, "Base", -1, vec![string("m_Name")])
    }

    pub fn named_object(name: &str) -> Vec<u8> {
        ObjectWriter::new().string(name).finish()
    }

    pub fn texture_tree_with_dimensions() -> TypeNode {
        node(
            "Texture2D",
            "Base",
            -1,
            vec![string("m_Name"), int("m_Width"), int("m_Height")],
        )
    }

    pub fn mono_script_tree() -> TypeNode {
        node(
            "MonoScript",
            "Base",
            -1,
            vec![
                string("m_Name"),
                int("m_ExecutionOrder"),
                string("m_ClassName"),
                string("m_Namespace"),
                string("m_AssemblyName"),
            ],
        )
    }

    pub fn mono_script(class_name: &str, namespace: &str) -> Vec<u8> {
        ObjectWriter::new()
            .string(class_name)
            .i32(0)
            .string(class_name)
            .string(namespace)
            .string("Assembly-CSharp.dll")
            .finish()
    }

    pub fn mono_behaviour_tree() -> TypeNode {
        node(
            "MonoBehaviour",
            "Base",
            -1,
            vec![
                pptr("m_GameObject", "GameObject"),
                aligned(node("UInt8", "m_Enabled", 1, vec![])),
                pptr("m_Script", "MonoScript"),
                string("m_Name"),
            ],
        )
    }

    pub fn mono_behaviour(script: ObjectRef, name: &str) -> Vec<u8> {
        ObjectWriter::new()
            .pptr(ObjectRef::new(0, 0))
            .u8(1)
            .align()
            .pptr(script)
            .string(name)
            .finish()
    }

    fn asset_info(name: &str) -> TypeNode {
        node(
            "AssetInfo",
            name,
            -1,
            vec![int("preloadIndex"), int("preloadSize"), pptr("asset", "Object")],
        )
    }

    pub fn asset_bundle_tree() -> TypeNode {
        node(
            "AssetBundle",
            "Base",
            -1,
            vec![
                string("m_Name"),
                vector("m_PreloadTable", pptr("data", "Object")),
                map("m_Container", string("first"), asset_info("second")),
                asset_info("m_MainAsset"),
                node("unsigned int", "m_RuntimeCompatibility", 4, vec![]),
                string("m_AssetBundleName"),
            ],
        )
    }

    pub fn asset_bundle(name: &str, rows: &[(&str, ObjectRef)]) -> Vec<u8> {
        let mut w = ObjectWriter::new();
        w.string(name);
        w.i32(rows.len() as i32);
        for (_, reference) in rows {
            w.pptr(*reference);
        }
        w.i32(rows.len() as i32);
        for (i, (path, reference)) in rows.iter().enumerate() {
            w.string(path).i32(i as i32).i32(1).pptr(*reference);
        }
        w.i32(0).i32(0).pptr(ObjectRef::new(0, 0));
        w.u32(1);
        w.string(name);
        w.finish()
    }

    /// AssetBundle layout without an `m_Container` field
    pub fn asset_bundle_without_container() -> TypeNode {
        node("AssetBundle", "Base", -1, vec![string("m_Name")])
    }

    pub fn resource_manager_tree() -> TypeNode {
        let dependency = node(
            "ResourceManager_Dependency",
            "data",
            -1,
            vec![
                pptr("m_Key", "Object"),
                vector("m_Dependencies", pptr("data", "Object")),
            ],
        );
        node(
            "ResourceManager",
            "Base",
            -1,
            vec![
                map("m_Container", string("first"), pptr("second", "Object")),
                vector("m_DependentAssets", dependency),
            ],
        )
    }

    pub fn resource_manager(rows: &[(&str, ObjectRef)]) -> Vec<u8> {
        let mut w = ObjectWriter::new();
        w.i32(rows.len() as i32);
        for (path, reference) in rows {
            w.string(path).pptr(*reference);
        }
        w.i32(0);
        w.finish()
    }
}

/// Serialized file writer for formats 17 through 22
#[derive(Debug, Clone)]
pub struct SerializedFileBuilder {
    format_version: u32,
    unity_version: String,
    type_trees: bool,
    types: Vec<(ClassId, TypeNode)>,
    objects: Vec<(i64, i32, Vec<u8>)>,
    externals: Vec<String>,
}

impl SerializedFileBuilder {
    pub fn new(unity_version: &str) -> Self {
        Self {
            format_version: 22,
            unity_version: unity_version.to_string(),
            type_trees: true,
            types: Vec::new(),
            objects: Vec::new(),
            externals: Vec::new(),
        }
    }

    pub fn format(mut self, version: u32) -> Self {
        assert!((17..=22).contains(&version), "unsupported format {}", version);
        self.format_version = version;
        self
    }

    pub fn without_type_trees(mut self) -> Self {
        self.type_trees = false;
        self
    }

    /// Register a type and return its type index
    pub fn add_type(&mut self, class_id: ClassId, tree: TypeNode) -> i32 {
        self.types.push((class_id, tree));
        self.types.len() as i32 - 1
    }

    pub fn add_object(&mut self, path_id: i64, type_index: i32, data: Vec<u8>) {
        self.objects.push((path_id, type_index, data));
    }

    pub fn add_external(&mut self, path: &str) {
        self.externals.push(path.to_string());
    }

    pub fn build(&self) -> Vec<u8> {
        let v = self.format_version;
        let header_size = if v >= 22 { 48 } else { 20 };
        let mut out = vec![0u8; header_size];

        put_cstring(&mut out, &self.unity_version);
        out.extend_from_slice(&19i32.to_le_bytes());
        out.push(self.type_trees as u8);

        out.extend_from_slice(&(self.types.len() as i32).to_le_bytes());
        for (class_id, tree) in &self.types {
            out.extend_from_slice(&class_id.0.to_le_bytes());
            out.push(0);
            out.extend_from_slice(&(-1i16).to_le_bytes());
            if *class_id == ClassId::MONO_BEHAVIOUR {
                out.extend_from_slice(&[0xab; 16]);
            }
            out.extend_from_slice(&[0xcd; 16]);
            if self.type_trees {
                write_blob(&mut out, tree, v);
                if v >= 21 {
                    out.extend_from_slice(&0i32.to_le_bytes());
                }
            }
        }

        let mut offsets = Vec::with_capacity(self.objects.len());
        let mut data_size = 0usize;
        for (_, _, data) in &self.objects {
            data_size = data_size.next_multiple_of(8);
            offsets.push(data_size);
            data_size += data.len();
        }

        out.extend_from_slice(&(self.objects.len() as i32).to_le_bytes());
        for ((path_id, type_index, data), offset) in self.objects.iter().zip(&offsets) {
            while out.len() % 4 != 0 {
                out.push(0);
            }
            out.extend_from_slice(&path_id.to_le_bytes());
            if v >= 22 {
                out.extend_from_slice(&(*offset as i64).to_le_bytes());
            } else {
                out.extend_from_slice(&(*offset as u32).to_le_bytes());
            }
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&type_index.to_le_bytes());
        }

        out.extend_from_slice(&0i32.to_le_bytes());

        out.extend_from_slice(&(self.externals.len() as i32).to_le_bytes());
        for path in &self.externals {
            put_cstring(&mut out, "");
            out.extend_from_slice(&[0; 16]);
            out.extend_from_slice(&0i32.to_le_bytes());
            put_cstring(&mut out, path);
        }

        if v >= 20 {
            out.extend_from_slice(&0i32.to_le_bytes());
        }
        put_cstring(&mut out, "");

        let metadata_size = out.len() - header_size;
        let data_offset = out.len().next_multiple_of(16);
        out.resize(data_offset + data_size, 0);
        for ((_, _, data), offset) in self.objects.iter().zip(&offsets) {
            let start = data_offset + offset;
            out[start..start + data.len()].copy_from_slice(data);
        }
        let file_size = out.len();

        let mut header = Vec::with_capacity(header_size);
        if v >= 22 {
            header.extend_from_slice(&[0; 8]);
            header.extend_from_slice(&v.to_be_bytes());
            header.extend_from_slice(&[0; 4]);
            header.extend_from_slice(&[0, 0, 0, 0]);
            header.extend_from_slice(&(metadata_size as u32).to_be_bytes());
            header.extend_from_slice(&(file_size as u64).to_be_bytes());
            header.extend_from_slice(&(data_offset as u64).to_be_bytes());
            header.extend_from_slice(&[0; 8]);
        } else {
            header.extend_from_slice(&(metadata_size as u32).to_be_bytes());
            header.extend_from_slice(&(file_size as u32).to_be_bytes());
            header.extend_from_slice(&v.to_be_bytes());
            header.extend_from_slice(&(data_offset as u32).to_be_bytes());
            header.extend_from_slice(&[0, 0, 0, 0]);
        }
        out[..header_size].copy_from_slice(&header);
        out
    }
}

fn put_cstring(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(value.as_bytes());
    out.push(0);
}

fn flatten<'a>(node: &'a TypeNode, level: u8, nodes: &mut Vec<(u8, &'a TypeNode)>) {
    nodes.push((level, node));
    for child in &node.children {
        flatten(child, level + 1, nodes);
    }
}

fn write_blob(out: &mut Vec<u8>, tree: &TypeNode, format_version: u32) {
    let mut nodes = Vec::new();
    flatten(tree, 0, &mut nodes);

    let mut strings: Vec<u8> = Vec::new();
    let mut local: HashMap<String, u32> = HashMap::new();
    let mut string_offset = |value: &str| -> u32 {
        if let Some(common) = common_offset(value) {
            return common | COMMON_STRING_FLAG;
        }
        if let Some(&offset) = local.get(value) {
            return offset;
        }
        let offset = strings.len() as u32;
        strings.extend_from_slice(value.as_bytes());
        strings.push(0);
        local.insert(value.to_string(), offset);
        offset
    };

    let mut encoded = Vec::new();
    for (index, (level, node)) in nodes.iter().enumerate() {
        let type_offset = string_offset(&node.type_name);
        let name_offset = string_offset(&node.name);
        encoded.extend_from_slice(&1u16.to_le_bytes());
        encoded.push(*level);
        encoded.push(node.type_flags as u8);
        encoded.extend_from_slice(&type_offset.to_le_bytes());
        encoded.extend_from_slice(&name_offset.to_le_bytes());
        encoded.extend_from_slice(&node.byte_size.to_le_bytes());
        encoded.extend_from_slice(&(index as i32).to_le_bytes());
        encoded.extend_from_slice(&node.meta_flag.to_le_bytes());
        if format_version >= 19 {
            encoded.extend_from_slice(&0u64.to_le_bytes());
        }
    }

    out.extend_from_slice(&(nodes.len() as i32).to_le_bytes());
    out.extend_from_slice(&(strings.len() as i32).to_le_bytes());
    out.extend_from_slice(&encoded);
    out.extend_from_slice(&strings);
}

/// UnityFS bundle writer with a single uncompressed data block
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    revision: String,
    files: Vec<(String, Vec<u8>, bool)>,
    lz4_block_info: bool,
    info_at_end: bool,
}

impl BundleBuilder {
    pub fn new(revision: &str) -> Self {
        Self {
            revision: revision.to_string(),
            files: Vec::new(),
            lz4_block_info: false,
            info_at_end: false,
        }
    }

    pub fn file(mut self, name: &str, data: Vec<u8>, serialized: bool) -> Self {
        self.files.push((name.to_string(), data, serialized));
        self
    }

    pub fn lz4_block_info(mut self, enabled: bool) -> Self {
        self.lz4_block_info = enabled;
        self
    }

    pub fn info_at_end(mut self, enabled: bool) -> Self {
        self.info_at_end = enabled;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let data: Vec<u8> = self
            .files
            .iter()
            .flat_map(|(_, bytes, _)| bytes.iter().copied())
            .collect();

        let mut info = vec![0u8; 16];
        info.extend_from_slice(&1i32.to_be_bytes());
        info.extend_from_slice(&(data.len() as u32).to_be_bytes());
        info.extend_from_slice(&(data.len() as u32).to_be_bytes());
        info.extend_from_slice(&0u16.to_be_bytes());
        info.extend_from_slice(&(self.files.len() as i32).to_be_bytes());
        let mut offset = 0i64;
        for (name, bytes, serialized) in &self.files {
            info.extend_from_slice(&offset.to_be_bytes());
            info.extend_from_slice(&(bytes.len() as i64).to_be_bytes());
            let flags: u32 = if *serialized { 4 } else { 0 };
            info.extend_from_slice(&flags.to_be_bytes());
            put_cstring(&mut info, name);
            offset += bytes.len() as i64;
        }

        let uncompressed_info_size = info.len() as u32;
        let mut flags = 0u32;
        if self.lz4_block_info {
            info = lz4_flex::compress(&info);
            flags |= 2;
        }
        if self.info_at_end {
            flags |= 0x80;
        }

        let mut out = Vec::new();
        put_cstring(&mut out, "UnityFS");
        out.extend_from_slice(&7u32.to_be_bytes());
        put_cstring(&mut out, "5.x.x");
        put_cstring(&mut out, &self.revision);
        let size_at = out.len();
        out.extend_from_slice(&0i64.to_be_bytes());
        out.extend_from_slice(&(info.len() as u32).to_be_bytes());
        out.extend_from_slice(&uncompressed_info_size.to_be_bytes());
        out.extend_from_slice(&flags.to_be_bytes());
        out.resize(out.len().next_multiple_of(16), 0);

        if self.info_at_end {
            out.extend_from_slice(&data);
            out.extend_from_slice(&info);
        } else {
            out.extend_from_slice(&info);
            out.extend_from_slice(&data);
        }

        let total = out.len() as i64;
        out[size_at..size_at + 8].copy_from_slice(&total.to_be_bytes());
        out
    }
}

/// Class package writer
#[derive(Debug, Clone, Default)]
pub struct TpkBuilder {
    classes: Vec<(ClassId, Vec<(UnityVersion, Option<(String, TypeNode)>)>)>,
}

impl TpkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class entry; entries of one class must be added oldest first
    pub fn class(mut self, class_id: ClassId, version: &str, name: &str, tree: &TypeNode) -> Self {
        self.entry(class_id, version, Some((name.to_string(), tree.clone())));
        self
    }

    /// Mark a class as absent from `version` on
    pub fn removed(mut self, class_id: ClassId, version: &str) -> Self {
        self.entry(class_id, version, None);
        self
    }

    fn entry(&mut self, class_id: ClassId, version: &str, class: Option<(String, TypeNode)>) {
        let version: UnityVersion = version.parse().expect("valid version");
        match self.classes.iter_mut().find(|(id, _)| *id == class_id) {
            Some((_, entries)) => entries.push((version, class)),
            None => self.classes.push((class_id, vec![(version, class)])),
        }
    }

    pub fn build(&self, compression: PackageCompression) -> Vec<u8> {
        let mut strings = StringTable::default();
        let mut nodes: Vec<Vec<u8>> = Vec::new();

        let mut versions: Vec<UnityVersion> = self
            .classes
            .iter()
            .flat_map(|(_, entries)| entries.iter().map(|(v, _)| *v))
            .collect();
        versions.sort();
        versions.dedup();

        let mut payload = Vec::new();
        payload.extend_from_slice(&0i64.to_le_bytes());
        payload.extend_from_slice(&(versions.len() as i32).to_le_bytes());
        for v in &versions {
            payload.extend_from_slice(&v.to_packed().to_le_bytes());
        }

        payload.extend_from_slice(&(self.classes.len() as i32).to_le_bytes());
        for (class_id, entries) in &self.classes {
            payload.extend_from_slice(&class_id.0.to_le_bytes());
            payload.extend_from_slice(&(entries.len() as i32).to_le_bytes());
            for (version, class) in entries {
                payload.extend_from_slice(&version.to_packed().to_le_bytes());
                match class {
                    Some((name, tree)) => {
                        payload.push(1);
                        payload.extend_from_slice(&strings.index(name).to_le_bytes());
                        payload.extend_from_slice(&strings.index("Object").to_le_bytes());
                        payload.push(0x80);
                        let root = push_tpk_node(tree, &mut nodes, &mut strings);
                        payload.extend_from_slice(&root.to_le_bytes());
                    }
                    None => payload.push(0),
                }
            }
        }

        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&0i32.to_le_bytes());

        payload.extend_from_slice(&(nodes.len() as i32).to_le_bytes());
        for node in &nodes {
            payload.extend_from_slice(node);
        }

        payload.extend_from_slice(&(strings.values.len() as i32).to_le_bytes());
        for value in &strings.values {
            let mut len = value.len();
            loop {
                let byte = (len & 0x7f) as u8;
                len >>= 7;
                if len == 0 {
                    payload.push(byte);
                    break;
                }
                payload.push(byte | 0x80);
            }
            payload.extend_from_slice(value.as_bytes());
        }

        let body = match compression {
            PackageCompression::None => payload.clone(),
            PackageCompression::Lz4 => lz4_flex::compress(&payload),
            PackageCompression::Lzma => {
                let options = xz2::stream::LzmaOptions::new_preset(6).expect("lzma preset");
                let stream = xz2::stream::Stream::new_lzma_encoder(&options).expect("lzma encoder");
                let mut encoder = xz2::read::XzEncoder::new_stream(payload.as_slice(), stream);
                let mut packed = Vec::new();
                encoder.read_to_end(&mut packed).expect("lzma encode");
                packed
            }
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(1);
        out.push(compression.to_byte());
        out.push(0);
        out.push(0);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(body.len() as i32).to_le_bytes());
        out.extend_from_slice(&(payload.len() as i32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }
}

#[derive(Default)]
struct StringTable {
    values: Vec<String>,
    lookup: HashMap<String, u16>,
}

impl StringTable {
    fn index(&mut self, value: &str) -> u16 {
        if let Some(&i) = self.lookup.get(value) {
            return i;
        }
        let i = self.values.len() as u16;
        self.values.push(value.to_string());
        self.lookup.insert(value.to_string(), i);
        i
    }
}

fn push_tpk_node(node: &TypeNode, nodes: &mut Vec<Vec<u8>>, strings: &mut StringTable) -> u16 {
    let index = nodes.len();
    nodes.push(Vec::new());
    let children: Vec<u16> = node
        .children
        .iter()
        .map(|child| push_tpk_node(child, nodes, strings))
        .collect();

    let mut encoded = Vec::new();
    encoded.extend_from_slice(&strings.index(&node.type_name).to_le_bytes());
    encoded.extend_from_slice(&strings.index(&node.name).to_le_bytes());
    encoded.extend_from_slice(&node.byte_size.to_le_bytes());
    encoded.extend_from_slice(&1i16.to_le_bytes());
    encoded.push(node.type_flags as u8);
    encoded.extend_from_slice(&node.meta_flag.to_le_bytes());
    encoded.extend_from_slice(&(children.len() as u16).to_le_bytes());
    for child in children {
        encoded.extend_from_slice(&child.to_le_bytes());
    }
    nodes[index] = encoded;
    index as u16
}
