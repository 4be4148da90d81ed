//! Type tree parsing and type-tree driven object decoding
//!
//! Files store type trees as a flat, level-annotated node list, either in
//! the compact blob layout (format 10 and 12+) or the older recursive layout.
//! Both are normalized into a [`TypeNode`] hierarchy, which then drives
//! decoding of raw object bytes into [`Field`]s.

use crate::common_strings::{common_string, COMMON_STRING_FLAG};
use crate::reader::{Endian, Reader};
use crate::value::{Field, Value};
use crate::{Error, Result};

/// Meta flag requesting 4-byte alignment after the value
pub const ALIGN_FLAG: u32 = 0x4000;

/// Type flag marking an array node
pub const ARRAY_FLAG: u32 = 0x1;

/// Node as stored in the flat, level-annotated list
#[derive(Debug, Clone, PartialEq)]
pub struct FlatNode {
    pub version: i32,
    pub level: u8,
    pub type_flags: u32,
    pub type_name: String,
    pub name: String,
    pub byte_size: i32,
    pub index: i32,
    pub meta_flag: u32,
}

/// Node of a hierarchical type tree
#[derive(Debug, Clone, PartialEq)]
pub struct TypeNode {
    pub type_name: String,
    pub name: String,
    pub byte_size: i32,
    pub type_flags: u32,
    pub meta_flag: u32,
    pub children: Vec<TypeNode>,
}

impl TypeNode {
    pub fn is_array(&self) -> bool {
        self.type_flags & ARRAY_FLAG != 0 || self.type_name == "Array"
    }

    pub fn is_aligned(&self) -> bool {
        self.meta_flag & ALIGN_FLAG != 0
    }

    /// Decode one object's bytes using this node as the root
    pub fn read_object(&self, data: &[u8], endian: Endian) -> Result<Field> {
        let mut reader = Reader::new(data, endian);
        read_value(self, &mut reader)
    }
}

/// Rebuild the hierarchy from a flat node list
pub fn build_tree(nodes: &[FlatNode]) -> Result<TypeNode> {
    if nodes.is_empty() {
        return Err(Error::InvalidTypeTree("empty node list".into()));
    }
    let mut index = 0;
    let root = build_node(nodes, &mut index);
    if index != nodes.len() {
        return Err(Error::InvalidTypeTree(format!(
            "node {} at level {} is not reachable from the root",
            index, nodes[index].level
        )));
    }
    Ok(root)
}

fn build_node(nodes: &[FlatNode], index: &mut usize) -> TypeNode {
    let flat = &nodes[*index];
    *index += 1;
    let mut node = TypeNode {
        type_name: flat.type_name.clone(),
        name: flat.name.clone(),
        byte_size: flat.byte_size,
        type_flags: flat.type_flags,
        meta_flag: flat.meta_flag,
        children: Vec::new(),
    };
    while *index < nodes.len() && nodes[*index].level == flat.level + 1 {
        node.children.push(build_node(nodes, index));
    }
    node
}

/// Read a type tree in the compact blob layout
pub fn read_blob(reader: &mut Reader<'_>, format_version: u32) -> Result<Vec<FlatNode>> {
    let node_count = reader.read_i32()?;
    let string_size = reader.read_i32()?;
    let node_size = if format_version >= 19 { 32 } else { 24 };
    if node_count < 0
        || string_size < 0
        || (node_count as usize).saturating_mul(node_size) > reader.remaining()
    {
        return Err(Error::InvalidTypeTree(format!(
            "{} nodes with a {} byte string buffer do not fit",
            node_count, string_size
        )));
    }

    let mut raw = Vec::with_capacity(node_count as usize);
    for _ in 0..node_count {
        let version = reader.read_u16()? as i32;
        let level = reader.read_u8()?;
        let type_flags = reader.read_u8()? as u32;
        let type_offset = reader.read_u32()?;
        let name_offset = reader.read_u32()?;
        let byte_size = reader.read_i32()?;
        let index = reader.read_i32()?;
        let meta_flag = reader.read_u32()?;
        if format_version >= 19 {
            let _ref_type_hash = reader.read_u64()?;
        }
        raw.push((version, level, type_flags, type_offset, name_offset, byte_size, index, meta_flag));
    }

    let strings = reader.read_bytes(string_size as usize)?;
    raw.into_iter()
        .map(
            |(version, level, type_flags, type_offset, name_offset, byte_size, index, meta_flag)| {
                Ok(FlatNode {
                    version,
                    level,
                    type_flags,
                    type_name: lookup_string(strings, type_offset)?,
                    name: lookup_string(strings, name_offset)?,
                    byte_size,
                    index,
                    meta_flag,
                })
            },
        )
        .collect()
}

fn lookup_string(buffer: &[u8], offset: u32) -> Result<String> {
    if offset & COMMON_STRING_FLAG != 0 {
        let common = offset & !COMMON_STRING_FLAG;
        return common_string(common)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidTypeTree(format!("unknown common string {}", common)));
    }
    let start = offset as usize;
    let rest = buffer
        .get(start..)
        .ok_or_else(|| Error::InvalidTypeTree(format!("string offset {} out of range", start)))?;
    let end = memchr::memchr(0, rest).unwrap_or(rest.len());
    Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// Read a type tree in the recursive layout used before the blob format
pub fn read_legacy(reader: &mut Reader<'_>, format_version: u32) -> Result<Vec<FlatNode>> {
    let mut nodes = Vec::new();
    read_legacy_node(reader, format_version, 0, &mut nodes)?;
    Ok(nodes)
}

fn read_legacy_node(
    reader: &mut Reader<'_>,
    format_version: u32,
    level: u8,
    nodes: &mut Vec<FlatNode>,
) -> Result<()> {
    let type_name = reader.read_cstring()?;
    let name = reader.read_cstring()?;
    let byte_size = reader.read_i32()?;
    if format_version == 2 {
        let _variable_count = reader.read_i32()?;
    }
    let index = if format_version != 3 { reader.read_i32()? } else { 0 };
    let type_flags = reader.read_i32()? as u32;
    let version = reader.read_i32()?;
    let meta_flag = if format_version != 3 { reader.read_u32()? } else { 0 };
    nodes.push(FlatNode {
        version,
        level,
        type_flags,
        type_name,
        name,
        byte_size,
        index,
        meta_flag,
    });

    let child_count = reader.read_i32()?;
    if child_count < 0 || child_count as usize > reader.remaining() {
        return Err(Error::InvalidTypeTree(format!(
            "invalid child count {}",
            child_count
        )));
    }
    let child_level = level
        .checked_add(1)
        .ok_or_else(|| Error::InvalidTypeTree("type tree nested too deeply".into()))?;
    for _ in 0..child_count {
        read_legacy_node(reader, format_version, child_level, nodes)?;
    }
    Ok(())
}

/// Decode the value described by `node` at the reader's position
pub fn read_value(node: &TypeNode, reader: &mut Reader<'_>) -> Result<Field> {
    let value = if node.is_array() {
        read_array(node, reader)?
    } else if let Some(value) = read_primitive(&node.type_name, reader)? {
        value
    } else {
        match node.type_name.as_str() {
            "string" => {
                let len = read_length(node, reader)?;
                let text = reader.read_string(len)?;
                if node.children.first().is_some_and(TypeNode::is_aligned) {
                    reader.align(4);
                }
                Value::String(text)
            }
            "TypelessData" => {
                let len = read_length(node, reader)?;
                Value::Bytes(reader.read_bytes(len)?.to_vec())
            }
            _ if node.children.len() == 1 && node.children[0].is_array() => {
                read_value(&node.children[0], reader)?.value
            }
            _ => {
                let mut children = Vec::with_capacity(node.children.len());
                for child in &node.children {
                    children.push(read_value(child, reader)?);
                }
                Value::Struct(children)
            }
        }
    };

    if node.is_aligned() {
        reader.align(4);
    }

    Ok(Field {
        name: node.name.clone(),
        type_name: node.type_name.clone(),
        value,
    })
}

fn read_primitive(type_name: &str, reader: &mut Reader<'_>) -> Result<Option<Value>> {
    let value = match type_name {
        "bool" => Value::Bool(reader.read_bool()?),
        "SInt8" => Value::Int(reader.read_i8()? as i64),
        "UInt8" | "char" => Value::UInt(reader.read_u8()? as u64),
        "SInt16" | "short" => Value::Int(reader.read_i16()? as i64),
        "UInt16" | "unsigned short" => Value::UInt(reader.read_u16()? as u64),
        "SInt32" | "int" => Value::Int(reader.read_i32()? as i64),
        "UInt32" | "unsigned int" | "Type*" => Value::UInt(reader.read_u32()? as u64),
        "SInt64" | "long long" => Value::Int(reader.read_i64()?),
        "UInt64" | "unsigned long long" | "FileSize" => Value::UInt(reader.read_u64()?),
        "float" => Value::Float(reader.read_f32()? as f64),
        "double" => Value::Float(reader.read_f64()?),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn read_length(node: &TypeNode, reader: &mut Reader<'_>) -> Result<usize> {
    let size = reader.read_i32()?;
    if size < 0 || size as usize > reader.remaining() {
        return Err(Error::InvalidArraySize {
            field: node.name.clone(),
            size: size as i64,
        });
    }
    Ok(size as usize)
}

fn read_array(node: &TypeNode, reader: &mut Reader<'_>) -> Result<Value> {
    let Some(data) = node.children.get(1) else {
        return Err(Error::InvalidTypeTree(format!(
            "array '{}' has no data node",
            node.name
        )));
    };

    let size = reader.read_i32()?;
    if size < 0 || size as usize > reader.remaining() {
        return Err(Error::InvalidArraySize {
            field: node.name.clone(),
            size: size as i64,
        });
    }
    let size = size as usize;

    if matches!(data.type_name.as_str(), "UInt8" | "SInt8" | "char") && data.children.is_empty() {
        return Ok(Value::Bytes(reader.read_bytes(size)?.to_vec()));
    }

    let mut elements = Vec::with_capacity(size.min(reader.remaining()));
    for _ in 0..size {
        elements.push(read_value(data, reader)?);
    }
    Ok(Value::Array(elements))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(level: u8, type_name: &str, name: &str, byte_size: i32, meta_flag: u32) -> FlatNode {
        FlatNode {
            version: 1,
            level,
            type_flags: if type_name == "Array" { ARRAY_FLAG } else { 0 },
            type_name: type_name.into(),
            name: name.into(),
            byte_size,
            index: 0,
            meta_flag,
        }
    }

    fn string_nodes(level: u8, name: &str) -> Vec<FlatNode> {
        vec![
            flat(level, "string", name, -1, ALIGN_FLAG),
            flat(level + 1, "Array", "Array", -1, ALIGN_FLAG),
            flat(level + 2, "int", "size", 4, 0),
            flat(level + 2, "char", "data", 1, 0),
        ]
    }

    #[test]
    fn test_build_tree_levels() {
        let mut nodes = vec![flat(0, "MonoScript", "Base", -1, 0)];
        nodes.extend(string_nodes(1, "m_Name"));
        nodes.push(flat(1, "int", "m_ExecutionOrder", 4, 0));

        let root = build_tree(&nodes).unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].children[0].children.len(), 2);
        assert!(root.children[0].children[0].is_array());
    }

    #[test]
    fn test_build_tree_rejects_orphans() {
        let nodes = vec![flat(0, "Base", "Base", -1, 0), flat(2, "int", "x", 4, 0)];
        assert!(build_tree(&nodes).is_err());
    }

    #[test]
    fn test_read_aligned_string_then_int() {
        let mut nodes = vec![flat(0, "Object", "Base", -1, 0)];
        nodes.extend(string_nodes(1, "m_Name"));
        nodes.push(flat(1, "int", "m_Value", 4, 0));
        let root = build_tree(&nodes).unwrap();

        let mut data = Vec::new();
        data.extend_from_slice(&5i32.to_le_bytes());
        data.extend_from_slice(b"hello\0\0\0");
        data.extend_from_slice(&7i32.to_le_bytes());

        let field = root.read_object(&data, Endian::Little).unwrap();
        assert_eq!(field.get("m_Name").and_then(Field::as_str), Some("hello"));
        assert_eq!(field.get("m_Value").and_then(Field::as_i64), Some(7));
    }

    #[test]
    fn test_read_vector_of_pairs() {
        let mut nodes = vec![
            flat(0, "Base", "Base", -1, 0),
            flat(1, "map", "m_Container", -1, 0),
            flat(2, "Array", "Array", -1, 0),
            flat(3, "int", "size", 4, 0),
            flat(3, "pair", "data", -1, 0),
        ];
        nodes.extend(string_nodes(4, "first"));
        nodes.push(flat(4, "int", "second", 4, 0));
        let root = build_tree(&nodes).unwrap();

        let mut data = Vec::new();
        data.extend_from_slice(&2i32.to_le_bytes());
        for (key, value) in [("ab", 1i32), ("cdef", 2)] {
            data.extend_from_slice(&(key.len() as i32).to_le_bytes());
            data.extend_from_slice(key.as_bytes());
            while data.len() % 4 != 0 {
                data.push(0);
            }
            data.extend_from_slice(&value.to_le_bytes());
        }

        let field = root.read_object(&data, Endian::Little).unwrap();
        let rows = field.get("m_Container").and_then(Field::elements).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("first").and_then(Field::as_str), Some("cdef"));
        assert_eq!(rows[1].get("second").and_then(Field::as_i64), Some(2));
    }

    #[test]
    fn test_byte_array_and_bad_size() {
        let nodes = vec![
            flat(0, "Base", "Base", -1, 0),
            flat(1, "vector", "m_Data", -1, 0),
            flat(2, "Array", "Array", -1, 0),
            flat(3, "int", "size", 4, 0),
            flat(3, "UInt8", "data", 1, 0),
        ];
        let root = build_tree(&nodes).unwrap();

        let mut data = 3i32.to_le_bytes().to_vec();
        data.extend_from_slice(&[9, 8, 7]);
        let field = root.read_object(&data, Endian::Little).unwrap();
        assert_eq!(field.get("m_Data").unwrap().value, Value::Bytes(vec![9, 8, 7]));

        let bad = 1000i32.to_le_bytes();
        assert!(matches!(
            root.read_object(&bad, Endian::Little),
            Err(Error::InvalidArraySize { .. })
        ));
    }

    #[test]
    fn test_empty_element_size_is_bounded() {
        let nodes = vec![
            flat(0, "Base", "Base", -1, 0),
            flat(1, "vector", "m_Markers", -1, 0),
            flat(2, "Array", "Array", -1, 0),
            flat(3, "int", "size", 4, 0),
            flat(3, "Marker", "data", 0, 0),
        ];
        let root = build_tree(&nodes).unwrap();

        let mut data = 2i32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0, 0]);
        let field = root.read_object(&data, Endian::Little).unwrap();
        assert_eq!(field.get("m_Markers").unwrap().elements().map(<[Field]>::len), Some(2));

        let huge = i32::MAX.to_le_bytes();
        assert!(matches!(
            root.read_object(&huge, Endian::Little),
            Err(Error::InvalidArraySize { .. })
        ));
    }

    #[test]
    fn test_big_endian_primitives() {
        let nodes = vec![
            flat(0, "Base", "Base", -1, 0),
            flat(1, "SInt64", "m_PathID", 8, 0),
            flat(1, "float", "m_Scale", 4, 0),
        ];
        let root = build_tree(&nodes).unwrap();
        let mut data = (-3i64).to_be_bytes().to_vec();
        data.extend_from_slice(&1.5f32.to_be_bytes());
        let field = root.read_object(&data, Endian::Big).unwrap();
        assert_eq!(field.get("m_PathID").and_then(Field::as_i64), Some(-3));
        assert_eq!(field.get("m_Scale").unwrap().value, Value::Float(1.5));
    }
}
