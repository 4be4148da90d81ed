//! UnityFS bundle archives
//!
//! # Layout
//!
//! - Signature `UnityFS\0`, format version (u32 BE)
//! - Engine version and revision (C strings)
//! - Total size (i64), compressed / uncompressed block-info size (u32), flags (u32)
//! - Block info (optionally at the end of the file), possibly compressed:
//!   16-byte hash, block table, node (directory) table
//! - Data blocks, each independently compressed
//!
//! All header and block-info integers are big-endian.

use crate::compression::{decompress, Compression};
use crate::reader::{Endian, Reader};
use crate::{Error, Result};

/// Bundle signature, including the terminator
pub const SIGNATURE: &[u8; 8] = b"UnityFS\0";

/// Block info stored at the end of the file
pub const FLAG_BLOCKS_INFO_AT_END: u32 = 0x80;

/// Block data starts on a 16-byte boundary
pub const FLAG_BLOCK_INFO_NEEDS_PADDING: u32 = 0x200;

/// Directory node holds a serialized file
pub const NODE_FLAG_SERIALIZED: u32 = 0x4;

/// UnityFS header fields
#[derive(Debug, Clone)]
pub struct Header {
    pub format_version: u32,
    pub engine_version: String,
    pub engine_revision: String,
    pub size: i64,
    pub compressed_info_size: u32,
    pub uncompressed_info_size: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    uncompressed_size: u32,
    compressed_size: u32,
    flags: u16,
}

/// Entry of the bundle directory
#[derive(Debug, Clone)]
pub struct Node {
    pub offset: i64,
    pub size: i64,
    pub flags: u32,
    pub path: String,
}

impl Node {
    pub fn is_serialized(&self) -> bool {
        self.flags & NODE_FLAG_SERIALIZED != 0
    }
}

/// Parsed bundle with fully decompressed block data
#[derive(Debug)]
pub struct Bundle {
    pub header: Header,
    pub nodes: Vec<Node>,
    data: Vec<u8>,
}

impl Bundle {
    /// Parse a complete bundle from memory
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes, Endian::Big);
        let header = read_header(&mut reader)?;

        let info_compression = Compression::from_flags(header.flags)?;
        let info_size = header.compressed_info_size as usize;
        let info_raw = if header.flags & FLAG_BLOCKS_INFO_AT_END != 0 {
            let start = bytes.len().checked_sub(info_size).ok_or(Error::UnexpectedEof {
                offset: 0,
                needed: info_size,
                available: bytes.len(),
            })?;
            &bytes[start..]
        } else {
            reader.read_bytes(info_size)?
        };
        let info = decompress(
            info_compression,
            info_raw,
            header.uncompressed_info_size as usize,
        )?;

        if header.flags & FLAG_BLOCK_INFO_NEEDS_PADDING != 0 {
            reader.align(16);
        }

        let (blocks, nodes) = read_block_info(&info)?;

        let total: usize = blocks.iter().map(|b| b.uncompressed_size as usize).sum();
        let mut data = Vec::with_capacity(total);
        for block in &blocks {
            let raw = reader.read_bytes(block.compressed_size as usize)?;
            let compression = Compression::from_flags(block.flags as u32)?;
            data.extend(decompress(
                compression,
                raw,
                block.uncompressed_size as usize,
            )?);
        }

        for node in &nodes {
            let end = node.offset.checked_add(node.size);
            if node.offset < 0 || node.size < 0 || end.map_or(true, |e| e as usize > data.len()) {
                return Err(Error::InvalidBundle(format!(
                    "node '{}' ({}+{}) exceeds {} bytes of block data",
                    node.path,
                    node.offset,
                    node.size,
                    data.len()
                )));
            }
        }

        tracing::debug!(
            revision = %header.engine_revision,
            blocks = blocks.len(),
            nodes = nodes.len(),
            "parsed bundle"
        );

        Ok(Self {
            header,
            nodes,
            data,
        })
    }

    /// Bytes of one directory node
    pub fn node_data(&self, node: &Node) -> &[u8] {
        let start = node.offset as usize;
        &self.data[start..start + node.size as usize]
    }
}

fn read_header(reader: &mut Reader<'_>) -> Result<Header> {
    let signature = reader.read_cstring()?;
    if signature.as_bytes() != &SIGNATURE[..7] {
        return Err(Error::InvalidSignature(signature));
    }

    let format_version = reader.read_u32()?;
    if !(6..=8).contains(&format_version) {
        return Err(Error::UnsupportedBundleVersion(format_version));
    }

    let engine_version = reader.read_cstring()?;
    let engine_revision = reader.read_cstring()?;
    let size = reader.read_i64()?;
    let compressed_info_size = reader.read_u32()?;
    let uncompressed_info_size = reader.read_u32()?;
    let flags = reader.read_u32()?;

    if format_version >= 7 {
        reader.align(16);
    }

    Ok(Header {
        format_version,
        engine_version,
        engine_revision,
        size,
        compressed_info_size,
        uncompressed_info_size,
        flags,
    })
}

fn read_block_info(info: &[u8]) -> Result<(Vec<Block>, Vec<Node>)> {
    let mut reader = Reader::new(info, Endian::Big);
    let _hash: [u8; 16] = reader.read_array()?;

    let block_count = read_count(&mut reader, 10)?;
    let mut blocks = Vec::with_capacity(block_count);
    for _ in 0..block_count {
        blocks.push(Block {
            uncompressed_size: reader.read_u32()?,
            compressed_size: reader.read_u32()?,
            flags: reader.read_u16()?,
        });
    }

    let node_count = read_count(&mut reader, 21)?;
    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        nodes.push(Node {
            offset: reader.read_i64()?,
            size: reader.read_i64()?,
            flags: reader.read_u32()?,
            path: reader.read_cstring()?,
        });
    }

    Ok((blocks, nodes))
}

/// Read a table count, rejecting counts that cannot fit in the remaining data
fn read_count(reader: &mut Reader<'_>, entry_size: usize) -> Result<usize> {
    let count = reader.read_i32()?;
    if count < 0 || (count as usize).saturating_mul(entry_size) > reader.remaining() {
        return Err(Error::InvalidBundle(format!("invalid table size {}", count)));
    }
    Ok(count as usize)
}
