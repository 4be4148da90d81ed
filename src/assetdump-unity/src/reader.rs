//! Endian-aware cursor over in-memory file data
//!
//! Unity headers are big-endian while metadata and object data follow the
//! endianness recorded in the file, so the byte order is switchable mid-read.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use memchr::memchr;

use crate::{Error, Result};

/// Byte order of the data being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Cursor over a byte slice
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

macro_rules! read_number {
    ($name:ident, $ty:ty, $size:expr, $read:ident) => {
        pub fn $name(&mut self) -> Result<$ty> {
            let bytes = self.take($size)?;
            Ok(match self.endian {
                Endian::Little => LittleEndian::$read(bytes),
                Endian::Big => BigEndian::$read(bytes),
            })
        }
    };
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            pos: 0,
            endian,
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                needed: n,
                available,
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    read_number!(read_u16, u16, 2, read_u16);
    read_number!(read_i16, i16, 2, read_i16);
    read_number!(read_u32, u32, 4, read_u32);
    read_number!(read_i32, i32, 4, read_i32);
    read_number!(read_u64, u64, 8, read_u64);
    read_number!(read_i64, i64, 8, read_i64);
    read_number!(read_f32, f32, 4, read_f32);
    read_number!(read_f64, f64, 8, read_f64);

    /// Borrow the next `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Read a NUL-terminated string, consuming the terminator
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let Some(end) = memchr(0, rest) else {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                needed: rest.len() + 1,
                available: rest.len(),
            });
        };
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(text)
    }

    /// Read `len` bytes as (lossy) UTF-8
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Advance to the next multiple of `alignment`, relative to the slice start
    pub fn align(&mut self, alignment: usize) {
        let rem = self.pos % alignment;
        if rem != 0 {
            self.pos += alignment - rem;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_switch() {
        let data = [0x00, 0x00, 0x00, 0x16, 0x16, 0x00, 0x00, 0x00];
        let mut reader = Reader::new(&data, Endian::Big);
        assert_eq!(reader.read_u32().unwrap(), 22);
        reader.set_endian(Endian::Little);
        assert_eq!(reader.read_u32().unwrap(), 22);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_cstring() {
        let data = b"UnityFS\0rest";
        let mut reader = Reader::new(data, Endian::Big);
        assert_eq!(reader.read_cstring().unwrap(), "UnityFS");
        assert_eq!(reader.position(), 8);
        assert!(reader.read_cstring().is_err());
    }

    #[test]
    fn test_align() {
        let data = [0u8; 32];
        let mut reader = Reader::new(&data, Endian::Little);
        reader.skip(5).unwrap();
        reader.align(4);
        assert_eq!(reader.position(), 8);
        reader.align(4);
        assert_eq!(reader.position(), 8);
        reader.skip(1).unwrap();
        reader.align(16);
        assert_eq!(reader.position(), 16);
    }

    #[test]
    fn test_eof() {
        let data = [1u8, 2];
        let mut reader = Reader::new(&data, Endian::Little);
        match reader.read_u32() {
            Err(Error::UnexpectedEof {
                offset,
                needed,
                available,
            }) => {
                assert_eq!((offset, needed, available), (0, 4, 2));
            }
            other => panic!("expected eof, got {:?}", other),
        }
    }
}
