//! Block decompression for bundles and class packages

use std::io::Read;

use xz2::read::XzDecoder;
use xz2::stream::Stream;

use crate::{Error, Result};

/// Compression scheme of a bundle block or block-info section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzma,
    Lz4,
    Lz4Hc,
}

impl Compression {
    /// Decode the low six bits of bundle block flags
    pub fn from_flags(flags: u32) -> Result<Self> {
        match flags & 0x3f {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lzma),
            2 => Ok(Compression::Lz4),
            3 => Ok(Compression::Lz4Hc),
            other => Err(Error::UnsupportedCompression(other)),
        }
    }
}

/// Decompress `data` into exactly `expected` bytes
pub fn decompress(compression: Compression, data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let out = match compression {
        Compression::None => data.to_vec(),
        Compression::Lz4 | Compression::Lz4Hc => lz4_flex::decompress(data, expected)
            .map_err(|e| Error::Decompression(format!("lz4: {}", e)))?,
        Compression::Lzma => lzma_raw(data, expected)?,
    };

    if out.len() != expected {
        return Err(Error::DecompressionSize {
            expected,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// LZMA stream prefixed only by its 5-byte properties header
///
/// The `.lzma` container expects an 8-byte uncompressed size after the
/// properties, so one is spliced in before handing the data to liblzma.
pub fn lzma_raw(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    if data.len() < 5 {
        return Err(Error::Decompression(format!(
            "lzma: {} bytes is shorter than the properties header",
            data.len()
        )));
    }
    let mut framed = Vec::with_capacity(data.len() + 8);
    framed.extend_from_slice(&data[..5]);
    framed.extend_from_slice(&(expected as u64).to_le_bytes());
    framed.extend_from_slice(&data[5..]);
    lzma_alone(&framed, expected)
}

/// Complete `.lzma` stream (properties, size, payload)
pub fn lzma_alone(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let stream = Stream::new_lzma_decoder(u64::MAX)
        .map_err(|e| Error::Decompression(format!("lzma: {}", e)))?;
    let mut decoder = XzDecoder::new_stream(data, stream);
    let mut out = Vec::with_capacity(expected);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Decompression(format!("lzma: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        assert_eq!(Compression::from_flags(0x40).unwrap(), Compression::None);
        assert_eq!(Compression::from_flags(0x43).unwrap(), Compression::Lz4Hc);
        assert!(matches!(
            Compression::from_flags(4),
            Err(Error::UnsupportedCompression(4))
        ));
    }

    #[test]
    fn test_lz4_roundtrip() {
        let input = b"assets/a.png assets/a.png assets/a.png assets/b.mat".repeat(8);
        let packed = lz4_flex::compress(&input);
        let out = decompress(Compression::Lz4, &packed, input.len()).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_size_mismatch() {
        let err = decompress(Compression::None, b"abc", 4).unwrap_err();
        assert!(matches!(
            err,
            Error::DecompressionSize {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_lzma_too_short() {
        assert!(lzma_raw(&[0x5d, 0, 0], 10).is_err());
    }
}
