//! File type detection from header bytes
//!
//! - Bundles start with `UnityFS`.
//! - Serialized files carry a small big-endian format version at 0x08 and,
//!   for formats before 22, the engine version string at 0x14.
//! - Anything shorter than 0x20 bytes is rejected outright.

use byteorder::{BigEndian, ByteOrder};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Shortest file that can be classified
pub const MIN_FILE_SIZE: usize = 0x20;

pub const BUNDLE_SIGNATURE: &[u8; 7] = b"UnityFS";

pub const FORMAT_OFFSET: usize = 0x08;
pub const VERSION_OFFSET: usize = 0x14;

/// Longest engine version string accumulated
pub const MAX_VERSION_LENGTH: usize = 0xFF;

/// Bytes read from disk to classify a file
pub const PROBE_SIZE: usize = VERSION_OFFSET + 256;

/// Kind of file, decided from its header bytes alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClassification {
    BundleArchive,
    SerializedObjectFile,
    Unrecognized,
}

/// How much of the engine version string is inspected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionProbe {
    /// Accumulate until NUL, end of data or [`MAX_VERSION_LENGTH`]
    #[default]
    Full,
    /// Inspect only the first character, as older dumpers did
    FirstChar,
}

pub fn classify(bytes: &[u8]) -> FileClassification {
    classify_with(bytes, VersionProbe::Full)
}

pub fn classify_with(bytes: &[u8], probe: VersionProbe) -> FileClassification {
    if bytes.len() < MIN_FILE_SIZE {
        return FileClassification::Unrecognized;
    }
    if bytes.starts_with(BUNDLE_SIGNATURE) {
        return FileClassification::BundleArchive;
    }

    let format = BigEndian::read_i32(&bytes[FORMAT_OFFSET..]);

    let limit = match probe {
        VersionProbe::Full => MAX_VERSION_LENGTH,
        VersionProbe::FirstChar => 1,
    };
    let version_is_plain = bytes[VERSION_OFFSET..]
        .iter()
        .take_while(|&&b| b != 0)
        .take(limit)
        .all(|&b| b.is_ascii_alphanumeric() || b == b'.');

    if format < MAX_VERSION_LENGTH as i32 && version_is_plain {
        FileClassification::SerializedObjectFile
    } else {
        FileClassification::Unrecognized
    }
}

/// Classify a file on disk from a bounded header probe
pub fn classify_file(path: impl AsRef<Path>, probe: VersionProbe) -> std::io::Result<FileClassification> {
    let file = File::open(path.as_ref())?;
    let mut header = Vec::with_capacity(PROBE_SIZE);
    file.take(PROBE_SIZE as u64).read_to_end(&mut header)?;
    Ok(classify_with(&header, probe))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetdump_unity::testing::{BundleBuilder, SerializedFileBuilder};

    fn serialized_header(format: i32, version: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; VERSION_OFFSET];
        bytes[FORMAT_OFFSET..FORMAT_OFFSET + 4].copy_from_slice(&format.to_be_bytes());
        bytes.extend_from_slice(version);
        bytes.push(0);
        bytes.resize(64, 0);
        bytes
    }

    #[test]
    fn test_short_buffers_are_unrecognized() {
        let mut bytes = b"UnityFS\0".to_vec();
        bytes.resize(31, 0);
        assert_eq!(classify(&bytes), FileClassification::Unrecognized);
        assert_eq!(classify(&[]), FileClassification::Unrecognized);
        assert_eq!(classify(&[0u8; 31]), FileClassification::Unrecognized);
    }

    #[test]
    fn test_bundle_signature_wins_at_32_bytes() {
        let mut bytes = b"UnityFS".to_vec();
        bytes.resize(32, 0xff);
        assert_eq!(classify(&bytes), FileClassification::BundleArchive);

        let real = BundleBuilder::new("2019.4.31f1").build();
        assert_eq!(classify(&real), FileClassification::BundleArchive);
    }

    #[test]
    fn test_serialized_headers() {
        assert_eq!(
            classify(&serialized_header(17, b"2017.4.40f1")),
            FileClassification::SerializedObjectFile
        );
        assert_eq!(
            classify(&serialized_header(0x1000, b"2017.4.40f1")),
            FileClassification::Unrecognized
        );
        assert_eq!(
            classify(&serialized_header(17, b"2017.4-40f1")),
            FileClassification::Unrecognized
        );

        assert_eq!(
            classify(&serialized_header(-2, b"2017.4.40f1")),
            FileClassification::SerializedObjectFile
        );

        let real = SerializedFileBuilder::new("2019.4.31f1").format(21).build();
        assert_eq!(classify(&real), FileClassification::SerializedObjectFile);
    }

    #[test]
    fn test_first_char_probe_ignores_the_tail() {
        let bytes = serialized_header(17, b"2017 beta!");
        assert_eq!(classify(&bytes), FileClassification::Unrecognized);
        assert_eq!(
            classify_with(&bytes, VersionProbe::FirstChar),
            FileClassification::SerializedObjectFile
        );
    }

    #[test]
    fn test_text_file_is_unrecognized() {
        let text = b"this is a plain text file that happens to be long enough";
        assert_eq!(classify(text), FileClassification::Unrecognized);
    }

    #[test]
    fn test_classify_file_reads_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level0");
        let mut bytes = serialized_header(15, b"5.6.7f1");
        bytes.resize(PROBE_SIZE * 4, 0xee);
        std::fs::write(&path, &bytes).unwrap();

        assert_eq!(
            classify_file(&path, VersionProbe::Full).unwrap(),
            FileClassification::SerializedObjectFile
        );
        assert!(classify_file(dir.path().join("missing"), VersionProbe::Full).is_err());
    }
}
