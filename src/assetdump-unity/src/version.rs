//! Engine version strings ("2019.4.31f1")

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Parsed engine version, ordered chronologically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnityVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    /// Release kind: 0 alpha, 1 beta, 2 china, 3 final, 4 patch, 5 experimental
    pub kind: u8,
    pub number: u8,
}

const KIND_LETTERS: [char; 6] = ['a', 'b', 'c', 'f', 'p', 'x'];

impl UnityVersion {
    pub fn new(major: u16, minor: u16, build: u16) -> Self {
        Self {
            major,
            minor,
            build,
            kind: 3,
            number: 1,
        }
    }

    /// Decode the packed 64-bit form used by class packages
    pub fn from_packed(packed: u64) -> Self {
        Self {
            major: (packed >> 48) as u16,
            minor: (packed >> 32) as u16,
            build: (packed >> 16) as u16,
            kind: (packed >> 8) as u8,
            number: packed as u8,
        }
    }

    pub fn to_packed(self) -> u64 {
        ((self.major as u64) << 48)
            | ((self.minor as u64) << 32)
            | ((self.build as u64) << 16)
            | ((self.kind as u64) << 8)
            | self.number as u64
    }

    /// Versions stripped from release builds read as "0.0.0"
    pub fn is_stripped(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.build == 0
    }
}

impl FromStr for UnityVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidVersion(s.to_string());

        let mut parts = s.trim().splitn(3, '.');
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let minor = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let rest = parts.next().unwrap_or("0");

        let build_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let build = if build_end == 0 {
            0
        } else {
            rest[..build_end].parse().map_err(|_| invalid())?
        };

        let mut version = UnityVersion {
            major,
            minor,
            build,
            kind: 3,
            number: 0,
        };

        let suffix = &rest[build_end..];
        if let Some(letter) = suffix.chars().next() {
            version.kind = KIND_LETTERS
                .iter()
                .position(|&k| k == letter)
                .ok_or_else(invalid)? as u8;
            let digits: String = suffix[1..].chars().take_while(char::is_ascii_digit).collect();
            version.number = digits.parse().unwrap_or(0);
        }

        Ok(version)
    }
}

impl fmt::Display for UnityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = KIND_LETTERS.get(self.kind as usize).copied().unwrap_or('f');
        write!(
            f,
            "{}.{}.{}{}{}",
            self.major, self.minor, self.build, letter, self.number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release() {
        let v: UnityVersion = "2019.4.31f1".parse().unwrap();
        assert_eq!((v.major, v.minor, v.build, v.kind, v.number), (2019, 4, 31, 3, 1));
        assert_eq!(v.to_string(), "2019.4.31f1");
    }

    #[test]
    fn test_parse_variants() {
        let beta: UnityVersion = "2021.2.0b7".parse().unwrap();
        assert_eq!((beta.kind, beta.number), (1, 7));
        let china: UnityVersion = "2022.3.5f1c1".parse().unwrap();
        assert_eq!((china.kind, china.number), (3, 1));
        let bare: UnityVersion = "5.6.7".parse().unwrap();
        assert_eq!((bare.major, bare.minor, bare.build), (5, 6, 7));
        assert!("0.0.0".parse::<UnityVersion>().unwrap().is_stripped());
    }

    #[test]
    fn test_parse_invalid() {
        assert!("5.x.x".parse::<UnityVersion>().is_err());
        assert!("".parse::<UnityVersion>().is_err());
    }

    #[test]
    fn test_ordering_and_packing() {
        let old: UnityVersion = "2018.4.36f1".parse().unwrap();
        let beta: UnityVersion = "2019.4.0b2".parse().unwrap();
        let new: UnityVersion = "2019.4.0f1".parse().unwrap();
        assert!(old < beta && beta < new);
        assert_eq!(UnityVersion::from_packed(new.to_packed()), new);
    }
}
