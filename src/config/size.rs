//! Byte sizes written either as integers or as human strings.

use std::fmt;
use std::str::FromStr;

use byte_unit::Byte;
use serde::Deserialize;

/// A size in bytes. Accepts `1048576`, `"1 MiB"`, `"1.5 MB"`, `"700kb"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(try_from = "RawByteSize")]
pub struct ByteSize(u64);

impl ByteSize {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} B", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Byte::parse_str(text.trim(), true)
            .map(|byte| Self(byte.as_u64()))
            .map_err(|e| format!("invalid size `{text}`: {e}"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawByteSize {
    Bytes(u64),
    Text(String),
}

impl TryFrom<RawByteSize> for ByteSize {
    type Error = String;

    fn try_from(raw: RawByteSize) -> Result<Self, Self::Error> {
        match raw {
            RawByteSize::Bytes(bytes) => Ok(Self(bytes)),
            RawByteSize::Text(text) => text.parse(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        size: ByteSize,
    }

    #[test]
    fn test_parses_integer_bytes() {
        let holder: Holder = toml::from_str("size = 1048576").unwrap();
        assert_eq!(holder.size.bytes(), 1_048_576);
    }

    #[test]
    fn test_parses_human_strings() {
        assert_eq!("1 MiB".parse::<ByteSize>().unwrap().bytes(), 1_048_576);
        assert_eq!("1.5 MB".parse::<ByteSize>().unwrap().bytes(), 1_500_000);
        assert_eq!("100".parse::<ByteSize>().unwrap().bytes(), 100);

        let holder: Holder = toml::from_str("size = \"2 GiB\"").unwrap();
        assert_eq!(holder.size.bytes(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("fast".parse::<ByteSize>().is_err());
        assert!(toml::from_str::<Holder>("size = \"lots\"").is_err());
    }
}
