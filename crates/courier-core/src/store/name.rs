//! Content-addressed item names: `<timestamp>-<sha256 hex>`.

use std::fmt;

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};

/// Layout of the timestamp prefix (second resolution, trailing dash).
pub const TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-";

/// Byte offset where the hash segment starts (`YYYY-MM-DD-HH-MM-SS-`).
pub const HASH_OFFSET: usize = 20;

/// Hex-encoded SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// The file name of one stored item.
///
/// The name is fully determined by the second it was written in and the
/// payload, so identical payloads stored within the same second collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemName(String);

impl ItemName {
    pub fn new(at: DateTime<Local>, data: &[u8]) -> Self {
        Self(format!("{}{}", at.format(TIME_FORMAT), content_hash(data)))
    }

    /// Accept a name read back from disk.
    ///
    /// Returns `None` when the name is too short to carry a hash segment.
    /// The hash itself is only checked against the payload in [`verify`].
    ///
    /// [`verify`]: ItemName::verify
    pub fn parse(name: &str) -> Option<Self> {
        if name.len() < HASH_OFFSET || !name.is_char_boundary(HASH_OFFSET) {
            return None;
        }
        Some(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hash segment of the name.
    pub fn hash(&self) -> &str {
        &self.0[HASH_OFFSET..]
    }

    /// Does `data` still hash to the value recorded in the name?
    ///
    /// Integrity only (bit rot, truncated writes); no constant-time compare needed.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.hash() == content_hash(data)
    }
}

impl fmt::Display for ItemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
    }

    #[test]
    fn name_is_timestamp_then_hash() {
        let name = ItemName::new(at(), b"hello");
        assert_eq!(
            name.as_str(),
            "2024-03-09-07-05-01-2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(name.hash().len(), 64);
    }

    #[test]
    fn same_second_same_bytes_same_name() {
        assert_eq!(ItemName::new(at(), b"x"), ItemName::new(at(), b"x"));
        assert_ne!(ItemName::new(at(), b"x"), ItemName::new(at(), b"y"));
    }

    #[test]
    fn verify_detects_tampering() {
        let name = ItemName::new(at(), b"payload");
        assert!(name.verify(b"payload"));
        assert!(!name.verify(b"payloaD"));
    }

    #[rstest]
    #[case::empty("")]
    #[case::short("2024-03-09-07-05")]
    #[case::split_char_at_offset("2024-03-09-07-05-01éab")]
    fn parse_rejects_names_without_hash_segment(#[case] raw: &str) {
        assert!(ItemName::parse(raw).is_none());
    }

    #[test]
    fn parse_accepts_written_names() {
        let name = ItemName::new(at(), b"hello");
        let parsed = ItemName::parse(name.as_str()).unwrap();
        assert_eq!(parsed, name);
        assert!(parsed.verify(b"hello"));
    }
}
