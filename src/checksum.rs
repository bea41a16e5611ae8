//! Content fingerprints for change detection

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 fingerprint of raw input bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute fingerprint from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Fingerprint a set of named byte blobs.
    ///
    /// Parts are sorted by name first, so the result does not depend on
    /// discovery order.
    pub fn from_parts<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut parts: Vec<_> = parts.into_iter().collect();
        parts.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        for (name, bytes) in parts {
            // Length prefixes keep ("ab", "c") distinct from ("a", "bc")
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_consistency() {
        let content = br#"{"openapi": "3.1.0"}"#;
        assert_eq!(Fingerprint::from_bytes(content), Fingerprint::from_bytes(content));
    }

    #[test]
    fn test_single_byte_flip_changes_fingerprint() {
        let original = br#"{"openapi": "3.1.0", "paths": {}}"#.to_vec();
        let base = Fingerprint::from_bytes(&original);
        for i in 0..original.len() {
            let mut flipped = original.clone();
            flipped[i] ^= 0x01;
            assert_ne!(Fingerprint::from_bytes(&flipped), base, "flip at byte {}", i);
        }
    }

    #[test]
    fn test_fingerprint_is_full_sha256_hex() {
        let fp = Fingerprint::from_bytes(b"");
        assert_eq!(
            fp.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_parts_are_order_independent() {
        let a = Fingerprint::from_parts(vec![("a.json", &b"1"[..]), ("b.json", &b"2"[..])]);
        let b = Fingerprint::from_parts(vec![("b.json", &b"2"[..]), ("a.json", &b"1"[..])]);
        assert_eq!(a, b);

        let shifted = Fingerprint::from_parts(vec![("a.json1", &b""[..]), ("b.json", &b"2"[..])]);
        assert_ne!(a, shifted);
    }

    #[test]
    fn test_short_form_of_foreign_records() {
        // state files are user-editable, so the stored digest may be anything
        assert_eq!(Fingerprint::from("abc").short(), "abc");
        assert_eq!(Fingerprint::from("ééééééééééééééé").short(), "éééééééééééé");
        assert_eq!(Fingerprint::from("").short(), "");
    }
}
