use serde::{Deserialize, Serialize};

/// Identifies one fragment of one logical file.
///
/// Two successful uploads of the same key never coexist: the metadata store
/// replaces the previous record atomically on re-upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentKey {
    /// Opaque logical file path.
    pub path: String,
    /// Fragment ordinal within the file.
    pub index: u64,
    /// First byte of the fragment within the logical file.
    pub start: u64,
    /// One past the last byte; always greater than `start`.
    pub end: u64,
}

impl FragmentKey {
    /// Creates a key for the given path and byte range.
    pub fn new(path: impl Into<String>, index: u64, start: u64, end: u64) -> Self {
        Self {
            path: path.into(),
            index,
            start,
            end,
        }
    }

    /// Fragment length in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end - self.start
    }
}

/// Where a successfully written fragment lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentLocation {
    /// Fragment identity.
    #[serde(flatten)]
    pub key: FragmentKey,
    /// Cluster-unique file id the fragment was stored under.
    pub file_id: u64,
    /// Replica group holding the fragment.
    pub group_id: u16,
    /// Whether this fragment closes the logical file.
    pub is_last: bool,
}

/// Metadata schema selected by the `Registry-Version` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryVersion {
    /// Legacy v1 metadata calls.
    V1,
    /// Current v2 metadata calls.
    #[default]
    V2,
}

impl RegistryVersion {
    /// Parses the header value; anything but the exact string `"v1"`
    /// (including empty) selects v2.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw == "v1" { Self::V1 } else { Self::V2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_defaults_to_v2() {
        assert_eq!(RegistryVersion::parse("v1"), RegistryVersion::V1);
        assert_eq!(RegistryVersion::parse("v2"), RegistryVersion::V2);
        assert_eq!(RegistryVersion::parse(""), RegistryVersion::V2);
        assert_eq!(RegistryVersion::parse("V1"), RegistryVersion::V2);
        assert_eq!(RegistryVersion::parse("v3"), RegistryVersion::V2);
    }

    #[test]
    fn fragment_size_is_range_length() {
        let key = FragmentKey::new("/a", 0, 128, 640);
        assert_eq!(key.size(), 512);
    }
}
