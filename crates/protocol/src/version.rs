//! Protocol versions and the set a server agrees to speak.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A native protocol version number (the low 7 bits of the header's first byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub u8);

impl ProtocolVersion {
    pub const V3: Self = Self(3);
    pub const V4: Self = Self(4);
    pub const V5: Self = Self(5);

    /// v1 and v2 use an 8-byte header with a single-byte stream id.
    pub fn header_len(self) -> usize {
        if self.0 < 3 {
            8
        } else {
            9
        }
    }

    /// Whether bound values may be "not set" (v4+).
    pub fn supports_unset(self) -> bool {
        self.0 >= 4
    }

    /// Whether query flags are encoded as an int rather than a byte (v5+).
    pub fn has_int_flags(self) -> bool {
        self.0 >= 5
    }

    /// Label used in SUPPORTED and error messages, e.g. `4/v4`.
    pub fn label(self) -> String {
        format!("{}/v{}", self.0, self.0)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The finite set of versions a server accepts.
///
/// Always non-empty and sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedVersions {
    versions: Vec<ProtocolVersion>,
}

impl SupportedVersions {
    /// Build a set from raw version numbers.
    ///
    /// Returns `None` when the list is empty or names a version below 3,
    /// which this codec cannot answer in.
    pub fn new(versions: impl IntoIterator<Item = u8>) -> Option<Self> {
        let mut versions: Vec<ProtocolVersion> =
            versions.into_iter().map(ProtocolVersion).collect();
        versions.sort();
        versions.dedup();
        if versions.is_empty() || versions[0].0 < 3 {
            return None;
        }
        Some(Self { versions })
    }

    pub fn contains(&self, version: ProtocolVersion) -> bool {
        self.versions.contains(&version)
    }

    /// The version used when answering a frame whose own version is rejected.
    pub fn highest(&self) -> ProtocolVersion {
        // non-empty by construction
        self.versions[self.versions.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = ProtocolVersion> + '_ {
        self.versions.iter().copied()
    }

    /// Labels for the SUPPORTED message, e.g. `["3/v3", "4/v4"]`.
    pub fn labels(&self) -> Vec<String> {
        self.versions.iter().map(|v| v.label()).collect()
    }

    /// Error text for a frame using a version outside this set.
    pub fn unsupported_message(&self, requested: u8) -> String {
        format!(
            "Invalid or unsupported protocol version ({}); supported versions are ({})",
            requested,
            self.labels().join(", ")
        )
    }
}

impl Default for SupportedVersions {
    fn default() -> Self {
        Self {
            versions: vec![
                ProtocolVersion::V3,
                ProtocolVersion::V4,
                ProtocolVersion::V5,
            ],
        }
    }
}

impl fmt::Display for SupportedVersions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.labels().join(", "))
    }
}
