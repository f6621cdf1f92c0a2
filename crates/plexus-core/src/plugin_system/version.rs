use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use semver::{BuildMetadata, Prerelease, Version};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Error type for version parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Invalid version format: '{0}'")]
    InvalidFormat(String),
    #[error("Version parse error: {0}")]
    ParseError(String),
}

/// A plugin release version.
///
/// Descriptors use dotted versions of one to three numeric components
/// followed by an optional qualifier: `1`, `1.2`, `1.2.3`, `1.2.3.beta1`.
/// Missing numeric components are zero. The qualifier is kept as semver build
/// metadata, so an unqualified version orders before the same version with a
/// qualifier and qualifiers compare lexically.
#[derive(Debug, Clone)]
pub struct PluginVersion {
    original: String,
    version: Version,
}

impl PluginVersion {
    /// Parses a version string like "1.2.3" or "2.0.0.rc1"
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::InvalidFormat(input.to_string()));
        }

        let mut numbers = [0u64; 3];
        let mut qualifier: Option<&str> = None;
        for (index, part) in trimmed.splitn(4, '.').enumerate() {
            if index == 3 {
                qualifier = Some(part);
                break;
            }
            numbers[index] = part
                .parse::<u64>()
                .map_err(|e| VersionError::ParseError(format!("component '{}' of '{}': {}", part, input, e)))?;
        }

        let build = match qualifier {
            Some(q) => BuildMetadata::new(q)
                .map_err(|e| VersionError::ParseError(format!("qualifier '{}' of '{}': {}", q, input, e)))?,
            None => BuildMetadata::EMPTY,
        };

        Ok(Self {
            original: trimmed.to_string(),
            version: Version {
                major: numbers[0],
                minor: numbers[1],
                patch: numbers[2],
                pre: Prerelease::EMPTY,
                build,
            },
        })
    }

    /// Returns the normalized semver value.
    pub fn semver(&self) -> &Version {
        &self.version
    }

    /// Returns the version string as written in the descriptor.
    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl PartialEq for PluginVersion {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for PluginVersion {}

impl Hash for PluginVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
    }
}

impl Ord for PluginVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // semver orders build metadata last, after the numeric components
        self.version.cmp(&other.version)
    }
}

impl PartialOrd for PluginVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for PluginVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginVersion::parse(s)
    }
}

impl Serialize for PluginVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// Compares two version strings. Unparsable versions order before every
/// valid version and equal to each other.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    PluginVersion::parse(a).ok().cmp(&PluginVersion::parse(b).ok())
}

/// Checks whether a provider satisfies an import compiled against `required`.
///
/// Without a declared backward-compatibility floor the provider must match
/// the required version exactly. With a floor, any required version between
/// the floor and the provider's own version (both inclusive) is accepted.
pub fn satisfies_import(required: &PluginVersion, provided: Option<&PluginVersion>, compat_floor: Option<&PluginVersion>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    match compat_floor {
        None => provided == required,
        Some(floor) => required <= provided && required >= floor,
    }
}
