use std::fmt;

use crate::ids::{PackageLinkId, PackageVersionId};

/// Language tag stored with every npm package version.
pub const NODEJS: &str = "node";

/// A `(name, version, language)` triple that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    pub language: String,
}

impl PackageSpec {
    pub fn npm(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            language: NODEJS.to_string(),
        }
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A persisted package version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackageVersion {
    pub id: PackageVersionId,
    pub name: String,
    pub version: String,
    pub language: String,
}

impl PackageVersion {
    pub fn spec(&self) -> PackageSpec {
        PackageSpec {
            name: self.name.clone(),
            version: self.version.clone(),
            language: self.language.clone(),
        }
    }
}

/// A persisted `parent depends on child` edge between two package versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackageLink {
    pub id: PackageLinkId,
    pub parent_id: PackageVersionId,
    pub child_id: PackageVersionId,
}
