use chrono::{DateTime, Utc};

/// One published version of an npm package as stored from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegistryEntry {
    pub package_name: String,
    pub package_version: Option<String>,
    pub tarball: Option<String>,
    pub source_url: Option<String>,
    pub git_head: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl RegistryEntry {
    /// Whether the entry points at a git checkout the jobs cannot install yet.
    pub fn has_vcs_source(&self) -> bool {
        self.source_url.is_some() && self.git_head.is_some()
    }
}

/// One npms.io analysis of a package, pinned to the version it analyzed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NpmsioScore {
    pub package_name: String,
    pub package_version: String,
    pub analyzed_at: DateTime<Utc>,
    pub source_url: Option<String>,
    pub score: Option<f64>,
    pub quality: Option<f64>,
    pub popularity: Option<f64>,
    pub maintenance: Option<f64>,
}
