use std::collections::BTreeSet;

/// An npm audit advisory reported by a scan job.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Advisory {
    pub npm_advisory_id: i64,
    pub package_name: Option<String>,
    pub severity: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub vulnerable_versions: Option<String>,
    pub patched_versions: Option<String>,
}

/// An advisory together with the installed versions it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisoryFinding {
    pub advisory: Advisory,
    pub impacted_versions: BTreeSet<String>,
}
