use chrono::{DateTime, Utc};

use crate::ids::{PackageGraphId, PackageVersionId};

/// Scoring output for one package version within one graph.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Report {
    pub package_version_id: PackageVersionId,
    pub package: String,
    pub version: String,
    pub graph_id: Option<PackageGraphId>,
    pub release_date: Option<DateTime<Utc>>,
    pub scoring_date: DateTime<Utc>,
    pub immediate_deps: i32,
    pub all_deps: i32,
    pub direct_vulns: SeverityCounts,
    pub indirect_vulns: SeverityCounts,
}

/// Advisory counts bucketed by npm audit severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeverityCounts {
    pub critical: i32,
    pub high: i32,
    pub medium: i32,
    pub low: i32,
}

impl SeverityCounts {
    /// Counts one advisory. `moderate` is npm's spelling of medium; `info`
    /// and unknown severities are not counted.
    pub fn record(&mut self, severity: &str) {
        match severity {
            "critical" => self.critical += 1,
            "high" => self.high += 1,
            "moderate" | "medium" => self.medium += 1,
            "low" => self.low += 1,
            _ => {}
        }
    }

    pub fn total(&self) -> i32 {
        self.critical + self.high + self.medium + self.low
    }
}
