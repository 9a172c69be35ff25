//! Release filtering for the multi-version fan-out.

use depobs_model::{RegistryEntry, ScanId};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

static RELEASE_VERSION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[=v]?[0-9]+\.[0-9]+\.[0-9]+$")
        .expect("release version regex should compile")
});

/// `MAJOR.MINOR.PATCH` with an optional leading `=` or `v`. Pre-release and
/// build suffixes are rejected.
pub fn is_release_version(version: &str) -> bool {
    RELEASE_VERSION_REGEX.is_match(version)
}

/// What the fan-out does with one eligible registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedVersion {
    /// Launch a tarball job for this version.
    Tarball { version: String, tarball: String },
    /// Source checkout scans are not supported; logged and skipped.
    Unsupported {
        version: String,
        source_url: String,
        git_head: String,
    },
}

impl PlannedVersion {
    pub fn version(&self) -> &str {
        match self {
            PlannedVersion::Tarball { version, .. }
            | PlannedVersion::Unsupported { version, .. } => version,
        }
    }
}

/// Walks `entries` in stored order and picks the versions to scan.
///
/// Entries without a version or with a non-release version are skipped. An
/// entry with neither a tarball nor a VCS source still counts as eligible
/// for the `latest_only` cut-off but plans nothing.
pub fn plan_versions(
    scan_id: ScanId,
    entries: &[RegistryEntry],
    latest_only: bool,
) -> Vec<PlannedVersion> {
    let mut planned = Vec::new();

    for entry in entries {
        let Some(version) = entry.package_version.as_deref() else {
            warn!(
                target: "scan::strategy",
                %scan_id,
                package = %entry.package_name,
                "skipping registry entry with null version"
            );
            continue;
        };
        if !is_release_version(version) {
            info!(
                target: "scan::strategy",
                %scan_id,
                package = %entry.package_name,
                version,
                "skipping non-release version"
            );
            continue;
        }

        if let Some(tarball) = entry.tarball.as_deref() {
            planned.push(PlannedVersion::Tarball {
                version: version.to_string(),
                tarball: tarball.to_string(),
            });
        } else if let (Some(source_url), Some(git_head)) =
            (entry.source_url.as_deref(), entry.git_head.as_deref())
        {
            warn!(
                target: "scan::strategy",
                %scan_id,
                package = %entry.package_name,
                version,
                source_url,
                git_head,
                "scanning from a source checkout is not implemented"
            );
            planned.push(PlannedVersion::Unsupported {
                version: version.to_string(),
                source_url: source_url.to_string(),
                git_head: git_head.to_string(),
            });
        } else {
            warn!(
                target: "scan::strategy",
                %scan_id,
                package = %entry.package_name,
                version,
                "registry entry has neither a tarball nor a source"
            );
        }

        if latest_only {
            break;
        }
    }

    planned
}
