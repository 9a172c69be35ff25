use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::error::{ModelError, Result};
use crate::ids::{PackageGraphId, ScanId};

/// Sentinel package version meaning "only the most recent release".
pub const LATEST_VERSION: &str = "latest";

/// Lifecycle of a persisted scan.
///
/// Transitions are monotonic: `Queued -> Started -> {Succeeded, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanStatus {
    Queued,
    Started,
    Succeeded,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Started => "started",
            ScanStatus::Succeeded => "succeeded",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Succeeded | ScanStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        matches!(
            (self, next),
            (ScanStatus::Queued, ScanStatus::Started)
                | (ScanStatus::Started, ScanStatus::Succeeded)
                | (ScanStatus::Started, ScanStatus::Failed)
        )
    }

    pub fn transition(self, next: ScanStatus) -> Result<ScanStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ModelError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "queued" => Ok(ScanStatus::Queued),
            "started" => Ok(ScanStatus::Started),
            "succeeded" => Ok(ScanStatus::Succeeded),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

/// The scan workflows the worker knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanKind {
    /// Fan out one tarball job per released version of a package.
    NpmPackage,
    /// One job scanning a manifest and optional lockfiles.
    NpmDepFiles,
}

impl ScanKind {
    pub const ALL: [ScanKind; 2] = [ScanKind::NpmPackage, ScanKind::NpmDepFiles];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::NpmPackage => "scan_score_npm_package",
            ScanKind::NpmDepFiles => "scan_score_npm_dep_files",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A manifest or lockfile the dep-files scan downloads inside the job.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DepFileUrl {
    pub url: String,
    pub filename: Option<String>,
}

/// Validated view over the `params` column of an eligible scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanParams {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl ScanParams {
    /// Returns `None` unless `raw` is an object carrying `name`, `args` and
    /// `kwargs` with the expected shapes.
    pub fn parse(raw: &Value) -> Option<Self> {
        let object = raw.as_object()?;
        let name = object.get("name")?.as_str()?.to_string();
        let args = object.get("args")?.as_array()?.clone();
        let kwargs = object.get("kwargs")?.as_object()?.clone();
        Some(Self { name, args, kwargs })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "args": self.args,
            "kwargs": self.kwargs,
        })
    }

    fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    pub fn package_name(&self) -> Option<&str> {
        self.arg_str(0)
    }

    pub fn package_version(&self) -> Option<&str> {
        self.arg_str(1)
    }

    pub fn dep_file_urls(&self) -> Vec<DepFileUrl> {
        let Some(entries) =
            self.kwargs.get("dep_file_urls").and_then(Value::as_array)
        else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                let url = entry.get("url")?.as_str()?.to_string();
                let filename = entry
                    .get("filename")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(DepFileUrl { url, filename })
            })
            .collect()
    }
}

/// A persisted request to analyze one package or manifest.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scan {
    pub id: ScanId,
    pub name: String,
    pub params: Value,
    pub status: ScanStatus,
    pub graph_id: Option<PackageGraphId>,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scan {
    /// Params in their validated form, or `None` for an ineligible scan.
    pub fn params(&self) -> Option<ScanParams> {
        ScanParams::parse(&self.params)
    }

    pub fn kind(&self) -> Option<ScanKind> {
        ScanKind::from_name(&self.name)
    }

    pub fn package_name(&self) -> Option<String> {
        self.params()?.package_name().map(str::to_string)
    }

    pub fn package_version(&self) -> Option<String> {
        self.params()?.package_version().map(str::to_string)
    }

    pub fn wants_latest(&self) -> bool {
        self.package_version().as_deref() == Some(LATEST_VERSION)
    }

    pub fn dep_file_urls(&self) -> Vec<DepFileUrl> {
        self.params()
            .map(|params| params.dep_file_urls())
            .unwrap_or_default()
    }
}

/// Insert payload for a scan that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScan {
    pub name: String,
    pub params: Value,
}

impl NewScan {
    pub fn npm_package(package_name: &str, package_version: &str) -> Self {
        let params = ScanParams {
            name: ScanKind::NpmPackage.as_str().to_string(),
            args: vec![json!(package_name), json!(package_version)],
            kwargs: Map::new(),
        };
        Self {
            name: params.name.clone(),
            params: params.to_value(),
        }
    }

    pub fn npm_dep_files(dep_file_urls: &[DepFileUrl]) -> Self {
        let urls: Vec<Value> = dep_file_urls
            .iter()
            .map(|dep| json!({"url": dep.url, "filename": dep.filename}))
            .collect();
        let mut kwargs = Map::new();
        kwargs.insert("dep_file_urls".into(), Value::Array(urls));
        let params = ScanParams {
            name: ScanKind::NpmDepFiles.as_str().to_string(),
            args: Vec::new(),
            kwargs,
        };
        Self {
            name: params.name.clone(),
            params: params.to_value(),
        }
    }
}
