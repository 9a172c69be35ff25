//! Data model shared by the dependency observatory scan worker crates.
#![allow(missing_docs)]

pub mod advisory;
pub mod error;
pub mod graph;
pub mod ids;
pub mod package;
pub mod registry;
pub mod report;
pub mod scan;

pub use advisory::{Advisory, AdvisoryFinding};
pub use error::{ModelError, Result as ModelResult};
pub use graph::PackageGraph;
pub use ids::{PackageGraphId, PackageLinkId, PackageVersionId, ReportId, ScanId};
pub use package::{NODEJS, PackageLink, PackageSpec, PackageVersion};
pub use registry::{NpmsioScore, RegistryEntry};
pub use report::{Report, SeverityCounts};
pub use scan::{
    DepFileUrl, LATEST_VERSION, NewScan, Scan, ScanKind, ScanParams, ScanStatus,
};
