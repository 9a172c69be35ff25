//! Strongly typed row identifiers.
//!
//! All persisted entities use `bigserial` keys, so the newtypes wrap `i64`
//! and only exist to keep scan ids, package ids and graph ids from being
//! mixed up at call sites.

use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Identifier of a row in the `scans` table.
    ScanId
);
row_id!(
    /// Identifier of a row in the `package_versions` table.
    PackageVersionId
);
row_id!(
    /// Identifier of a row in the `package_graphs` table.
    PackageGraphId
);
row_id!(
    /// Identifier of a row in the `package_links` table.
    PackageLinkId
);
row_id!(
    /// Identifier of a row in the `reports` table.
    ReportId
);
