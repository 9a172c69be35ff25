use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ids::{PackageGraphId, PackageVersionId};
use crate::package::PackageLink;

/// Dependency graph over persisted package versions.
///
/// A graph without links is a single node: its root. Graphs built from a
/// manifest with several top-level dependencies and no package name of its
/// own have no root.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackageGraph {
    /// `None` for graphs synthesized in memory for scoring.
    pub id: Option<PackageGraphId>,
    pub root_package_version_id: Option<PackageVersionId>,
    pub links: Vec<PackageLink>,
}

impl PackageGraph {
    pub fn single_node(root: PackageVersionId) -> Self {
        Self {
            id: None,
            root_package_version_id: Some(root),
            links: Vec::new(),
        }
    }

    /// Every package version referenced by the graph, root included.
    pub fn distinct_package_ids(&self) -> BTreeSet<PackageVersionId> {
        let mut ids: BTreeSet<_> = self.root_package_version_id.into_iter().collect();
        for link in &self.links {
            ids.insert(link.parent_id);
            ids.insert(link.child_id);
        }
        ids
    }

    pub fn children(&self) -> BTreeMap<PackageVersionId, BTreeSet<PackageVersionId>> {
        let mut children: BTreeMap<_, BTreeSet<_>> = BTreeMap::new();
        for link in &self.links {
            if link.parent_id != link.child_id {
                children.entry(link.parent_id).or_default().insert(link.child_id);
            }
        }
        children
    }

    /// Package versions reachable from `start`, excluding `start` itself.
    pub fn reachable_from(&self, start: PackageVersionId) -> BTreeSet<PackageVersionId> {
        let children = self.children();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for child in children.get(&node).into_iter().flatten() {
                if *child != start && seen.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }
        seen
    }
}
