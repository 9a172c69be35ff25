//! Turns delivered task output into package versions, graphs and advisories.

use std::collections::{BTreeSet, HashSet};

use depobs_model::{Advisory, AdvisoryFinding, PackageSpec};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::JobResult;

/// One persistable unit recovered from a job's output.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultUnit {
    PackageVersion(PackageSpec),
    /// Dependency graph from `npm ls --json`; links are `(parent, child)`.
    Graph {
        root: Option<PackageSpec>,
        links: Vec<(PackageSpec, PackageSpec)>,
    },
    Advisory(AdvisoryFinding),
}

/// Deserializes every unit from `results`, processing each delivery
/// identity once. Records without a task list are skipped.
pub fn deserialize_job_results(results: &[JobResult]) -> Vec<ResultUnit> {
    let mut seen = HashSet::new();
    let mut units = Vec::new();

    for result in results {
        let Some(entries) = result.entries() else {
            debug!(target: "scan::reconcile", result_id = result.id, "skipping result without task data");
            continue;
        };
        if !seen.insert(result.message_id()) {
            debug!(
                target: "scan::reconcile",
                result_id = result.id,
                message_id = %result.message_id(),
                "skipping duplicate delivery"
            );
            continue;
        }

        for entry in entries {
            if entry.get("type").and_then(Value::as_str) != Some("task_result") {
                continue;
            }
            let task = entry.get("name").and_then(Value::as_str).unwrap_or_default();
            let Some(stdout) = parse_stdout(entry) else {
                continue;
            };
            match task {
                "list_metadata" => units.extend(units_from_npm_ls(&stdout)),
                "audit" => units.extend(units_from_npm_audit(&stdout)),
                _ => {}
            }
        }
    }
    units
}

fn parse_stdout(entry: &Value) -> Option<Value> {
    let stdout = entry.get("stdout")?.as_str()?;
    match serde_json::from_str(stdout) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            let task = entry.get("name").and_then(Value::as_str).unwrap_or("unknown");
            warn!(
                target: "scan::reconcile",
                task,
                "error parsing stdout as JSON: {err}"
            );
            None
        }
    }
}

fn node_spec(name: &str, node: &Value) -> Option<PackageSpec> {
    let version = node.get("version")?.as_str()?;
    Some(PackageSpec::npm(name, version))
}

fn dependencies(node: &Value) -> Option<&Map<String, Value>> {
    node.get("dependencies").and_then(Value::as_object)
}

struct TreeWalk {
    versions: Vec<PackageSpec>,
    seen_versions: HashSet<PackageSpec>,
    links: BTreeSet<(PackageSpec, PackageSpec)>,
}

impl TreeWalk {
    fn visit(&mut self, spec: &PackageSpec) {
        if self.seen_versions.insert(spec.clone()) {
            self.versions.push(spec.clone());
        }
    }

    /// Depth-first over `npm ls` nodes; children without a version (e.g.
    /// missing optional deps) are dropped.
    fn walk(&mut self, parent: Option<&PackageSpec>, deps: &Map<String, Value>) {
        for (name, node) in deps {
            let Some(spec) = node_spec(name, node) else {
                continue;
            };
            self.visit(&spec);
            if let Some(parent) = parent {
                self.links.insert((parent.clone(), spec.clone()));
            }
            if let Some(children) = dependencies(node) {
                self.walk(Some(&spec), children);
            }
        }
    }
}

/// Package versions for every node plus one graph unit.
///
/// The root is the project itself when `npm ls` names it, otherwise the
/// only top-level dependency. Several unnamed top-level dependencies
/// produce a rootless graph.
fn units_from_npm_ls(tree: &Value) -> Vec<ResultUnit> {
    let empty = Map::new();
    let top_level = dependencies(tree).unwrap_or(&empty);

    let named_root = tree
        .get("name")
        .and_then(Value::as_str)
        .and_then(|name| node_spec(name, tree));
    let root = named_root.clone().or_else(|| {
        if top_level.len() == 1 {
            top_level
                .iter()
                .next()
                .and_then(|(name, node)| node_spec(name, node))
        } else {
            None
        }
    });

    let mut walk = TreeWalk {
        versions: Vec::new(),
        seen_versions: HashSet::new(),
        links: BTreeSet::new(),
    };
    if let Some(root) = &named_root {
        walk.visit(root);
    }
    walk.walk(named_root.as_ref(), top_level);

    if walk.versions.is_empty() {
        return Vec::new();
    }

    let mut units: Vec<ResultUnit> = walk
        .versions
        .into_iter()
        .map(ResultUnit::PackageVersion)
        .collect();
    units.push(ResultUnit::Graph {
        root,
        links: walk.links.into_iter().collect(),
    });
    units
}

fn opt_string(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// One advisory unit per `npm audit --json` advisory with the versions it
/// was found in.
fn units_from_npm_audit(report: &Value) -> Vec<ResultUnit> {
    let Some(advisories) = report.get("advisories").and_then(Value::as_object) else {
        return Vec::new();
    };

    advisories
        .iter()
        .filter_map(|(key, raw)| {
            let npm_advisory_id = raw
                .get("id")
                .and_then(Value::as_i64)
                .or_else(|| key.parse().ok())?;
            let impacted_versions = raw
                .get("findings")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|finding| opt_string(finding, "version"))
                .collect();

            Some(ResultUnit::Advisory(AdvisoryFinding {
                advisory: Advisory {
                    npm_advisory_id,
                    package_name: opt_string(raw, "module_name"),
                    severity: opt_string(raw, "severity"),
                    url: opt_string(raw, "url"),
                    title: opt_string(raw, "title"),
                    vulnerable_versions: opt_string(raw, "vulnerable_versions"),
                    patched_versions: opt_string(raw, "patched_versions"),
                },
                impacted_versions,
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HAPI_LS: &str = r#"{
      "dependencies": {
        "@hapi/bounce": {
          "version": "2.0.0",
          "dependencies": {
            "@hapi/boom": {
              "version": "9.1.0",
              "dependencies": {"@hapi/hoek": {"version": "9.0.4"}}
            },
            "@hapi/hoek": {"version": "9.0.4"}
          }
        }
      }
    }"#;

    const AUDIT: &str = r#"{
      "advisories": {
        "1179": {
          "id": 1179,
          "module_name": "minimist",
          "severity": "low",
          "url": "https://npmjs.com/advisories/1179",
          "findings": [{"version": "0.0.8"}, {"version": "1.2.0"}]
        },
        "1426": {
          "id": 1426,
          "module_name": "yargs-parser",
          "severity": "moderate",
          "url": "https://npmjs.com/advisories/1426",
          "findings": [{"version": "1.7.0"}]
        }
      }
    }"#;

    fn result(id: i64, message_id: &str, entries: Value) -> JobResult {
        JobResult {
            id,
            inserted_at: None,
            data: json!({
                "id": message_id,
                "attributes": {"JOB_NAME": "scan-1-pkg-a"},
                "data": entries,
            }),
        }
    }

    fn task(name: &str, stdout: &str) -> Value {
        json!({"type": "task_result", "name": name, "stdout": stdout, "exit_code": 0})
    }

    #[test]
    fn list_metadata_yields_versions_and_rooted_graph() {
        let results = vec![
            JobResult {
                id: 3,
                inserted_at: None,
                data: json!({"id": "3"}),
            },
            result(
                24,
                "452635538950130",
                json!([
                    task("install", "added 3 packages"),
                    task("list_metadata", HAPI_LS),
                    {"type": "task_complete"}
                ]),
            ),
        ];

        let units = deserialize_job_results(&results);
        let versions: Vec<String> = units
            .iter()
            .filter_map(|unit| match unit {
                ResultUnit::PackageVersion(spec) => Some(spec.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(
            versions,
            vec!["@hapi/bounce@2.0.0", "@hapi/boom@9.1.0", "@hapi/hoek@9.0.4"]
        );

        let Some(ResultUnit::Graph { root, links }) = units.last() else {
            panic!("expected trailing graph unit");
        };
        assert_eq!(root.as_ref().map(ToString::to_string).as_deref(), Some("@hapi/bounce@2.0.0"));
        let links: Vec<(String, String)> = links
            .iter()
            .map(|(parent, child)| (parent.to_string(), child.to_string()))
            .collect();
        assert_eq!(
            links,
            vec![
                ("@hapi/boom@9.1.0".to_string(), "@hapi/hoek@9.0.4".to_string()),
                ("@hapi/bounce@2.0.0".to_string(), "@hapi/boom@9.1.0".to_string()),
                ("@hapi/bounce@2.0.0".to_string(), "@hapi/hoek@9.0.4".to_string()),
            ]
        );
    }

    #[test]
    fn audit_yields_advisories_with_impacted_versions() {
        let results = vec![result(1, "m1", json!([task("audit", AUDIT)]))];
        let units = deserialize_job_results(&results);
        assert_eq!(units.len(), 2);

        let ResultUnit::Advisory(first) = &units[0] else {
            panic!("expected advisory");
        };
        assert_eq!(first.advisory.npm_advisory_id, 1179);
        assert_eq!(first.advisory.severity.as_deref(), Some("low"));
        assert_eq!(
            first.impacted_versions.iter().cloned().collect::<Vec<_>>(),
            vec!["0.0.8".to_string(), "1.2.0".to_string()]
        );
    }

    #[test]
    fn duplicate_deliveries_are_processed_once() {
        let entries = json!([task("audit", AUDIT), {"type": "task_complete"}]);
        let results = vec![
            result(1, "same-message", entries.clone()),
            result(2, "same-message", entries),
        ];
        assert_eq!(deserialize_job_results(&results).len(), 2);
    }

    #[test]
    fn named_project_roots_multi_dependency_manifest() {
        let tree = json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": {
                "a": {"version": "1.0.0"},
                "b": {"version": "2.0.0"}
            }
        });
        let units = units_from_npm_ls(&tree);
        assert_eq!(units.len(), 4);
        let Some(ResultUnit::Graph { root, links }) = units.last() else {
            panic!("expected graph");
        };
        assert_eq!(root.as_ref().map(|spec| spec.name.as_str()), Some("app"));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn unnamed_multi_dependency_manifest_is_rootless() {
        let tree = json!({"dependencies": {"a": {"version": "1.0.0"}, "b": {"version": "2.0.0"}}});
        let Some(ResultUnit::Graph { root, links }) = units_from_npm_ls(&tree).pop() else {
            panic!("expected graph");
        };
        assert!(root.is_none());
        assert!(links.is_empty());
    }

    #[test]
    fn unparsable_stdout_is_skipped() {
        let results = vec![result(1, "m1", json!([task("list_metadata", "not json")]))];
        assert!(deserialize_job_results(&results).is_empty());
    }
}
