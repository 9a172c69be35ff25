use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depobs_model::{
    Advisory, AdvisoryFinding, NewScan, NpmsioScore, PackageGraph, PackageGraphId, PackageLink,
    PackageLinkId, PackageSpec, PackageVersion, PackageVersionId, RegistryEntry,
    Report, Scan, ScanId, ScanStatus,
};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

use super::{SavedUnit, ScanStore};
use crate::error::{OrchestratorError, Result};
use crate::results::{JobResult, JobResultSource, ResultUnit};

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const SCAN_COLUMNS: &str =
    "id, name, params, status, graph_id, inserted_at, updated_at";

/// [`ScanStore`] and [`JobResultSource`] over Postgres.
#[derive(Clone)]
pub struct PostgresScanStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresScanStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresScanStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresScanStore {
    /// Wraps `pool` after a health check.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query("SELECT 1").execute(&pool).await.map_err(|e| {
            OrchestratorError::Internal(format!(
                "scan store failed Postgres health check: {e}"
            ))
        })?;
        info!("scan store connected to Postgres");
        Ok(Self { pool })
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Self::new(pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn package_version_id(
        tx: &mut Transaction<'_, Postgres>,
        spec: &PackageSpec,
    ) -> Result<PackageVersionId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO package_versions (name, version, language)
            VALUES ($1, $2, $3)
            ON CONFLICT (name, version, language)
                DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(&spec.name)
        .bind(&spec.version)
        .bind(&spec.language)
        .fetch_one(&mut **tx)
        .await?;
        Ok(PackageVersionId(id))
    }

    async fn link_id(
        tx: &mut Transaction<'_, Postgres>,
        parent: PackageVersionId,
        child: PackageVersionId,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO package_links (parent_package_id, child_package_id)
            VALUES ($1, $2)
            ON CONFLICT (parent_package_id, child_package_id)
                DO UPDATE SET parent_package_id = EXCLUDED.parent_package_id
            RETURNING id
            "#,
        )
        .bind(parent.get())
        .bind(child.get())
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    async fn graph_from_row(&self, row: PgRow) -> Result<PackageGraph> {
        let id: i64 = row.try_get("id")?;
        let root: Option<i64> = row.try_get("root_package_version_id")?;
        let link_ids: Vec<i64> = row.try_get("link_ids")?;

        let links = sqlx::query(
            r#"
            SELECT id, parent_package_id, child_package_id
            FROM package_links
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(link_ids)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| -> Result<PackageLink> {
            Ok(PackageLink {
                id: PackageLinkId(row.try_get("id")?),
                parent_id: PackageVersionId(row.try_get("parent_package_id")?),
                child_id: PackageVersionId(row.try_get("child_package_id")?),
            })
        })
        .collect::<Result<Vec<_>>>()?;

        Ok(PackageGraph {
            id: Some(PackageGraphId(id)),
            root_package_version_id: root.map(PackageVersionId),
            links,
        })
    }
}

fn scan_from_row(row: &PgRow) -> Result<Scan> {
    let status: String = row.try_get("status")?;
    let params: Option<Value> = row.try_get("params")?;
    let graph_id: Option<i64> = row.try_get("graph_id")?;
    Ok(Scan {
        id: ScanId(row.try_get("id")?),
        name: row.try_get("name")?,
        params: params.unwrap_or(Value::Null),
        status: status.parse()?,
        graph_id: graph_id.map(PackageGraphId),
        inserted_at: row.try_get("inserted_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn package_version_from_row(row: &PgRow) -> Result<PackageVersion> {
    Ok(PackageVersion {
        id: PackageVersionId(row.try_get("id")?),
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        language: row.try_get("language")?,
    })
}

#[async_trait]
impl JobResultSource for PostgresScanStore {
    async fn results_for_job(&self, job_name: &str) -> Result<Vec<JobResult>> {
        let rows = sqlx::query(
            r#"
            SELECT id, inserted_at, data
            FROM json_results
            WHERE data -> 'attributes' ->> 'JOB_NAME' = $1
            ORDER BY id
            "#,
        )
        .bind(job_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OrchestratorError::Delivery(format!("results query for {job_name}: {e}")))?;

        rows.iter()
            .map(|row| -> Result<JobResult> {
                Ok(JobResult {
                    id: row.try_get("id")?,
                    inserted_at: row.try_get::<Option<DateTime<Utc>>, _>("inserted_at")?,
                    data: row.try_get("data")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ScanStore for PostgresScanStore {
    async fn queued_scans(&self, after: Option<ScanId>, limit: u32) -> Result<Vec<Scan>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans WHERE status = 'queued' AND id > $1 ORDER BY id LIMIT $2"
        ))
        .bind(after.map_or(0, |id| id.get()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(scan_from_row).collect()
    }

    async fn scan(&self, scan_id: ScanId) -> Result<Option<Scan>> {
        sqlx::query(&format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = $1"))
            .bind(scan_id.get())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(scan_from_row)
            .transpose()
    }

    async fn create_scan(&self, new_scan: &NewScan) -> Result<Scan> {
        let row = sqlx::query(&format!(
            "INSERT INTO scans (name, params, status) VALUES ($1, $2, 'queued') RETURNING {SCAN_COLUMNS}"
        ))
        .bind(&new_scan.name)
        .bind(&new_scan.params)
        .fetch_one(&self.pool)
        .await?;
        scan_from_row(&row)
    }

    async fn save_scan_status(&self, scan_id: ScanId, status: ScanStatus) -> Result<()> {
        sqlx::query("UPDATE scans SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(scan_id.get())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        debug!(target: "scan::state", %scan_id, %status, "saved scan status");
        Ok(())
    }

    async fn link_graph_to_scan(
        &self,
        scan_id: ScanId,
        graph_id: PackageGraphId,
    ) -> Result<()> {
        sqlx::query("UPDATE scans SET graph_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(scan_id.get())
            .bind(graph_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_unit(&self, unit: &ResultUnit) -> Result<SavedUnit> {
        match unit {
            ResultUnit::PackageVersion(spec) => {
                let mut tx = self.pool.begin().await?;
                let id = Self::package_version_id(&mut tx, spec).await?;
                tx.commit().await?;
                Ok(SavedUnit::PackageVersion(id))
            }
            ResultUnit::Graph { root, links } => {
                let mut tx = self.pool.begin().await?;
                let root_id = match root {
                    Some(spec) => Some(Self::package_version_id(&mut tx, spec).await?),
                    None => None,
                };
                let mut link_ids = Vec::with_capacity(links.len());
                for (parent, child) in links {
                    let parent_id = Self::package_version_id(&mut tx, parent).await?;
                    let child_id = Self::package_version_id(&mut tx, child).await?;
                    link_ids.push(Self::link_id(&mut tx, parent_id, child_id).await?);
                }
                link_ids.sort_unstable();
                link_ids.dedup();
                let graph_id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO package_graphs (root_package_version_id, link_ids, package_manager)
                    VALUES ($1, $2, 'npm')
                    ON CONFLICT (root_package_version_id, link_ids)
                        DO UPDATE SET package_manager = EXCLUDED.package_manager
                    RETURNING id
                    "#,
                )
                .bind(root_id.map(|id| id.get()))
                .bind(link_ids)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(SavedUnit::Graph(PackageGraphId(graph_id)))
            }
            ResultUnit::Advisory(finding) => {
                let advisory = &finding.advisory;
                let impacted: Vec<String> = finding.impacted_versions.iter().cloned().collect();
                sqlx::query(
                    r#"
                    INSERT INTO advisories (
                        npm_advisory_id, package_name, severity, url, title,
                        vulnerable_versions, patched_versions, impacted_versions
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (npm_advisory_id) DO UPDATE SET
                        package_name = EXCLUDED.package_name,
                        severity = EXCLUDED.severity,
                        url = EXCLUDED.url,
                        title = EXCLUDED.title,
                        vulnerable_versions = EXCLUDED.vulnerable_versions,
                        patched_versions = EXCLUDED.patched_versions,
                        impacted_versions = ARRAY(
                            SELECT DISTINCT v
                            FROM unnest(advisories.impacted_versions || EXCLUDED.impacted_versions) AS v
                            ORDER BY v
                        ),
                        updated_at = NOW()
                    "#,
                )
                .bind(advisory.npm_advisory_id)
                .bind(&advisory.package_name)
                .bind(&advisory.severity)
                .bind(&advisory.url)
                .bind(&advisory.title)
                .bind(&advisory.vulnerable_versions)
                .bind(&advisory.patched_versions)
                .bind(impacted)
                .execute(&self.pool)
                .await?;
                Ok(SavedUnit::Advisory(advisory.npm_advisory_id))
            }
        }
    }

    async fn most_recent_package_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<PackageVersion>> {
        sqlx::query(
            r#"
            SELECT id, name, version, language
            FROM package_versions
            WHERE name = $1 AND version = $2
            ORDER BY inserted_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(package_version_from_row)
        .transpose()
    }

    async fn package_versions(&self, ids: &[PackageVersionId]) -> Result<Vec<PackageVersion>> {
        let ids: Vec<i64> = ids.iter().map(PackageVersionId::get).collect();
        sqlx::query(
            "SELECT id, name, version, language FROM package_versions WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(package_version_from_row)
        .collect()
    }

    async fn latest_graph_with_root(&self, root: PackageVersionId) -> Result<Option<PackageGraph>> {
        let row = sqlx::query(
            r#"
            SELECT id, root_package_version_id, link_ids
            FROM package_graphs
            WHERE root_package_version_id = $1
            ORDER BY inserted_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(root.get())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.graph_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn graph(&self, graph_id: PackageGraphId) -> Result<Option<PackageGraph>> {
        let row = sqlx::query(
            "SELECT id, root_package_version_id, link_ids FROM package_graphs WHERE id = $1",
        )
        .bind(graph_id.get())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.graph_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn registry_entries(&self, package_name: &str) -> Result<Vec<RegistryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT package_name, package_version, tarball, source_url, git_head, published_at
            FROM npm_registry_entries
            WHERE package_name = $1
            ORDER BY published_at DESC NULLS LAST, id
            "#,
        )
        .bind(package_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<RegistryEntry> {
                Ok(RegistryEntry {
                    package_name: row.try_get("package_name")?,
                    package_version: row.try_get("package_version")?,
                    tarball: row.try_get("tarball")?,
                    source_url: row.try_get("source_url")?,
                    git_head: row.try_get("git_head")?,
                    published_at: row.try_get("published_at")?,
                })
            })
            .collect()
    }

    async fn save_registry_entries(&self, entries: &[RegistryEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO npm_registry_entries (
                    package_name, package_version, tarball, source_url, git_head, published_at
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (package_name, package_version) DO UPDATE SET
                    tarball = EXCLUDED.tarball,
                    source_url = EXCLUDED.source_url,
                    git_head = EXCLUDED.git_head,
                    published_at = EXCLUDED.published_at,
                    updated_at = NOW()
                "#,
            )
            .bind(&entry.package_name)
            .bind(&entry.package_version)
            .bind(&entry.tarball)
            .bind(&entry.source_url)
            .bind(&entry.git_head)
            .bind(entry.published_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn package_names_missing_registry_entries(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT pv.name
            FROM package_versions pv
            WHERE NOT EXISTS (
                SELECT 1 FROM npm_registry_entries e WHERE e.package_name = pv.name
            )
            ORDER BY pv.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn save_npmsio_scores(&self, scores: &[NpmsioScore]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for score in scores {
            sqlx::query(
                r#"
                INSERT INTO npmsio_scores (
                    package_name, package_version, analyzed_at, source_url,
                    score, quality, popularity, maintenance
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (package_name, package_version, analyzed_at) DO NOTHING
                "#,
            )
            .bind(&score.package_name)
            .bind(&score.package_version)
            .bind(score.analyzed_at)
            .bind(&score.source_url)
            .bind(score.score)
            .bind(score.quality)
            .bind(score.popularity)
            .bind(score.maintenance)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(scores = scores.len(), "saved npms.io scores");
        Ok(())
    }

    async fn package_names_missing_npmsio_scores(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT pv.name
            FROM package_versions pv
            WHERE NOT EXISTS (
                SELECT 1 FROM npmsio_scores s WHERE s.package_name = pv.name
            )
            ORDER BY pv.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn save_job_result(&self, envelope: &Value) -> Result<i64> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO json_results (data) VALUES ($1) RETURNING id")
                .bind(envelope)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }

    async fn advisories_for_packages(&self, names: &[String]) -> Result<Vec<AdvisoryFinding>> {
        let rows = sqlx::query(
            r#"
            SELECT npm_advisory_id, package_name, severity, url, title,
                   vulnerable_versions, patched_versions, impacted_versions
            FROM advisories
            WHERE package_name = ANY($1)
            ORDER BY npm_advisory_id
            "#,
        )
        .bind(names.to_vec())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AdvisoryFinding> {
                let impacted: Vec<String> = row.try_get("impacted_versions")?;
                Ok(AdvisoryFinding {
                    advisory: Advisory {
                        npm_advisory_id: row.try_get("npm_advisory_id")?,
                        package_name: row.try_get("package_name")?,
                        severity: row.try_get("severity")?,
                        url: row.try_get("url")?,
                        title: row.try_get("title")?,
                        vulnerable_versions: row.try_get("vulnerable_versions")?,
                        patched_versions: row.try_get("patched_versions")?,
                    },
                    impacted_versions: impacted.into_iter().collect(),
                })
            })
            .collect()
    }

    async fn save_reports(&self, reports: &[Report]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for report in reports {
            sqlx::query(
                r#"
                INSERT INTO reports (
                    package_version_id, package, version, graph_id, release_date, scoring_date,
                    immediate_deps, all_deps,
                    direct_vulns_critical, direct_vulns_high, direct_vulns_medium, direct_vulns_low,
                    indirect_vulns_critical, indirect_vulns_high, indirect_vulns_medium, indirect_vulns_low
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(report.package_version_id.get())
            .bind(&report.package)
            .bind(&report.version)
            .bind(report.graph_id.map(|id| id.get()))
            .bind(report.release_date)
            .bind(report.scoring_date)
            .bind(report.immediate_deps)
            .bind(report.all_deps)
            .bind(report.direct_vulns.critical)
            .bind(report.direct_vulns.high)
            .bind(report.direct_vulns.medium)
            .bind(report.direct_vulns.low)
            .bind(report.indirect_vulns.critical)
            .bind(report.indirect_vulns.high)
            .bind(report.indirect_vulns.medium)
            .bind(report.indirect_vulns.low)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
