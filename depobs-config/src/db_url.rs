use anyhow::Context;
use url::Url;

use crate::loader::EnvLookup;
use crate::models::DatabaseConfig;

/// Which input produced the effective PostgreSQL URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseUrlSource {
    /// `DATABASE_URL` in the environment.
    Env,
    /// `database.url` from the config file.
    Config,
    /// Composed from `PGHOST`, `PGPORT`, `PGUSER`, `PGPASSWORD` and
    /// `PGDATABASE`.
    PgEnv,
}

fn non_empty(env: &dyn EnvLookup, key: &str) -> Option<String> {
    env.var(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Resolves the database URL in order `DATABASE_URL`, `database.url`, then
/// the libpq-style `PG*` variables. A configured URL without a password
/// picks up `PGPASSWORD`.
pub fn resolve_database_url(
    env: &dyn EnvLookup,
    database: &DatabaseConfig,
) -> anyhow::Result<Option<(String, DatabaseUrlSource)>> {
    if let Some(url) = non_empty(env, "DATABASE_URL") {
        return Ok(Some((url, DatabaseUrlSource::Env)));
    }

    if let Some(stored) = database
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        let mut parsed = Url::parse(stored).context("invalid database.url")?;
        if parsed.password().is_none()
            && let Some(password) = non_empty(env, "PGPASSWORD")
        {
            parsed
                .set_password(Some(&password))
                .map_err(|_| anyhow::anyhow!("database.url cannot carry a password"))?;
        }
        return Ok(Some((parsed.to_string(), DatabaseUrlSource::Config)));
    }

    let (Some(host), Some(user), Some(name)) = (
        non_empty(env, "PGHOST"),
        non_empty(env, "PGUSER"),
        non_empty(env, "PGDATABASE"),
    ) else {
        return Ok(None);
    };
    let port: u16 = match non_empty(env, "PGPORT") {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid PGPORT {raw:?}"))?,
        None => 5432,
    };
    let mut url = Url::parse(&format!("postgresql://{host}:{port}/{name}"))
        .context("invalid PGHOST or PGDATABASE")?;
    url.set_username(&user)
        .map_err(|_| anyhow::anyhow!("invalid PGUSER {user:?}"))?;
    if let Some(password) = non_empty(env, "PGPASSWORD") {
        url.set_password(Some(&password))
            .map_err(|_| anyhow::anyhow!("invalid PGPASSWORD"))?;
    }
    Ok(Some((url.to_string(), DatabaseUrlSource::PgEnv)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn database_url_env_wins() {
        let env = env(&[("DATABASE_URL", "postgres://env/db")]);
        let config = DatabaseConfig {
            url: Some("postgres://file/db".into()),
            ..DatabaseConfig::default()
        };
        let (url, source) = resolve_database_url(&env, &config).unwrap().unwrap();
        assert_eq!(url, "postgres://env/db");
        assert_eq!(source, DatabaseUrlSource::Env);
    }

    #[test]
    fn configured_url_picks_up_password() {
        let env = env(&[("PGPASSWORD", "s3cret")]);
        let config = DatabaseConfig {
            url: Some("postgres://depobs@db:5432/depobs".into()),
            ..DatabaseConfig::default()
        };
        let (url, source) = resolve_database_url(&env, &config).unwrap().unwrap();
        assert_eq!(url, "postgres://depobs:s3cret@db:5432/depobs");
        assert_eq!(source, DatabaseUrlSource::Config);
    }

    #[test]
    fn composes_from_pg_variables() {
        let env = env(&[
            ("PGHOST", "db"),
            ("PGUSER", "depobs"),
            ("PGDATABASE", "dependency_observatory"),
            ("PGPORT", "6543"),
        ]);
        let (url, source) = resolve_database_url(&env, &DatabaseConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(url, "postgresql://depobs@db:6543/dependency_observatory");
        assert_eq!(source, DatabaseUrlSource::PgEnv);
    }

    #[test]
    fn nothing_configured() {
        let env = env(&[("PGHOST", "db")]);
        assert!(
            resolve_database_url(&env, &DatabaseConfig::default())
                .unwrap()
                .is_none()
        );
    }
}
