//! Applies goose-format SQL migrations over an existing Postgres connection.
//!
//! Migration files are named `<version>_<name>.sql` and split into sections by
//! `-- +goose Up` and `-- +goose Down` annotations. Applied versions are
//! tracked in the same `goose_db_version` table the goose CLI uses, so a
//! database can be migrated by either tool.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_postgres::Client;
use tracing::{debug, info};

const VERSION_TABLE: &str = "goose_db_version";

/// One parsed migration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
}

/// Runs goose migrations from a directory of SQL files
pub struct MigrationRunner {
    migrations_dir: PathBuf,
}

impl MigrationRunner {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Read and parse every migration file, ordered by version
    pub fn load_migrations(&self) -> Result<Vec<Migration>> {
        let entries = fs::read_dir(&self.migrations_dir).with_context(|| {
            format!(
                "failed to read migrations directory {}",
                self.migrations_dir.display()
            )
        })?;

        let mut migrations = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            migrations.push(parse_migration_file(&path)?);
        }
        migrations.sort_by_key(|m| m.version);

        for pair in migrations.windows(2) {
            if pair[0].version == pair[1].version {
                bail!("duplicate migration version {}", pair[0].version);
            }
        }

        Ok(migrations)
    }

    /// Apply every pending migration, each in its own transaction.
    ///
    /// Returns the number of migrations applied.
    pub async fn run_migrations(&self, client: &mut Client) -> Result<usize> {
        debug!(dir = %self.migrations_dir.display(), "running migrations");

        let migrations = self.load_migrations()?;
        ensure_version_table(client).await?;
        let applied = applied_versions(client).await?;

        let mut count = 0;
        for migration in migrations.iter().filter(|m| !applied.contains(&m.version)) {
            let tx = client.transaction().await?;
            tx.batch_execute(&migration.up_sql).await.with_context(|| {
                format!("migration {}_{} failed", migration.version, migration.name)
            })?;
            tx.execute(
                &format!(
                    "INSERT INTO {} (version_id, is_applied) VALUES ($1, TRUE)",
                    VERSION_TABLE
                ),
                &[&migration.version],
            )
            .await?;
            tx.commit().await?;

            info!(version = migration.version, name = %migration.name, "migration applied");
            count += 1;
        }

        Ok(count)
    }
}

async fn ensure_version_table(client: &Client) -> Result<()> {
    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id SERIAL PRIMARY KEY,
                version_id BIGINT NOT NULL,
                is_applied BOOLEAN NOT NULL,
                tstamp TIMESTAMP DEFAULT now()
            )",
            VERSION_TABLE
        ))
        .await?;
    Ok(())
}

/// Versions whose latest row marks them applied
async fn applied_versions(client: &Client) -> Result<BTreeSet<i64>> {
    let rows = client
        .query(
            &format!(
                "SELECT version_id, is_applied FROM {} ORDER BY id",
                VERSION_TABLE
            ),
            &[],
        )
        .await?;

    let mut applied = BTreeSet::new();
    for row in rows {
        let version: i64 = row.get(0);
        if row.get::<_, bool>(1) {
            applied.insert(version);
        } else {
            applied.remove(&version);
        }
    }
    // goose seeds version 0 when it creates the table
    applied.remove(&0);
    Ok(applied)
}

fn parse_migration_file(path: &Path) -> Result<Migration> {
    let file_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("invalid migration file name {}", path.display()))?;
    let (version, name) = file_name
        .split_once('_')
        .with_context(|| format!("migration {} is not named <version>_<name>", file_name))?;
    let version: i64 = version
        .parse()
        .with_context(|| format!("migration {} has a non-numeric version", file_name))?;

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read migration {}", path.display()))?;
    let (up_sql, down_sql) = split_sections(&contents)
        .with_context(|| format!("migration {} has no `-- +goose Up` section", file_name))?;

    Ok(Migration {
        version,
        name: name.to_string(),
        up_sql,
        down_sql,
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Split a migration into its up and down SQL; `None` without an up section
fn split_sections(contents: &str) -> Option<(String, String)> {
    let mut section = Section::Preamble;
    let mut seen_up = false;
    let mut up = String::new();
    let mut down = String::new();

    for line in contents.lines() {
        let trimmed = line.trim();
        if let Some(annotation) = trimmed.strip_prefix("-- +goose") {
            match annotation.trim() {
                "Up" => {
                    section = Section::Up;
                    seen_up = true;
                }
                "Down" => section = Section::Down,
                // StatementBegin/End only matter to the CLI's statement splitter
                _ => {}
            }
            continue;
        }

        let target = match section {
            Section::Preamble => continue,
            Section::Up => &mut up,
            Section::Down => &mut down,
        };
        target.push_str(line);
        target.push('\n');
    }

    seen_up.then(|| (up.trim().to_string(), down.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sections() {
        let sql = "-- +goose Up\n-- +goose StatementBegin\nCREATE TABLE funds (id BIGSERIAL);\n-- +goose StatementEnd\n\n-- +goose Down\nDROP TABLE funds;\n";
        let (up, down) = split_sections(sql).unwrap();
        assert_eq!(up, "CREATE TABLE funds (id BIGSERIAL);");
        assert_eq!(down, "DROP TABLE funds;");
    }

    #[test]
    fn test_missing_up_section_is_rejected() {
        assert!(split_sections("DROP TABLE funds;").is_none());
    }

    #[test]
    fn test_load_migrations_orders_by_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("00002_add_ledger.sql"),
            "-- +goose Up\nCREATE TABLE ledger ();\n-- +goose Down\nDROP TABLE ledger;\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("00001_init.sql"),
            "-- +goose Up\nCREATE TABLE funds ();\n",
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let runner = MigrationRunner::new(dir.path());
        let migrations = runner.load_migrations().unwrap();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, 1);
        assert_eq!(migrations[0].name, "init");
        assert!(migrations[0].down_sql.is_empty());
        assert_eq!(migrations[1].name, "add_ledger");
    }

    #[test]
    fn test_duplicate_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("00001_a.sql"), "-- +goose Up\nSELECT 1;\n").unwrap();
        fs::write(dir.path().join("00001_b.sql"), "-- +goose Up\nSELECT 1;\n").unwrap();

        let runner = MigrationRunner::new(dir.path());
        assert!(runner.load_migrations().is_err());
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let runner = MigrationRunner::new("/nonexistent/migrations");
        assert!(runner.load_migrations().is_err());
    }
}
