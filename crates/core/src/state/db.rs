//! # Nexus Database
//!
//! Single SQLite database for everything Nexus persists: the mission archive
//! and editable prompt templates. Lives at `.nexus/nexus.db`.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::skills::prompts;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Shared database handle
pub struct NexusDb {
    conn: Arc<Mutex<Connection>>,
}

impl NexusDb {
    /// Open or create the database at `.nexus/nexus.db`
    pub fn open() -> Result<Self> {
        Self::open_at(".nexus/nexus.db")
    }

    /// Open database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open nexus database")?;
        Self::from_connection(conn)
    }

    /// Throwaway database for `--ephemeral` runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<()> {
        // Archive of completed missions, write-once
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS missions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                goal TEXT NOT NULL,
                report TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS prompt_templates (
                slug TEXT PRIMARY KEY,
                version INTEGER NOT NULL DEFAULT 1,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_missions_created ON missions(created_at)",
            [],
        )?;

        tracing::info!("NexusDb initialized with schema version {}", SCHEMA_VERSION);
        Ok(())
    }

    // =========================================================================
    // Prompt Template Methods
    // =========================================================================

    /// Seed default prompts if the table is empty
    pub fn seed_prompts(&self) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM prompt_templates", [], |row| {
            row.get(0)
        })?;
        if count > 0 {
            tracing::debug!("Prompts already seeded ({} found)", count);
            return Ok(0);
        }

        let mut inserted = 0;
        for (slug, content) in prompts::all_defaults() {
            conn.execute(
                "INSERT INTO prompt_templates (slug, version, content) VALUES (?1, 1, ?2)",
                params![slug, content],
            )?;
            inserted += 1;
        }

        tracing::info!("Seeded {} default prompts", inserted);
        Ok(inserted)
    }

    /// Get a prompt by slug
    pub fn get_prompt(&self, slug: &str) -> Result<String> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            "SELECT content FROM prompt_templates WHERE slug = ?1",
            params![slug],
            |row| row.get(0),
        )
        .with_context(|| format!("Prompt '{}' not found", slug))
    }

    /// Update a prompt (increments version automatically)
    pub fn set_prompt(&self, slug: &str, content: &str) -> Result<i32> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let current_version: i32 = conn
            .query_row(
                "SELECT version FROM prompt_templates WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .unwrap_or(0);
        let new_version = current_version + 1;

        conn.execute(
            r#"
            INSERT INTO prompt_templates (slug, version, content, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(slug) DO UPDATE SET
                version = ?2,
                content = ?3,
                updated_at = datetime('now')
            "#,
            params![slug, new_version, content],
        )?;

        tracing::debug!("Updated prompt '{}' to version {}", slug, new_version);
        Ok(new_version)
    }

    /// List all prompt slugs with their versions
    pub fn list_prompts(&self) -> Result<Vec<(String, i32)>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare("SELECT slug, version FROM prompt_templates ORDER BY slug")?;
        let prompts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prompts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    #[test]
    fn test_open_creates_parent_and_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("nexus.db");

        let db = assert_ok!(NexusDb::open_at(&path));
        assert!(path.exists());

        // Reopening must not rerun the migration
        drop(db);
        assert_ok!(NexusDb::open_at(&path));
    }

    #[test]
    fn test_seed_prompts_once() {
        let db = NexusDb::open_in_memory().unwrap();

        let seeded = db.seed_prompts().unwrap();
        assert_eq!(seeded, prompts::all_defaults().len());
        assert_eq!(db.seed_prompts().unwrap(), 0);

        let decomposer = db.get_prompt(prompts::DECOMPOSER).unwrap();
        assert!(!decomposer.is_empty());
    }

    #[test]
    fn test_set_prompt_bumps_version() {
        let db = NexusDb::open_in_memory().unwrap();
        db.seed_prompts().unwrap();

        let version = db.set_prompt(prompts::SYNTHESIZER, "Be brief.").unwrap();
        assert_eq!(version, 2);
        assert_eq!(db.get_prompt(prompts::SYNTHESIZER).unwrap(), "Be brief.");

        let listed = db.list_prompts().unwrap();
        assert!(listed.contains(&(prompts::SYNTHESIZER.to_string(), 2)));
        assert!(db.get_prompt("missing").is_err());
    }
}
