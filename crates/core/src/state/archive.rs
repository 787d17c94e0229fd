//! # Mission Archive
//!
//! Completed missions (goal + final report) kept for future decompositions.
//! Records are write-once and always listed most recent first.

use super::db::NexusDb;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// One archived mission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub id: String,
    pub goal: String,
    pub report: String,
    pub timestamp: DateTime<Utc>,
}

impl MissionRecord {
    pub fn new(goal: &str, report: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.to_string(),
            report: report.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Storage for completed missions
pub trait MissionArchive: Send + Sync {
    fn append(&self, goal: &str, report: &str) -> Result<MissionRecord>;

    /// At most `limit` records, newest first
    fn recent(&self, limit: usize) -> Result<Vec<MissionRecord>>;

    /// Returns false when no record had that id
    fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLite-backed archive
pub struct ArchiveManager {
    conn: Arc<Mutex<Connection>>,
}

impl ArchiveManager {
    /// Create from shared NexusDb connection
    pub fn new(db: &NexusDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MissionRecord> {
        let created_at: String = row.get(3)?;
        Ok(MissionRecord {
            id: row.get(0)?,
            goal: row.get(1)?,
            report: row.get(2)?,
            timestamp: DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

impl MissionArchive for ArchiveManager {
    fn append(&self, goal: &str, report: &str) -> Result<MissionRecord> {
        let record = MissionRecord::new(goal, report);
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "INSERT INTO missions (id, goal, report, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.goal,
                record.report,
                record.timestamp.to_rfc3339()
            ],
        )
        .context("Failed to archive mission")?;

        tracing::debug!(id = %record.id, "Mission archived");
        Ok(record)
    }

    fn recent(&self, limit: usize) -> Result<Vec<MissionRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, goal, report, created_at
            FROM missions
            ORDER BY seq DESC
            LIMIT ?1
            "#,
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map(params![limit], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list archived missions")?;

        Ok(records)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let affected = conn.execute("DELETE FROM missions WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

/// Archive that lives only as long as the process
#[derive(Default)]
pub struct InMemoryArchive {
    records: Mutex<Vec<MissionRecord>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MissionArchive for InMemoryArchive {
    fn append(&self, goal: &str, report: &str) -> Result<MissionRecord> {
        let record = MissionRecord::new(goal, report);
        self.records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .push(record.clone());
        Ok(record)
    }

    fn recent(&self, limit: usize) -> Result<Vec<MissionRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(archive: &dyn MissionArchive) {
        let first = archive.append("Map the reef", "Coral report").unwrap();
        archive.append("Price the launch", "Pricing report").unwrap();
        archive.append("Audit the vendors", "Vendor report").unwrap();

        let recent = archive.recent(2).unwrap();
        let goals: Vec<&str> = recent.iter().map(|r| r.goal.as_str()).collect();
        assert_eq!(goals, vec!["Audit the vendors", "Price the launch"]);

        assert!(archive.delete(&first.id).unwrap());
        assert!(!archive.delete(&first.id).unwrap());
        assert_eq!(archive.recent(10).unwrap().len(), 2);
        assert!(archive.recent(0).unwrap().is_empty());
    }

    #[test]
    fn test_in_memory_archive() {
        exercise(&InMemoryArchive::new());
    }

    #[test]
    fn test_sqlite_archive() {
        let db = NexusDb::open_in_memory().unwrap();
        exercise(&ArchiveManager::new(&db));
    }

    #[test]
    fn test_sqlite_archive_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nexus.db");

        let saved = {
            let db = NexusDb::open_at(&path).unwrap();
            ArchiveManager::new(&db)
                .append("Survey the tides", "Tide report")
                .unwrap()
        };

        let db = NexusDb::open_at(&path).unwrap();
        let records = ArchiveManager::new(&db).recent(5).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, saved.id);
        assert_eq!(records[0].report, "Tide report");
        assert_eq!(records[0].timestamp, saved.timestamp);
    }
}
