//! # SQLite Run Store
//!
//! One row per run holding the serialized `AgentState`, plus a feedback
//! table. Schema changes go through numbered migrations.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Feedback, RunStore, RunSummary};
use crate::run::AgentState;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

pub struct SqliteRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    /// Open or create the database at `path`
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open run database")?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
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
        }
        if current_version < SCHEMA_VERSION {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                use_case TEXT NOT NULL,
                phase TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_updated ON runs(updated_at)",
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                run_id TEXT PRIMARY KEY,
                rating TEXT NOT NULL,
                notes TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        Ok(())
    }
}

impl RunStore for SqliteRunStore {
    fn save(&self, state: &AgentState) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let data = serde_json::to_string(state)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO runs (run_id, use_case, phase, data, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                state.run_id(),
                state.use_case().as_str(),
                state.phase().as_str(),
                data,
                state.updated_at().to_rfc3339(),
            ],
        )
        .context("Failed to save run")?;

        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Option<AgentState>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load run")?;

        data.map(|d| serde_json::from_str(&d).context("Corrupt run record"))
            .transpose()
    }

    fn list(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT data FROM runs ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list runs")?;

        rows.iter()
            .map(|d| {
                serde_json::from_str::<AgentState>(d)
                    .map(|s| RunSummary::of(&s))
                    .context("Corrupt run record")
            })
            .collect()
    }

    fn save_feedback(&self, run_id: &str, feedback: &Feedback) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO feedback (run_id, rating, notes, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                run_id,
                feedback.rating.as_str(),
                feedback.notes,
                feedback.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to save feedback")?;

        Ok(())
    }

    fn feedback(&self, run_id: &str) -> Result<Option<Feedback>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let row: Option<(String, Option<String>, String)> = conn
            .query_row(
                "SELECT rating, notes, created_at FROM feedback WHERE run_id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("Failed to load feedback")?;

        row.map(|(rating, notes, created_at)| {
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|t| t.with_timezone(&Utc))
                .context("Corrupt feedback timestamp")?;
            Ok(Feedback {
                rating: rating.parse()?,
                notes,
                created_at,
            })
        })
        .transpose()
    }
}
