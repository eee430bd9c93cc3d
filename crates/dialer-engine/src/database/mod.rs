//! # Async persistence layer (sqlx + SQLite)
//!
//! Crash-safe progress tracking for runs and legs, plus the list-contact
//! status updates and call-activity records the rest of the CRM reads.
//! Fully async over a pooled SQLite connection in WAL mode; all writes
//! are best-effort from the engine's point of view (a failed write is
//! logged, never fatal to a run).
//!
//! ## Quick Start
//!
//! ```
//! use dialer_engine::database::DatabaseManager;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let db = DatabaseManager::new_in_memory().await?;
//! db.add_outbound_number("+15550100").await?;
//! assert_eq!(db.load_number_pool().await?, vec!["+15550100".to_string()]);
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::orchestrator::types::{Leg, RunState};
use crate::queue::Contact;

/// Dial disposition written back to the list-membership row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactDialStatus {
    Pending,
    Answered,
    NoAnswer,
    Failed,
}

impl ContactDialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactDialStatus::Pending => "pending",
            ContactDialStatus::Answered => "answered",
            ContactDialStatus::NoAnswer => "no-answer",
            ContactDialStatus::Failed => "failed",
        }
    }
}

/// Run record as stored
#[derive(Debug, Clone)]
pub struct DbRun {
    pub run_id: String,
    pub list_id: String,
    pub list_name: String,
    pub status: String,
    pub max_lines: i64,
    pub strategy: String,
    pub attempted: i64,
    pub answered: i64,
    pub no_answer: i64,
    pub voicemail: i64,
    pub busy: i64,
    pub failed: i64,
    pub canceled: i64,
    pub total_talk_seconds: i64,
    pub avg_ring_ms: i64,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DbRun {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        Ok(DbRun {
            run_id: row.try_get("run_id")?,
            list_id: row.try_get("list_id")?,
            list_name: row.try_get("list_name")?,
            status: row.try_get("status")?,
            max_lines: row.try_get("max_lines")?,
            strategy: row.try_get("strategy")?,
            attempted: row.try_get("attempted")?,
            answered: row.try_get("answered")?,
            no_answer: row.try_get("no_answer")?,
            voicemail: row.try_get("voicemail")?,
            busy: row.try_get("busy")?,
            failed: row.try_get("failed")?,
            canceled: row.try_get("canceled")?,
            total_talk_seconds: row.try_get("total_talk_seconds")?,
            avg_ring_ms: row.try_get("avg_ring_ms")?,
            started_at: row.try_get("started_at")?,
            paused_at: row.try_get("paused_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// Leg record as stored
#[derive(Debug, Clone)]
pub struct DbLeg {
    pub leg_id: String,
    pub run_id: String,
    pub membership_id: String,
    pub line: i64,
    pub from_number: String,
    pub to_number: String,
    pub status: String,
    pub amd_verdict: Option<String>,
    pub hangup_cause: Option<String>,
    pub provider_call_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ring_ms: Option<i64>,
}

impl DbLeg {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        Ok(DbLeg {
            leg_id: row.try_get("leg_id")?,
            run_id: row.try_get("run_id")?,
            membership_id: row.try_get("membership_id")?,
            line: row.try_get("line")?,
            from_number: row.try_get("from_number")?,
            to_number: row.try_get("to_number")?,
            status: row.try_get("status")?,
            amd_verdict: row.try_get("amd_verdict")?,
            hangup_cause: row.try_get("hangup_cause")?,
            provider_call_id: row.try_get("provider_call_id")?,
            started_at: row.try_get("started_at")?,
            answered_at: row.try_get("answered_at")?,
            ended_at: row.try_get("ended_at")?,
            ring_ms: row.try_get("ring_ms")?,
        })
    }
}

/// Main database manager
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Create a new database manager with automatic migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("🗄️ Initializing dialer database: {}", database_url);
        use std::str::FromStr;

        let options = sqlx::sqlite::SqliteConnectOptions::from_str(database_url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow!("Failed to run migrations: {}", e))?;

        info!("✅ Dialer database ready (WAL mode enabled)");
        Ok(Self { pool })
    }

    /// Create an in-memory database for testing
    ///
    /// Pinned to a single pooled connection: every connection to
    /// `sqlite::memory:` is its own database, so the pool must never
    /// open or recycle a second one.
    pub async fn new_in_memory() -> Result<Self> {
        use std::str::FromStr;

        let options = sqlx::sqlite::SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| anyhow!("Failed to open in-memory database: {}", e))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow!("Failed to run migrations: {}", e))?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // === Runs ===

    /// Insert the row for a freshly started run
    pub async fn create_run(&self, run: &RunState) -> Result<()> {
        sqlx::query(
            "INSERT INTO dial_runs \
             (run_id, list_id, list_name, status, max_lines, strategy, started_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id.0)
        .bind(&run.list_id)
        .bind(&run.list_name)
        .bind(run.status.as_str())
        .bind(run.max_lines as i64)
        .bind(format!("{:?}", run.strategy).to_lowercase())
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;
        debug!("💾 Persisted run {}", run.id);
        Ok(())
    }

    /// Write back a run's status, counters, and timestamps
    pub async fn update_run(&self, run: &RunState) -> Result<()> {
        sqlx::query(
            "UPDATE dial_runs SET status = ?, attempted = ?, answered = ?, \
             no_answer = ?, voicemail = ?, busy = ?, failed = ?, canceled = ?, \
             total_talk_seconds = ?, avg_ring_ms = ?, paused_at = ?, completed_at = ? \
             WHERE run_id = ?",
        )
        .bind(run.status.as_str())
        .bind(run.stats.attempted as i64)
        .bind(run.stats.answered as i64)
        .bind(run.stats.no_answer as i64)
        .bind(run.stats.voicemail as i64)
        .bind(run.stats.busy as i64)
        .bind(run.stats.failed as i64)
        .bind(run.stats.canceled as i64)
        .bind(run.stats.total_talk_seconds as i64)
        .bind(run.stats.avg_ring_ms as i64)
        .bind(run.paused_at)
        .bind(run.completed_at)
        .bind(&run.id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one run row
    pub async fn get_run(&self, run_id: &str) -> Result<Option<DbRun>> {
        let row = sqlx::query("SELECT * FROM dial_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| DbRun::from_row(&r)).transpose()
    }

    /// True if a run for this list is currently marked running
    pub async fn has_running_run_for_list(&self, list_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM dial_runs WHERE list_id = ? AND status = 'running'",
        )
        .bind(list_id)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    // === Legs ===

    /// Insert or replace one leg record
    pub async fn upsert_leg(&self, leg: &Leg) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO dial_legs \
             (leg_id, run_id, membership_id, line, from_number, to_number, status, \
              amd_verdict, hangup_cause, provider_call_id, started_at, answered_at, \
              ended_at, ring_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&leg.id.0)
        .bind(&leg.run_id.0)
        .bind(&leg.contact.membership_id)
        .bind(leg.line as i64)
        .bind(&leg.from_number)
        .bind(&leg.to_number)
        .bind(leg.status.as_str())
        .bind(leg.amd_verdict.map(|v| format!("{:?}", v).to_lowercase()))
        .bind(leg.hangup_cause.map(|c| format!("{:?}", c).to_lowercase()))
        .bind(leg.provider_call_id.as_ref().map(|c| c.0.clone()))
        .bind(leg.started_at)
        .bind(leg.answered_at)
        .bind(leg.ended_at)
        .bind(leg.ring_ms.map(|ms| ms as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All leg records for one run, oldest first
    pub async fn list_legs_for_run(&self, run_id: &str) -> Result<Vec<DbLeg>> {
        let rows = sqlx::query(
            "SELECT * FROM dial_legs WHERE run_id = ? ORDER BY started_at ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(DbLeg::from_row).collect()
    }

    // === List contacts ===

    /// Seed one list-membership row (used by imports and tests)
    pub async fn insert_contact(&self, contact: &Contact) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO list_contacts \
             (membership_id, list_id, name, phone, phone_secondary, phone_tertiary, \
              city, state, tags, dial_status, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&contact.membership_id)
        .bind(&contact.list_id)
        .bind(&contact.name)
        .bind(&contact.phone)
        .bind(&contact.phone_secondary)
        .bind(&contact.phone_tertiary)
        .bind(&contact.city)
        .bind(&contact.state)
        .bind(serde_json::to_string(&contact.tags)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the not-yet-dialed contacts for a list, in list order
    pub async fn load_pending_contacts(&self, list_id: &str) -> Result<Vec<Contact>> {
        let rows = sqlx::query(
            "SELECT * FROM list_contacts \
             WHERE list_id = ? AND dial_status = 'pending' \
             ORDER BY rowid ASC",
        )
        .bind(list_id)
        .fetch_all(&self.pool)
        .await?;

        let mut contacts = Vec::with_capacity(rows.len());
        for row in &rows {
            let tags: String = row.try_get("tags")?;
            contacts.push(Contact {
                membership_id: row.try_get("membership_id")?,
                list_id: row.try_get("list_id")?,
                name: row.try_get("name")?,
                phone: row.try_get("phone")?,
                phone_secondary: row.try_get("phone_secondary")?,
                phone_tertiary: row.try_get("phone_tertiary")?,
                city: row.try_get("city")?,
                state: row.try_get("state")?,
                tags: serde_json::from_str(&tags).unwrap_or_default(),
            });
        }
        Ok(contacts)
    }

    /// Record a dial outcome on the list-membership row
    pub async fn update_contact_status(
        &self,
        membership_id: &str,
        status: ContactDialStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE list_contacts SET dial_status = ?, updated_at = ? WHERE membership_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(membership_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Progress counters for one list: (total, dialed)
    pub async fn get_list_progress(&self, list_id: &str) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
             SUM(CASE WHEN dial_status != 'pending' THEN 1 ELSE 0 END) AS dialed \
             FROM list_contacts WHERE list_id = ?",
        )
        .bind(list_id)
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        let dialed: Option<i64> = row.try_get("dialed")?;
        Ok((total, dialed.unwrap_or(0)))
    }

    // === Number pool ===

    /// Add a number to the eligible outbound pool
    pub async fn add_outbound_number(&self, number: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO outbound_numbers (number, enabled) VALUES (?, 1)")
            .bind(number)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load the enabled outbound numbers, in insertion order
    pub async fn load_number_pool(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT number FROM outbound_numbers WHERE enabled = 1 ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("number").map_err(Into::into))
            .collect()
    }

    // === Call activity ===

    /// Write the reporting/history record for one finished attempt
    pub async fn insert_call_activity(&self, leg: &Leg) -> Result<()> {
        sqlx::query(
            "INSERT INTO call_activity \
             (activity_id, run_id, leg_id, membership_id, to_number, disposition, \
              talk_seconds, occurred_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&leg.run_id.0)
        .bind(&leg.id.0)
        .bind(&leg.contact.membership_id)
        .bind(&leg.to_number)
        .bind(leg.status.as_str())
        .bind(leg.talk_seconds() as i64)
        .bind(leg.ended_at.unwrap_or_else(Utc::now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
