//! Durable Job Queues
//!
//! Jobs live in the `jobs` table of the supplier's SQLite file, next to the
//! key-value state. A job is `waiting` until a worker claims it (`active`),
//! then `completed`, or back to `waiting` with a fixed backoff until its
//! attempts run out (`failed`).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::BridgeEvent;
use crate::processors::MAX_FINALIZE_ATTEMPTS;
use crate::storage::SqlitePool;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid job {id}: {reason}")]
    InvalidJob { id: i64, reason: String },

    #[error("job not found: {0}")]
    NotFound(i64),
}

fn db_err(e: rusqlite::Error) -> QueueError {
    QueueError::Database(e.to_string())
}

/// The named queues of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    EventsCron,
    Events,
    FinalizeInbound,
    SendOutbound,
    FinalizeOutbound,
    BalanceCheck,
}

impl QueueName {
    pub const ALL: [QueueName; 6] = [
        QueueName::EventsCron,
        QueueName::Events,
        QueueName::FinalizeInbound,
        QueueName::SendOutbound,
        QueueName::FinalizeOutbound,
        QueueName::BalanceCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::EventsCron => "events-cron",
            QueueName::Events => "events",
            QueueName::FinalizeInbound => "finalize-inbound",
            QueueName::SendOutbound => "send-outbound",
            QueueName::FinalizeOutbound => "finalize-outbound",
            QueueName::BalanceCheck => "balance-check",
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);
        match self {
            QueueName::EventsCron => QueuePolicy::once(1).every(Duration::from_secs(120)),
            QueueName::Events => QueuePolicy::once(4),
            QueueName::FinalizeInbound => QueuePolicy::retrying(1, 12, TEN_MINUTES),
            QueueName::SendOutbound => QueuePolicy::once(1),
            QueueName::FinalizeOutbound => {
                QueuePolicy::retrying(1, MAX_FINALIZE_ATTEMPTS, TEN_MINUTES)
                    .every(Duration::from_secs(120))
            }
            QueueName::BalanceCheck => {
                QueuePolicy::retrying(1, 3, Duration::from_secs(60)).every(Duration::from_secs(60))
            }
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .iter()
            .copied()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| format!("unknown queue: {}", s))
    }
}

/// Concurrency, retry and schedule of one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub concurrency: usize,
    pub attempts: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
    /// Repeatable job interval
    pub repeat_every: Option<Duration>,
}

impl QueuePolicy {
    const fn once(concurrency: usize) -> Self {
        Self {
            concurrency,
            attempts: 1,
            backoff: Duration::ZERO,
            repeat_every: None,
        }
    }

    const fn retrying(concurrency: usize, attempts: u32, backoff: Duration) -> Self {
        Self {
            concurrency,
            attempts,
            backoff,
            repeat_every: None,
        }
    }

    const fn every(mut self, interval: Duration) -> Self {
        self.repeat_every = Some(interval);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// Job payload. Event jobs carry the full decoded event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<BridgeEvent>,
}

impl JobData {
    pub fn event(event: BridgeEvent) -> Self {
        Self { event: Some(event) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: i64,
    pub queue: QueueName,
    pub data: JobData,
    /// Attempts started so far, including the current one
    pub attempts: u32,
    pub max_attempts: u32,
    pub state: JobState,
    pub last_error: Option<String>,
}

/// What happened to a job whose attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Back to waiting until the given unix-millis time
    Scheduled(i64),
    Exhausted,
}

/// Jobs waiting/active/failed in one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// id, queue, payload, attempts, max_attempts, state, last_error
type JobRow = (i64, String, String, u32, u32, String, Option<String>);

/// SQLite-backed job store shared by every queue
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Result<Self, QueueError> {
        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, QueueError> {
        self.pool
            .get()
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), QueueError> {
        self.conn()?
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    queue TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    max_attempts INTEGER NOT NULL,
                    run_at INTEGER NOT NULL,
                    state TEXT NOT NULL,
                    last_error TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_queue_state ON jobs(queue, state, run_at);
                "#,
            )
            .map_err(db_err)
    }

    fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn decode(
        (id, queue, payload, attempts, max_attempts, state, last_error): JobRow,
    ) -> Result<Job, QueueError> {
        let invalid = |reason: String| QueueError::InvalidJob { id, reason };
        Ok(Job {
            id,
            queue: queue.parse().map_err(invalid)?,
            data: serde_json::from_str(&payload).map_err(|e| invalid(e.to_string()))?,
            attempts,
            max_attempts,
            state: state.parse().map_err(invalid)?,
            last_error,
        })
    }

    /// Add a job using the queue's attempt policy
    pub async fn enqueue(&self, queue: QueueName, data: &JobData) -> Result<i64, QueueError> {
        self.enqueue_at(queue, data, now_millis())
    }

    fn enqueue_at(&self, queue: QueueName, data: &JobData, run_at: i64) -> Result<i64, QueueError> {
        let payload = serde_json::to_string(data)
            .map_err(|e| QueueError::Database(format!("payload encode: {}", e)))?;
        let now = now_millis();
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO jobs (queue, payload, attempts, max_attempts, run_at, state, created_at, updated_at)
            VALUES (?1, ?2, 0, ?3, ?4, 'waiting', ?5, ?5)
            "#,
            params![queue.as_str(), payload, queue.policy().attempts, run_at, now],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Add the repeatable job of `queue` unless one is still waiting
    pub async fn enqueue_repeat(&self, queue: QueueName) -> Result<Option<i64>, QueueError> {
        let waiting: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE queue = ?1 AND state = 'waiting'",
                params![queue.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if waiting > 0 {
            return Ok(None);
        }
        self.enqueue_at(queue, &JobData::default(), now_millis()).map(Some)
    }

    /// Claim the next due job of `queue`, marking it active
    pub async fn claim(&self, queue: QueueName) -> Result<Option<Job>, QueueError> {
        let now = now_millis();
        let row = self
            .conn()?
            .query_row(
                r#"
                UPDATE jobs SET state = 'active', attempts = attempts + 1, updated_at = ?2
                WHERE id = (
                    SELECT id FROM jobs
                    WHERE queue = ?1 AND state = 'waiting' AND run_at <= ?2
                    ORDER BY run_at, id LIMIT 1
                )
                RETURNING id, queue, payload, attempts, max_attempts, state, last_error
                "#,
                params![queue.as_str(), now],
                Self::job_from_row,
            )
            .optional()
            .map_err(db_err)?;
        row.map(Self::decode).transpose()
    }

    pub async fn complete(&self, id: i64) -> Result<(), QueueError> {
        let rows = self
            .conn()?
            .execute(
                "UPDATE jobs SET state = 'completed', last_error = NULL, updated_at = ?2 WHERE id = ?1",
                params![id, now_millis()],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    /// Record a failed attempt; reschedule after the queue's backoff or give up
    pub async fn fail(&self, job: &Job, error: &str) -> Result<Retry, QueueError> {
        let now = now_millis();
        let retry = if job.attempts < job.max_attempts {
            Retry::Scheduled(now + millis(job.queue.policy().backoff))
        } else {
            Retry::Exhausted
        };
        let (state, run_at) = match retry {
            Retry::Scheduled(at) => (JobState::Waiting, at),
            Retry::Exhausted => (JobState::Failed, now),
        };
        let rows = self
            .conn()?
            .execute(
                "UPDATE jobs SET state = ?2, run_at = ?3, last_error = ?4, updated_at = ?5 WHERE id = ?1",
                params![job.id, state.as_str(), run_at, error, now],
            )
            .map_err(db_err)?;
        if rows == 0 {
            return Err(QueueError::NotFound(job.id));
        }
        Ok(retry)
    }

    /// Return jobs left active by a crashed process to waiting
    pub async fn recover_active(&self) -> Result<usize, QueueError> {
        self.conn()?
            .execute(
                "UPDATE jobs SET state = 'waiting', updated_at = ?1 WHERE state = 'active'",
                params![now_millis()],
            )
            .map_err(db_err)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Job>, QueueError> {
        let row = self
            .conn()?
            .query_row(
                "SELECT id, queue, payload, attempts, max_attempts, state, last_error \
                 FROM jobs WHERE id = ?1",
                params![id],
                Self::job_from_row,
            )
            .optional()
            .map_err(db_err)?;
        row.map(Self::decode).transpose()
    }

    pub async fn counts(&self, queue: QueueName) -> Result<QueueCounts, QueueError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT state, COUNT(*) FROM jobs WHERE queue = ?1 GROUP BY state")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![queue.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })
            .map_err(db_err)?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (state, n) = row.map_err(db_err)?;
            match state.parse::<JobState>() {
                Ok(JobState::Waiting) => counts.waiting = n,
                Ok(JobState::Active) => counts.active = n,
                Ok(JobState::Completed) => counts.completed = n,
                Ok(JobState::Failed) => counts.failed = n,
                Err(e) => tracing::warn!(queue = %queue, error = %e, "Ignoring job row"),
            }
        }
        Ok(counts)
    }

    #[cfg(test)]
    pub(crate) fn make_due(&self, id: i64) -> Result<(), QueueError> {
        self.conn()?
            .execute("UPDATE jobs SET run_at = 0 WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_pool;

    fn store() -> JobStore {
        JobStore::new(memory_pool().unwrap()).unwrap()
    }

    #[test]
    fn test_queue_policies() {
        let inbound = QueueName::FinalizeInbound.policy();
        assert_eq!(inbound.concurrency, 1);
        assert_eq!(inbound.attempts, 12);
        assert_eq!(inbound.backoff, Duration::from_secs(600));
        assert_eq!(inbound.repeat_every, None);

        assert_eq!(QueueName::FinalizeOutbound.policy().attempts, 24);
        assert_eq!(QueueName::Events.policy().concurrency, 4);
        assert_eq!(QueueName::SendOutbound.policy().attempts, 1);
        assert_eq!(
            QueueName::BalanceCheck.policy().repeat_every,
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            QueueName::EventsCron.policy().repeat_every,
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_queue_names_roundtrip() {
        for q in QueueName::ALL {
            assert_eq!(q.as_str().parse::<QueueName>().unwrap(), q);
        }
        assert!("bull".parse::<QueueName>().is_err());
    }

    #[tokio::test]
    async fn test_claim_complete() {
        let jobs = store();
        let id = jobs.enqueue(QueueName::SendOutbound, &JobData::default()).await.unwrap();

        let job = jobs.claim(QueueName::SendOutbound).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.state, JobState::Active);
        assert!(jobs.claim(QueueName::SendOutbound).await.unwrap().is_none());
        // other queues are separate
        assert!(jobs.claim(QueueName::Events).await.unwrap().is_none());

        jobs.complete(id).await.unwrap();
        assert_eq!(jobs.get(id).await.unwrap().unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_fixed_backoff_then_exhausted() {
        let jobs = store();
        let id = jobs.enqueue(QueueName::BalanceCheck, &JobData::default()).await.unwrap();

        for attempt in 1..=3u32 {
            let job = jobs.claim(QueueName::BalanceCheck).await.unwrap().unwrap();
            assert_eq!(job.attempts, attempt);
            let retry = jobs.fail(&job, "node down").await.unwrap();
            if attempt < 3 {
                assert!(matches!(retry, Retry::Scheduled(_)));
                // not due until the backoff passes
                assert!(jobs.claim(QueueName::BalanceCheck).await.unwrap().is_none());
                jobs.make_due(id).unwrap();
            } else {
                assert_eq!(retry, Retry::Exhausted);
            }
        }

        let job = jobs.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.last_error.as_deref(), Some("node down"));
        assert_eq!(jobs.counts(QueueName::BalanceCheck).await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_repeat_dedupes_while_waiting() {
        let jobs = store();
        assert!(jobs.enqueue_repeat(QueueName::EventsCron).await.unwrap().is_some());
        assert!(jobs.enqueue_repeat(QueueName::EventsCron).await.unwrap().is_none());

        jobs.claim(QueueName::EventsCron).await.unwrap().unwrap();
        assert!(jobs.enqueue_repeat(QueueName::EventsCron).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recover_active() {
        let jobs = store();
        let id = jobs.enqueue(QueueName::FinalizeInbound, &JobData::default()).await.unwrap();
        jobs.claim(QueueName::FinalizeInbound).await.unwrap().unwrap();

        assert_eq!(jobs.recover_active().await.unwrap(), 1);
        let job = jobs.claim(QueueName::FinalizeInbound).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let id = {
            let jobs = JobStore::new(crate::storage::open_pool(&path).unwrap()).unwrap();
            jobs.enqueue(QueueName::FinalizeOutbound, &JobData::default()).await.unwrap()
        };
        let jobs = JobStore::new(crate::storage::open_pool(&path).unwrap()).unwrap();
        let job = jobs.claim(QueueName::FinalizeOutbound).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.max_attempts, 24);
    }
}
