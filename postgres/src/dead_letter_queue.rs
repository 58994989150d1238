//! Dead letter queue for messages that could not be processed.
//!
//! Holds malformed payloads and messages that hit an infrastructure failure,
//! with enough context to investigate and republish them. Business-rule
//! rejections never land here; they are final and recorded in the audit trail.

use banking_ledger_core::BoxFuture;
use banking_ledger_core::message::QueueKind;
use banking_ledger_core::source::{DeadLetter, DeadLetterError, DeadLetterSink};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Status of a dead-lettered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Waiting for investigation or republishing
    Pending,
    /// Republished or otherwise handled
    Resolved,
    /// Permanently dropped
    Discarded,
}

impl DeadLetterStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, DeadLetterError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(DeadLetterError::Storage(format!("Invalid dead letter status: {s}"))),
        }
    }
}

/// A stored dead letter.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Unique identifier
    pub id: i64,
    /// The message and why it failed
    pub letter: DeadLetter,
    /// Current status
    pub status: DeadLetterStatus,
    /// When the entry was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// What was done about it
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-based dead letter queue.
///
/// # Example
///
/// ```no_run
/// use banking_ledger_postgres::PostgresDeadLetterQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = PostgresDeadLetterQueue::new(pool);
///
/// for failed in dlq.list_pending(100).await? {
///     tracing::info!(id = failed.id, error = %failed.letter.error_message, "pending dead letter");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresDeadLetterQueue {
    pool: PgPool,
}

impl PostgresDeadLetterQueue {
    /// Create a dead letter queue over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a dead letter, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the insert fails.
    pub async fn add_entry(&self, letter: &DeadLetter) -> Result<i64, DeadLetterError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_messages (queue, payload, error_message, retryable, failed_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(letter.queue.as_str())
        .bind(&letter.payload)
        .bind(&letter.error_message)
        .bind(letter.retryable)
        .bind(letter.failed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        tracing::warn!(
            dlq_id = id,
            queue = letter.queue.as_str(),
            retryable = letter.retryable,
            error = %letter.error_message,
            "Message added to dead letter queue"
        );

        metrics::counter!("ledger.dlq.stored", "queue" => letter.queue.as_str()).increment(1);

        Ok(id)
    }

    /// Pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedMessage>, DeadLetterError> {
        self.list_by_status(DeadLetterStatus::Pending, limit).await
    }

    /// Entries with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DeadLetterStatus,
        limit: usize,
    ) -> Result<Vec<FailedMessage>, DeadLetterError> {
        let rows = sqlx::query(
            r"
            SELECT id, queue, payload, error_message, retryable, failed_at,
                   status, resolved_at, resolution_notes
            FROM failed_messages
            WHERE status = $1
            ORDER BY failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        rows.iter().map(row_to_failed_message).collect()
    }

    /// A single entry.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails or no entry has `id`.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedMessage, DeadLetterError> {
        let row = sqlx::query(
            r"
            SELECT id, queue, payload, error_message, retryable, failed_at,
                   status, resolved_at, resolution_notes
            FROM failed_messages
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        row_to_failed_message(&row)
    }

    /// Mark an entry as resolved (for example after republishing it).
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, notes: Option<&str>) -> Result<(), DeadLetterError> {
        self.close_entry(id, DeadLetterStatus::Resolved, notes).await?;
        tracing::info!(dlq_id = id, "Dead letter marked as resolved");
        metrics::counter!("ledger.dlq.resolved").increment(1);
        Ok(())
    }

    /// Mark an entry as permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), DeadLetterError> {
        self.close_entry(id, DeadLetterStatus::Discarded, Some(reason)).await?;
        tracing::warn!(dlq_id = id, reason, "Dead letter discarded");
        metrics::counter!("ledger.dlq.discarded").increment(1);
        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, DeadLetterError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_messages WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        Ok(count)
    }

    async fn close_entry(
        &self,
        id: i64,
        status: DeadLetterStatus,
        notes: Option<&str>,
    ) -> Result<(), DeadLetterError> {
        let result = sqlx::query(
            r"
            UPDATE failed_messages
            SET status = $1, resolved_at = NOW(), resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(DeadLetterError::Storage(format!("No dead letter with id {id}")));
        }
        Ok(())
    }
}

impl DeadLetterSink for PostgresDeadLetterQueue {
    fn add<'a>(&'a self, letter: &'a DeadLetter) -> BoxFuture<'a, Result<i64, DeadLetterError>> {
        Box::pin(self.add_entry(letter))
    }
}

fn row_to_failed_message(row: &sqlx::postgres::PgRow) -> Result<FailedMessage, DeadLetterError> {
    let read = |e: sqlx::Error| DeadLetterError::Storage(format!("Failed to read dead letter: {e}"));

    let queue_name: String = row.try_get("queue").map_err(read)?;
    let queue = QueueKind::parse(&queue_name)
        .ok_or_else(|| DeadLetterError::Storage(format!("Unknown queue: {queue_name}")))?;
    let status: String = row.try_get("status").map_err(read)?;

    Ok(FailedMessage {
        id: row.try_get("id").map_err(read)?,
        letter: DeadLetter {
            queue,
            payload: row.try_get("payload").map_err(read)?,
            error_message: row.try_get("error_message").map_err(read)?,
            retryable: row.try_get("retryable").map_err(read)?,
            failed_at: row.try_get("failed_at").map_err(read)?,
        },
        status: DeadLetterStatus::parse(&status)?,
        resolved_at: row.try_get("resolved_at").map_err(read)?,
        resolution_notes: row.try_get("resolution_notes").map_err(read)?,
    })
}
