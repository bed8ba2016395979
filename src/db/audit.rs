use crate::db::models::{AuditEntry, NewAuditEntry, format_ts, parse_ts};
use crate::db::sqlite::SqlitePool;
use crate::error::RallyError;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

/// Upper bound on entries returned by one query.
pub const MAX_RECENT: u32 = 200;

/// Append-only log of attempted steps.
#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: NewAuditEntry) -> Result<i64, RallyError> {
        let result = sqlx::query(
            r#"INSERT INTO audit_log (username, action, post_id, status, note, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.username)
        .bind(entry.action.as_str())
        .bind(entry.post_id)
        .bind(entry.status.as_str())
        .bind(entry.note)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent entries, newest first. `limit` is clamped to `1..=MAX_RECENT`.
    pub async fn recent(&self, limit: u32) -> Result<Vec<AuditEntry>, RallyError> {
        let limit = limit.clamp(1, MAX_RECENT);
        let rows = sqlx::query(
            r#"SELECT id, username, action, post_id, status, note, created_at
               FROM audit_log ORDER BY created_at DESC, id DESC LIMIT ?"#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_model).collect()
    }

    pub async fn count(&self) -> Result<i64, RallyError> {
        let rec: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0)
    }

    fn row_to_model(row: SqliteRow) -> Result<AuditEntry, RallyError> {
        let action: String = row.try_get("action")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(AuditEntry {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            action: action
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            post_id: row.try_get("post_id")?,
            status: status
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            note: row.try_get("note")?,
            created_at: parse_ts(&created_at)?,
        })
    }
}
