use crate::db::models::{Account, AccountGrant, Role, format_ts, parse_ts};
use crate::db::schema::SQLITE_INIT;
use crate::error::RallyError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

pub type SqlitePool = Pool<Sqlite>;

const ACCOUNT_COLUMNS: &str = "id, x_user_id, username, name, access_token, refresh_token, \
     token_type, scope, expires_at, role, created_at, updated_at";

/// Initialize the schema by executing the bundled DDL.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), RallyError> {
    // sqlx::query runs a single statement at a time
    for stmt in SQLITE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct AccountsStorage {
    pool: SqlitePool,
}

impl AccountsStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create or update the account for `grant.x_user_id` and return the stored row.
    ///
    /// A missing refresh token keeps the one already on file. When no account
    /// holds the admin role yet, this account is promoted.
    pub async fn upsert_from_grant(&self, grant: AccountGrant) -> Result<Account, RallyError> {
        let now = format_ts(Utc::now());
        let expires_at = grant.expires_at.map(format_ts);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO accounts (
                x_user_id, username, name, access_token, refresh_token,
                token_type, scope, expires_at, role, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'user', ?, ?)
            ON CONFLICT(x_user_id) DO UPDATE SET
                username=excluded.username,
                name=excluded.name,
                access_token=excluded.access_token,
                refresh_token=COALESCE(excluded.refresh_token, accounts.refresh_token),
                token_type=excluded.token_type,
                scope=excluded.scope,
                expires_at=excluded.expires_at,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(&grant.x_user_id)
        .bind(grant.username)
        .bind(grant.name)
        .bind(grant.access_token)
        .bind(grant.refresh_token)
        .bind(grant.token_type)
        .bind(grant.scope)
        .bind(expires_at)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"UPDATE accounts SET role = 'admin'
               WHERE x_user_id = ?
                 AND NOT EXISTS (SELECT 1 FROM accounts WHERE role = 'admin')"#,
        )
        .bind(&grant.x_user_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE x_user_id = ?"
        ))
        .bind(&grant.x_user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Self::row_to_model(row)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Account>, RallyError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_model).transpose()
    }

    /// All accounts, first registered first.
    pub async fn list_in_order(&self) -> Result<Vec<Account>, RallyError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_model).collect()
    }

    /// Persist refreshed credentials for one account.
    pub async fn update_tokens(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        token_type: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), RallyError> {
        sqlx::query(
            r#"UPDATE accounts SET
                access_token = ?,
                refresh_token = ?,
                token_type = COALESCE(?, token_type),
                expires_at = ?,
                updated_at = ?
              WHERE id = ?"#,
        )
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_type)
        .bind(expires_at.map(format_ts))
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_model(row: SqliteRow) -> Result<Account, RallyError> {
        let expires_raw: Option<String> = row.try_get("expires_at")?;
        let role_raw: String = row.try_get("role")?;
        let created_raw: String = row.try_get("created_at")?;
        let updated_raw: String = row.try_get("updated_at")?;

        let role: Role = role_raw
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        let expires_at = expires_raw.as_deref().map(parse_ts).transpose()?;

        Ok(Account {
            id: row.try_get("id")?,
            x_user_id: row.try_get("x_user_id")?,
            username: row.try_get("username")?,
            name: row.try_get("name")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            token_type: row.try_get("token_type")?,
            scope: row.try_get("scope")?,
            expires_at,
            role,
            created_at: parse_ts(&created_raw)?,
            updated_at: parse_ts(&updated_raw)?,
        })
    }
}
