//! SQL DDL for initializing the account, audit and settings storage.
//! SQLite-first design; statements are idempotent and run one by one.

/// SQLite schema with:
/// - `accounts`: one row per connected X identity, `x_user_id` UNIQUE
/// - `audit_log`: append-only record of every attempted step
/// - `settings`: string key/value pairs
///
/// Timestamps are fixed-width RFC3339 UTC strings, so text order is time order.
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    x_user_id TEXT NOT NULL UNIQUE,
    username TEXT NOT NULL,
    name TEXT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT NULL,
    token_type TEXT NULL,
    scope TEXT NULL,
    expires_at TEXT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accounts_created_at ON accounts(created_at);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    action TEXT NOT NULL,
    post_id TEXT NULL,
    status TEXT NOT NULL,
    note TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log(created_at);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
