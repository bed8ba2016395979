use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access level of a connected account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One connected X identity with its stored OAuth credentials.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Account {
    pub id: i64,
    pub x_user_id: String,
    pub username: String,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Identity and tokens obtained from a successful authorization.
#[derive(Debug, Clone)]
pub struct AccountGrant {
    pub x_user_id: String,
    pub username: String,
    pub name: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Like,
    Repost,
    Reply,
    Refresh,
    Error,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Like => "like",
            AuditAction::Repost => "repost",
            AuditAction::Reply => "reply",
            AuditAction::Refresh => "refresh",
            AuditAction::Error => "error",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(AuditAction::Like),
            "repost" => Ok(AuditAction::Repost),
            "reply" => Ok(AuditAction::Reply),
            "refresh" => Ok(AuditAction::Refresh),
            "error" => Ok(AuditAction::Error),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Ok,
    Fail,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Ok => "ok",
            AuditStatus::Fail => "fail",
        }
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(AuditStatus::Ok),
            "fail" => Ok(AuditStatus::Fail),
            other => Err(format!("unknown audit status: {other}")),
        }
    }
}

/// Immutable audit row, as read back from storage.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditEntry {
    pub id: i64,
    pub username: String,
    pub action: AuditAction,
    pub post_id: Option<String>,
    pub status: AuditStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit row to append.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub username: String,
    pub action: AuditAction,
    pub post_id: Option<String>,
    pub status: AuditStatus,
    pub note: Option<String>,
}

impl NewAuditEntry {
    pub fn ok(username: impl Into<String>, action: AuditAction, post_id: Option<&str>) -> Self {
        Self {
            username: username.into(),
            action,
            post_id: post_id.map(str::to_owned),
            status: AuditStatus::Ok,
            note: None,
        }
    }

    pub fn fail(
        username: impl Into<String>,
        action: AuditAction,
        post_id: Option<&str>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            action,
            post_id: post_id.map(str::to_owned),
            status: AuditStatus::Fail,
            note: Some(note.into()),
        }
    }
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
