use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Trigger input: a post reference plus optional reply text and delay override.
#[derive(Debug, Clone, Default)]
pub struct BroadcastRequest {
    pub post_ref: String,
    pub comment: Option<String>,
    pub delay_secs: Option<u64>,
}

impl BroadcastRequest {
    pub fn new(post_ref: impl Into<String>) -> Self {
        Self {
            post_ref: post_ref.into(),
            ..Default::default()
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_delay_secs(mut self, delay_secs: u64) -> Self {
        self.delay_secs = Some(delay_secs);
        self
    }
}

/// A validated sweep: everything the worker needs, fixed at acceptance.
#[derive(Debug, Clone)]
pub struct BroadcastPlan {
    pub run_id: u64,
    pub post_id: String,
    pub comment: Option<String>,
    pub delay: Duration,
}

impl BroadcastPlan {
    /// Reply text, if the comment is present and not blank.
    pub fn reply_text(&self) -> Option<&str> {
        self.comment.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// Acknowledgement returned to the caller of an accepted trigger.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunTicket {
    pub run_id: u64,
    pub post_id: String,
    pub delay_secs: u64,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub run_id: u64,
    pub post_id: String,
    pub comment: Option<String>,
    pub delay_secs: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed { accounts: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FinishedRun {
    pub run_id: u64,
    pub post_id: String,
    pub outcome: SweepOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Snapshot of the orchestrator's run state.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub running: bool,
    pub active: Option<ActiveRun>,
    pub last: Option<FinishedRun>,
}
