//! One sweep over all accounts for one target post.
//!
//! Accounts are processed strictly one after another in registration order.
//! Per account: refresh if needed, like, pause, repost, pause, optional
//! reply, then the run's per-account delay. A failing action is audited and
//! announced and the sequence carries on; anything escaping an account
//! (storage failure, panic) becomes an `error` entry and the sweep moves to
//! the next account.

use crate::api::x_api::ActionClient;
use crate::db::{Account, AccountsStorage, AuditAction, AuditLog, NewAuditEntry};
use crate::error::RallyError;
use crate::service::events::EventBroadcaster;
use crate::service::pacing::Pacer;
use crate::types::broadcast::{BroadcastPlan, SweepOutcome};
use crate::x_oauth::{TokenRefresher, is_expired};
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct SweepRunner {
    accounts: AccountsStorage,
    audit: AuditLog,
    events: EventBroadcaster,
    refresher: TokenRefresher,
    actions: Arc<dyn ActionClient>,
    pacer: Arc<dyn Pacer>,
}

impl SweepRunner {
    pub fn new(
        accounts: AccountsStorage,
        audit: AuditLog,
        events: EventBroadcaster,
        refresher: TokenRefresher,
        actions: Arc<dyn ActionClient>,
        pacer: Arc<dyn Pacer>,
    ) -> Self {
        Self {
            accounts,
            audit,
            events,
            refresher,
            actions,
            pacer,
        }
    }

    pub async fn run(&self, plan: &BroadcastPlan) -> SweepOutcome {
        let accounts = match self.accounts.list_in_order().await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(run_id = plan.run_id, error = %e, "failed to load accounts");
                return SweepOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        let total = accounts.len();
        info!(
            run_id = plan.run_id,
            post_id = %plan.post_id,
            accounts = total,
            "sweep started"
        );

        for account in accounts {
            let username = account.username.clone();
            let attempt = AssertUnwindSafe(self.process_account(account, plan))
                .catch_unwind()
                .await;
            let failure = match attempt {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload),
            };
            self.contain_account_failure(&username, plan, &failure).await;
        }

        info!(run_id = plan.run_id, accounts = total, "sweep finished");
        SweepOutcome::Completed { accounts: total }
    }

    async fn process_account(
        &self,
        mut account: Account,
        plan: &BroadcastPlan,
    ) -> Result<(), RallyError> {
        if is_expired(&account, Utc::now()) {
            account = self.refresher.refresh(account).await;
        }
        let post_id = plan.post_id.as_str();

        let outcome = self.actions.like(&account, post_id).await;
        self.record(&account, AuditAction::Like, plan, outcome).await?;
        self.pacer.between_steps().await;

        let outcome = self.actions.repost(&account, post_id).await;
        self.record(&account, AuditAction::Repost, plan, outcome).await?;
        self.pacer.between_steps().await;

        if let Some(text) = plan.reply_text() {
            let outcome = self.actions.reply(&account, post_id, text).await;
            self.record(&account, AuditAction::Reply, plan, outcome).await?;
        }

        self.pacer.between_accounts(plan.delay).await;
        Ok(())
    }

    /// Audit then announce the result of one action.
    async fn record(
        &self,
        account: &Account,
        action: AuditAction,
        plan: &BroadcastPlan,
        outcome: Result<Value, RallyError>,
    ) -> Result<(), RallyError> {
        let post_id = Some(plan.post_id.as_str());
        match outcome {
            Ok(_) => {
                self.audit
                    .append(NewAuditEntry::ok(&account.username, action, post_id))
                    .await?;
                self.events
                    .announce(format!("[{}] {action} ✅", account.username));
            }
            Err(e) => {
                let note = e.audit_note();
                warn!(
                    run_id = plan.run_id,
                    account = %account.username,
                    %action,
                    error = %e,
                    "action failed"
                );
                self.audit
                    .append(NewAuditEntry::fail(&account.username, action, post_id, &note))
                    .await?;
                self.events
                    .announce(format!("[{}] {action} ❌ ({note})", account.username));
            }
        }
        Ok(())
    }

    async fn contain_account_failure(&self, username: &str, plan: &BroadcastPlan, failure: &str) {
        error!(
            run_id = plan.run_id,
            account = %username,
            error = %failure,
            "account processing aborted"
        );
        self.events.announce(format!("[{username}] error: {failure}"));
        let entry = NewAuditEntry::fail(
            username,
            AuditAction::Error,
            Some(plan.post_id.as_str()),
            failure,
        );
        if let Err(e) = self.audit.append(entry).await {
            error!(account = %username, error = %e, "audit write failed");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
