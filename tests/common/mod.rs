#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use xrally::api::x_api::ActionClient;
use xrally::config::BROADCAST_DELAY_KEY;
use xrally::db::{Account, AccountGrant, Database};
use xrally::error::{RallyError, XApiError};
use xrally::service::orchestrator::{self, OrchestratorArgs, OrchestratorHandle};
use xrally::service::{EventBroadcaster, Pacer, Subscription, SweepRunner};
use xrally::x_oauth::{TokenExchange, TokenGrant, TokenRefresher};

pub const POST_URL: &str = "https://x.com/acct/status/1848539495849937921";
pub const POST_ID: &str = "1848539495849937921";

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub username: String,
    pub action: &'static str,
    pub token: String,
    pub text: Option<String>,
}

/// Action client with scripted failures, panics and an optional gate that
/// holds every call until a permit is released.
#[derive(Default)]
pub struct ScriptedActions {
    calls: Mutex<Vec<Call>>,
    failures: HashSet<(String, &'static str)>,
    panics: HashSet<String>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn failing(mut self, username: &str, action: &'static str) -> Self {
        self.failures.insert((username.to_string(), action));
        self
    }

    pub fn panicking(mut self, username: &str) -> Self {
        self.panics.insert(username.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn perform(
        &self,
        account: &Account,
        action: &'static str,
        text: Option<&str>,
    ) -> Result<Value, RallyError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                username: account.username.clone(),
                action,
                token: account.access_token.clone(),
                text: text.map(str::to_owned),
            });
        }
        if self.panics.contains(&account.username) {
            panic!("scripted panic for {}", account.username);
        }
        if self.failures.contains(&(account.username.clone(), action)) {
            return Err(RallyError::XApi(XApiError {
                status: 403,
                title: Some("Forbidden".to_string()),
                detail: Some("You are not permitted to perform this action.".to_string()),
            }));
        }
        Ok(json!({ "data": { action: true } }))
    }
}

#[async_trait]
impl ActionClient for ScriptedActions {
    async fn like(&self, account: &Account, _post_id: &str) -> Result<Value, RallyError> {
        self.perform(account, "like", None).await
    }

    async fn repost(&self, account: &Account, _post_id: &str) -> Result<Value, RallyError> {
        self.perform(account, "repost", None).await
    }

    async fn reply(
        &self,
        account: &Account,
        _post_id: &str,
        text: &str,
    ) -> Result<Value, RallyError> {
        self.perform(account, "reply", Some(text)).await
    }
}

pub struct FakeExchange {
    pub calls: AtomicUsize,
    fail: bool,
}

impl FakeExchange {
    pub fn ok() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenExchange for FakeExchange {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, RallyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RallyError::Oauth2Server {
                error: "invalid_grant".to_string(),
            });
        }
        Ok(TokenGrant {
            access_token: "fresh-token".to_string(),
            refresh_token: Some("fresh-refresh".to_string()),
            expires_in: Some(Duration::from_secs(7200)),
            token_type: Some("bearer".to_string()),
            scope: None,
        })
    }
}

/// Records requested pauses without sleeping.
#[derive(Default)]
pub struct RecordingPacer {
    steps: AtomicUsize,
    account_delays: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn step_count(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }

    pub fn account_delays(&self) -> Vec<Duration> {
        self.account_delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn between_steps(&self) {
        self.steps.fetch_add(1, Ordering::SeqCst);
    }

    async fn between_accounts(&self, delay: Duration) {
        self.account_delays.lock().unwrap().push(delay);
    }
}

pub struct Harness {
    pub db: Database,
    pub events: EventBroadcaster,
    pub actions: Arc<ScriptedActions>,
    pub exchange: Arc<FakeExchange>,
    pub pacer: Arc<RecordingPacer>,
    pub orchestrator: OrchestratorHandle,
}

impl Harness {
    pub async fn start(actions: ScriptedActions) -> Self {
        Self::start_with(actions, FakeExchange::ok()).await
    }

    pub async fn start_with(actions: ScriptedActions, exchange: FakeExchange) -> Self {
        let db = Database::in_memory().await.unwrap();
        db.settings
            .ensure_default(BROADCAST_DELAY_KEY, "30")
            .await
            .unwrap();
        let events = EventBroadcaster::new(256);
        let actions = Arc::new(actions);
        let exchange = Arc::new(exchange);
        let pacer = Arc::new(RecordingPacer::default());

        let refresher = TokenRefresher::new(
            exchange.clone(),
            db.accounts.clone(),
            db.audit.clone(),
            events.clone(),
        );
        let runner = SweepRunner::new(
            db.accounts.clone(),
            db.audit.clone(),
            events.clone(),
            refresher,
            actions.clone(),
            pacer.clone(),
        );
        let orchestrator = orchestrator::spawn(OrchestratorArgs {
            runner: Arc::new(runner),
            settings: db.settings.clone(),
            events: events.clone(),
            default_delay_secs: 30,
        })
        .await
        .unwrap();

        Self {
            db,
            events,
            actions,
            exchange,
            pacer,
            orchestrator,
        }
    }

    /// Register an account whose token expires in `expires_in_secs`
    /// (negative for already expired).
    pub async fn add_account(&self, username: &str, expires_in_secs: i64) -> Account {
        self.db
            .accounts
            .upsert_from_grant(AccountGrant {
                x_user_id: format!("id-{username}"),
                username: username.to_string(),
                name: None,
                access_token: format!("token-{username}"),
                refresh_token: Some(format!("refresh-{username}")),
                token_type: Some("bearer".to_string()),
                scope: None,
                expires_at: Some(Utc::now() + TimeDelta::seconds(expires_in_secs)),
            })
            .await
            .unwrap()
    }
}

pub fn is_terminal(line: &str) -> bool {
    line.starts_with("✅ Broadcast finished") || line.starts_with("❌ Broadcast failed")
}

/// Collect announcements up to and including the run's terminal line.
pub async fn wait_for_terminal(sub: &mut Subscription) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let line = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for the sweep to finish")
            .expect("event broadcaster closed");
        let done = is_terminal(&line);
        lines.push(line);
        if done {
            return lines;
        }
    }
}

/// Next announcement, failing the test after five seconds.
pub async fn next_line(sub: &mut Subscription) -> String {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for an announcement")
        .expect("event broadcaster closed")
}
