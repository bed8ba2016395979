mod common;

use common::{
    FakeExchange, Harness, POST_ID, POST_URL, RecordingPacer, ScriptedActions, next_line,
    wait_for_terminal,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use xrally::config::BROADCAST_DELAY_KEY;
use xrally::db::{AccountsStorage, AuditAction, AuditEntry, AuditLog, AuditStatus, Database};
use xrally::error::RallyError;
use xrally::service::orchestrator::{self, OrchestratorArgs};
use xrally::service::{EventBroadcaster, SweepRunner};
use xrally::types::broadcast::{BroadcastRequest, SweepOutcome};
use xrally::x_oauth::TokenRefresher;

/// Audit entries oldest first.
async fn chronological(h: &Harness) -> Vec<AuditEntry> {
    let mut entries = h.db.audit.recent(200).await.unwrap();
    entries.reverse();
    entries
}

fn summary(entries: &[AuditEntry]) -> Vec<(String, AuditAction, AuditStatus)> {
    entries
        .iter()
        .map(|e| (e.username.clone(), e.action, e.status))
        .collect()
}

#[tokio::test]
async fn sweep_likes_reposts_and_replies_for_every_account() {
    let h = Harness::start(ScriptedActions::new()).await;
    h.add_account("alice", 3600).await;
    h.add_account("bob", 3600).await;
    let mut sub = h.events.subscribe();

    assert!(!h.orchestrator.is_running().await.unwrap());
    let ticket = h
        .orchestrator
        .trigger(
            BroadcastRequest::new(POST_URL)
                .with_comment("nice")
                .with_delay_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(ticket.post_id, POST_ID);
    assert_eq!(ticket.delay_secs, 5);
    assert_eq!(ticket.comment.as_deref(), Some("nice"));

    let lines = wait_for_terminal(&mut sub).await;
    assert!(!h.orchestrator.is_running().await.unwrap());

    assert_eq!(lines[0], format!("🚀 Broadcast start: post {POST_ID}, delay 5s"));
    for expected in [
        "[alice] like ✅",
        "[alice] repost ✅",
        "[alice] reply ✅",
        "[bob] like ✅",
        "[bob] repost ✅",
        "[bob] reply ✅",
    ] {
        assert!(lines.iter().any(|l| l == expected), "missing {expected:?} in {lines:?}");
    }
    assert!(lines.last().unwrap().starts_with("✅ Broadcast finished"));

    let entries = chronological(&h).await;
    use AuditAction::*;
    use AuditStatus::Ok as Done;
    assert_eq!(
        summary(&entries),
        vec![
            ("alice".to_string(), Like, Done),
            ("alice".to_string(), Repost, Done),
            ("alice".to_string(), Reply, Done),
            ("bob".to_string(), Like, Done),
            ("bob".to_string(), Repost, Done),
            ("bob".to_string(), Reply, Done),
        ]
    );
    assert!(entries.iter().all(|e| e.post_id.as_deref() == Some(POST_ID)));

    let calls = h.actions.calls();
    assert_eq!(calls[0].token, "token-alice");
    assert_eq!(calls[2].text.as_deref(), Some("nice"));
    assert_eq!(calls[3].token, "token-bob");
    assert_eq!(h.pacer.account_delays(), vec![Duration::from_secs(5); 2]);
    assert_eq!(h.pacer.step_count(), 4);
    assert_eq!(h.exchange.call_count(), 0);

    let status = h.orchestrator.status().await.unwrap();
    let last = status.last.unwrap();
    assert_eq!(last.outcome, SweepOutcome::Completed { accounts: 2 });
    assert_eq!(last.post_id, POST_ID);
    assert!(status.active.is_none());
}

#[tokio::test]
async fn reference_without_status_id_is_rejected_silently() {
    let h = Harness::start(ScriptedActions::new()).await;
    h.add_account("alice", 3600).await;
    let mut sub = h.events.subscribe();

    let err = h
        .orchestrator
        .trigger(BroadcastRequest::new("https://x.com/acct/home"))
        .await
        .unwrap_err();
    assert!(matches!(err, RallyError::InvalidPostRef(_)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sub.try_recv(), None);
    assert_eq!(h.db.audit.count().await.unwrap(), 0);
    assert!(h.actions.calls().is_empty());
    assert!(!h.orchestrator.is_running().await.unwrap());
}

#[tokio::test]
async fn second_trigger_while_running_conflicts_without_side_effects() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::start(ScriptedActions::gated(gate.clone())).await;
    h.add_account("alice", 3600).await;
    let mut sub = h.events.subscribe();

    let first = h
        .orchestrator
        .trigger(BroadcastRequest::new(POST_URL).with_delay_secs(0))
        .await
        .unwrap();
    assert!(next_line(&mut sub).await.starts_with("🚀 Broadcast start"));
    assert!(h.orchestrator.is_running().await.unwrap());

    let err = h
        .orchestrator
        .trigger(BroadcastRequest::new("https://x.com/other/status/7").with_comment("hey"))
        .await
        .unwrap_err();
    assert!(matches!(err, RallyError::BroadcastRunning));
    assert_eq!(sub.try_recv(), None);
    assert_eq!(h.db.audit.count().await.unwrap(), 0);

    let active = h.orchestrator.status().await.unwrap().active.unwrap();
    assert_eq!(active.run_id, first.run_id);
    assert_eq!(active.post_id, POST_ID);

    gate.add_permits(16);
    wait_for_terminal(&mut sub).await;
    assert!(!h.orchestrator.is_running().await.unwrap());
    assert_eq!(h.db.audit.count().await.unwrap(), 2);

    let second = h
        .orchestrator
        .trigger(BroadcastRequest::new(POST_URL).with_delay_secs(0))
        .await
        .unwrap();
    assert!(second.run_id > first.run_id);
    wait_for_terminal(&mut sub).await;
}

#[tokio::test]
async fn failed_actions_are_recorded_and_the_sweep_carries_on() {
    let actions = ScriptedActions::new()
        .failing("alice", "like")
        .failing("bob", "reply");
    let h = Harness::start(actions).await;
    h.add_account("alice", 3600).await;
    h.add_account("bob", 3600).await;
    let mut sub = h.events.subscribe();

    h.orchestrator
        .trigger(BroadcastRequest::new(POST_URL).with_comment("nice"))
        .await
        .unwrap();
    let lines = wait_for_terminal(&mut sub).await;

    assert!(lines.contains(&"[alice] like ❌ (Forbidden)".to_string()));
    assert!(lines.contains(&"[bob] reply ❌ (Forbidden)".to_string()));
    assert!(lines.last().unwrap().starts_with("✅ Broadcast finished"));

    let entries = chronological(&h).await;
    use AuditAction::*;
    use AuditStatus::{Fail, Ok as Done};
    assert_eq!(
        summary(&entries),
        vec![
            ("alice".to_string(), Like, Fail),
            ("alice".to_string(), Repost, Done),
            ("alice".to_string(), Reply, Done),
            ("bob".to_string(), Like, Done),
            ("bob".to_string(), Repost, Done),
            ("bob".to_string(), Reply, Fail),
        ]
    );
    assert_eq!(entries[0].note.as_deref(), Some("Forbidden"));
    assert_eq!(entries[1].note, None);
}

#[tokio::test]
async fn blank_comment_skips_the_reply() {
    let h = Harness::start(ScriptedActions::new()).await;
    h.add_account("alice", 3600).await;
    let mut sub = h.events.subscribe();

    h.orchestrator
        .trigger(BroadcastRequest::new(POST_ID).with_comment("   "))
        .await
        .unwrap();
    wait_for_terminal(&mut sub).await;

    let actions: Vec<_> = chronological(&h).await.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Like, AuditAction::Repost]);
    assert!(h.actions.calls().iter().all(|c| c.action != "reply"));
}

#[tokio::test]
async fn delay_comes_from_the_setting_unless_overridden() {
    let h = Harness::start(ScriptedActions::new()).await;
    h.add_account("alice", 3600).await;
    let mut sub = h.events.subscribe();

    h.db.settings.upsert(BROADCAST_DELAY_KEY, "7").await.unwrap();
    let ticket = h
        .orchestrator
        .trigger(BroadcastRequest::new(POST_URL))
        .await
        .unwrap();
    assert_eq!(ticket.delay_secs, 7);
    let lines = wait_for_terminal(&mut sub).await;
    assert_eq!(lines[0], format!("🚀 Broadcast start: post {POST_ID}, delay 7s"));

    h.db.settings
        .upsert(BROADCAST_DELAY_KEY, "not a number")
        .await
        .unwrap();
    let ticket = h
        .orchestrator
        .trigger(BroadcastRequest::new(POST_URL))
        .await
        .unwrap();
    assert_eq!(ticket.delay_secs, 30);
    wait_for_terminal(&mut sub).await;

    assert_eq!(
        h.pacer.account_delays(),
        vec![Duration::from_secs(7), Duration::from_secs(30)]
    );
}

#[tokio::test]
async fn expiring_token_is_refreshed_before_acting() {
    let h = Harness::start(ScriptedActions::new()).await;
    let account = h.add_account("alice", 30).await;
    let mut sub = h.events.subscribe();

    h.orchestrator
        .trigger(BroadcastRequest::new(POST_URL).with_delay_secs(0))
        .await
        .unwrap();
    wait_for_terminal(&mut sub).await;

    assert_eq!(h.exchange.call_count(), 1);
    assert!(h.actions.calls().iter().all(|c| c.token == "fresh-token"));

    let stored = h.db.accounts.get_by_id(account.id).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "fresh-token");
    assert_eq!(stored.refresh_token.as_deref(), Some("fresh-refresh"));
    assert!(stored.expires_at.unwrap() > account.expires_at.unwrap());
    assert!(
        chronological(&h)
            .await
            .iter()
            .all(|e| e.action != AuditAction::Refresh)
    );
}

#[tokio::test]
async fn failed_refresh_still_attempts_the_actions() {
    let h = Harness::start_with(ScriptedActions::new(), FakeExchange::rejecting()).await;
    h.add_account("alice", -600).await;
    let mut sub = h.events.subscribe();

    h.orchestrator
        .trigger(BroadcastRequest::new(POST_URL).with_delay_secs(0))
        .await
        .unwrap();
    let lines = wait_for_terminal(&mut sub).await;
    assert_eq!(lines[1], "[alice] refresh ❌ (invalid_grant)");

    let entries = chronological(&h).await;
    assert_eq!(entries[0].action, AuditAction::Refresh);
    assert_eq!(entries[0].status, AuditStatus::Fail);
    assert_eq!(entries[0].post_id, None);
    assert_eq!(entries[0].note.as_deref(), Some("invalid_grant"));
    assert_eq!(entries.len(), 3);

    let calls = h.actions.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.token == "token-alice"));
}

#[tokio::test]
async fn panicking_account_is_contained() {
    let h = Harness::start(ScriptedActions::new().panicking("alice")).await;
    h.add_account("alice", 3600).await;
    h.add_account("bob", 3600).await;
    let mut sub = h.events.subscribe();

    h.orchestrator
        .trigger(BroadcastRequest::new(POST_URL).with_comment("nice"))
        .await
        .unwrap();
    let lines = wait_for_terminal(&mut sub).await;

    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("[alice] error: panicked: scripted panic for alice"))
    );
    assert!(lines.last().unwrap().starts_with("✅ Broadcast finished"));
    assert!(!h.orchestrator.is_running().await.unwrap());

    let entries = chronological(&h).await;
    assert_eq!(entries[0].username, "alice");
    assert_eq!(entries[0].action, AuditAction::Error);
    assert_eq!(entries[0].status, AuditStatus::Fail);
    assert!(entries[0].note.as_deref().unwrap().contains("scripted panic"));
    let bob: Vec<_> = entries[1..].iter().map(|e| (e.username.as_str(), e.status)).collect();
    assert_eq!(bob, vec![("bob", AuditStatus::Ok); 3]);

    // The aborted account does not wait out the per-account delay.
    assert_eq!(h.pacer.account_delays().len(), 1);
}

#[tokio::test]
async fn empty_account_list_completes_immediately() {
    let h = Harness::start(ScriptedActions::new()).await;
    let mut sub = h.events.subscribe();

    h.orchestrator
        .trigger(BroadcastRequest::new(POST_URL))
        .await
        .unwrap();
    let lines = wait_for_terminal(&mut sub).await;
    assert_eq!(lines.len(), 2);

    let last = h.orchestrator.status().await.unwrap().last.unwrap();
    assert_eq!(last.outcome, SweepOutcome::Completed { accounts: 0 });
}

#[tokio::test]
async fn unreadable_account_store_fails_the_run_and_clears_the_flag() {
    // Sweep-side pool without the schema: listing accounts fails.
    let broken = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let db = Database::in_memory().await.unwrap();
    db.settings
        .ensure_default(BROADCAST_DELAY_KEY, "30")
        .await
        .unwrap();
    let events = EventBroadcaster::new(64);
    let refresher = TokenRefresher::new(
        Arc::new(FakeExchange::ok()),
        AccountsStorage::new(broken.clone()),
        AuditLog::new(broken.clone()),
        events.clone(),
    );
    let runner = SweepRunner::new(
        AccountsStorage::new(broken.clone()),
        AuditLog::new(broken),
        events.clone(),
        refresher,
        Arc::new(ScriptedActions::new()),
        Arc::new(RecordingPacer::default()),
    );
    let handle = orchestrator::spawn(OrchestratorArgs {
        runner: Arc::new(runner),
        settings: db.settings.clone(),
        events: events.clone(),
        default_delay_secs: 30,
    })
    .await
    .unwrap();
    let mut sub = events.subscribe();

    let first = handle.trigger(BroadcastRequest::new("1")).await.unwrap();
    let lines = wait_for_terminal(&mut sub).await;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "🚀 Broadcast start: post 1, delay 30s");
    assert!(lines[1].starts_with("❌ Broadcast failed: "), "{lines:?}");
    assert!(lines[1].contains("accounts"), "{lines:?}");

    let status = handle.status().await.unwrap();
    assert!(!status.running);
    let last = status.last.unwrap();
    assert_eq!(last.run_id, first.run_id);
    assert!(matches!(last.outcome, SweepOutcome::Failed { .. }));

    let second = handle.trigger(BroadcastRequest::new("2")).await.unwrap();
    assert!(second.run_id > first.run_id);
    let lines = wait_for_terminal(&mut sub).await;
    assert!(lines.last().unwrap().starts_with("❌ Broadcast failed"));
    assert!(!handle.is_running().await.unwrap());
}
