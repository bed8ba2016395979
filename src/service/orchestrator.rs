use crate::config::BROADCAST_DELAY_KEY;
use crate::db::SettingsStorage;
use crate::error::RallyError;
use crate::service::events::EventBroadcaster;
use crate::service::sweep::SweepRunner;
use crate::types::broadcast::{
    ActiveRun, BroadcastPlan, BroadcastRequest, FinishedRun, RunStatus, RunTicket, SweepOutcome,
};
use crate::types::post::parse_post_id;

use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A trigger whose post reference has already been normalized.
#[derive(Debug)]
pub struct PendingRun {
    pub post_id: String,
    pub comment: Option<String>,
    pub delay_secs: Option<u64>,
}

/// Messages handled by the broadcast orchestrator.
#[derive(Debug)]
pub enum OrchestratorMessage {
    /// Start a sweep unless one is already running.
    Trigger(PendingRun, RpcReplyPort<Result<RunTicket, RallyError>>),
    /// Snapshot of the current and last run.
    Status(RpcReplyPort<RunStatus>),

    // Internal messages (sent by the sweep supervisor)
    /// The sweep for `run_id` ended, normally or not.
    SweepFinished { run_id: u64, outcome: SweepOutcome },
}

/// Handle for interacting with the orchestrator actor.
#[derive(Clone)]
pub struct OrchestratorHandle {
    actor: ActorRef<OrchestratorMessage>,
}

impl OrchestratorHandle {
    /// Validate the request and start a sweep.
    ///
    /// Fails with `InvalidPostRef` before touching any state, or with
    /// `BroadcastRunning` when a sweep is in progress.
    pub async fn trigger(&self, request: BroadcastRequest) -> Result<RunTicket, RallyError> {
        let Some(post_id) = parse_post_id(&request.post_ref) else {
            info!(post_ref = %request.post_ref, "rejecting trigger: no post id");
            return Err(RallyError::InvalidPostRef(request.post_ref));
        };
        let pending = PendingRun {
            post_id,
            comment: request.comment,
            delay_secs: request.delay_secs,
        };
        ractor::call!(self.actor, OrchestratorMessage::Trigger, pending)
            .map_err(|e| RallyError::RactorError(format!("Trigger RPC failed: {e}")))?
    }

    pub async fn status(&self) -> Result<RunStatus, RallyError> {
        ractor::call!(self.actor, OrchestratorMessage::Status)
            .map_err(|e| RallyError::RactorError(format!("Status RPC failed: {e}")))
    }

    pub async fn is_running(&self) -> Result<bool, RallyError> {
        Ok(self.status().await?.running)
    }
}

pub struct OrchestratorArgs {
    pub runner: Arc<SweepRunner>,
    pub settings: SettingsStorage,
    pub events: EventBroadcaster,
    /// Used when the delay setting is missing or unreadable.
    pub default_delay_secs: u64,
}

enum RunState {
    Idle,
    Running(ActiveRun),
}

struct OrchestratorState {
    runner: Arc<SweepRunner>,
    settings: SettingsStorage,
    events: EventBroadcaster,
    default_delay_secs: u64,
    run: RunState,
    last: Option<FinishedRun>,
    next_run_id: u64,
}

/// Owns the single "sweep in progress" flag; at most one sweep at a time.
struct BroadcastOrchestrator;

#[ractor::async_trait]
impl Actor for BroadcastOrchestrator {
    type Msg = OrchestratorMessage;
    type State = OrchestratorState;
    type Arguments = OrchestratorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(
            default_delay_secs = args.default_delay_secs,
            "BroadcastOrchestrator started"
        );
        Ok(OrchestratorState {
            runner: args.runner,
            settings: args.settings,
            events: args.events,
            default_delay_secs: args.default_delay_secs,
            run: RunState::Idle,
            last: None,
            next_run_id: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            OrchestratorMessage::Trigger(pending, rp) => {
                let result = self.handle_trigger(state, &myself, pending).await;
                let _ = rp.send(result);
            }
            OrchestratorMessage::Status(rp) => {
                let active = match &state.run {
                    RunState::Idle => None,
                    RunState::Running(active) => Some(active.clone()),
                };
                let _ = rp.send(RunStatus {
                    running: active.is_some(),
                    active,
                    last: state.last.clone(),
                });
            }
            OrchestratorMessage::SweepFinished { run_id, outcome } => {
                self.handle_sweep_finished(state, run_id, outcome);
            }
        }
        Ok(())
    }
}

impl BroadcastOrchestrator {
    async fn handle_trigger(
        &self,
        state: &mut OrchestratorState,
        myself: &ActorRef<OrchestratorMessage>,
        pending: PendingRun,
    ) -> Result<RunTicket, RallyError> {
        if let RunState::Running(active) = &state.run {
            info!(
                run_id = active.run_id,
                post_id = %pending.post_id,
                "broadcast already running; trigger rejected"
            );
            return Err(RallyError::BroadcastRunning);
        }

        let delay_secs = match pending.delay_secs {
            Some(secs) => secs,
            None => resolve_delay_setting(&state.settings, state.default_delay_secs).await,
        };
        state.next_run_id += 1;
        let run_id = state.next_run_id;

        state.run = RunState::Running(ActiveRun {
            run_id,
            post_id: pending.post_id.clone(),
            comment: pending.comment.clone(),
            delay_secs,
            started_at: Utc::now(),
        });
        state.events.announce(format!(
            "🚀 Broadcast start: post {}, delay {delay_secs}s",
            pending.post_id
        ));

        let plan = BroadcastPlan {
            run_id,
            post_id: pending.post_id.clone(),
            comment: pending.comment.clone(),
            delay: Duration::from_secs(delay_secs),
        };
        spawn_supervised(state.runner.clone(), plan, myself.clone());

        Ok(RunTicket {
            run_id,
            post_id: pending.post_id,
            delay_secs,
            comment: pending.comment,
        })
    }

    fn handle_sweep_finished(
        &self,
        state: &mut OrchestratorState,
        run_id: u64,
        outcome: SweepOutcome,
    ) {
        let active = match std::mem::replace(&mut state.run, RunState::Idle) {
            RunState::Running(active) if active.run_id == run_id => active,
            other => {
                warn!(run_id, "finish report for unknown run ignored");
                state.run = other;
                return;
            }
        };

        let message = match &outcome {
            SweepOutcome::Completed { accounts } => {
                info!(run_id, accounts, "broadcast finished");
                format!(
                    "✅ Broadcast finished: post {}, {accounts} accounts",
                    active.post_id
                )
            }
            SweepOutcome::Failed { reason } => {
                error!(run_id, %reason, "broadcast failed");
                format!("❌ Broadcast failed: {reason}")
            }
        };
        state.last = Some(FinishedRun {
            run_id,
            post_id: active.post_id,
            outcome,
            started_at: active.started_at,
            finished_at: Utc::now(),
        });
        state.events.announce(message);
    }
}

/// Delay from the persisted setting, falling back to `fallback` when the
/// setting is missing, unreadable or not a number.
async fn resolve_delay_setting(settings: &SettingsStorage, fallback: u64) -> u64 {
    match settings.get(BROADCAST_DELAY_KEY).await {
        Ok(Some(raw)) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(value = %raw, "invalid {BROADCAST_DELAY_KEY} setting; using {fallback}");
            fallback
        }),
        Ok(None) => fallback,
        Err(e) => {
            warn!(error = %e, "reading {BROADCAST_DELAY_KEY} failed; using {fallback}");
            fallback
        }
    }
}

/// Run the sweep on its own task and always report back, even if it panicked.
fn spawn_supervised(
    runner: Arc<SweepRunner>,
    plan: BroadcastPlan,
    myself: ActorRef<OrchestratorMessage>,
) {
    let run_id = plan.run_id;
    tokio::spawn(async move {
        let worker = tokio::spawn(async move { runner.run(&plan).await });
        let outcome = match worker.await {
            Ok(outcome) => outcome,
            Err(e) => SweepOutcome::Failed {
                reason: format!("sweep task aborted: {e}"),
            },
        };
        debug!(run_id, ?outcome, "sweep task ended");
        if let Err(e) = ractor::cast!(myself, OrchestratorMessage::SweepFinished { run_id, outcome })
        {
            error!(run_id, "orchestrator unreachable; run state not cleared: {}", e);
        }
    });
}

/// Spawn the orchestrator actor and return a handle.
pub async fn spawn(args: OrchestratorArgs) -> Result<OrchestratorHandle, RallyError> {
    let (actor, _jh) = Actor::spawn(None, BroadcastOrchestrator, args)
        .await
        .map_err(|e| RallyError::RactorError(format!("failed to spawn orchestrator: {e}")))?;
    Ok(OrchestratorHandle { actor })
}
