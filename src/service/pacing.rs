use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Spacing between remote calls during a sweep.
#[async_trait]
pub trait Pacer: Send + Sync {
    /// Pause between two actions of the same account.
    async fn between_steps(&self);

    /// Pause after an account is done; `delay` is the run's per-account delay.
    async fn between_accounts(&self, delay: Duration);
}

/// Fixed sleeps: `step` between actions, the run delay between accounts.
#[derive(Debug, Clone)]
pub struct FixedPacing {
    step: Duration,
}

impl FixedPacing {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

#[async_trait]
impl Pacer for FixedPacing {
    async fn between_steps(&self) {
        if !self.step.is_zero() {
            tokio::time::sleep(self.step).await;
        }
    }

    async fn between_accounts(&self, delay: Duration) {
        if !delay.is_zero() {
            debug!(secs = delay.as_secs(), "waiting before next account");
            tokio::time::sleep(delay).await;
        }
    }
}
