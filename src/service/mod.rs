pub mod events;
pub mod orchestrator;
pub mod pacing;
pub mod sweep;

pub use events::{EventBroadcaster, Subscription};
pub use orchestrator::{OrchestratorArgs, OrchestratorHandle};
pub use pacing::{FixedPacing, Pacer};
pub use sweep::SweepRunner;
