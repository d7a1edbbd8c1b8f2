//! Controller services: agent registry, check lifecycle, and dispatch.

mod agents;
mod checks;
mod dispatch;

pub use agents::{AgentService, AgentStats};
pub use checks::{CheckService, CheckStats};
pub use dispatch::{DispatchService, QueueStats};
