// Agent system modules
//
// Identity, capability registry, ownership tree and the five-state lifecycle
// of autonomous agents, plus the concrete handlers that give them work to do.

pub mod agent;
pub mod coordinator;
pub mod errors;
pub mod messages;
pub mod prompts;
pub mod state;
pub mod types;
pub mod worker;

// Re-export main types
pub use agent::{Agent, TaskHandler};
pub use coordinator::Coordinator;
pub use errors::{AgentError, AgentResult};
pub use messages::{AgentMessage, TaskAssignment, TaskReport};
pub use state::AgentStatus;
pub use types::{AgentConfig, AgentMetadata, AgentRole, Capability};
pub use worker::CompletionWorker;
