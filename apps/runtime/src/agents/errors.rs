use thiserror::Error;
use uuid::Uuid;

use super::state::AgentStatus;
use crate::bus::BusError;
use crate::llm::ApiClientError;

/// Errors that can occur in the agent system
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid state transition from {from} to {to} (allowed: {})", format_allowed(.allowed))]
    InvalidStateTransition {
        from: AgentStatus,
        to: AgentStatus,
        allowed: Vec<AgentStatus>,
    },

    #[error("Agent {0} is already executing a task")]
    AgentBusy(Uuid),

    #[error("Agent {0} is terminated")]
    AgentTerminated(Uuid),

    #[error("Agent {agent_id} is missing capabilities: {}", .missing.join(", "))]
    MissingCapabilities { agent_id: Uuid, missing: Vec<String> },

    #[error("Task execution failed: {0}")]
    TaskExecutionFailed(String),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("LLM API error: {0}")]
    Llm(#[from] ApiClientError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_allowed(allowed: &[AgentStatus]) -> String {
    if allowed.is_empty() {
        return "none".to_string();
    }
    allowed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type AgentResult<T> = Result<T, AgentError>;
