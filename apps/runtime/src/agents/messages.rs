// Agent-to-agent messages
//
// Every agent listens on its own inbox topic; `send_message` publishes an
// `AgentMessage` there through the shared message bus. Coordinators and
// workers exchange assignments and reports over the same inboxes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const INBOX_PREFIX: &str = "agent:";

/// Coordinator -> worker: run this subtask
pub const TASK_ASSIGNMENT: &str = "task_assignment";
/// Worker -> coordinator: outcome of an assignment
pub const TASK_REPORT: &str = "task_report";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub from: Uuid,
    pub to: Uuid,
    pub message_type: String,
    pub payload: serde_json::Value,
}

/// Bus topic an agent receives direct messages on
pub fn inbox_topic(agent_id: Uuid) -> String {
    format!("{}{}", INBOX_PREFIX, agent_id)
}

/// Payload of a [`TASK_ASSIGNMENT`] message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub parent_task_id: Uuid,
    pub index: usize,
    pub title: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Payload of a [`TASK_REPORT`] message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub parent_task_id: Uuid,
    pub index: usize,
    pub worker_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}
