use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::agent::{Agent, TaskHandler};
use super::messages::{AgentMessage, TaskAssignment, TaskReport, TASK_ASSIGNMENT, TASK_REPORT};
use crate::domain::task::Task;

const REPORTS_KEY_PREFIX: &str = "reports:";
const REPORT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Splits a task into subtasks and hands them to its children round robin
///
/// Expects `payload.subtasks` to be an array. Each entry is either a title
/// string or an object with `title` and an optional `payload`. Reports sent
/// back by workers are collected in the coordinator's memory.
#[derive(Debug, Default)]
pub struct Coordinator;

impl Coordinator {
    pub fn new() -> Self {
        Self
    }

    /// Reports received so far for a fanned-out task, in arrival order
    pub async fn reports(agent: &Agent, parent_task_id: Uuid) -> Vec<TaskReport> {
        agent
            .recall(&reports_key(parent_task_id))
            .await
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    /// Poll until `expected` reports have arrived; `None` once `timeout` passes
    pub async fn wait_for_reports(
        agent: &Agent,
        parent_task_id: Uuid,
        expected: usize,
        timeout: Duration,
    ) -> Option<Vec<TaskReport>> {
        tokio::time::timeout(timeout, async {
            loop {
                let reports = Self::reports(agent, parent_task_id).await;
                if reports.len() >= expected {
                    return reports;
                }
                tokio::time::sleep(REPORT_POLL_INTERVAL).await;
            }
        })
        .await
        .ok()
    }

    async fn record_report(&self, agent: &Agent, message: &AgentMessage) -> anyhow::Result<()> {
        let report: TaskReport = serde_json::from_value(message.payload.clone())?;
        if !report.success {
            warn!(
                agent_id = %agent.id(),
                worker_id = %report.worker_id,
                index = report.index,
                error = report.error.as_deref().unwrap_or("unknown"),
                "subtask failed"
            );
        }

        let key = reports_key(report.parent_task_id);
        let mut reports = Self::reports(agent, report.parent_task_id).await;
        reports.push(report);
        agent.remember(key, serde_json::to_value(&reports)?).await;
        Ok(())
    }
}

fn reports_key(parent_task_id: Uuid) -> String {
    format!("{}{}", REPORTS_KEY_PREFIX, parent_task_id)
}

fn parse_subtasks(task: &Task) -> anyhow::Result<Vec<(String, serde_json::Value)>> {
    let Some(entries) = task.payload().get("subtasks").and_then(|s| s.as_array()) else {
        anyhow::bail!("task {} has no subtasks array", task.id());
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            serde_json::Value::String(title) => Ok((title.clone(), serde_json::Value::Null)),
            serde_json::Value::Object(fields) => {
                let title = fields
                    .get("title")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| anyhow::anyhow!("subtask {} has no title", index))?;
                let payload = fields.get("payload").cloned().unwrap_or_default();
                Ok((title.to_string(), payload))
            }
            other => anyhow::bail!("subtask {} is not a string or object: {}", index, other),
        })
        .collect()
}

#[async_trait]
impl TaskHandler for Coordinator {
    async fn execute(&self, agent: &Agent, task: &Task) -> anyhow::Result<serde_json::Value> {
        let subtasks = parse_subtasks(task)?;
        let children = agent.children().await;
        if children.is_empty() {
            anyhow::bail!("coordinator {} has no workers to assign to", agent.id());
        }

        let mut assignments = Vec::with_capacity(subtasks.len());
        for (index, (title, payload)) in subtasks.into_iter().enumerate() {
            let worker = &children[index % children.len()];
            let assignment = TaskAssignment {
                parent_task_id: task.id(),
                index,
                title,
                payload,
            };
            let sent = agent
                .send_message(worker.id(), TASK_ASSIGNMENT, serde_json::to_value(&assignment)?)
                .await?;
            debug!(worker_id = %worker.id(), index, message_id = %sent.id, "subtask assigned");

            assignments.push(json!({
                "index": index,
                "title": assignment.title,
                "workerId": worker.id(),
                "messageId": sent.id,
            }));
        }

        info!(agent_id = %agent.id(), task_id = %task.id(), subtasks = assignments.len(), "task fanned out");
        Ok(json!({ "assignments": assignments }))
    }

    async fn handle_message(&self, agent: &Agent, message: AgentMessage) -> anyhow::Result<()> {
        match message.message_type.as_str() {
            TASK_REPORT => self.record_report(agent, &message).await,
            other => {
                debug!(agent_id = %agent.id(), message_type = other, "message ignored");
                Ok(())
            }
        }
    }
}
