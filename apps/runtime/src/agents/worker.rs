use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::agent::{Agent, TaskHandler};
use super::messages::{AgentMessage, TaskAssignment, TaskReport, TASK_ASSIGNMENT, TASK_REPORT};
use super::prompts::{library, PromptTemplate};
use super::state::AgentStatus;
use crate::domain::task::Task;
use crate::llm::{ChatCompletionRequest, ChatMessage, CompletionClient};

const LAST_COMPLETION_KEY: &str = "last_completion";

/// Worker that answers each task with one chat completion
pub struct CompletionWorker {
    client: Arc<CompletionClient>,
    prompt: PromptTemplate,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    stream: bool,
}

impl CompletionWorker {
    pub fn new(client: Arc<CompletionClient>) -> Self {
        Self {
            client,
            prompt: library::task_execution(),
            temperature: Some(0.7),
            max_tokens: Some(1024),
            stream: false,
        }
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Assemble the answer from a streamed completion instead
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    fn build_request(&self, task: &Task) -> ChatCompletionRequest {
        let payload = match task.payload() {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let variables = HashMap::from([
            ("title".to_string(), task.title().to_string()),
            ("task_type".to_string(), task.task_type().to_string()),
            ("payload".to_string(), payload),
        ]);

        let mut request = ChatCompletionRequest::new(vec![
            ChatMessage::system(self.prompt.system.clone()),
            ChatMessage::user(self.prompt.render(&variables)),
        ]);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> anyhow::Result<serde_json::Value> {
        let response = self.client.create_chat_completion(request).await?;
        let content = response.first_content().unwrap_or_default().to_string();

        Ok(json!({
            "content": content,
            "model": response.model,
            "usage": response.usage,
        }))
    }

    async fn complete_streamed(&self, request: &ChatCompletionRequest) -> anyhow::Result<serde_json::Value> {
        let mut chunks = self.client.create_chat_completion_stream(request).await?;
        let mut content = String::new();
        let mut received = 0usize;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            received += 1;
            if let Some(delta) = chunk.delta_content() {
                content.push_str(delta);
            }
        }
        debug!(chunks = received, "stream finished");

        Ok(json!({ "content": content, "chunks": received }))
    }

    /// Run an assignment from a coordinator and report back
    async fn run_assignment(&self, agent: &Agent, message: &AgentMessage) -> anyhow::Result<()> {
        let assignment: TaskAssignment = serde_json::from_value(message.payload.clone())?;
        let (task, _) = Task::new("completion", assignment.title.clone(), assignment.payload.clone())?;
        let task = task.with_parent(assignment.parent_task_id);

        let report = match agent.execute(&task).await {
            Ok(result) => TaskReport {
                parent_task_id: assignment.parent_task_id,
                index: assignment.index,
                worker_id: agent.id(),
                success: true,
                data: result.data,
                error: None,
            },
            Err(e) => {
                warn!(agent_id = %agent.id(), task_id = %task.id(), error = %e, "assignment failed");
                if agent.status().await == AgentStatus::Error {
                    agent.recover().await?;
                }
                TaskReport {
                    parent_task_id: assignment.parent_task_id,
                    index: assignment.index,
                    worker_id: agent.id(),
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                }
            }
        };

        agent
            .send_message(message.from, TASK_REPORT, serde_json::to_value(&report)?)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for CompletionWorker {
    async fn execute(&self, agent: &Agent, task: &Task) -> anyhow::Result<serde_json::Value> {
        let request = self.build_request(task);
        let output = if self.stream {
            self.complete_streamed(&request).await?
        } else {
            self.complete(&request).await?
        };

        agent.remember(LAST_COMPLETION_KEY, output["content"].clone()).await;
        Ok(output)
    }

    async fn handle_message(&self, agent: &Agent, message: AgentMessage) -> anyhow::Result<()> {
        match message.message_type.as_str() {
            TASK_ASSIGNMENT => self.run_assignment(agent, &message).await,
            other => {
                debug!(agent_id = %agent.id(), message_type = other, "message ignored");
                Ok(())
            }
        }
    }
}
