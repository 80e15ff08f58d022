use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use swarm_runtime::agents::{
    Agent, AgentConfig, AgentRole, Capability, CompletionWorker, Coordinator, TaskReport,
};
use swarm_runtime::bus::{BusConfig, MemoryTransport, MessageBus};
use swarm_runtime::domain::repositories::TaskRepository;
use swarm_runtime::domain::task::{Task, TaskPriority, TaskRequirements, TaskResult};
use swarm_runtime::infrastructure::repositories::InMemoryTaskRepository;
use swarm_runtime::llm::{ApiClientConfig, CompletionClient};
use tracing_subscriber::EnvFilter;

const WORKERS: usize = 2;
const REPORT_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let client = Arc::new(CompletionClient::new(ApiClientConfig::from_env()?)?);

    let bus = MessageBus::new(Arc::new(MemoryTransport::new()), BusConfig::from_env());
    bus.connect().await?;

    // Build the agent tree
    let coordinator = Agent::new(
        AgentConfig::new(AgentRole::Coordinator, Arc::new(Coordinator::new()))
            .with_capability(Capability::new("planning", "Fans subtasks out to workers")),
        bus.clone(),
    );
    coordinator.initialize().await?;
    for _ in 0..WORKERS {
        coordinator
            .spawn(
                AgentConfig::new(AgentRole::Worker, Arc::new(CompletionWorker::new(Arc::clone(&client))))
                    .with_capability(Capability::new("completion", "Answers with a chat completion")),
            )
            .await?;
    }

    // Queue one task
    let subtasks: Vec<String> = std::env::args().skip(1).collect();
    let subtasks = if subtasks.is_empty() {
        vec![
            "Name three uses of a message bus".to_string(),
            "Explain exponential backoff in one sentence".to_string(),
        ]
    } else {
        subtasks
    };
    let expected_reports = subtasks.len();

    let repository = InMemoryTaskRepository::new();
    let (task, _) = Task::new("plan", "Answer the questions", json!({ "subtasks": subtasks }))?;
    let task = task
        .with_priority(TaskPriority::High)
        .with_requirements(TaskRequirements {
            capabilities: vec!["planning".to_string()],
            ..TaskRequirements::default()
        });
    repository.save(&task).await.map_err(anyhow::Error::msg)?;

    // Claim and run it
    let mut task = repository
        .claim_next(coordinator.id(), &coordinator.capability_names().await)
        .await
        .map_err(anyhow::Error::msg)?
        .ok_or_else(|| anyhow::anyhow!("no claimable task"))?;
    task.start()?;
    let dispatched = match coordinator.execute(&task).await {
        Ok(result) => {
            task.complete(result)?;
            true
        }
        Err(e) => {
            tracing::error!(task_id = %task.id(), error = %e, "task dispatch failed");
            task.fail(TaskResult::failure(coordinator.id(), e.to_string(), 0))?;
            false
        }
    };
    repository.save(&task).await.map_err(anyhow::Error::msg)?;
    tracing::info!(task_id = %task.id(), status = %task.status(), "task processed");

    // Wait for the workers to report back; nothing was assigned if dispatch failed
    if dispatched {
        let collected =
            Coordinator::wait_for_reports(&coordinator, task.id(), expected_reports, REPORT_TIMEOUT).await;
        log_reports(collected);
    }

    let snapshot = serde_json::to_string(&coordinator.metadata().await)?;
    tracing::info!(metadata = %snapshot, "coordinator snapshot");

    coordinator.terminate().await?;
    bus.disconnect().await?;
    tracing::info!("runtime shut down");
    Ok(())
}

fn log_reports(collected: Option<Vec<TaskReport>>) {
    match collected {
        Some(reports) => {
            for report in reports {
                let content = report
                    .data
                    .as_ref()
                    .and_then(|d| d.get("content"))
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string();
                tracing::info!(
                    index = report.index,
                    worker_id = %report.worker_id,
                    success = report.success,
                    error = report.error.as_deref().unwrap_or(""),
                    content = %content,
                    "subtask report"
                );
            }
        }
        None => tracing::warn!("timed out waiting for subtask reports"),
    }
}
