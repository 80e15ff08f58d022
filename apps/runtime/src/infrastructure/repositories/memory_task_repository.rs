use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::repositories::TaskRepository;
use crate::domain::task::{Task, TaskStatus};

/// In-process implementation of TaskRepository
///
/// Claims happen under a single write lock, which makes `claim_next` atomic
/// within one process. Nothing is persisted.
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

fn dependencies_met(task: &Task, tasks: &HashMap<Uuid, Task>) -> bool {
    task.requirements().map_or(true, |requirements| {
        requirements.dependencies.iter().all(|dependency| {
            tasks
                .get(dependency)
                .is_some_and(|t| t.status() == TaskStatus::Completed)
        })
    })
}

fn capabilities_met(task: &Task, capabilities: &[String]) -> bool {
    task.required_capabilities()
        .iter()
        .all(|required| capabilities.contains(required))
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<(), String> {
        self.tasks.write().await.insert(task.id(), task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, String> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, String> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|t| t.status() == status)
            .cloned()
            .collect();
        found.sort_by_key(|t| t.metadata().created_at);
        Ok(found)
    }

    async fn claim_next(&self, agent_id: Uuid, capabilities: &[String]) -> Result<Option<Task>, String> {
        let mut tasks = self.tasks.write().await;

        let next = tasks
            .values()
            .filter(|t| t.status().is_claimable())
            .filter(|t| capabilities_met(t, capabilities))
            .filter(|t| dependencies_met(t, &tasks))
            // highest priority first, oldest first within a priority
            .max_by(|a, b| {
                a.priority()
                    .cmp(&b.priority())
                    .then_with(|| b.metadata().created_at.cmp(&a.metadata().created_at))
            })
            .map(Task::id);

        let Some(id) = next else {
            return Ok(None);
        };
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| format!("Task {} vanished while claiming", id))?;

        let event = task.claim(agent_id).map_err(|e| e.to_string())?;
        debug!(task_id = %id, agent_id = %agent_id, event = event.name(), "task claimed");

        Ok(Some(task.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<(), String> {
        self.tasks
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| format!("Task {} not found", id))
    }
}
