use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::task::{Task, TaskStatus};

/// Repository trait for the Task aggregate
///
/// Stands for the task store agents pull work from. Implementations must make
/// `claim_next` atomic: two agents never claim the same task.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Save a task (insert or update)
    async fn save(&self, task: &Task) -> Result<(), String>;

    /// Find a task by its ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, String>;

    /// Find all tasks currently in `status`
    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, String>;

    /// Claim the highest-priority claimable task the agent can handle
    ///
    /// A task qualifies when it is Pending or Retry, every required
    /// capability is in `capabilities`, and all its dependencies completed.
    async fn claim_next(&self, agent_id: Uuid, capabilities: &[String]) -> Result<Option<Task>, String>;

    /// Delete a task by ID
    async fn delete(&self, id: Uuid) -> Result<(), String>;
}
