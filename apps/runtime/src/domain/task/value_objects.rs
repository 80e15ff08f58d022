use serde::{Deserialize, Serialize};

/// Represents the lifecycle status of a task
///
/// # Status Transitions
/// ```text
/// Pending -> Claimed -> InProgress -> Completed
///              ^  |         |-------> Failed
///              |  v         |
///              Retry <------+
///
/// any non-final status -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for an agent to claim it
    Pending,
    /// Reserved by an agent, not started yet
    Claimed,
    /// Being executed
    InProgress,
    /// Finished successfully
    Completed,
    /// Failed with no retries left
    Failed,
    /// Withdrawn before finishing
    Cancelled,
    /// Failed with retries left; claimable again
    Retry,
}

impl TaskStatus {
    /// Checks if a transition from current status to next status is valid
    ///
    /// # Valid Transitions
    /// - Pending -> Claimed | Cancelled
    /// - Claimed -> InProgress | Retry | Cancelled
    /// - InProgress -> Completed | Failed | Cancelled | Retry
    /// - Retry -> Claimed | Cancelled
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed)
                | (Pending, Cancelled)
                | (Claimed, InProgress)
                | (Claimed, Retry)
                | (Claimed, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                | (InProgress, Retry)
                | (Retry, Claimed)
                | (Retry, Cancelled)
        )
    }

    /// Completed, Failed and Cancelled never change again
    pub fn is_final(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// An agent may claim the task in this status
    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retry)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Claimed => write!(f, "claimed"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Retry => write!(f, "retry"),
        }
    }
}

/// Scheduling priority; `Critical` sorts highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Deferred,
    Low,
    Normal,
    High,
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TaskPriority::Deferred => write!(f, "deferred"),
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}
