use uuid::Uuid;

/// Domain events that occur within the Task aggregate
///
/// Returned by every successful transition so callers can log or forward
/// them without re-deriving what changed.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Fired when a task is created
    Created {
        task_id: Uuid,
        task_type: String,
    },
    /// Fired when an agent reserves the task
    Claimed {
        task_id: Uuid,
        agent_id: Uuid,
    },
    Started {
        task_id: Uuid,
    },
    Completed {
        task_id: Uuid,
        duration_ms: u64,
    },
    /// Fired when a failed attempt leaves retries to spend
    RetryScheduled {
        task_id: Uuid,
        retry_count: u32,
        max_retries: u32,
    },
    Failed {
        task_id: Uuid,
        reason: String,
    },
    Cancelled {
        task_id: Uuid,
    },
}

impl TaskEvent {
    /// Returns the task_id for this event
    pub fn task_id(&self) -> Uuid {
        match self {
            TaskEvent::Created { task_id, .. }
            | TaskEvent::Claimed { task_id, .. }
            | TaskEvent::Started { task_id }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::RetryScheduled { task_id, .. }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::Cancelled { task_id } => *task_id,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Created { .. } => "created",
            TaskEvent::Claimed { .. } => "claimed",
            TaskEvent::Started { .. } => "started",
            TaskEvent::Completed { .. } => "completed",
            TaskEvent::RetryScheduled { .. } => "retry_scheduled",
            TaskEvent::Failed { .. } => "failed",
            TaskEvent::Cancelled { .. } => "cancelled",
        }
    }
}
