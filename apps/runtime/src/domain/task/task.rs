use super::events::TaskEvent;
use super::value_objects::{TaskPriority, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors raised by Task aggregate operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("Cannot move task from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// What an agent needs in order to take a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRequirements {
    /// Capability names that must be registered and enabled
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Tasks that must complete first
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub executor_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(executor_id: Uuid, data: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
            executor_id,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(executor_id: Uuid, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms,
            executor_id,
            completed_at: Utc::now(),
        }
    }
}

/// Bookkeeping carried alongside a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub claimed_by: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub parent_task_id: Option<Uuid>,
    pub correlation_id: Option<String>,
}

/// Task aggregate root
///
/// A unit of work agents claim and execute. The runtime consumes tasks; the
/// store that hands them out owns them.
///
/// # Invariants
/// - Type and title cannot be empty
/// - `retry_count <= max_retries`
/// - Status moves forward only, except the Retry path back to Claimed
///
/// # Example
/// ```
/// use swarm_runtime::domain::task::{Task, TaskStatus};
/// use serde_json::json;
///
/// let (task, events) = Task::new("summarize", "Summarize notes", json!({})).expect("valid task");
///
/// assert_eq!(task.status(), TaskStatus::Pending);
/// assert_eq!(events.len(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: Uuid,
    task_type: String,
    title: String,
    priority: TaskPriority,
    status: TaskStatus,
    payload: serde_json::Value,
    requirements: Option<TaskRequirements>,
    result: Option<TaskResult>,
    metadata: TaskMetadata,
}

impl Task {
    /// Creates a new pending task with normal priority
    ///
    /// # Returns
    /// * `Ok((Task, Vec<TaskEvent>))` - New task and the Created event
    /// * `Err(TaskError)` - If type or title is empty
    pub fn new(
        task_type: impl Into<String>,
        title: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(Self, Vec<TaskEvent>), TaskError> {
        let task_type = task_type.into();
        let title = title.into();

        if task_type.trim().is_empty() {
            return Err(TaskError::EmptyField("Task type"));
        }
        if title.trim().is_empty() {
            return Err(TaskError::EmptyField("Title"));
        }

        let now = Utc::now();
        let task = Self {
            id: Uuid::new_v4(),
            task_type,
            title,
            priority: TaskPriority::default(),
            status: TaskStatus::Pending,
            payload,
            requirements: None,
            result: None,
            metadata: TaskMetadata {
                created_at: now,
                updated_at: now,
                retry_count: 0,
                max_retries: DEFAULT_MAX_RETRIES,
                claimed_by: None,
                claimed_at: None,
                parent_task_id: None,
                correlation_id: None,
            },
        };

        let events = vec![TaskEvent::Created {
            task_id: task.id,
            task_type: task.task_type.clone(),
        }];

        Ok((task, events))
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requirements(mut self, requirements: TaskRequirements) -> Self {
        self.requirements = Some(requirements);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.metadata.max_retries = max_retries;
        self
    }

    pub fn with_parent(mut self, parent_task_id: Uuid) -> Self {
        self.metadata.parent_task_id = Some(parent_task_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.metadata.correlation_id = Some(correlation_id.into());
        self
    }

    /// Reserves the task for an agent (from Pending or Retry)
    pub fn claim(&mut self, agent_id: Uuid) -> Result<TaskEvent, TaskError> {
        self.transition(TaskStatus::Claimed)?;

        let now = Utc::now();
        self.metadata.claimed_by = Some(agent_id);
        self.metadata.claimed_at = Some(now);

        Ok(TaskEvent::Claimed {
            task_id: self.id,
            agent_id,
        })
    }

    pub fn start(&mut self) -> Result<TaskEvent, TaskError> {
        self.transition(TaskStatus::InProgress)?;
        Ok(TaskEvent::Started { task_id: self.id })
    }

    /// Records a successful result
    pub fn complete(&mut self, result: TaskResult) -> Result<TaskEvent, TaskError> {
        self.transition(TaskStatus::Completed)?;

        let duration_ms = result.duration_ms;
        self.result = Some(result);

        Ok(TaskEvent::Completed {
            task_id: self.id,
            duration_ms,
        })
    }

    /// Records a failed attempt
    ///
    /// # Business Rules
    /// - While retries remain the task moves to Retry, its claim is released
    ///   and the retry count goes up
    /// - Once retries are spent the task moves to Failed
    pub fn fail(&mut self, result: TaskResult) -> Result<TaskEvent, TaskError> {
        let reason = result
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());

        if self.metadata.retry_count < self.metadata.max_retries {
            self.transition(TaskStatus::Retry)?;
            self.metadata.retry_count += 1;
            self.metadata.claimed_by = None;
            self.metadata.claimed_at = None;
            self.result = Some(result);

            return Ok(TaskEvent::RetryScheduled {
                task_id: self.id,
                retry_count: self.metadata.retry_count,
                max_retries: self.metadata.max_retries,
            });
        }

        self.transition(TaskStatus::Failed)?;
        self.result = Some(result);

        Ok(TaskEvent::Failed {
            task_id: self.id,
            reason,
        })
    }

    pub fn cancel(&mut self) -> Result<TaskEvent, TaskError> {
        self.transition(TaskStatus::Cancelled)?;
        Ok(TaskEvent::Cancelled { task_id: self.id })
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.metadata.updated_at = Utc::now();
        Ok(())
    }

    // ===== Getters =====

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn requirements(&self) -> Option<&TaskRequirements> {
        self.requirements.as_ref()
    }

    /// Capability names the task needs; empty when it has no requirements
    pub fn required_capabilities(&self) -> &[String] {
        self.requirements
            .as_ref()
            .map_or(&[], |r| r.capabilities.as_slice())
    }

    pub fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    pub fn metadata(&self) -> &TaskMetadata {
        &self.metadata
    }
}
