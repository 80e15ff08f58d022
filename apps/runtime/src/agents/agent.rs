// Agent lifecycle
//
// An `Agent` is a cheap-to-clone handle onto shared state. Parents own their
// children through handles; a child only remembers its parent's id. All
// status changes go through one validated transition path and are reported on
// the bus's observation stream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::errors::{AgentError, AgentResult};
use super::messages::{inbox_topic, AgentMessage};
use super::state::AgentStatus;
use super::types::{AgentConfig, AgentMetadata, AgentRole, Capability};
use crate::bus::{BusMessage, MessageBus, MessageHandler};
use crate::domain::task::{Task, TaskResult};
use crate::events::RuntimeEvent;

/// What a concrete agent type actually does
///
/// The agent framework owns state changes around these calls; handlers only
/// produce results.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task on behalf of `agent`
    async fn execute(&self, agent: &Agent, task: &Task) -> anyhow::Result<serde_json::Value>;

    /// React to a direct message delivered to the agent's inbox
    async fn handle_message(&self, agent: &Agent, message: AgentMessage) -> anyhow::Result<()> {
        debug!(
            agent_id = %agent.id(),
            from = %message.from,
            message_type = %message.message_type,
            "message ignored"
        );
        Ok(())
    }
}

struct AgentState {
    status: AgentStatus,
    capabilities: HashMap<String, Capability>,
    updated_at: DateTime<Utc>,
    initialized_at: Option<DateTime<Utc>>,
}

struct AgentInner {
    id: Uuid,
    role: AgentRole,
    parent_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    handler: Arc<dyn TaskHandler>,
    bus: MessageBus,
    state: RwLock<AgentState>,
    children: Mutex<Vec<Agent>>,
    memory: RwLock<HashMap<String, serde_json::Value>>,
}

/// Handle to one autonomous unit in the swarm
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl Agent {
    /// Create a root agent in status Idle
    pub fn new(config: AgentConfig, bus: MessageBus) -> Self {
        Self::create(config, bus, None)
    }

    /// Create an agent in status Idle
    ///
    /// `parent_id` is recorded for lookup only; ownership is established by
    /// [`Agent::spawn`].
    pub fn create(config: AgentConfig, bus: MessageBus, parent_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        let capabilities = config
            .capabilities
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        let agent = Self {
            inner: Arc::new(AgentInner {
                id: Uuid::new_v4(),
                role: config.role,
                parent_id,
                created_at: now,
                handler: config.handler,
                bus,
                state: RwLock::new(AgentState {
                    status: AgentStatus::Idle,
                    capabilities,
                    updated_at: now,
                    initialized_at: None,
                }),
                children: Mutex::new(Vec::new()),
                memory: RwLock::new(HashMap::new()),
            }),
        };

        debug!(agent_id = %agent.id(), role = %agent.role(), "agent created");
        agent
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn role(&self) -> AgentRole {
        self.inner.role
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        self.inner.parent_id
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub async fn status(&self) -> AgentStatus {
        self.inner.state.read().await.status
    }

    /// Bind the agent's inbox and stamp its metadata; no-op when already done
    ///
    /// Requires a connected bus.
    pub async fn initialize(&self) -> AgentResult<()> {
        let mut state = self.inner.state.write().await;
        if state.status.is_terminal() {
            return Err(AgentError::AgentTerminated(self.id()));
        }
        if state.initialized_at.is_some() {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let inbox = move |message: BusMessage| {
            let weak: Weak<AgentInner> = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return anyhow::Ok(());
                };
                let agent = Agent { inner };
                agent.receive(message).await
            }
        };
        self.subscribe(&inbox_topic(self.id()), inbox).await?;

        let now = Utc::now();
        state.initialized_at = Some(now);
        state.updated_at = now;

        info!(agent_id = %self.id(), role = %self.role(), "agent initialized");
        self.emit(RuntimeEvent::AgentInitialized { agent_id: self.id() });
        Ok(())
    }

    /// The single validated way to change status
    pub async fn transition_to(&self, next: AgentStatus) -> AgentResult<()> {
        let mut state = self.inner.state.write().await;
        self.apply_transition(&mut state, next)
    }

    /// Idle -> Active
    pub async fn activate(&self) -> AgentResult<()> {
        self.transition_to(AgentStatus::Active).await
    }

    /// Active -> Idle
    pub async fn deactivate(&self) -> AgentResult<()> {
        self.transition_to(AgentStatus::Idle).await
    }

    /// Error -> Idle, after a failed task
    pub async fn recover(&self) -> AgentResult<()> {
        self.transition_to(AgentStatus::Idle).await
    }

    fn apply_transition(&self, state: &mut AgentState, next: AgentStatus) -> AgentResult<()> {
        let from = state.status;
        if !from.can_transition_to(next) {
            return Err(AgentError::InvalidStateTransition {
                from,
                to: next,
                allowed: from.allowed_transitions().to_vec(),
            });
        }

        state.status = next;
        state.updated_at = Utc::now();

        debug!(agent_id = %self.id(), %from, to = %next, "agent state changed");
        self.emit(RuntimeEvent::StateChanged {
            agent_id: self.id(),
            from,
            to: next,
        });
        Ok(())
    }

    /// Run a task through this agent's handler
    ///
    /// The agent is Busy for the whole call. A call while Busy is rejected
    /// with [`AgentError::AgentBusy`]; a task needing capabilities the agent
    /// lacks is rejected before any state change. Handler failure leaves the
    /// agent in Error until [`Agent::recover`].
    pub async fn execute(&self, task: &Task) -> AgentResult<TaskResult> {
        {
            let mut state = self.inner.state.write().await;
            match state.status {
                AgentStatus::Terminated => return Err(AgentError::AgentTerminated(self.id())),
                AgentStatus::Busy => return Err(AgentError::AgentBusy(self.id())),
                _ => {}
            }

            let missing = missing_capabilities(&state, task);
            if !missing.is_empty() {
                return Err(AgentError::MissingCapabilities {
                    agent_id: self.id(),
                    missing,
                });
            }

            if state.status == AgentStatus::Idle {
                self.apply_transition(&mut state, AgentStatus::Active)?;
            }
            self.apply_transition(&mut state, AgentStatus::Busy)?;
        }

        info!(agent_id = %self.id(), task_id = %task.id(), task_type = %task.task_type(), "task started");
        self.emit(RuntimeEvent::TaskStarted {
            agent_id: self.id(),
            task_id: task.id(),
        });

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.inner.handler.execute(self, task))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match outcome {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err("task handler panicked".to_string()),
        };

        let mut state = self.inner.state.write().await;
        let still_busy = state.status == AgentStatus::Busy;
        if !still_busy {
            warn!(
                agent_id = %self.id(),
                task_id = %task.id(),
                status = %state.status,
                "agent left Busy while the task ran; keeping its status"
            );
        }

        match outcome {
            Ok(data) => {
                if still_busy {
                    self.apply_transition(&mut state, AgentStatus::Active)?;
                    self.apply_transition(&mut state, AgentStatus::Idle)?;
                }
                info!(agent_id = %self.id(), task_id = %task.id(), duration_ms, "task completed");
                self.emit(RuntimeEvent::TaskCompleted {
                    agent_id: self.id(),
                    task_id: task.id(),
                    duration_ms,
                });
                Ok(TaskResult::success(self.id(), data, duration_ms))
            }
            Err(message) => {
                if still_busy {
                    self.apply_transition(&mut state, AgentStatus::Error)?;
                }
                error!(agent_id = %self.id(), task_id = %task.id(), error = %message, "task failed");
                self.emit(RuntimeEvent::TaskFailed {
                    agent_id: self.id(),
                    task_id: task.id(),
                    error: message.clone(),
                });
                Err(AgentError::TaskExecutionFailed(message))
            }
        }
    }

    /// Whether every capability the task requires is registered and enabled
    pub async fn can_handle(&self, task: &Task) -> bool {
        let state = self.inner.state.read().await;
        missing_capabilities(&state, task).is_empty()
    }

    /// Add or replace a capability
    pub async fn register_capability(&self, capability: Capability) -> AgentResult<()> {
        let mut state = self.inner.state.write().await;
        if state.status.is_terminal() {
            return Err(AgentError::AgentTerminated(self.id()));
        }

        let name = capability.name.clone();
        state.capabilities.insert(name.clone(), capability);
        state.updated_at = Utc::now();

        debug!(agent_id = %self.id(), capability = %name, "capability registered");
        self.emit(RuntimeEvent::CapabilityRegistered {
            agent_id: self.id(),
            name,
        });
        Ok(())
    }

    /// Remove a capability; `Ok(false)` when it was not registered
    pub async fn unregister_capability(&self, name: &str) -> AgentResult<bool> {
        let mut state = self.inner.state.write().await;
        if state.status.is_terminal() {
            return Err(AgentError::AgentTerminated(self.id()));
        }
        if state.capabilities.remove(name).is_none() {
            return Ok(false);
        }
        state.updated_at = Utc::now();

        debug!(agent_id = %self.id(), capability = %name, "capability unregistered");
        self.emit(RuntimeEvent::CapabilityUnregistered {
            agent_id: self.id(),
            name: name.to_string(),
        });
        Ok(true)
    }

    /// Enabled capability names
    pub async fn capability_names(&self) -> Vec<String> {
        let state = self.inner.state.read().await;
        let mut names: Vec<String> = state
            .capabilities
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Create, initialize and adopt a child agent
    ///
    /// The child is terminated whenever this agent is.
    pub async fn spawn(&self, config: AgentConfig) -> AgentResult<Agent> {
        let mut children = self.inner.children.lock().await;
        if self.status().await.is_terminal() {
            return Err(AgentError::AgentTerminated(self.id()));
        }

        let child = Agent::create(config, self.inner.bus.clone(), Some(self.id()));
        child.initialize().await?;
        children.push(child.clone());

        info!(parent_id = %self.id(), child_id = %child.id(), role = %child.role(), "child spawned");
        self.emit(RuntimeEvent::ChildSpawned {
            parent_id: self.id(),
            child_id: child.id(),
        });
        Ok(child)
    }

    /// Handles to the children this agent owns
    pub async fn children(&self) -> Vec<Agent> {
        self.inner.children.lock().await.clone()
    }

    /// Terminate all children, then this agent, then drop its subscriptions
    ///
    /// Terminating an already terminated agent succeeds without effect.
    pub fn terminate(&self) -> BoxFuture<'_, AgentResult<()>> {
        async move {
            // held throughout so no child can be adopted mid-shutdown
            let mut children = self.inner.children.lock().await;
            if self.status().await.is_terminal() {
                return Ok(());
            }

            let owned: Vec<Agent> = children.drain(..).collect();
            let child_results = join_all(owned.iter().map(|child| child.terminate())).await;
            let mut first_error = None;
            for (child, result) in owned.iter().zip(child_results) {
                if let Err(e) = result {
                    warn!(parent_id = %self.id(), child_id = %child.id(), error = %e, "child did not shut down cleanly");
                    first_error.get_or_insert(e);
                }
            }

            {
                let mut state = self.inner.state.write().await;
                self.apply_transition(&mut state, AgentStatus::Terminated)?;
            }
            drop(children);

            match self.inner.bus.unsubscribe_all(&self.id().to_string()).await {
                Ok(released) => debug!(agent_id = %self.id(), released, "subscriptions released"),
                Err(e) => {
                    warn!(agent_id = %self.id(), error = %e, "failed to release subscriptions");
                    first_error.get_or_insert(e.into());
                }
            }

            info!(agent_id = %self.id(), children = owned.len(), "agent terminated");
            self.emit(RuntimeEvent::AgentTerminated { agent_id: self.id() });

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        .boxed()
    }

    /// Deliver a direct message to another agent's inbox
    pub async fn send_message(
        &self,
        target_id: Uuid,
        message_type: &str,
        payload: serde_json::Value,
    ) -> AgentResult<BusMessage> {
        if self.status().await.is_terminal() {
            return Err(AgentError::AgentTerminated(self.id()));
        }

        let message = AgentMessage {
            from: self.id(),
            to: target_id,
            message_type: message_type.to_string(),
            payload,
        };
        let published = self
            .inner
            .bus
            .publish(
                &inbox_topic(target_id),
                serde_json::to_value(&message)?,
                &self.id().to_string(),
                None,
            )
            .await?;

        debug!(from = %self.id(), to = %target_id, message_type, message_id = %published.id, "message sent");
        self.emit(RuntimeEvent::MessageSent {
            from: self.id(),
            to: target_id,
            message_type: message_type.to_string(),
            message_id: published.id,
        });
        Ok(published)
    }

    /// Subscribe to a bus topic on behalf of this agent
    ///
    /// The subscription is released when the agent terminates.
    pub async fn subscribe<H>(&self, topic: &str, handler: H) -> AgentResult<Uuid>
    where
        H: MessageHandler + 'static,
    {
        Ok(self.inner.bus.subscribe(topic, handler, &self.id().to_string()).await?)
    }

    async fn receive(&self, envelope: BusMessage) -> anyhow::Result<()> {
        let message: AgentMessage = serde_json::from_value(envelope.payload)?;

        debug!(agent_id = %self.id(), from = %message.from, message_type = %message.message_type, "message received");
        self.emit(RuntimeEvent::MessageReceived {
            agent_id: self.id(),
            from: message.from,
            message_type: message.message_type.clone(),
        });

        self.inner.handler.handle_message(self, message).await
    }

    pub async fn remember(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.memory.write().await.insert(key.into(), value);
    }

    pub async fn recall(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.memory.read().await.get(key).cloned()
    }

    pub async fn forget(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.memory.write().await.remove(key)
    }

    /// Snapshot of the agent as it is right now
    pub async fn metadata(&self) -> AgentMetadata {
        let children = self.inner.children.lock().await.iter().map(Agent::id).collect();
        let state = self.inner.state.read().await;

        let mut capabilities: Vec<Capability> = state.capabilities.values().cloned().collect();
        capabilities.sort_by(|a, b| a.name.cmp(&b.name));

        AgentMetadata {
            id: self.id(),
            role: self.role(),
            status: state.status,
            parent_id: self.parent_id(),
            children,
            capabilities,
            created_at: self.inner.created_at,
            updated_at: state.updated_at,
            initialized_at: state.initialized_at,
        }
    }

    fn emit(&self, event: RuntimeEvent) {
        self.inner.bus.events().emit(event);
    }
}

fn missing_capabilities(state: &AgentState, task: &Task) -> Vec<String> {
    task.required_capabilities()
        .iter()
        .filter(|name| !state.capabilities.get(*name).is_some_and(|c| c.enabled))
        .cloned()
        .collect()
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id())
            .field("role", &self.role())
            .field("parent_id", &self.parent_id())
            .finish()
    }
}
