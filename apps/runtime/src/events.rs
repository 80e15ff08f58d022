// Runtime observation stream
//
// Lifecycle and bus observations fan out through a tokio broadcast channel.
// Observers that fall behind lose the oldest events, never block publishers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agents::state::AgentStatus;

/// Something observable that happened inside the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    AgentInitialized {
        agent_id: Uuid,
    },
    StateChanged {
        agent_id: Uuid,
        from: AgentStatus,
        to: AgentStatus,
    },
    CapabilityRegistered {
        agent_id: Uuid,
        name: String,
    },
    CapabilityUnregistered {
        agent_id: Uuid,
        name: String,
    },
    ChildSpawned {
        parent_id: Uuid,
        child_id: Uuid,
    },
    AgentTerminated {
        agent_id: Uuid,
    },
    TaskStarted {
        agent_id: Uuid,
        task_id: Uuid,
    },
    TaskCompleted {
        agent_id: Uuid,
        task_id: Uuid,
        duration_ms: u64,
    },
    TaskFailed {
        agent_id: Uuid,
        task_id: Uuid,
        error: String,
    },
    MessageSent {
        from: Uuid,
        to: Uuid,
        message_type: String,
        message_id: Uuid,
    },
    MessageReceived {
        agent_id: Uuid,
        from: Uuid,
        message_type: String,
    },
    /// A bus subscriber failed while handling a message
    HandlerError {
        topic: String,
        subscription_id: Uuid,
        subscriber_id: String,
        error: String,
    },
    /// An inbound envelope could not be decoded and was discarded
    EnvelopeDropped {
        topic: String,
        reason: String,
    },
}

/// Broadcast hub for [`RuntimeEvent`]s
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<RuntimeEvent>>,
}

impl EventBus {
    /// Create an event bus buffering up to `capacity` undelivered events per receiver
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn emit(&self, event: RuntimeEvent) {
        debug!(?event, "runtime event");
        if self.sender.send(event).is_err() {
            debug!("no observers listening");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Receiving half of an [`EventBus`] subscription
pub struct EventReceiver {
    receiver: broadcast::Receiver<RuntimeEvent>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once the bus is gone.
    ///
    /// Lagged receivers skip the dropped events and keep going.
    pub async fn recv(&mut self) -> Option<RuntimeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event observer lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered without waiting
    pub fn drain(&mut self) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("event observer lagged by {} events", n);
                }
                Err(_) => return events,
            }
        }
    }
}
