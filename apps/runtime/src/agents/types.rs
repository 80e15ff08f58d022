use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::agent::TaskHandler;
use super::state::AgentStatus;

/// Role an agent plays in the swarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Worker,
    Coordinator,
    Specialist,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Worker => write!(f, "Worker"),
            AgentRole::Coordinator => write!(f, "Coordinator"),
            AgentRole::Specialist => write!(f, "Specialist"),
        }
    }
}

/// A named, versioned feature an agent advertises
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub version: String,
    pub enabled: bool,
}

impl Capability {
    /// Enabled capability at version `1.0.0`
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            enabled: true,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Point-in-time view of an agent, built from live state when requested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub id: Uuid,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub parent_id: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub capabilities: Vec<Capability>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub initialized_at: Option<DateTime<Utc>>,
}

/// Everything needed to create an agent, including children via `spawn`
#[derive(Clone)]
pub struct AgentConfig {
    pub role: AgentRole,
    pub capabilities: Vec<Capability>,
    pub handler: Arc<dyn TaskHandler>,
}

impl AgentConfig {
    pub fn new(role: AgentRole, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            role,
            capabilities: Vec::new(),
            handler,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("role", &self.role)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
