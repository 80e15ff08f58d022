use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::errors::BusResult;

/// Free-form metadata attached to an envelope
pub type Metadata = HashMap<String, serde_json::Value>;

/// Wire envelope for every message crossing the bus
///
/// Serialized as `{id, topic, payload, from, timestamp, correlationId?, metadata?}`
/// with an RFC 3339 timestamp. Never mutated after publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub from: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl BusMessage {
    /// Build a fresh envelope stamped with a new id and the current time
    pub fn new(topic: impl Into<String>, payload: serde_json::Value, from: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            from: from.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            metadata: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn encode(&self) -> BusResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> BusResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
