use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the message bus and its transports
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Message bus is not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection is in subscriber mode; {0} is not allowed")]
    SubscriberMode(&'static str),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Envelope serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BusResult<T> = Result<T, BusError>;
