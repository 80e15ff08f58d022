use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::errors::BusResult;

/// Callback invoked by a transport for every message on a bound channel.
///
/// Receives `(channel, raw_message)`. Transports may call it from any thread,
/// so implementations must not block.
pub type ChannelCallback = Arc<dyn Fn(String, String) + Send + Sync>;

/// Backing store for the message bus (Redis-like pub/sub)
///
/// Each call to [`PubSubTransport::connect`] yields an independent connection.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn connect(&self) -> BusResult<Arc<dyn TransportConnection>>;
}

/// One logical connection to a [`PubSubTransport`]
///
/// A connection that holds a channel subscription may refuse every other
/// command, which is why the bus keeps a dedicated publishing connection.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Publish to a channel, returning how many bindings received it
    async fn publish(&self, channel: &str, message: &str) -> BusResult<usize>;

    /// Bind `callback` to a channel on this connection
    async fn subscribe(&self, channel: &str, callback: ChannelCallback) -> BusResult<()>;

    async fn unsubscribe(&self, channel: &str) -> BusResult<()>;

    /// Append to a capped list, keeping the newest `max_len` entries, and
    /// reset the list's expiry to `ttl`
    async fn append_with_expiry(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        ttl: Duration,
    ) -> BusResult<()>;

    /// Newest-last slice of at most `limit` entries from a list
    async fn list_range(&self, key: &str, limit: usize) -> BusResult<Vec<String>>;

    async fn close(&self) -> BusResult<()>;
}
