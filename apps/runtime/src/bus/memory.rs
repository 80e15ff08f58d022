// In-process pub/sub transport
//
// Mirrors the behaviour the bus relies on from a Redis-style server:
// connections are independent, a connection with live subscriptions only
// accepts subscription commands, lists are capped and expire as a whole.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::errors::{BusError, BusResult};
use super::transport::{ChannelCallback, PubSubTransport, TransportConnection};

#[derive(Default)]
struct BrokerState {
    channels: HashMap<String, Vec<(u64, ChannelCallback)>>,
    lists: HashMap<String, StoredList>,
}

struct StoredList {
    entries: VecDeque<String>,
    expires_at: Instant,
}

#[derive(Default)]
struct Broker {
    state: Mutex<BrokerState>,
    next_connection: AtomicU64,
}

/// Process-local [`PubSubTransport`]
///
/// Clones share the same broker, so a bus and a test can observe the same
/// channels.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<Broker>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live bindings on a channel across all connections
    pub async fn binding_count(&self, channel: &str) -> usize {
        let state = self.broker.state.lock().await;
        state.channels.get(channel).map_or(0, Vec::len)
    }

    /// Current length of a stored list, ignoring expired lists
    pub async fn list_len(&self, key: &str) -> usize {
        let state = self.broker.state.lock().await;
        state
            .lists
            .get(key)
            .filter(|list| list.expires_at > Instant::now())
            .map_or(0, |list| list.entries.len())
    }
}

#[async_trait]
impl PubSubTransport for MemoryTransport {
    async fn connect(&self) -> BusResult<Arc<dyn TransportConnection>> {
        let id = self.broker.next_connection.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, "memory transport connection opened");
        Ok(Arc::new(MemoryConnection {
            id,
            broker: Arc::clone(&self.broker),
            subscribed: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    broker: Arc<Broker>,
    subscribed: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> BusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::ConnectionClosed);
        }
        Ok(())
    }

    async fn ensure_command_mode(&self, command: &'static str) -> BusResult<()> {
        self.ensure_open()?;
        if !self.subscribed.lock().await.is_empty() {
            return Err(BusError::SubscriberMode(command));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportConnection for MemoryConnection {
    async fn publish(&self, channel: &str, message: &str) -> BusResult<usize> {
        self.ensure_command_mode("PUBLISH").await?;

        let callbacks: Vec<ChannelCallback> = {
            let state = self.broker.state.lock().await;
            state
                .channels
                .get(channel)
                .map(|bindings| bindings.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };

        for callback in &callbacks {
            callback(channel.to_string(), message.to_string());
        }
        Ok(callbacks.len())
    }

    async fn subscribe(&self, channel: &str, callback: ChannelCallback) -> BusResult<()> {
        self.ensure_open()?;

        let mut state = self.broker.state.lock().await;
        let bindings = state.channels.entry(channel.to_string()).or_default();
        bindings.retain(|(conn, _)| *conn != self.id);
        bindings.push((self.id, callback));
        drop(state);

        self.subscribed.lock().await.insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> BusResult<()> {
        self.ensure_open()?;

        let mut state = self.broker.state.lock().await;
        if let Some(bindings) = state.channels.get_mut(channel) {
            bindings.retain(|(conn, _)| *conn != self.id);
            if bindings.is_empty() {
                state.channels.remove(channel);
            }
        }
        drop(state);

        self.subscribed.lock().await.remove(channel);
        Ok(())
    }

    async fn append_with_expiry(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        ttl: Duration,
    ) -> BusResult<()> {
        self.ensure_command_mode("RPUSH").await?;

        let now = Instant::now();
        let mut state = self.broker.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_insert_with(|| StoredList {
            entries: VecDeque::new(),
            expires_at: now + ttl,
        });
        if list.expires_at <= now {
            list.entries.clear();
        }
        list.entries.push_back(value.to_string());
        while list.entries.len() > max_len {
            list.entries.pop_front();
        }
        list.expires_at = now + ttl;
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> BusResult<Vec<String>> {
        self.ensure_command_mode("LRANGE").await?;

        let mut state = self.broker.state.lock().await;
        let expired = state
            .lists
            .get(key)
            .is_some_and(|list| list.expires_at <= Instant::now());
        if expired {
            state.lists.remove(key);
            return Ok(Vec::new());
        }

        Ok(state
            .lists
            .get(key)
            .map(|list| {
                let skip = list.entries.len().saturating_sub(limit);
                list.entries.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn close(&self) -> BusResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut state = self.broker.state.lock().await;
        state.channels.retain(|_, bindings| {
            bindings.retain(|(conn, _)| *conn != self.id);
            !bindings.is_empty()
        });
        drop(state);

        self.subscribed.lock().await.clear();
        debug!(connection = self.id, "memory transport connection closed");
        Ok(())
    }
}
