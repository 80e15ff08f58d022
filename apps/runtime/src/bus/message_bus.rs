// Topic-addressed publish/subscribe over a pluggable transport
//
// Local subscriptions are reference counted per topic: the first one binds a
// single transport subscription feeding an ordered per-topic dispatcher, the
// last one to leave tears the binding down again. All registry mutations go
// through one async mutex so a topic can never be bound twice or unbound early.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::envelope::{BusMessage, Metadata};
use super::errors::{BusError, BusResult};
use super::transport::{ChannelCallback, PubSubTransport, TransportConnection};
use crate::events::{EventBus, RuntimeEvent};

/// Something that consumes messages delivered on a topic
///
/// Any `Fn(BusMessage) -> impl Future<Output = anyhow::Result<()>>` qualifies.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BusMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(BusMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: BusMessage) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// Message bus settings
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Also append every published envelope to a capped per-topic list
    pub persist_messages: bool,
    pub history_limit: usize,
    pub history_ttl: Duration,
    pub history_key_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            persist_messages: false,
            history_limit: 100,
            history_ttl: Duration::from_secs(3600),
            history_key_prefix: "bus:history:".to_string(),
        }
    }
}

impl BusConfig {
    /// Read overrides from `BUS_PERSIST_MESSAGES`, `BUS_HISTORY_LIMIT` and
    /// `BUS_HISTORY_TTL_SECS`; malformed values fall back to defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let persist_messages = std::env::var("BUS_PERSIST_MESSAGES")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.persist_messages);
        let history_limit = read_env("BUS_HISTORY_LIMIT").unwrap_or(defaults.history_limit);
        let history_ttl = read_env("BUS_HISTORY_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.history_ttl);

        Self {
            persist_messages,
            history_limit,
            history_ttl,
            ..defaults
        }
    }

    fn history_key(&self, topic: &str) -> String {
        format!("{}{}", self.history_key_prefix, topic)
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable bus setting");
            None
        }
    }
}

/// Optional envelope fields for [`MessageBus::publish_with`]
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub correlation_id: Option<String>,
    pub metadata: Option<Metadata>,
}

/// A local subscription record
#[derive(Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub topic: String,
    pub subscriber_id: String,
    pub created_at: DateTime<Utc>,
    handler: Arc<dyn MessageHandler>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("subscriber_id", &self.subscriber_id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

struct Connections {
    publisher: Arc<dyn TransportConnection>,
    subscriber: Arc<dyn TransportConnection>,
}

#[derive(Default)]
struct Registry {
    subscriptions: HashMap<Uuid, Subscription>,
    /// Subscription ids per topic, in subscription order
    topics: HashMap<String, Vec<Uuid>>,
    /// Generation of each live transport binding; a dispatcher whose
    /// generation is gone drops whatever it still has queued
    bindings: HashMap<String, u64>,
    next_binding: u64,
}

struct BusInner {
    transport: Arc<dyn PubSubTransport>,
    config: BusConfig,
    events: EventBus,
    connections: RwLock<Option<Connections>>,
    registry: Mutex<Registry>,
}

/// Many-to-many asynchronous messaging between agents
///
/// Cheap to clone; clones share connections and subscriptions.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(transport: Arc<dyn PubSubTransport>, config: BusConfig) -> Self {
        Self::with_events(transport, config, EventBus::default())
    }

    pub fn with_events(transport: Arc<dyn PubSubTransport>, config: BusConfig, events: EventBus) -> Self {
        Self {
            inner: Arc::new(BusInner {
                transport,
                config,
                events,
                connections: RwLock::new(None),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Observation stream shared by the bus and every agent using it
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.connections.read().await.is_some()
    }

    /// Open the publishing and subscribing connections; no-op when connected
    pub async fn connect(&self) -> BusResult<()> {
        let mut connections = self.inner.connections.write().await;
        if connections.is_some() {
            return Ok(());
        }

        let (publisher, subscriber) =
            tokio::try_join!(self.inner.transport.connect(), self.inner.transport.connect())?;
        *connections = Some(Connections {
            publisher,
            subscriber,
        });

        info!("message bus connected");
        Ok(())
    }

    /// Drop every subscription, then close both connections
    pub async fn disconnect(&self) -> BusResult<()> {
        let mut registry = self.inner.registry.lock().await;
        let mut connections = self.inner.connections.write().await;

        let Some(conns) = connections.take() else {
            registry.subscriptions.clear();
            registry.topics.clear();
            registry.bindings.clear();
            return Ok(());
        };

        let topics: Vec<String> = registry.topics.keys().cloned().collect();
        for topic in &topics {
            if let Err(e) = conns.subscriber.unsubscribe(topic).await {
                warn!(topic = %topic, error = %e, "failed to unbind topic during disconnect");
            }
        }
        let dropped = registry.subscriptions.len();
        registry.subscriptions.clear();
        registry.topics.clear();
        registry.bindings.clear();

        let (publisher, subscriber) = tokio::join!(conns.publisher.close(), conns.subscriber.close());
        publisher?;
        subscriber?;

        info!(subscriptions = dropped, "message bus disconnected");
        Ok(())
    }

    /// Publish a payload to a topic
    pub async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        sender_id: &str,
        metadata: Option<Metadata>,
    ) -> BusResult<BusMessage> {
        self.publish_with(
            topic,
            payload,
            sender_id,
            PublishOptions {
                correlation_id: None,
                metadata,
            },
        )
        .await
    }

    pub async fn publish_with(
        &self,
        topic: &str,
        payload: serde_json::Value,
        sender_id: &str,
        options: PublishOptions,
    ) -> BusResult<BusMessage> {
        let publisher = self.publisher().await?;

        let message = BusMessage::new(topic, payload, sender_id)
            .with_correlation_id(options.correlation_id)
            .with_metadata(options.metadata);
        let raw = message.encode()?;

        let receivers = publisher.publish(topic, &raw).await?;
        debug!(topic, message_id = %message.id, receivers, "published");

        if self.inner.config.persist_messages {
            let config = &self.inner.config;
            if let Err(e) = publisher
                .append_with_expiry(&config.history_key(topic), &raw, config.history_limit, config.history_ttl)
                .await
            {
                warn!(topic, error = %e, "failed to persist message history");
            }
        }

        Ok(message)
    }

    /// Best-effort replay of recently persisted messages, oldest first
    pub async fn recent_messages(&self, topic: &str, limit: usize) -> BusResult<Vec<BusMessage>> {
        let publisher = self.publisher().await?;
        let raw = publisher
            .list_range(&self.inner.config.history_key(topic), limit)
            .await?;

        Ok(raw
            .iter()
            .filter_map(|entry| match BusMessage::decode(entry) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(topic, error = %e, "skipping malformed history entry");
                    None
                }
            })
            .collect())
    }

    /// Register a handler for a topic and return its subscription id
    pub async fn subscribe<H>(&self, topic: &str, handler: H, subscriber_id: &str) -> BusResult<Uuid>
    where
        H: MessageHandler + 'static,
    {
        self.subscribe_arc(topic, Arc::new(handler), subscriber_id).await
    }

    pub async fn subscribe_arc(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
        subscriber_id: &str,
    ) -> BusResult<Uuid> {
        let mut registry = self.inner.registry.lock().await;
        let subscriber = self.subscriber().await?;

        if !registry.topics.contains_key(topic) {
            let generation = registry.next_binding;
            registry.next_binding += 1;
            self.bind_topic(&subscriber, topic, generation).await?;
            registry.topics.insert(topic.to_string(), Vec::new());
            registry.bindings.insert(topic.to_string(), generation);
        }

        let subscription = Subscription {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            subscriber_id: subscriber_id.to_string(),
            created_at: Utc::now(),
            handler,
        };
        let id = subscription.id;
        registry.topics.entry(topic.to_string()).or_default().push(id);
        registry.subscriptions.insert(id, subscription);

        debug!(topic, subscriber_id, subscription_id = %id, "subscribed");
        Ok(id)
    }

    /// Remove one subscription; `Ok(false)` when the id is unknown
    pub async fn unsubscribe(&self, subscription_id: Uuid) -> BusResult<bool> {
        let mut registry = self.inner.registry.lock().await;
        let Some(subscription) = registry.subscriptions.remove(&subscription_id) else {
            return Ok(false);
        };
        self.release_topic_slot(&mut registry, &subscription.topic, subscription_id)
            .await?;
        Ok(true)
    }

    /// Remove every subscription owned by `subscriber_id`, returning how many
    pub async fn unsubscribe_all(&self, subscriber_id: &str) -> BusResult<usize> {
        let mut registry = self.inner.registry.lock().await;
        let owned: Vec<(Uuid, String)> = registry
            .subscriptions
            .values()
            .filter(|s| s.subscriber_id == subscriber_id)
            .map(|s| (s.id, s.topic.clone()))
            .collect();

        let mut first_error = None;
        for (id, topic) in &owned {
            registry.subscriptions.remove(id);
            if let Err(e) = self.release_topic_slot(&mut registry, topic, *id).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(owned.len()),
        }
    }

    pub async fn subscription_count(&self, topic: &str) -> usize {
        let registry = self.inner.registry.lock().await;
        registry.topics.get(topic).map_or(0, Vec::len)
    }

    pub async fn subscriptions_for(&self, subscriber_id: &str) -> Vec<Subscription> {
        let registry = self.inner.registry.lock().await;
        registry
            .subscriptions
            .values()
            .filter(|s| s.subscriber_id == subscriber_id)
            .cloned()
            .collect()
    }

    async fn publisher(&self) -> BusResult<Arc<dyn TransportConnection>> {
        let connections = self.inner.connections.read().await;
        connections
            .as_ref()
            .map(|c| Arc::clone(&c.publisher))
            .ok_or(BusError::NotConnected)
    }

    async fn subscriber(&self) -> BusResult<Arc<dyn TransportConnection>> {
        let connections = self.inner.connections.read().await;
        connections
            .as_ref()
            .map(|c| Arc::clone(&c.subscriber))
            .ok_or(BusError::NotConnected)
    }

    /// Bind the transport channel and start the topic's ordered dispatcher
    async fn bind_topic(
        &self,
        subscriber: &Arc<dyn TransportConnection>,
        topic: &str,
        generation: u64,
    ) -> BusResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let callback: ChannelCallback = Arc::new(move |_channel, raw| {
            // fails only once the dispatcher is gone, i.e. after unbind
            let _ = tx.send(raw);
        });
        subscriber.subscribe(topic, callback).await?;

        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        let topic_name = topic.to_string();
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.dispatch(&topic_name, generation, &raw).await;
            }
            debug!(topic = %topic_name, "dispatcher stopped");
        });

        debug!(topic, generation, "topic bound");
        Ok(())
    }

    async fn release_topic_slot(&self, registry: &mut Registry, topic: &str, id: Uuid) -> BusResult<()> {
        let now_empty = match registry.topics.get_mut(topic) {
            Some(ids) => {
                ids.retain(|existing| *existing != id);
                ids.is_empty()
            }
            None => false,
        };
        if !now_empty {
            return Ok(());
        }

        registry.topics.remove(topic);
        registry.bindings.remove(topic);
        let connections = self.inner.connections.read().await;
        if let Some(conns) = connections.as_ref() {
            conns.subscriber.unsubscribe(topic).await?;
            debug!(topic, "topic unbound");
        }
        Ok(())
    }
}

impl BusInner {
    async fn dispatch(&self, topic: &str, generation: u64, raw: &str) {
        let message = match BusMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(topic, error = %e, "dropping malformed envelope");
                self.events.emit(RuntimeEvent::EnvelopeDropped {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        let targets: Vec<Subscription> = {
            let registry = self.registry.lock().await;
            if registry.bindings.get(topic) != Some(&generation) {
                debug!(topic, generation, "dropping message queued for a released binding");
                return;
            }
            registry
                .topics
                .get(topic)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| registry.subscriptions.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let deliveries = targets.into_iter().map(|subscription| {
            let message = message.clone();
            async move {
                let outcome = AssertUnwindSafe(subscription.handler.handle(message))
                    .catch_unwind()
                    .await;
                let failure = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => format!("{:#}", e),
                    Err(_) => "handler panicked".to_string(),
                };
                error!(
                    topic = %subscription.topic,
                    subscription_id = %subscription.id,
                    subscriber_id = %subscription.subscriber_id,
                    error = %failure,
                    "message handler failed"
                );
                self.events.emit(RuntimeEvent::HandlerError {
                    topic: subscription.topic.clone(),
                    subscription_id: subscription.id,
                    subscriber_id: subscription.subscriber_id.clone(),
                    error: failure,
                });
            }
        });
        join_all(deliveries).await;
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.inner.config)
            .finish()
    }
}
