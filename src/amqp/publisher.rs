//! AMQP event publisher for outbound events

use crate::amqp::messages::{
    MatchCreated, MessageEnvelope, MATCH_CREATED_ROUTING_KEY, MATCH_EVENTS_EXCHANGE,
};
use crate::error::{MatchmakingError, Result};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing matchmaking events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a MatchCreated event
    async fn publish_match_created(&self, event: MatchCreated) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    /// Most correlation ids remembered for deduplication
    pub dedup_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            dedup_capacity: 10_000,
        }
    }
}

/// Correlation ids of recent publishes, oldest evicted first
#[derive(Debug)]
struct PublishedIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl PublishedIds {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: &str) {
        if !self.ids.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    /// Correlation ids already published
    published: Mutex<PublishedIds>,
}

impl AmqpEventPublisher {
    /// Create a publisher and declare the match events exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let published = Mutex::new(PublishedIds::with_capacity(config.dedup_capacity));
        let publisher = Self {
            channel,
            config,
            published,
        };

        publisher.setup_exchanges().await?;
        Ok(publisher)
    }

    async fn setup_exchanges(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(MATCH_EVENTS_EXCHANGE, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare match events exchange: {}", e),
            }
        })?;

        info!("Declared exchange '{}'", MATCH_EVENTS_EXCHANGE);
        Ok(())
    }

    fn already_published(&self, correlation_id: &str) -> Result<bool> {
        let published = self
            .published
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("published messages"))?;
        Ok(published.contains(correlation_id))
    }

    fn mark_published(&self, correlation_id: &str) -> Result<()> {
        let mut published = self
            .published
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("published messages"))?;
        published.insert(correlation_id);
        Ok(())
    }

    /// Publish to an exchange with retry and exponential backoff
    async fn publish_to_exchange<T>(&self, exchange: &str, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        if self.config.enable_deduplication && self.already_published(&envelope.correlation_id)? {
            debug!(
                "Message {} already published, skipping",
                envelope.correlation_id
            );
            return Ok(());
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(exchange, envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        self.mark_published(&envelope.correlation_id)?;
                    }

                    debug!(
                        "Published message {} to exchange {} ({} cached ids)",
                        envelope.correlation_id,
                        exchange,
                        self.cached_message_count()
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish<T>(&self, exchange: &str, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json")
            .with_persistence(true);

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }

    /// Number of cached correlation ids
    pub fn cached_message_count(&self) -> usize {
        self.published
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_match_created(&self, event: MatchCreated) -> Result<()> {
        // The match id is stable across redeliveries of the same pair.
        let correlation_id = event.match_id.to_string();
        let envelope = MessageEnvelope::new(event, MATCH_CREATED_ROUTING_KEY)
            .with_correlation_id(correlation_id);
        self.publish_to_exchange(MATCH_EVENTS_EXCHANGE, &envelope)
            .await
    }
}

/// Event publisher that records what it was asked to publish
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published: Mutex<Vec<MatchCreated>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<MatchCreated> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.published.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_match_created(&self, event: MatchCreated) -> Result<()> {
        let mut events = self
            .published
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("mock publisher"))?;
        events.push(event);
        Ok(())
    }
}
