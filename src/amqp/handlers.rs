//! AMQP message handlers for queue events
//!
//! [`MatchmakingEventConsumer`] turns queue-joined and queue-left events into
//! pool operations and publishes a match-created event for every pair it
//! forms. [`QueueEventConsumer`] binds it to a broker queue with explicit
//! ack/nack.

use crate::amqp::messages::{InboundEvent, MatchCreated, QueueJoined, QueueLeft};
use crate::amqp::publisher::EventPublisher;
use crate::config::MatchmakingSettings;
use crate::directory::RegionDirectory;
use crate::error::{categorize, MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::pairing::{Advisory, Outcome, PairingService};
use crate::pool::{Criteria, SkillRange};
use crate::types::{PairId, PoolId, Region, RegionFilter};
use crate::utils::{current_timestamp, generate_lobby_id, normalize_label, parse_uuid_field};
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        Channel, QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What handling one event did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConsumerAction {
    /// The join completed a pair
    Paired { pair_id: PairId, player_ids: Vec<Uuid> },
    /// The player is waiting
    Queued { position: usize, pool_size: usize },
    Left { pool_id: PoolId },
    /// No pool exists for the leave event's game and region
    LeaveIgnored,
    /// Informational event, logged only
    Observed,
    Ignored { kind: String },
}

pub struct MatchmakingEventConsumer {
    service: Arc<PairingService>,
    regions: Arc<dyn RegionDirectory>,
    publisher: Arc<dyn EventPublisher>,
    settings: MatchmakingSettings,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchmakingEventConsumer {
    pub fn new(
        service: Arc<PairingService>,
        regions: Arc<dyn RegionDirectory>,
        publisher: Arc<dyn EventPublisher>,
        settings: MatchmakingSettings,
    ) -> Self {
        Self {
            service,
            regions,
            publisher,
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn service(&self) -> &Arc<PairingService> {
        &self.service
    }

    /// Decode and handle a raw message body
    pub async fn handle_message(&self, content: &[u8]) -> Result<Outcome<ConsumerAction>> {
        let event = match InboundEvent::from_bytes(content) {
            Ok(event) => event,
            Err(e) => {
                self.with_metrics_do(|m| m.record_event("malformed", false));
                return Err(e);
            }
        };

        let unknown = (event == InboundEvent::Unknown).then(|| unknown_kind(content));
        self.dispatch(event, unknown).await
    }

    pub async fn handle_event(&self, event: InboundEvent) -> Result<Outcome<ConsumerAction>> {
        self.dispatch(event, None).await
    }

    /// `unknown_type` is the raw `type` tag when the event did not decode
    /// to a known kind
    async fn dispatch(
        &self,
        event: InboundEvent,
        unknown_type: Option<String>,
    ) -> Result<Outcome<ConsumerAction>> {
        let kind = event.kind();
        let result = match event {
            InboundEvent::QueueJoined(joined) => self.on_queue_joined(joined).await,
            InboundEvent::QueueLeft(left) => self.on_queue_left(left).await,
            InboundEvent::LobbyPlayerJoined(joined) => {
                info!(
                    "Player {} joined lobby {}",
                    joined.player_id, joined.lobby_id
                );
                Ok(Outcome::new(ConsumerAction::Observed))
            }
            InboundEvent::Unknown => {
                let kind = unknown_type.unwrap_or_else(|| kind.to_string());
                info!("Ignoring event of unknown type '{}'", kind);
                Ok(Outcome::new(ConsumerAction::Ignored { kind }))
            }
        };

        self.with_metrics_do(|m| m.record_event(kind, result.is_ok()));
        result
    }

    async fn on_queue_joined(&self, event: QueueJoined) -> Result<Outcome<ConsumerAction>> {
        let player_id = parse_uuid_field("player_id", &event.player_id)?;
        let game_id = parse_uuid_field("game_type", &event.game_type)?;
        if !event.mmr.is_finite() {
            return Err(MatchmakingError::InvalidEvent {
                reason: format!("mmr must be a finite number, got {}", event.mmr),
            }
            .into());
        }

        let region = self.resolve_region(&event.region).await?;
        let criteria = self.criteria_for(game_id, &region, event.mmr.round() as i64);

        debug!(
            "Player {} queueing for game {} in {} with skill {}..{}",
            player_id, game_id, region.slug, criteria.skill.min, criteria.skill.max
        );

        let outcome = self
            .service
            .add_and_find_next_pair(player_id, criteria)
            .await?;
        let mut advisories = outcome.advisories;
        let result = outcome.value;

        let Some(pair) = result.pair else {
            info!(
                "Player {} queued in pool {} at position {} ({} waiting)",
                player_id,
                result.pool.id,
                result.position,
                result.pool.len()
            );
            return Ok(Outcome::with_advisories(
                ConsumerAction::Queued {
                    position: result.position,
                    pool_size: result.pool.len(),
                },
                advisories,
            ));
        };

        let player_ids = pair.player_ids();
        let event = MatchCreated {
            match_id: pair.id,
            lobby_id: generate_lobby_id(),
            game_type: game_id,
            region: region.slug.clone(),
            player_ids: player_ids.clone(),
            created_at: current_timestamp(),
        };

        match self.publisher.publish_match_created(event).await {
            Ok(()) => {
                self.with_metrics_do(|m| m.record_publish(true));
                advisories.push(Advisory::completed("publish match created"));
            }
            Err(e) => {
                warn!("Failed to publish match created for pair {}: {}", pair.id, e);
                self.with_metrics_do(|m| m.record_publish(false));
                self.with_metrics_do(|m| m.record_advisory_failure("publish match created"));
                advisories.push(Advisory::failed("publish match created", e));
            }
        }

        info!("Match {} created for players {:?}", pair.id, player_ids);
        Ok(Outcome::with_advisories(
            ConsumerAction::Paired {
                pair_id: pair.id,
                player_ids,
            },
            advisories,
        ))
    }

    async fn on_queue_left(&self, event: QueueLeft) -> Result<Outcome<ConsumerAction>> {
        let player_id = parse_uuid_field("player_id", &event.player_id)?;
        let game_id = parse_uuid_field("game_type", &event.game_type)?;
        let region = self.resolve_region(&event.region).await?;

        let pools = self
            .service
            .registry()
            .scoped(game_id, &region.slug, self.service.pool_store().as_ref())
            .await?;

        let mut target = None;
        for pool in &pools {
            if pool.contains(player_id)? {
                target = Some(pool.clone());
                break;
            }
        }

        let Some(pool) = target.or_else(|| pools.first().cloned()) else {
            debug!(
                "No pool for game {} in {}, ignoring leave of {}",
                game_id, region.slug, player_id
            );
            self.with_metrics_do(|m| m.record_party_left("no_pool"));
            return Ok(Outcome::new(ConsumerAction::LeaveIgnored));
        };

        if let Err(e) = self.service.leave(&pool, player_id).await {
            self.with_metrics_do(|m| m.record_party_left("not_queued"));
            return Err(e);
        }

        Ok(Outcome::new(ConsumerAction::Left { pool_id: pool.id() }))
    }

    async fn resolve_region(&self, slug: &str) -> Result<Region> {
        let slug = normalize_label(slug);
        let found = self
            .regions
            .search(&RegionFilter::by_slug(&slug))
            .await
            .map_err(|e| MatchmakingError::storage("resolve region", e))?;

        found.into_iter().next().ok_or_else(|| {
            MatchmakingError::RegionNotFound {
                region: slug.clone(),
            }
            .into()
        })
    }

    fn criteria_for(&self, game_id: Uuid, region: &Region, rating: i64) -> Criteria {
        let mut criteria = Criteria::new(
            game_id,
            region.slug.clone(),
            self.settings.default_pair_size,
            SkillRange::bucket(rating, self.settings.skill_window.saturating_mul(2)),
        )
        .with_schedule_matching(self.settings.match_on_schedule);

        if let Some(mode) = &self.settings.default_game_mode {
            criteria = criteria.with_game_mode(mode.clone());
        }
        if let Some(tier) = &self.settings.default_tier {
            criteria = criteria.with_tier(tier.clone());
        }
        criteria.max_ping = self.settings.max_ping;
        criteria
    }

    fn with_metrics_do(&self, f: impl FnOnce(&MetricsCollector)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}

fn unknown_kind(content: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(content)
        .ok()
        .and_then(|value| value.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Binds a [`MatchmakingEventConsumer`] to a broker queue
pub struct QueueEventConsumer {
    consumer: Arc<MatchmakingEventConsumer>,
    channel: Channel,
    consumer_tag: String,
}

impl QueueEventConsumer {
    pub fn new(consumer: Arc<MatchmakingEventConsumer>, channel: Channel) -> Self {
        let consumer_tag = format!("queue-events-consumer-{}", Uuid::new_v4());

        Self {
            consumer,
            channel,
            consumer_tag,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Declare the durable queue and start consuming from it
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let declare = QueueDeclareArguments::new(queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        self.channel.queue_declare(declare).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            }
        })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        self.channel
            .basic_consume(DeliveryConsumer::new(self.consumer.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

/// Acks handled deliveries; nacks failures, requeueing retryable ones
struct DeliveryConsumer {
    consumer: Arc<MatchmakingEventConsumer>,
}

impl DeliveryConsumer {
    fn new(consumer: Arc<MatchmakingEventConsumer>) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl AsyncConsumer for DeliveryConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = Instant::now();

        let result = self.consumer.handle_message(&content).await;
        self.consumer.with_metrics_do(|m| {
            m.record_amqp_operation("consume", result.is_ok(), start_time.elapsed())
        });

        match result {
            Ok(outcome) => {
                debug!(
                    "Message processed - delivery_tag: {}, action: {:?}, processing_time: {:.2}ms",
                    delivery_tag,
                    outcome.value,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
                if let Err(e) = channel
                    .basic_ack(BasicAckArguments::new(delivery_tag, false))
                    .await
                {
                    error!("Failed to ack delivery {}: {}", delivery_tag, e);
                }
            }
            Err(e) => {
                let requeue = categorize(&e).is_retryable();
                error!(
                    "Message processing failed - delivery_tag: {}, processing_time: {:.2}ms, requeue: {}, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    requeue,
                    e
                );
                if let Err(e) = channel
                    .basic_nack(BasicNackArguments::new(delivery_tag, false, requeue))
                    .await
                {
                    error!("Failed to nack delivery {}: {}", delivery_tag, e);
                }
            }
        }
    }
}
