//! Test fixtures and failure-injecting implementations for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use pairing_room::amqp::handlers::MatchmakingEventConsumer;
use pairing_room::amqp::messages::{InboundEvent, MatchCreated, QueueJoined, QueueLeft};
use pairing_room::amqp::publisher::{EventPublisher, MockEventPublisher};
use pairing_room::config::MatchmakingSettings;
use pairing_room::directory::{InMemoryPartyDirectory, StaticRegionDirectory};
use pairing_room::error::{MatchmakingError, Result};
use pairing_room::pairing::{ConflictDetector, InMemoryPairStore, Pair, PairStore, PairingService};
use pairing_room::pool::{InMemoryPoolStore, PoolRegistry, PoolSnapshot, PoolStore};
use pairing_room::schedule::{Schedule, TimeWindow};
use pairing_room::types::{PairId, Party, PartyId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Pool store that counts saves and can be told to fail them
#[derive(Default)]
pub struct FlakyPoolStore {
    inner: InMemoryPoolStore,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl FlakyPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolStore for FlakyPoolStore {
    async fn find_pool(&self, fingerprint: &str) -> Result<Option<PoolSnapshot>> {
        self.inner.find_pool(fingerprint).await
    }

    async fn find_pools_in_scope(&self, game_id: Uuid, region: &str) -> Result<Vec<PoolSnapshot>> {
        self.inner.find_pools_in_scope(game_id, region).await
    }

    async fn save(&self, pool: PoolSnapshot) -> Result<PoolSnapshot> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("pool store unavailable"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(pool).await
    }
}

/// Pair store that can be told to fail saves
#[derive(Default)]
pub struct FlakyPairStore {
    inner: InMemoryPairStore,
    fail_saves: AtomicBool,
}

impl FlakyPairStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.len().unwrap_or(0)
    }
}

#[async_trait]
impl PairStore for FlakyPairStore {
    async fn save(&self, pair: Pair) -> Result<Pair> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("pair store unavailable"));
        }
        self.inner.save(pair).await
    }

    async fn get_by_id(&self, pair_id: PairId) -> Result<Pair> {
        self.inner.get_by_id(pair_id).await
    }

    async fn find_pairs_by_party(&self, party_id: PartyId) -> Result<Vec<Pair>> {
        self.inner.find_pairs_by_party(party_id).await
    }
}

/// Publisher whose broker is always down
#[derive(Debug, Default)]
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish_match_created(&self, _event: MatchCreated) -> Result<()> {
        Err(MatchmakingError::AmqpConnectionFailed {
            message: "broker down".to_string(),
        }
        .into())
    }
}

/// Complete consumer stack over flaky in-memory storage
pub struct TestSystem {
    pub consumer: MatchmakingEventConsumer,
    pub service: Arc<PairingService>,
    pub parties: Arc<InMemoryPartyDirectory>,
    pub pools: Arc<FlakyPoolStore>,
    pub pairs: Arc<FlakyPairStore>,
    pub publisher: Arc<MockEventPublisher>,
}

pub fn create_test_system() -> TestSystem {
    create_test_system_with(MatchmakingSettings::default())
}

pub fn create_test_system_with(settings: MatchmakingSettings) -> TestSystem {
    let publisher = Arc::new(MockEventPublisher::new());
    build_system(settings, publisher.clone(), publisher)
}

pub fn create_system_with_publisher(publisher: Arc<dyn EventPublisher>) -> TestSystem {
    build_system(
        MatchmakingSettings::default(),
        publisher,
        Arc::new(MockEventPublisher::new()),
    )
}

fn build_system(
    settings: MatchmakingSettings,
    publisher: Arc<dyn EventPublisher>,
    recorder: Arc<MockEventPublisher>,
) -> TestSystem {
    let parties = Arc::new(InMemoryPartyDirectory::with_auto_register());
    let pools = Arc::new(FlakyPoolStore::new());
    let pairs = Arc::new(FlakyPairStore::new());

    let mut service = PairingService::new(
        Arc::new(PoolRegistry::new()),
        pools.clone(),
        pairs.clone(),
        parties.clone(),
    );
    if settings.enable_conflict_checks {
        service = service.with_conflict_detector(
            ConflictDetector::new(pairs.clone(), parties.clone())
                .with_max_pairs(settings.max_pairs_per_check),
        );
    }
    let service = Arc::new(service);

    let regions = StaticRegionDirectory::from_slugs([
        ("eu-west", "Europe West"),
        ("us-east", "US East"),
    ]);
    let consumer =
        MatchmakingEventConsumer::new(service.clone(), Arc::new(regions), publisher, settings);

    TestSystem {
        consumer,
        service,
        parties,
        pools,
        pairs,
        publisher: recorder,
    }
}

pub fn queue_joined(player: Uuid, game: Uuid, region: &str, mmr: f64) -> InboundEvent {
    InboundEvent::QueueJoined(QueueJoined {
        player_id: player.to_string(),
        game_type: game.to_string(),
        region: region.to_string(),
        mmr,
    })
}

pub fn queue_left(player: Uuid, game: Uuid, region: &str) -> InboundEvent {
    InboundEvent::QueueLeft(QueueLeft {
        player_id: player.to_string(),
        game_type: game.to_string(),
        region: region.to_string(),
    })
}

/// Weekly schedule with a single whole-hour window
pub fn weekly(day: chrono::Weekday, start_hour: u32, end_hour: u32) -> Schedule {
    Schedule::new(vec![
        TimeWindow::weekly(day, (start_hour, 0), (end_hour, 0)).expect("valid window")
    ])
}

/// Register a solo party with the given availability and return its id
pub fn register_party(parties: &InMemoryPartyDirectory, schedule: Option<Schedule>) -> PartyId {
    let mut party = Party::solo(Uuid::new_v4());
    party.schedule = schedule;
    let id = party.id;
    parties.register(party).expect("register party");
    id
}
