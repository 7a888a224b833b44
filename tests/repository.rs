//! Integration tests for repository functionality.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use eventide::{
    Aggregate, AggregateError, AggregateRoot, Apply, Codec, DomainEvent, EventRepository,
    IdGenerator, JsonCodec, Metadata, Registry,
    identity::RANDOM_ID_LENGTH,
    repository::{GetError, SaveError},
    store::{self, EventIterator, EventStore, StoredEvent, inmemory},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Domain: Account
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
struct Opened {
    owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
#[event(reason = "funds-deposited")]
struct Deposited {
    amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, DomainEvent)]
struct Withdrawn {
    amount: i64,
}

#[derive(Default, Aggregate)]
#[aggregate(events(Opened, Deposited, Withdrawn), derives(PartialEq, Eq))]
struct Account {
    root: AggregateRoot<AccountEvent>,
    owner: String,
    balance: i64,
}

impl Account {
    fn open(owner: &str) -> Self {
        let mut account = Self::default();
        account.track_change(Opened {
            owner: owner.to_string(),
        });
        account
    }

    fn deposit(&mut self, amount: i64) {
        self.track_change(Deposited { amount });
    }

    fn withdraw(&mut self, amount: i64) -> Result<(), String> {
        if amount > self.balance {
            return Err("insufficient funds".to_string());
        }
        self.track_change(Withdrawn { amount });
        Ok(())
    }
}

impl Apply<Opened> for Account {
    fn apply(&mut self, event: &Opened) {
        self.owner.clone_from(&event.owner);
    }
}

impl Apply<Deposited> for Account {
    fn apply(&mut self, event: &Deposited) {
        self.balance += event.amount;
    }
}

impl Apply<Withdrawn> for Account {
    fn apply(&mut self, event: &Withdrawn) {
        self.balance -= event.amount;
    }
}

fn repository() -> EventRepository<inmemory::Store> {
    let repository = EventRepository::new(inmemory::Store::new());
    repository.register::<Account>();
    repository
}

// ============================================================================
// Failing Store
// ============================================================================

#[derive(Debug, Error)]
#[error("disk on fire")]
struct StoreFailure;

struct EmptyIter;

impl EventIterator for EmptyIter {
    type Error = StoreFailure;

    fn next(&mut self) -> impl Future<Output = Result<Option<StoredEvent>, Self::Error>> + Send + '_ {
        std::future::ready(Ok(None))
    }

    fn close(&mut self) {}
}

#[derive(Default)]
struct FailingStore {
    attempts: AtomicUsize,
}

impl EventStore for FailingStore {
    type Error = StoreFailure;
    type Iter = EmptyIter;

    fn save<'a>(
        &'a self,
        _: &'a mut [StoredEvent],
    ) -> impl Future<Output = Result<(), store::SaveError<Self::Error>>> + Send + 'a {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Err(store::SaveError::Store(StoreFailure)))
    }

    fn get<'a>(
        &'a self,
        _: &'a str,
        _: &'a str,
        _: u64,
    ) -> impl Future<Output = Result<Self::Iter, store::GetError<Self::Error>>> + Send + 'a {
        std::future::ready(Err(store::GetError::Store(StoreFailure)))
    }

    fn global_events(
        &self,
        _: u64,
        _: usize,
    ) -> impl Future<Output = Result<Vec<StoredEvent>, Self::Error>> + Send + '_ {
        std::future::ready(Err(StoreFailure))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn save_and_load_round_trips_state() {
    let repository = repository();

    let mut account = Account::open("ada");
    account.deposit(100);
    account.withdraw(40).unwrap();
    repository.save(&mut account).await.unwrap();

    assert!(!account.has_pending_events());
    assert_eq!(account.version(), 3);
    assert_eq!(account.root().persisted_version(), 3);
    assert_eq!(account.global_version(), 3);

    let loaded: Account = repository.load(account.id()).await.unwrap();
    assert_eq!(loaded.owner, "ada");
    assert_eq!(loaded.balance, 60);
    assert_eq!(loaded.version(), 3);
    assert_eq!(loaded.id(), account.id());
}

#[test]
fn generated_ids_are_random_alphanumeric() {
    let first = Account::open("ada");
    let second = Account::open("bob");

    assert_eq!(first.id().len(), RANDOM_ID_LENGTH);
    assert!(first.id().chars().all(|c| c.is_ascii_alphanumeric()));
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn custom_id_generator_names_new_aggregates() {
    let repository = repository();
    let counter = Arc::new(AtomicUsize::new(0));
    let ids = IdGenerator::new({
        let counter = Arc::clone(&counter);
        move || format!("acct-{}", counter.fetch_add(1, Ordering::SeqCst))
    });

    let mut account = Account {
        root: AggregateRoot::with_id_generator(ids),
        ..Account::default()
    };
    account.deposit(5);
    repository.save(&mut account).await.unwrap();

    assert_eq!(account.id(), "acct-0");
    let loaded: Account = repository.load("acct-0").await.unwrap();
    assert_eq!(loaded.balance, 5);
}

#[tokio::test]
async fn explicit_id_is_used_and_cannot_be_replaced() {
    let repository = repository();

    let mut account = Account::default();
    account.set_id("acct-7").unwrap();
    account.deposit(1);
    assert_eq!(
        account.set_id("other"),
        Err(AggregateError::IdAlreadySet {
            current: "acct-7".to_string()
        })
    );
    repository.save(&mut account).await.unwrap();

    assert!(repository.load::<Account>("acct-7").await.is_ok());
}

#[test]
fn pending_events_carry_envelope_before_save() {
    let mut account = Account::open("ada");
    account.deposit(10);

    let pending = account.pending_events();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].version, 1);
    assert_eq!(pending[1].version, 2);
    assert_eq!(pending[1].aggregate_type, "account");
    assert_eq!(pending[1].global_version, 0);
    assert_eq!(pending[1].data, AccountEvent::Deposited(Deposited { amount: 10 }));
    assert_eq!(account.balance, 10, "tracked changes apply immediately");
}

#[tokio::test]
async fn metadata_survives_round_trip() {
    let repository = repository();

    let mut account = Account::open("ada");
    let mut metadata = Metadata::new();
    metadata.insert("correlation_id".to_string(), serde_json::json!("req-1"));
    account.track_change_with_metadata(Deposited { amount: 3 }, metadata.clone());
    repository.save(&mut account).await.unwrap();

    let events = repository.global_events(0, 10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events[0].metadata.is_empty());
    assert_eq!(events[1].metadata, metadata);
    assert_eq!(events[1].data.downcast_ref::<Deposited>(), Some(&Deposited { amount: 3 }));
}

#[tokio::test]
async fn stale_copy_conflicts_until_reloaded() {
    let repository = repository();

    let mut original = Account::open("ada");
    repository.save(&mut original).await.unwrap();

    let mut first: Account = repository.load(original.id()).await.unwrap();
    let mut second: Account = repository.load(original.id()).await.unwrap();

    first.deposit(10);
    repository.save(&mut first).await.unwrap();

    second.deposit(20);
    let err = repository.save(&mut second).await.unwrap_err();
    assert!(err.is_concurrency_conflict(), "unexpected error: {err}");
    assert!(second.has_pending_events(), "failed save keeps pending events");

    let mut retried: Account = repository.load(original.id()).await.unwrap();
    retried.deposit(20);
    repository.save(&mut retried).await.unwrap();

    let loaded: Account = repository.load(original.id()).await.unwrap();
    assert_eq!(loaded.balance, 30);
    assert_eq!(loaded.version(), 3);
}

#[tokio::test]
async fn get_refreshes_an_existing_instance() {
    let repository = repository();

    let mut writer = Account::open("ada");
    repository.save(&mut writer).await.unwrap();
    let mut reader: Account = repository.load(writer.id()).await.unwrap();

    writer.deposit(7);
    writer.deposit(8);
    repository.save(&mut writer).await.unwrap();

    repository.get(writer.id(), &mut reader).await.unwrap();
    assert_eq!(reader.balance, 15);
    assert_eq!(reader.version(), 3);
}

#[tokio::test]
async fn cancelled_replay_stops_before_folding() {
    let repository = repository();

    let mut account = Account::open("ada");
    account.deposit(5);
    repository.save(&mut account).await.unwrap();

    let shutdown = CancellationToken::new();
    let replay = shutdown.child_token();
    shutdown.cancel();

    let mut reader = Account::default();
    let err = repository
        .get_with_cancellation(&replay, account.id(), &mut reader)
        .await
        .unwrap_err();
    assert!(matches!(err, GetError::Cancelled));
    assert_eq!(reader.version(), 0);

    // A live token replays normally.
    repository
        .get_with_cancellation(&CancellationToken::new(), account.id(), &mut reader)
        .await
        .unwrap();
    assert_eq!(reader.balance, 5);
}

#[tokio::test]
async fn unregistered_aggregate_is_rejected() {
    let repository = EventRepository::new(inmemory::Store::new());

    let mut account = Account::open("ada");
    let err = repository.save(&mut account).await.unwrap_err();
    assert!(matches!(
        err,
        SaveError::UnregisteredAggregate {
            aggregate_type: "account"
        }
    ));
    assert!(account.has_pending_events());
}

#[tokio::test]
async fn missing_aggregate_is_not_found() {
    let repository = repository();
    assert!(matches!(
        repository.load::<Account>("nobody").await,
        Err(GetError::NotFound)
    ));
}

#[tokio::test]
async fn store_failures_propagate() {
    let repository = EventRepository::new(FailingStore::default());
    repository.register::<Account>();

    let mut account = Account::open("ada");
    let err = repository.save(&mut account).await.unwrap_err();
    assert!(matches!(err, SaveError::Store(StoreFailure)));
    assert!(account.has_pending_events());
    assert_eq!(repository.event_store().attempts.load(Ordering::SeqCst), 1);

    assert!(matches!(
        repository.load::<Account>("ada").await,
        Err(GetError::Store(StoreFailure))
    ));
    assert!(matches!(
        repository.global_events(0, 1).await,
        Err(GetError::Store(StoreFailure))
    ));
}

#[tokio::test]
async fn repositories_can_share_a_registry() {
    let registry = Arc::new(Registry::<JsonCodec>::new());
    registry.register::<Account>();

    let store = inmemory::Store::new();
    let writer = EventRepository::new(store.clone()).with_registry(Arc::clone(&registry));
    let reader = EventRepository::new(store).with_registry(registry);

    let mut account = Account::open("ada");
    writer.save(&mut account).await.unwrap();

    let loaded: Account = reader.load(account.id()).await.unwrap();
    assert_eq!(loaded.owner, "ada");
    assert_eq!(
        reader.registry().reasons(Account::TYPE),
        vec!["funds-deposited", "opened", "withdrawn"]
    );
}

// ============================================================================
// Custom Codec
// ============================================================================

/// JSON codec that counts how many payloads it encodes.
#[derive(Default)]
struct CountingCodec {
    encoded: AtomicUsize,
}

impl Codec for CountingCodec {
    type Error = serde_json::Error;

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: Serialize + ?Sized,
    {
        self.encoded.fetch_add(1, Ordering::SeqCst);
        serde_json::to_vec(value)
    }

    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(data)
    }
}

#[tokio::test]
async fn custom_codec_encodes_payloads_and_metadata() {
    let repository =
        EventRepository::new(inmemory::Store::new()).with_codec(CountingCodec::default());
    repository.register::<Account>();

    let mut account = Account::open("ada");
    account.deposit(1);
    repository.save(&mut account).await.unwrap();

    // One payload and one metadata map per event.
    assert_eq!(repository.codec().encoded.load(Ordering::SeqCst), 4);
    let loaded: Account = repository.load(account.id()).await.unwrap();
    assert_eq!(loaded.balance, 1);
}

#[tokio::test]
async fn with_codec_starts_a_fresh_registry() {
    let repository = repository().with_codec(CountingCodec::default());
    assert!(!repository.registry().is_registered(Account::TYPE));
}
