//! Save pipeline and refresh suppression, end to end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use synctable_core::{SuppressionStrategy, SyncError, TransportError, ValidationError};
use synctable_sync::{MessageStream, QueryTransport, SavePatch, SubscribeRequest};
use synctable_test_utils::fixtures::{mock_transport, person, sample_schemas};
use synctable_test_utils::{
    record, LiveTable, MockTransport, SubscriptionId, SubscriptionState, SyncConfig,
};
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

async fn open_live(
    transport: &Arc<MockTransport>,
    config: SyncConfig,
) -> LiveTable<MockTransport> {
    let table = LiveTable::open("t", transport.schemas(), Arc::clone(transport), config).unwrap();
    table
        .wait_for(|s| s.subscription == SubscriptionState::Live)
        .await
        .unwrap();
    table
}

#[tokio::test(start_paused = true)]
async fn test_save_sends_key_and_changed_fields() {
    let transport = mock_transport();
    transport.seed("t", vec![person(1, "x")]);
    let table = open_live(&transport, SyncConfig::default()).await;

    table
        .save(&person(1, "x"), record([("name", json!("renamed"))]))
        .await
        .unwrap();

    let saves = transport.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].fields, record([("id", json!(1)), ("name", json!("renamed"))]));
    assert_eq!(saves[0].write_token, None);

    // The mirror only changes once the echo arrives.
    let snapshot = table.wait_for(|s| s.version == 2).await.unwrap();
    assert_eq!(snapshot.records[0]["name"], json!("renamed"));
    assert!(!snapshot.is_saving());
}

#[tokio::test(start_paused = true)]
async fn test_save_stamps_last_edited() {
    let transport = mock_transport();
    let id = "0f8fad5b-d9cb-469f-a165-70867728950e";
    transport.seed(
        "crm_accounts",
        vec![record([("account_id", json!(id)), ("first_name", json!("Ada"))])],
    );
    let table = LiveTable::open(
        "crm_accounts",
        transport.schemas(),
        Arc::clone(&transport),
        SyncConfig::default(),
    )
    .unwrap();
    let snapshot = table
        .wait_for(|s| s.subscription == SubscriptionState::Live)
        .await
        .unwrap();

    table
        .save(&snapshot.records[0], record([("first_name", json!("Grace"))]))
        .await
        .unwrap();

    let saves = transport.saves();
    assert_eq!(saves[0].fields["last_edited"], json!("NOW()"));
    assert_eq!(saves[0].fields["account_id"], json!(id));
}

#[tokio::test(start_paused = true)]
async fn test_echo_inside_save_window_keeps_refresh_counter() {
    let transport = mock_transport();
    transport.seed("t", vec![person(1, "x")]);
    let table = open_live(&transport, SyncConfig::default()).await;
    assert_eq!(table.snapshot().refresh_counter, 1);

    // t = 0: save, echoed immediately.
    table
        .save(&person(1, "x"), record([("name", json!("mine"))]))
        .await
        .unwrap();
    table.wait_for(|s| s.version == 2).await.unwrap();

    // t = 500: still inside the window.
    sleep(ms(500)).await;
    transport.push_upsert("t", person(3, "z"));
    let snapshot = table.wait_for(|s| s.version == 3).await.unwrap();
    assert_eq!(snapshot.refresh_counter, 1);

    // t = 1500: outside the window.
    sleep(ms(1000)).await;
    transport.push_upsert("t", person(4, "w"));
    let snapshot = table.wait_for(|s| s.version == 4).await.unwrap();
    assert_eq!(snapshot.refresh_counter, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_inside_save_window_still_refreshes() {
    let transport = mock_transport();
    transport.seed("t", vec![person(1, "x")]);
    let table = open_live(&transport, SyncConfig::default()).await;
    // Let the first debounce window lapse.
    sleep(ms(1500)).await;

    table
        .save(&person(1, "x"), record([("name", json!("mine"))]))
        .await
        .unwrap();
    let saved_at = Instant::now();
    let snapshot = table.wait_for(|s| s.version == 2).await.unwrap();
    assert_eq!(snapshot.refresh_counter, 1);

    sleep(ms(300)).await;
    transport.disconnect_all();
    let snapshot = table
        .wait_for(|s| s.subscriptions_opened == 2 && s.subscription == SubscriptionState::Live)
        .await
        .unwrap();
    assert!(saved_at.elapsed() < ms(1000));
    assert_eq!(transport.subscribe_count(), 2);
    assert_eq!(snapshot.disconnects, 1);
    assert_eq!(snapshot.refresh_counter, 2);
    assert_eq!(snapshot.records[0]["name"], json!("mine"));
}

#[tokio::test(start_paused = true)]
async fn test_write_tokens_suppress_only_own_echo() {
    let transport = mock_transport();
    transport.echo_write_tokens(true);
    transport.seed("t", vec![person(1, "x")]);
    let config = SyncConfig::default().with_suppression(SuppressionStrategy::WriteToken);
    let table = open_live(&transport, config).await;

    table
        .save(&person(1, "x"), record([("name", json!("mine"))]))
        .await
        .unwrap();
    assert!(transport.saves()[0].write_token.is_some());
    let snapshot = table.wait_for(|s| s.version == 2).await.unwrap();
    assert_eq!(snapshot.refresh_counter, 1);

    // Someone else's write right after ours still refreshes.
    transport.push_upsert("t", person(2, "theirs"));
    let snapshot = table.wait_for(|s| s.version == 3).await.unwrap();
    assert_eq!(snapshot.refresh_counter, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_sets_error_and_is_not_retried() {
    let transport = mock_transport();
    transport.seed("t", vec![person(1, "x")]);
    let table = open_live(&transport, SyncConfig::default()).await;

    transport.fail_next_save(TransportError::remote("permission denied"));
    let err = table
        .save(&person(1, "x"), record([("name", json!("nope"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transport(TransportError::Remote { .. })));

    let snapshot = table.snapshot();
    assert!(snapshot.error_message().unwrap().contains("permission denied"));
    assert!(!snapshot.is_saving());
    assert_eq!(snapshot.version, 1);
    sleep(ms(2000)).await;
    assert_eq!(transport.saves().len(), 1);

    // A new save clears the banner.
    table
        .save(&person(1, "x"), record([("name", json!("yes"))]))
        .await
        .unwrap();
    assert_eq!(table.snapshot().error, None);
}

#[tokio::test(start_paused = true)]
async fn test_save_without_primary_key_sends_nothing() {
    let transport = mock_transport();
    let table = open_live(&transport, SyncConfig::default()).await;

    let err = table
        .save(&record([("name", json!("x"))]), record([("name", json!("y"))]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Validation(ValidationError::MissingPrimaryKey { .. })
    ));
    assert!(transport.saves().is_empty());
}

/// Holds every save until released.
struct GatedTransport {
    inner: Arc<MockTransport>,
    gate: Arc<Notify>,
}

#[async_trait]
impl QueryTransport for GatedTransport {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<MessageStream, TransportError> {
        self.inner.subscribe(request).await
    }

    async fn save(&self, patch: SavePatch) -> Result<(), TransportError> {
        self.gate.notified().await;
        self.inner.save(patch).await
    }

    async fn cancel(&self, id: &SubscriptionId) -> Result<(), TransportError> {
        self.inner.cancel(id).await
    }
}

async fn open_gated() -> (LiveTable<GatedTransport>, Arc<Notify>) {
    let schemas = sample_schemas();
    let inner = Arc::new(MockTransport::new(sample_schemas()));
    inner.seed("t", vec![person(1, "x")]);
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(GatedTransport {
        inner,
        gate: Arc::clone(&gate),
    });
    let table = LiveTable::open("t", &schemas, transport, SyncConfig::default()).unwrap();
    table
        .wait_for(|s| s.subscription == SubscriptionState::Live)
        .await
        .unwrap();
    (table, gate)
}

#[tokio::test(start_paused = true)]
async fn test_saving_flag_tracks_in_flight_saves() {
    let (table, gate) = open_gated().await;
    let saver = table.saver();
    let pending = tokio::spawn(async move {
        saver
            .save(&person(1, "x"), record([("name", json!("slow"))]))
            .await
    });

    let snapshot = table.wait_for(|s| s.is_saving()).await.unwrap();
    assert_eq!(snapshot.saves_in_flight, 1);

    gate.notify_one();
    pending.await.unwrap().unwrap();
    assert!(!table.snapshot().is_saving());
}

#[tokio::test(start_paused = true)]
async fn test_saving_flag_cleared_when_save_is_dropped() {
    let (table, _gate) = open_gated().await;
    let saver = table.saver();
    let pending = tokio::spawn(async move {
        saver
            .save(&person(1, "x"), record([("name", json!("abandoned"))]))
            .await
    });
    table.wait_for(|s| s.is_saving()).await.unwrap();

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    assert!(!table.snapshot().is_saving());
}
