//! Subscription manager against the mock transport.

use std::sync::Arc;
use std::time::Duration;

use synctable_core::{QueryDescriptor, QueryMessage, QueryOptions, TransportError};
use synctable_sync::{FeedEvent, SubscribeRequest, SubscriptionManager};
use synctable_test_utils::fixtures::{mock_transport, person};
use synctable_test_utils::{MockTransport, SubscriptionState};

fn request(transport: &MockTransport) -> SubscribeRequest {
    SubscribeRequest {
        query: QueryDescriptor::normalize("t", transport.schemas()).unwrap(),
        options: QueryOptions::subscription(None, &[]),
        changes: true,
    }
}

async fn open_live(manager: &mut SubscriptionManager<MockTransport>, transport: &MockTransport) {
    manager.open(request(transport)).await.unwrap();
    match manager.next_event().await {
        FeedEvent::Message(QueryMessage::Initial { id, .. }) => manager.mark_live(id),
        other => panic!("expected initial result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_open_moves_through_states() {
    let transport = mock_transport();
    transport.seed("t", vec![person(1, "x")]);
    let mut manager = SubscriptionManager::new(Arc::clone(&transport), "t");
    assert_eq!(manager.state(), SubscriptionState::Idle);

    manager.open(request(&transport)).await.unwrap();
    assert_eq!(manager.state(), SubscriptionState::Subscribing);
    assert!(manager.expects_changes());

    match manager.next_event().await {
        FeedEvent::Message(QueryMessage::Initial { id, records, .. }) => {
            assert_eq!(records, vec![person(1, "x")]);
            manager.mark_live(id);
        }
        other => panic!("expected initial result, got {:?}", other),
    }
    assert_eq!(manager.state(), SubscriptionState::Live);
    assert_eq!(manager.id().map(|id| id.as_str()), Some("feed-1"));
}

#[tokio::test]
async fn test_reopen_cancels_previous_feed() {
    let transport = mock_transport();
    let mut manager = SubscriptionManager::new(Arc::clone(&transport), "t");
    open_live(&mut manager, &transport).await;
    open_live(&mut manager, &transport).await;

    assert_eq!(transport.cancels().len(), 1);
    assert_eq!(transport.cancels()[0].as_str(), "feed-1");
    assert_eq!(manager.id().map(|id| id.as_str()), Some("feed-2"));
    assert_eq!(transport.active_feeds(), 1);
}

#[tokio::test]
async fn test_cancel_errors_are_swallowed() {
    let transport = mock_transport();
    transport.fail_cancels(true);
    let mut manager = SubscriptionManager::new(Arc::clone(&transport), "t");
    open_live(&mut manager, &transport).await;

    manager.close().await;
    assert_eq!(manager.state(), SubscriptionState::Idle);
    assert_eq!(manager.id(), None);
    assert_eq!(transport.cancel_count(), 1);
}

#[tokio::test]
async fn test_cancelled_is_terminal() {
    let transport = mock_transport();
    let mut manager = SubscriptionManager::new(Arc::clone(&transport), "t");
    open_live(&mut manager, &transport).await;

    manager.cancel().await;
    assert_eq!(manager.state(), SubscriptionState::Cancelled);

    manager.open(request(&transport)).await.unwrap();
    assert_eq!(manager.state(), SubscriptionState::Cancelled);
    assert_eq!(transport.subscribe_count(), 1);
}

#[tokio::test]
async fn test_disconnect_is_reported_and_not_cancelled() {
    let transport = mock_transport();
    let mut manager = SubscriptionManager::new(Arc::clone(&transport), "t");
    open_live(&mut manager, &transport).await;

    transport.disconnect_all();
    assert_eq!(
        manager.next_event().await,
        FeedEvent::Error(TransportError::Disconnected)
    );
    manager.mark_disconnected();
    assert_eq!(manager.state(), SubscriptionState::Disconnected);

    // Reopening after a disconnect has no handle to cancel.
    open_live(&mut manager, &transport).await;
    assert_eq!(transport.cancel_count(), 0);
}

#[tokio::test]
async fn test_closed_stream_ends() {
    let transport = mock_transport();
    let mut manager = SubscriptionManager::new(Arc::clone(&transport), "t");
    open_live(&mut manager, &transport).await;

    transport.close_all_feeds();
    assert_eq!(manager.next_event().await, FeedEvent::Ended);
}

#[tokio::test]
async fn test_failed_subscribe_leaves_manager_idle() {
    let transport = mock_transport();
    transport.fail_next_subscribe(TransportError::remote("no access"));
    let mut manager = SubscriptionManager::new(Arc::clone(&transport), "t");

    let err = manager.open(request(&transport)).await.unwrap_err();
    assert!(!err.is_disconnect());
    assert_eq!(manager.state(), SubscriptionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_reopen_before_initial_cancels_superseded_feed() {
    let transport = mock_transport();
    let mut manager = SubscriptionManager::new(Arc::clone(&transport), "t");

    // feed-1 never reaches mark_live, so its handle is unknown at reopen.
    manager.open(request(&transport)).await.unwrap();
    manager.open(request(&transport)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(transport.cancels().len(), 1);
    assert_eq!(transport.cancels()[0].as_str(), "feed-1");
    assert_eq!(transport.active_feeds(), 1);

    match manager.next_event().await {
        FeedEvent::Message(QueryMessage::Initial { id, .. }) => {
            assert_eq!(id.as_ref().map(|id| id.as_str()), Some("feed-2"));
            manager.mark_live(id);
        }
        other => panic!("expected initial result, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_superseded_one_shot_is_not_cancelled() {
    let transport = mock_transport();
    let mut manager = SubscriptionManager::new(Arc::clone(&transport), "t");
    let one_shot = SubscribeRequest {
        changes: false,
        ..request(&transport)
    };

    manager.open(one_shot.clone()).await.unwrap();
    manager.open(one_shot).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(transport.cancel_count(), 0);
}
