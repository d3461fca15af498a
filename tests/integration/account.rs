//! The player's own records and the shared stream settings.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use arena::backend::Backend;
use arena::engine::account::Account;
use arena::engine::change_feed;
use arena::engine::console::Console;
use arena::engine::dispatcher::Dispatcher;
use arena::odds::OddsEngine;
use arena::realtime::Hub;
use arena::storage::UserPreferences;
use arena::types::{ContactUpdate, PageRequest, Role, StreamSetting, StreamSettings};

use crate::mock_backend::{profile, MockBackend};
use crate::signed_in;

#[tokio::test]
async fn test_history_pages_with_exact_total() {
    let backend = MockBackend::new()
        .with_profile(profile("u1", Role::User, dec!(0), Some("agent-1")));
    for minutes_ago in 0..23 {
        let amount = dec!(100) + Decimal::from(minutes_ago);
        backend.history_bet("u1", amount, minutes_ago);
    }
    backend.history_bet("u2", dec!(5), 0);

    let account = Account::new(Arc::new(backend.clone()), signed_in(&backend, "u1").await);
    let first = account.bet_history(PageRequest::new(1, 10)).await.unwrap();
    assert_eq!(first.total, 23);
    assert_eq!(first.total_pages(), 3);
    assert_eq!(first.items.len(), 10);
    // Newest first, each with its match.
    assert_eq!(first.items[0].bet.amount, dec!(100));
    assert!(first.items.iter().all(|h| h.fight.is_some()));

    let last = account.bet_history(PageRequest::new(3, 10)).await.unwrap();
    assert_eq!(last.items.len(), 3);
    assert_eq!(last.items[2].bet.amount, dec!(122));

    let past_end = account.bet_history(PageRequest::new(9, 10)).await.unwrap();
    assert!(past_end.items.is_empty());
    assert_eq!(past_end.total, 23);
}

#[tokio::test]
async fn test_contact_update_reaches_store() {
    let backend = MockBackend::new()
        .with_profile(profile("u1", Role::User, dec!(0), Some("agent-1")));
    let store = signed_in(&backend, "u1").await;
    let account = Account::new(Arc::new(backend.clone()), store.clone());

    let update = ContactUpdate::new("https://facebook.com/juan", "  ");
    account.update_contact(update).await.unwrap();

    let stored = backend.fetch_profile("u1").await.unwrap();
    assert_eq!(stored.facebook_url.as_deref(), Some("https://facebook.com/juan"));
    assert!(stored.phone_number.is_none());
    assert_eq!(store.snapshot().profile, Some(stored));
}

#[tokio::test]
async fn test_stream_change_reaches_watching_client() {
    let backend = MockBackend::new()
        .with_profile(profile("admin-1", Role::Admin, dec!(0), None))
        .with_profile(profile("u1", Role::User, dec!(0), Some("agent-1")));
    backend.open_match("Red", "Blue");

    let shared: Arc<dyn Backend> = Arc::new(backend.clone());
    let store = signed_in(&backend, "u1").await;
    let hub = Hub::default();
    let (mut sub, mut source) =
        change_feed(shared.clone(), &hub, Duration::from_secs(1), Some("u1"));
    let (mut dispatcher, _notices, board) = Dispatcher::new(
        shared.clone(),
        store,
        OddsEngine::default(),
        UserPreferences::default(),
    );
    dispatcher.bootstrap().await.unwrap();
    assert_eq!(board.borrow().stream, StreamSettings::default());
    assert_eq!(source.tick().await, 0, "first poll only primes");

    let console = Console::new(shared.clone(), signed_in(&backend, "admin-1").await);
    console
        .set_stream(StreamSetting::Url, "https://cdn.test/derby.m3u8")
        .await
        .unwrap();
    assert!(backend.admin_actions().contains(&"UPDATE_STREAM".to_string()));

    assert_eq!(source.tick().await, 1);
    let event = sub.next().await.unwrap();
    dispatcher.handle(event).await.unwrap();
    assert_eq!(board.borrow().stream.url, "https://cdn.test/derby.m3u8");
    assert_eq!(board.borrow().stream.title, StreamSettings::default().title);

    // A second edit to the same value is not a change.
    backend.set_setting("stream_url", "https://cdn.test/derby.m3u8");
    assert_eq!(source.tick().await, 0);
}
