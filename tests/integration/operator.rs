//! Operator console: match lifecycle, house liquidity, cancellation.

use rust_decimal_macros::dec;
use std::sync::Arc;

use arena::config::BettingConfig;
use arena::engine::console::Console;
use arena::engine::executor::BetExecutor;
use arena::types::{MatchStatus, Role, Selection, ValidationError};

use crate::mock_backend::{profile, MockBackend};
use crate::signed_in;

#[tokio::test]
async fn test_lifecycle_and_cancel_refunds() {
    let backend = MockBackend::new()
        .with_profile(profile("admin-1", Role::Admin, dec!(0), None))
        .with_profile(profile("u1", Role::User, dec!(500), Some("agent-1")));

    let console = Console::new(Arc::new(backend.clone()), signed_in(&backend, "admin-1").await);
    let created = console.create_match("Red", "Blue", Some("F-7")).await.unwrap();
    assert_eq!(created.status, MatchStatus::Open);
    console
        .place_house_bet(&created.id, Selection::Meron, dec!(2000))
        .await
        .unwrap();

    let player = BetExecutor::new(
        Arc::new(backend.clone()),
        signed_in(&backend, "u1").await,
        BettingConfig::default(),
    );
    player.place(&created, Selection::Wala, dec!(200)).await.unwrap();
    assert_eq!(backend.balance("u1"), dec!(300));

    let totals = console.pool_totals().await.unwrap();
    assert_eq!(totals[&created.id].meron, dec!(2000));
    assert_eq!(totals[&created.id].wala, dec!(200));

    // A match with bets cannot be deleted, only cancelled.
    assert!(console.delete_match(&created.id).await.is_err());
    console.cancel_match(&created).await.unwrap();
    assert_eq!(backend.balance("u1"), dec!(500));
    assert!(console.pool_totals().await.unwrap().get(&created.id).is_none());
    assert_eq!(backend.admin_actions(), vec!["CANCEL_MATCH".to_string()]);
}

#[tokio::test]
async fn test_closed_match_refuses_bets_locally() {
    let backend = MockBackend::new()
        .with_profile(profile("admin-1", Role::Admin, dec!(0), None))
        .with_profile(profile("u1", Role::User, dec!(500), Some("agent-1")));
    let console = Console::new(Arc::new(backend.clone()), signed_in(&backend, "admin-1").await);
    let mut created = console.create_match("Red", "Blue", None).await.unwrap();

    console.set_status(&created.id, MatchStatus::LastCall).await.unwrap();
    created.status = MatchStatus::LastCall;

    let player = BetExecutor::new(
        Arc::new(backend.clone()),
        signed_in(&backend, "u1").await,
        BettingConfig::default(),
    );
    let err = player.place(&created, Selection::Meron, dec!(100)).await.unwrap_err();
    assert_eq!(err.to_string(), ValidationError::BettingClosed.to_string());
    assert_eq!(backend.balance("u1"), dec!(500));
}

#[tokio::test]
async fn test_declare_winner_finishes_match() {
    let backend = MockBackend::new().with_profile(profile("admin-1", Role::Admin, dec!(0), None));
    let console = Console::new(Arc::new(backend.clone()), signed_in(&backend, "admin-1").await);
    let created = console.create_match("Red", "Blue", None).await.unwrap();

    console.declare_winner(&created, Selection::Draw).await.unwrap();
    let listed = console.list_matches().await.unwrap();
    assert_eq!(listed[0].status, MatchStatus::Finished);
    assert_eq!(listed[0].winner, Some(Selection::Draw));
    assert_eq!(backend.admin_actions(), vec!["DECLARE_WINNER".to_string()]);

    // Empty match: delete is allowed.
    console.delete_match(&created.id).await.unwrap();
    assert!(console.list_matches().await.unwrap().is_empty());
}
