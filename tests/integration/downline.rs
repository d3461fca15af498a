//! Upline side: registration approval, bans, cash request processing and
//! the admin log.

use rust_decimal_macros::dec;
use std::sync::Arc;

use arena::config::WalletConfig;
use arena::engine::accountant::{Accountant, CashIn, CashOut, ProofFile, Resolution};
use arena::engine::console::Console;
use arena::engine::downline::Downline;
use arena::types::{PaymentMethod, ProfileStatus, RequestStatus, Role, TransactionKind};

use crate::mock_backend::{pending_profile, profile, MockBackend};
use crate::signed_in;

fn agency() -> MockBackend {
    MockBackend::new()
        .with_profile(profile("admin-1", Role::Admin, dec!(0), None))
        .with_profile(profile("agent-1", Role::Agent, dec!(5000), Some("admin-1")))
        .with_profile(profile("agent-2", Role::Agent, dec!(0), Some("admin-1")))
        .with_profile(profile("u1", Role::User, dec!(0), Some("agent-1")))
        .with_profile(pending_profile("u2", "agent-1"))
        .with_profile(pending_profile("u3", "agent-2"))
}

async fn accountant_for(backend: &MockBackend, user_id: &str) -> Accountant {
    Accountant::new(
        Arc::new(backend.clone()),
        signed_in(backend, user_id).await,
        WalletConfig::default(),
    )
}

#[tokio::test]
async fn test_recruiter_approves_own_registration() {
    let backend = agency();
    let downline = Downline::new(Arc::new(backend.clone()), signed_in(&backend, "agent-1").await);

    let members = downline.members().await.unwrap();
    assert_eq!(members.len(), 2);
    let pending = downline.pending().await.unwrap();
    assert_eq!(pending.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["u2"]);

    downline.approve(&pending[0]).await.unwrap();
    assert_eq!(backend.profile_status("u2"), Some(ProfileStatus::Active));
    assert!(backend.admin_actions().contains(&"APPROVE_USER".to_string()));

    // Another recruiter's registration is out of reach.
    let other = pending_profile("u3", "agent-2");
    assert!(downline.ban(&other).await.is_err());
    assert_eq!(backend.profile_status("u3"), Some(ProfileStatus::Pending));
}

#[tokio::test]
async fn test_admin_bans_across_downlines() {
    let backend = agency();
    let downline = Downline::new(Arc::new(backend.clone()), signed_in(&backend, "admin-1").await);
    let target = pending_profile("u3", "agent-2");
    let banned = downline.ban(&target).await.unwrap();
    assert_eq!(banned.status, ProfileStatus::Banned);
    assert_eq!(backend.profile_status("u3"), Some(ProfileStatus::Banned));
}

#[tokio::test]
async fn test_cash_in_approval_pays_once() {
    let backend = agency();
    accountant_for(&backend, "u1")
        .await
        .cash_in(CashIn {
            amount: dec!(500),
            method: Some(PaymentMethod::Gcash),
            proof: Some(ProofFile {
                file_name: "r.png".to_string(),
                bytes: vec![1, 2, 3],
                content_type: "image/png".to_string(),
            }),
        })
        .await
        .unwrap();

    let agent = accountant_for(&backend, "agent-1").await;
    let incoming = agent.incoming_requests(Some(RequestStatus::Pending)).await.unwrap();
    assert_eq!(incoming.len(), 1);
    let request = incoming[0].clone();

    agent.resolve_request(&request, Resolution::Approve).await.unwrap();
    assert_eq!(backend.balance("agent-1"), dec!(4500));
    assert_eq!(backend.balance("u1"), dec!(500));
    assert_eq!(backend.request_status(&request.id), Some(RequestStatus::Approved));
    assert!(backend
        .transactions()
        .iter()
        .any(|tx| tx.kind == TransactionKind::Load && tx.amount == dec!(500)));
    assert!(backend.admin_actions().contains(&"APPROVE_CASH_IN".to_string()));

    // A stale copy of the same request cannot pay out again.
    let err = agent.resolve_request(&request, Resolution::Approve).await.unwrap_err();
    assert!(format!("{err:#}").contains("already been processed"));
    assert_eq!(backend.balance("agent-1"), dec!(4500));
    assert_eq!(backend.balance("u1"), dec!(500));
}

#[tokio::test]
async fn test_cash_out_approval_returns_funds_to_upline() {
    let backend = agency();
    backend.set_balance_for("u1", dec!(800));
    accountant_for(&backend, "u1")
        .await
        .cash_out(CashOut {
            amount: dec!(300),
            method: Some(PaymentMethod::Maya),
            account_name: Some("Juan Dela Cruz".to_string()),
            account_number: Some("09171234567".to_string()),
            ..CashOut::default()
        })
        .await
        .unwrap();

    let agent = accountant_for(&backend, "agent-1").await;
    let request = agent.incoming_requests(None).await.unwrap().remove(0);
    agent.resolve_request(&request, Resolution::Approve).await.unwrap();

    assert_eq!(backend.balance("u1"), dec!(500));
    assert_eq!(backend.balance("agent-1"), dec!(5300));
    assert!(backend.transactions().iter().any(|tx| tx.kind == TransactionKind::Withdraw));
}

#[tokio::test]
async fn test_rejected_request_leaves_balances() {
    let backend = agency();
    backend.set_balance_for("u1", dec!(800));
    accountant_for(&backend, "u1")
        .await
        .cash_out(CashOut {
            amount: dec!(300),
            method: Some(PaymentMethod::Gcash),
            account_name: Some("Juan".to_string()),
            account_number: Some("0917".to_string()),
            ..CashOut::default()
        })
        .await
        .unwrap();

    // Only the addressed upline may act on it.
    let outsider = accountant_for(&backend, "agent-2").await;
    let request = backend.requests().remove(0);
    assert!(outsider.resolve_request(&request, Resolution::Reject).await.is_err());

    let agent = accountant_for(&backend, "agent-1").await;
    agent.resolve_request(&request, Resolution::Reject).await.unwrap();
    assert_eq!(backend.request_status(&request.id), Some(RequestStatus::Rejected));
    assert_eq!(backend.balance("u1"), dec!(800));
    assert_eq!(backend.balance("agent-1"), dec!(5000));
    assert!(agent.incoming_requests(Some(RequestStatus::Pending)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_admin_log_lists_newest_first() {
    let backend = agency();
    let downline = Downline::new(Arc::new(backend.clone()), signed_in(&backend, "admin-1").await);
    downline.approve(&pending_profile("u2", "agent-1")).await.unwrap();
    downline.ban(&pending_profile("u3", "agent-2")).await.unwrap();

    let console = Console::new(Arc::new(backend.clone()), signed_in(&backend, "admin-1").await);
    let logs = console.admin_logs(10).await.unwrap();
    let actions: Vec<_> = logs.iter().map(|l| l.action_type.as_str()).collect();
    assert_eq!(actions, vec!["BAN_USER", "APPROVE_USER"]);
    assert_eq!(logs[0].target_id.as_deref(), Some("u3"));

    let agent = Console::new(Arc::new(backend.clone()), signed_in(&backend, "agent-1").await);
    assert!(agent.admin_logs(10).await.is_err());
}
