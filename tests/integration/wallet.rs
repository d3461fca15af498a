//! Wallet flows: cash in, cash out, operator transfers, PIN.

use rust_decimal_macros::dec;
use std::sync::Arc;

use arena::config::WalletConfig;
use arena::engine::accountant::{Accountant, CashIn, CashOut, ProofFile, TransferMode};
use arena::types::{
    Chain, PaymentMethod, RequestKind, RequestStatus, Role, TransactionKind, ValidationError,
};

use crate::mock_backend::{profile, MockBackend};
use crate::signed_in;

fn proof() -> ProofFile {
    ProofFile {
        file_name: "receipt.png".to_string(),
        bytes: vec![0x89, 0x50, 0x4e, 0x47],
        content_type: "image/png".to_string(),
    }
}

#[tokio::test]
async fn test_cash_in_goes_to_upline_with_proof() {
    let backend = MockBackend::new()
        .with_profile(profile("u1", Role::User, dec!(0), Some("agent-1")));
    let accountant = Accountant::new(
        Arc::new(backend.clone()),
        signed_in(&backend, "u1").await,
        WalletConfig::default(),
    );

    accountant
        .cash_in(CashIn {
            amount: dec!(500),
            method: Some(PaymentMethod::Gcash),
            proof: Some(proof()),
        })
        .await
        .unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    let r = &requests[0];
    assert_eq!(r.kind, RequestKind::CashIn);
    assert_eq!(r.status, RequestStatus::Pending);
    assert_eq!(r.upline_id, "agent-1");
    let url = r.proof_url.as_deref().unwrap();
    assert!(url.contains("/u1/") && url.ends_with(".png"));
    // Balance is untouched until the upline approves.
    assert_eq!(backend.balance("u1"), dec!(0));
}

#[tokio::test]
async fn test_cash_in_without_upline() {
    let backend = MockBackend::new().with_profile(profile("u1", Role::User, dec!(0), None));
    let accountant = Accountant::new(
        Arc::new(backend.clone()),
        signed_in(&backend, "u1").await,
        WalletConfig::default(),
    );
    let err = accountant
        .cash_in(CashIn {
            amount: dec!(100),
            method: Some(PaymentMethod::Maya),
            proof: Some(proof()),
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No upline found to process this request.");
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_crypto_cash_out_then_pending_blocks() {
    let backend = MockBackend::new()
        .with_profile(profile("u1", Role::User, dec!(5850), Some("agent-1")));
    let accountant = Accountant::new(
        Arc::new(backend.clone()),
        signed_in(&backend, "u1").await,
        WalletConfig::default(),
    );

    let request = CashOut {
        amount: dec!(5850),
        method: Some(PaymentMethod::Crypto),
        wallet_address: Some("0x1234567890abcdef".to_string()),
        chain: Some(Chain::Bnb),
        ..CashOut::default()
    };
    accountant.cash_out(request.clone()).await.unwrap();

    let r = &backend.requests()[0];
    assert_eq!(r.converted_amount, Some(dec!(100.00)));
    assert_eq!(r.exchange_rate, Some(dec!(58.50)));
    assert!(r.account_number.is_none());

    let err = accountant.cash_out(request).await.unwrap_err();
    assert_eq!(err.to_string(), ValidationError::PendingRequest.to_string());
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn test_cash_out_requires_pin_once_set() {
    let backend = MockBackend::new()
        .with_profile(profile("u1", Role::User, dec!(1000), Some("agent-1")));
    let store = signed_in(&backend, "u1").await;
    let accountant =
        Accountant::new(Arc::new(backend.clone()), store.clone(), WalletConfig::default());

    accountant.set_pin("4321", "4321").await.unwrap();
    store
        .watch()
        .wait_for(|s| s.profile.as_ref().and_then(|p| p.security_pin.as_deref()) == Some("4321"))
        .await
        .unwrap();

    let mut request = CashOut {
        amount: dec!(200),
        method: Some(PaymentMethod::Gcash),
        account_name: Some("Juan Dela Cruz".to_string()),
        account_number: Some("09171234567".to_string()),
        pin: Some("1111".to_string()),
        ..CashOut::default()
    };
    let err = accountant.cash_out(request.clone()).await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid Security PIN");

    request.pin = Some("4321".to_string());
    accountant.cash_out(request).await.unwrap();
    assert_eq!(backend.requests()[0].account_name.as_deref(), Some("Juan Dela Cruz"));
}

#[tokio::test]
async fn test_agent_transfer_moves_funds_and_records() {
    let backend = MockBackend::new()
        .with_profile(profile("agent-1", Role::Agent, dec!(1000), Some("master-1")))
        .with_profile(profile("u1", Role::User, dec!(50), Some("agent-1")));
    let store = signed_in(&backend, "agent-1").await;
    let accountant =
        Accountant::new(Arc::new(backend.clone()), store.clone(), WalletConfig::default());

    let target = profile("u1", Role::User, dec!(50), Some("agent-1"));
    let receipt = accountant
        .transfer(&target, dec!(300), TransferMode::Transfer)
        .await
        .unwrap();

    assert_eq!(receipt.target_balance, dec!(350));
    assert_eq!(receipt.operator_balance, Some(dec!(700)));
    assert_eq!(backend.balance("agent-1"), dec!(700));
    assert_eq!(backend.balance("u1"), dec!(350));

    let txs = backend.transactions();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].kind, TransactionKind::Transfer);
    assert_eq!(txs[0].sender_id.as_deref(), Some("agent-1"));

    // Not enough left for a second large transfer.
    let err = accountant
        .transfer(&target, dec!(800), TransferMode::Transfer)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Insufficient balance.");
    assert_eq!(backend.balance("agent-1"), dec!(700));
}
