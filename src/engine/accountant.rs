//! Accountant: wallet flows.
//!
//! Cash-in and cash-out requests to the upline, the upline's side of
//! those requests, operator balance transfers, and the security PIN.
//! Balances are owned by the backend: every figure used here is freshly
//! fetched, and every sequence is a series of independent remote calls
//! with no client-side rollback.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::executor::InFlight;
use super::session::{Command, StoreHandle};
use crate::backend::Backend;
use crate::config::WalletConfig;
use crate::types::{
    ArenaError, Chain, NewAdminLog, NewTransaction, NewTransactionRequest, PaymentMethod, Profile,
    RequestKind, RequestStatus, Transaction, TransactionKind, TransactionRequest, ValidationError,
};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// An uploaded payment proof.
#[derive(Debug, Clone)]
pub struct ProofFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct CashIn {
    pub amount: Decimal,
    pub method: Option<PaymentMethod>,
    pub proof: Option<ProofFile>,
}

#[derive(Debug, Clone, Default)]
pub struct CashOut {
    pub amount: Decimal,
    pub method: Option<PaymentMethod>,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub wallet_address: Option<String>,
    pub chain: Option<Chain>,
    pub pin: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Credit the target out of thin air (a load).
    Add,
    /// Move funds from the operator to the target.
    Transfer,
}

/// What an upline does with an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Approve,
    Reject,
}

impl Resolution {
    fn status(self) -> RequestStatus {
        match self {
            Resolution::Approve => RequestStatus::Approved,
            Resolution::Reject => RequestStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    pub mode: TransferMode,
    pub amount: Decimal,
    pub target_id: String,
    pub target_balance: Decimal,
    pub operator_balance: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

pub fn validate_cash_in(request: &CashIn) -> Result<(), ValidationError> {
    if request.amount <= Decimal::ZERO {
        return Err(ValidationError::InvalidAmount);
    }
    if request.method.is_none() {
        return Err(ValidationError::MissingMethod);
    }
    if request.proof.is_none() {
        return Err(ValidationError::MissingProof);
    }
    Ok(())
}

/// Cash-out gates, in the order the steps are presented.
pub fn validate_cash_out(
    request: &CashOut,
    profile: &Profile,
    has_pending: bool,
    wallet: &WalletConfig,
) -> Result<(), ValidationError> {
    if request.amount <= Decimal::ZERO {
        return Err(ValidationError::InvalidAmount);
    }
    if request.amount > profile.balance {
        return Err(ValidationError::InsufficientBalance);
    }
    if has_pending {
        return Err(ValidationError::PendingRequest);
    }
    let method = request.method.ok_or(ValidationError::MissingMethod)?;
    if method == PaymentMethod::Crypto {
        let address_ok = request
            .wallet_address
            .as_deref()
            .is_some_and(|a| a.trim().chars().count() >= wallet.min_wallet_address_len);
        if !address_ok {
            return Err(ValidationError::InvalidWalletAddress);
        }
        if request.chain.is_none() {
            return Err(ValidationError::MissingChain);
        }
    } else {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !filled(&request.account_name) || !filled(&request.account_number) {
            return Err(ValidationError::MissingAccountDetails);
        }
    }
    if let Some(expected) = profile.security_pin.as_deref().filter(|p| !p.is_empty()) {
        if request.pin.as_deref() != Some(expected) {
            return Err(ValidationError::InvalidPin);
        }
    }
    Ok(())
}

/// A new PIN is exactly four ASCII digits and matches its confirmation.
pub fn validate_pin(pin: &str, confirm: &str) -> Result<(), ValidationError> {
    if pin.len() != 4 || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::PinFormat);
    }
    if pin != confirm {
        return Err(ValidationError::PinMismatch);
    }
    Ok(())
}

/// USDT amount for a crypto cash-out. Stored unrounded; display rounds.
pub fn usdt_amount(amount: Decimal, rate: Decimal) -> Option<Decimal> {
    if rate <= Decimal::ZERO {
        return None;
    }
    amount.checked_div(rate)
}

/// Storage path for a payment proof: `{user_id}/{unix_millis}.{ext}`.
pub fn proof_path(user_id: &str, unix_millis: i64, file_name: &str) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .unwrap_or("bin");
    format!("{user_id}/{unix_millis}.{ext}")
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant {
    backend: Arc<dyn Backend>,
    store: StoreHandle,
    wallet: WalletConfig,
    in_flight: InFlight,
}

impl Accountant {
    pub fn new(backend: Arc<dyn Backend>, store: StoreHandle, wallet: WalletConfig) -> Self {
        Self {
            backend,
            store,
            wallet,
            in_flight: InFlight::default(),
        }
    }

    fn user_id(&self) -> Result<String> {
        Ok(self.store.user_id().ok_or(ArenaError::NotSignedIn)?)
    }

    async fn upline(&self, user_id: &str) -> Result<String> {
        let profile = self.backend.fetch_profile(user_id).await?;
        Ok(profile.created_by.ok_or(ArenaError::NoUpline)?)
    }

    /// Upload the proof, then file a pending cash-in with the upline.
    pub async fn cash_in(&self, request: CashIn) -> Result<()> {
        validate_cash_in(&request).map_err(ArenaError::from)?;
        let _guard = self.in_flight.try_acquire().map_err(ArenaError::from)?;
        let user_id = self.user_id()?;

        let (Some(method), Some(proof)) = (request.method, request.proof) else {
            return Err(ArenaError::from(ValidationError::MissingProof).into());
        };

        let path = proof_path(&user_id, Utc::now().timestamp_millis(), &proof.file_name);
        let proof_url = self
            .backend
            .upload_proof(&path, proof.bytes, &proof.content_type)
            .await
            .context("Failed to upload payment proof")?;

        let upline_id = self.upline(&user_id).await?;

        self.backend
            .insert_request(&NewTransactionRequest {
                user_id: user_id.clone(),
                upline_id: upline_id.clone(),
                amount: request.amount,
                kind: RequestKind::CashIn,
                status: RequestStatus::Pending,
                payment_method: method,
                proof_url: Some(proof_url),
                account_name: None,
                account_number: None,
                wallet_address: None,
                chain: None,
                converted_amount: None,
                exchange_rate: None,
            })
            .await
            .context("Failed to submit cash-in request")?;

        info!(
            user_id = %user_id,
            upline_id = %upline_id,
            amount = %request.amount,
            "Cash-in requested"
        );
        Ok(())
    }

    /// File a pending cash-out with the upline.
    pub async fn cash_out(&self, request: CashOut) -> Result<()> {
        let _guard = self.in_flight.try_acquire().map_err(ArenaError::from)?;
        let user_id = self.user_id()?;

        let profile = self.backend.fetch_profile(&user_id).await?;
        let pending = self
            .backend
            .pending_request(&user_id, RequestKind::CashOut)
            .await?
            .is_some();
        validate_cash_out(&request, &profile, pending, &self.wallet).map_err(ArenaError::from)?;

        let upline_id = profile.created_by.clone().ok_or(ArenaError::NoUpline)?;
        let method = request.method.ok_or(ArenaError::from(ValidationError::MissingMethod))?;
        let crypto = method == PaymentMethod::Crypto;

        let new_request = NewTransactionRequest {
            user_id: user_id.clone(),
            upline_id,
            amount: request.amount,
            kind: RequestKind::CashOut,
            status: RequestStatus::Pending,
            payment_method: method,
            proof_url: None,
            account_name: if crypto { None } else { request.account_name },
            account_number: if crypto { None } else { request.account_number },
            wallet_address: if crypto { request.wallet_address } else { None },
            chain: if crypto { request.chain } else { None },
            converted_amount: if crypto {
                usdt_amount(request.amount, self.wallet.usdt_rate)
            } else {
                None
            },
            exchange_rate: crypto.then_some(self.wallet.usdt_rate),
        };

        self.backend
            .insert_request(&new_request)
            .await
            .context("Failed to submit cash-out request")?;

        info!(
            user_id = %user_id,
            amount = %new_request.amount,
            method = ?method,
            usdt = ?new_request.converted_amount,
            "Cash-out requested"
        );
        Ok(())
    }

    /// Credit (or move funds to) another account.
    ///
    /// Not atomic: the balance writes, the transaction record and the
    /// admin log are separate calls. A failed balance write stops the
    /// sequence and is returned; the record and log are best-effort.
    pub async fn transfer(
        &self,
        target: &Profile,
        amount: Decimal,
        mode: TransferMode,
    ) -> Result<TransferReceipt> {
        if amount <= Decimal::ZERO {
            return Err(ArenaError::from(ValidationError::InvalidAmount).into());
        }
        let _guard = self.in_flight.try_acquire().map_err(ArenaError::from)?;
        let operator_id = self.user_id()?;

        let receipt = match mode {
            TransferMode::Add => {
                let previous = target.balance;
                let updated = self
                    .backend
                    .set_balance(&target.id, previous + amount)
                    .await
                    .context("Failed to credit balance")?;

                self.record(&operator_id, &target.id, amount, TransactionKind::Load).await;
                self.log_action(
                    &operator_id,
                    "ADD_BALANCE",
                    target,
                    json!({
                        "amount": amount,
                        "previousBalance": previous,
                        "newBalance": updated.balance,
                    }),
                )
                .await;

                TransferReceipt {
                    mode,
                    amount,
                    target_id: target.id.clone(),
                    target_balance: updated.balance,
                    operator_balance: None,
                }
            }
            TransferMode::Transfer => {
                let operator = self.backend.fetch_profile(&operator_id).await?;
                if operator.balance < amount {
                    return Err(ArenaError::from(ValidationError::InsufficientBalance).into());
                }

                let debited = self
                    .backend
                    .set_balance(&operator_id, operator.balance - amount)
                    .await
                    .context("Failed to debit sender balance")?;
                let credited = self
                    .backend
                    .set_balance(&target.id, target.balance + amount)
                    .await
                    .context("Failed to credit recipient balance")?;

                self.record(&operator_id, &target.id, amount, TransactionKind::Transfer)
                    .await;
                self.log_action(
                    &operator_id,
                    "TRANSFER_BALANCE",
                    target,
                    json!({
                        "amount": amount,
                        "senderId": operator_id,
                        "senderPreviousBalance": operator.balance,
                        "senderNewBalance": debited.balance,
                        "recipientPreviousBalance": target.balance,
                        "recipientNewBalance": credited.balance,
                    }),
                )
                .await;

                let operator_balance = debited.balance;
                self.store.send(Command::ProfileChanged(debited)).await?;

                TransferReceipt {
                    mode,
                    amount,
                    target_id: target.id.clone(),
                    target_balance: credited.balance,
                    operator_balance: Some(operator_balance),
                }
            }
        };

        info!(
            mode = ?receipt.mode,
            target = %target.username,
            amount = %amount,
            target_balance = %receipt.target_balance,
            "Balance transfer complete"
        );
        Ok(receipt)
    }

    /// Set or replace the signed-in user's security PIN.
    pub async fn set_pin(&self, pin: &str, confirm: &str) -> Result<()> {
        validate_pin(pin, confirm).map_err(ArenaError::from)?;
        let user_id = self.user_id()?;
        self.backend
            .set_security_pin(&user_id, pin)
            .await
            .context("Failed to set security PIN")?;

        let profile = self.backend.fetch_profile(&user_id).await?;
        self.store.send(Command::ProfileChanged(profile)).await?;
        info!(user_id = %user_id, "Security PIN updated");
        Ok(())
    }

    pub async fn recent_transactions(&self, limit: u32) -> Result<Vec<Transaction>> {
        let user_id = self.user_id()?;
        self.backend.user_transactions(&user_id, limit).await
    }

    pub async fn recent_requests(&self, limit: u32) -> Result<Vec<TransactionRequest>> {
        let user_id = self.user_id()?;
        self.backend.user_requests(&user_id, limit).await
    }

    /// Requests addressed to the signed-in upline, newest first.
    pub async fn incoming_requests(
        &self,
        status: Option<RequestStatus>,
    ) -> Result<Vec<TransactionRequest>> {
        let user_id = self.user_id()?;
        self.backend.incoming_requests(&user_id, status).await
    }

    /// Approve or reject a request addressed to the signed-in upline.
    ///
    /// Approving a cash-in moves the amount from the upline to the
    /// requester; approving a cash-out moves it from the requester to the
    /// upline. The request is closed before any balance moves, and only a
    /// pending row can be closed, so a request is paid at most once. A
    /// failed balance write after that is returned with no rollback.
    pub async fn resolve_request(
        &self,
        request: &TransactionRequest,
        resolution: Resolution,
    ) -> Result<()> {
        let _guard = self.in_flight.try_acquire().map_err(ArenaError::from)?;
        let operator_id = self.user_id()?;
        if request.upline_id != operator_id {
            let reason = "This request is addressed to another upline";
            return Err(ArenaError::Rejected(reason.into()).into());
        }
        if request.status != RequestStatus::Pending {
            return Err(ArenaError::from(ValidationError::RequestProcessed).into());
        }
        let requester_id = request
            .user_id
            .as_deref()
            .ok_or_else(|| ArenaError::NotFound(format!("requester of {}", request.id)))?;

        let operator = self.backend.fetch_profile(&operator_id).await?;
        if !operator.role.is_operator() {
            return Err(ArenaError::Rejected("Only uplines can process requests".into()).into());
        }
        let requester = self.backend.fetch_profile(requester_id).await?;

        let action = match (resolution, request.kind) {
            (Resolution::Reject, _) => "REJECT_REQUEST",
            (Resolution::Approve, RequestKind::CashIn) => "APPROVE_CASH_IN",
            (Resolution::Approve, RequestKind::CashOut) => "APPROVE_CASH_OUT",
        };

        if resolution == Resolution::Approve {
            let payer = match request.kind {
                RequestKind::CashIn => &operator,
                RequestKind::CashOut => &requester,
            };
            if payer.balance < request.amount {
                return Err(ArenaError::from(ValidationError::InsufficientBalance).into());
            }
        }

        self.backend
            .set_request_status(&request.id, resolution.status())
            .await
            .context("Failed to update request")?;

        if resolution == Resolution::Approve {
            let (from, to, kind) = match request.kind {
                RequestKind::CashIn => (&operator, &requester, TransactionKind::Load),
                RequestKind::CashOut => (&requester, &operator, TransactionKind::Withdraw),
            };
            let debited = self
                .backend
                .set_balance(&from.id, from.balance - request.amount)
                .await
                .context("Failed to debit sender balance")?;
            let credited = self
                .backend
                .set_balance(&to.id, to.balance + request.amount)
                .await
                .context("Failed to credit recipient balance")?;
            self.record(&from.id, &to.id, request.amount, kind).await;

            let own = if debited.id == operator_id { debited } else { credited };
            self.store.send(Command::ProfileChanged(own)).await?;
        }

        self.log_action(
            &operator_id,
            action,
            &requester,
            json!({
                "requestId": request.id,
                "kind": request.kind.as_str(),
                "amount": request.amount,
            }),
        )
        .await;

        info!(
            request_id = %request.id,
            requester = %requester.username,
            amount = %request.amount,
            action,
            "Request processed"
        );
        Ok(())
    }

    async fn record(&self, sender: &str, receiver: &str, amount: Decimal, kind: TransactionKind) {
        let tx = NewTransaction {
            sender_id: Some(sender.to_string()),
            receiver_id: Some(receiver.to_string()),
            amount,
            kind,
        };
        if let Err(e) = self.backend.insert_transaction(&tx).await {
            warn!(error = %e, kind = ?kind, "Failed to record transaction");
        }
    }

    async fn log_action(
        &self,
        admin_id: &str,
        action: &str,
        target: &Profile,
        details: serde_json::Value,
    ) {
        let log = NewAdminLog {
            admin_id: admin_id.to_string(),
            action_type: action.to_string(),
            target_id: Some(target.id.clone()),
            target_name: Some(target.username.clone()),
            details,
        };
        if let Err(e) = self.backend.insert_admin_log(&log).await {
            warn!(error = %e, action, "Failed to write admin log");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
