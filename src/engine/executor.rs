//! Bet executor.
//!
//! Client-side soft gates for a bet, the confirmation rule, and the
//! insert-then-refresh sequence. The backend stays the authority on every
//! gate; these only spare the user a round trip.

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::session::{Command, StoreHandle};
use crate::backend::Backend;
use crate::config::BettingConfig;
use crate::storage::UserPreferences;
use crate::types::{ArenaError, Match, NewBet, Selection, ValidationError};

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

/// Check a bet before sending it. The first failing gate wins.
pub fn validate_bet(
    current: &Match,
    selection: Selection,
    amount: Decimal,
    balance: Decimal,
    config: &BettingConfig,
) -> Result<(), ValidationError> {
    if !current.status.accepts_bets() {
        return Err(ValidationError::BettingClosed);
    }
    if amount <= Decimal::ZERO {
        return Err(ValidationError::InvalidAmount);
    }
    if amount < config.min_bet {
        return Err(ValidationError::BelowMinimum { min: config.min_bet });
    }
    if selection == Selection::Draw && amount > config.draw_max_bet {
        return Err(ValidationError::DrawCapExceeded { max: config.draw_max_bet });
    }
    if balance < amount {
        return Err(ValidationError::InsufficientBalance);
    }
    Ok(())
}

/// Whether the user must confirm before the bet is sent.
pub fn requires_confirmation(
    prefs: &UserPreferences,
    amount: Decimal,
    config: &BettingConfig,
) -> bool {
    !prefs.quick_bet || (prefs.confirm_bets && amount >= config.confirm_threshold)
}

// ---------------------------------------------------------------------------
// Double-submit guard
// ---------------------------------------------------------------------------

/// One submission at a time per flow.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicBool>);

/// Held for the duration of a submission; releases on drop, including on
/// error paths.
#[derive(Debug)]
pub struct InFlightGuard(Arc<AtomicBool>);

impl InFlight {
    pub fn try_acquire(&self) -> Result<InFlightGuard, ValidationError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlightGuard(self.0.clone()))
            .map_err(|_| ValidationError::AlreadySubmitting)
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BetReceipt {
    pub match_id: String,
    pub selection: Selection,
    pub amount: Decimal,
    /// Balance after the refresh, when the refresh succeeded.
    pub balance_after: Option<Decimal>,
}

pub struct BetExecutor {
    backend: Arc<dyn Backend>,
    store: StoreHandle,
    config: BettingConfig,
    in_flight: InFlight,
}

impl BetExecutor {
    pub fn new(backend: Arc<dyn Backend>, store: StoreHandle, config: BettingConfig) -> Self {
        Self {
            backend,
            store,
            config,
            in_flight: InFlight::default(),
        }
    }

    pub fn config(&self) -> &BettingConfig {
        &self.config
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.is_busy()
    }

    /// Place a bet on `current`. Confirmation, if required, is the
    /// caller's job and must happen before this call.
    pub async fn place(
        &self,
        current: &Match,
        selection: Selection,
        amount: Decimal,
    ) -> Result<BetReceipt> {
        let _guard = self.in_flight.try_acquire().map_err(ArenaError::from)?;

        let state = self.store.snapshot();
        let user_id = state.user_id().ok_or(ArenaError::NotSignedIn)?.to_string();
        let balance = match &state.profile {
            Some(p) => p.balance,
            None => self.backend.fetch_profile(&user_id).await?.balance,
        };

        validate_bet(current, selection, amount, balance, &self.config)
            .map_err(ArenaError::from)?;

        let bet = NewBet {
            user_id: user_id.clone(),
            match_id: current.id.clone(),
            amount,
            selection,
        };
        self.backend
            .insert_bet(&bet)
            .await
            .context("Failed to place bet")?;

        info!(
            match_id = %current.id,
            selection = %selection,
            amount = %amount,
            "Bet placed"
        );

        let balance_after = match self.backend.fetch_profile(&user_id).await {
            Ok(profile) => {
                let balance = profile.balance;
                self.store.send(Command::ProfileChanged(profile)).await?;
                Some(balance)
            }
            Err(e) => {
                warn!(error = %e, "Bet placed but profile refresh failed");
                None
            }
        };

        Ok(BetReceipt {
            match_id: current.id.clone(),
            selection,
            amount,
            balance_after,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
