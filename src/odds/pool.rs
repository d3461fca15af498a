//! Per-outcome stake totals.

use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

use crate::types::{Bet, Selection};

/// Cumulative stake per outcome for one match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolTotals {
    pub meron: Decimal,
    pub wala: Decimal,
    pub draw: Decimal,
}

impl PoolTotals {
    pub fn new(meron: Decimal, wala: Decimal, draw: Decimal) -> Self {
        Self { meron, wala, draw }
    }

    pub fn side(&self, selection: Selection) -> Decimal {
        match selection {
            Selection::Meron => self.meron,
            Selection::Wala => self.wala,
            Selection::Draw => self.draw,
        }
    }

    pub fn add(&mut self, selection: Selection, amount: Decimal) {
        match selection {
            Selection::Meron => self.meron += amount,
            Selection::Wala => self.wala += amount,
            Selection::Draw => self.draw += amount,
        }
    }

    /// The pool the two-sided odds are computed against (draw excluded).
    pub fn two_sided(&self) -> Decimal {
        self.meron + self.wala
    }

    pub fn total(&self) -> Decimal {
        self.meron + self.wala + self.draw
    }

    pub fn is_empty(&self) -> bool {
        self.total().is_zero()
    }

    pub fn side_f64(&self, selection: Selection) -> f64 {
        self.side(selection).to_f64().unwrap_or(0.0)
    }

    pub fn two_sided_f64(&self) -> f64 {
        self.two_sided().to_f64().unwrap_or(0.0)
    }

    /// Fold player-visible stakes for `match_id`.
    ///
    /// Skips house bets, cancelled bets and records of other matches.
    pub fn fold<'a>(bets: impl IntoIterator<Item = &'a Bet>, match_id: &str) -> Self {
        let mut totals = PoolTotals::default();
        for bet in bets {
            if bet.match_id != match_id || bet.is_bot || !bet.status.counts_toward_pool() {
                continue;
            }
            totals.add(bet.selection, bet.amount);
        }
        totals
    }

    /// Fold every match's stakes, house bets included (operator view).
    pub fn fold_all<'a>(bets: impl IntoIterator<Item = &'a Bet>) -> HashMap<String, PoolTotals> {
        let mut by_match: HashMap<String, PoolTotals> = HashMap::new();
        for bet in bets {
            if !bet.status.counts_toward_pool() {
                continue;
            }
            by_match
                .entry(bet.match_id.clone())
                .or_default()
                .add(bet.selection, bet.amount);
        }
        by_match
    }
}
