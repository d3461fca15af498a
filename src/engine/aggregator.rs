//! Live pool aggregator.
//!
//! Keeps the running per-outcome totals for the match on screen. Any bet
//! change on that match triggers a full refetch-and-refold; there is no
//! incremental arithmetic on change payloads. Each fetch carries the
//! generation it was started under, so a fetch that finishes after the
//! active match changed is dropped instead of mixing two pools.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::odds::PoolTotals;
use crate::realtime::{Change, Table};
use crate::types::Bet;

/// Identifies one in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    match_id: String,
}

impl FetchTicket {
    pub fn match_id(&self) -> &str {
        &self.match_id
    }
}

pub struct LiveAggregator {
    backend: Arc<dyn Backend>,
    active: Option<String>,
    totals: PoolTotals,
    generation: u64,
}

impl LiveAggregator {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            active: None,
            totals: PoolTotals::default(),
            generation: 0,
        }
    }

    pub fn active_match(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn totals(&self) -> PoolTotals {
        self.totals
    }

    /// Point at a different match (or none). Totals are zeroed before the
    /// new match's bets are fetched.
    pub async fn switch_match(&mut self, match_id: Option<&str>) -> Result<()> {
        if self.active.as_deref() == match_id {
            return Ok(());
        }
        self.reset(match_id.map(str::to_string));
        info!(match_id = ?self.active, generation = self.generation, "Aggregator switched match");
        if self.active.is_some() {
            self.refresh().await?;
        }
        Ok(())
    }

    /// Refetch and refold the active match. No-op without one.
    pub async fn refresh(&mut self) -> Result<()> {
        let Some(ticket) = self.begin_fetch() else {
            return Ok(());
        };
        let bets = self.backend.match_bets(&ticket.match_id).await?;
        self.complete_fetch(&ticket, &bets);
        Ok(())
    }

    /// React to one change. Returns whether the totals were refetched.
    pub async fn handle_change(&mut self, change: &Change) -> Result<bool> {
        if change.table != Table::Bets {
            return Ok(false);
        }
        let Some(active) = self.active.as_deref() else {
            return Ok(false);
        };
        if change.field_str("match_id").as_deref() != Some(active) {
            debug!(active, "Ignoring bet change for another match");
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    /// Drop the match scope and zero the totals.
    pub fn teardown(&mut self) {
        self.reset(None);
        debug!(generation = self.generation, "Aggregator torn down");
    }

    pub fn begin_fetch(&self) -> Option<FetchTicket> {
        self.active.as_ref().map(|id| FetchTicket {
            generation: self.generation,
            match_id: id.clone(),
        })
    }

    /// Apply a finished fetch. Returns false when it was stale.
    pub fn complete_fetch(&mut self, ticket: &FetchTicket, bets: &[Bet]) -> bool {
        if ticket.generation != self.generation {
            debug!(
                match_id = %ticket.match_id,
                ticket = ticket.generation,
                current = self.generation,
                "Discarding stale pool fetch"
            );
            return false;
        }
        self.totals = PoolTotals::fold(bets, &ticket.match_id);
        debug!(
            match_id = %ticket.match_id,
            meron = %self.totals.meron,
            wala = %self.totals.wala,
            draw = %self.totals.draw,
            "Pool refolded"
        );
        true
    }

    fn reset(&mut self, active: Option<String>) {
        self.active = active;
        self.totals = PoolTotals::default();
        self.generation += 1;
    }
}
