//! Polling change source.
//!
//! Stands in for the backend's push feed: on every tick it fetches the
//! current match, that match's bets and (optionally) one profile and the
//! app settings, diffs them against the previous tick and publishes the
//! differences to the [`Hub`]. The first successful poll only primes the
//! baseline.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Change, Hub, RealtimeEvent, Table};
use crate::backend::Backend;
use crate::types::{AppSetting, Bet, Match, Profile};

pub struct PollingSource {
    backend: Arc<dyn Backend>,
    hub: Hub,
    interval: Duration,
    watched_profile: Option<String>,
    watch_settings: bool,
    last_match: Option<Match>,
    last_bets: HashMap<String, Bet>,
    last_profile: Option<Profile>,
    last_settings: HashMap<String, AppSetting>,
    primed: bool,
    healthy: bool,
}

impl PollingSource {
    pub fn new(backend: Arc<dyn Backend>, hub: Hub, interval: Duration) -> Self {
        Self {
            backend,
            hub,
            interval,
            watched_profile: None,
            watch_settings: false,
            last_match: None,
            last_bets: HashMap::new(),
            last_profile: None,
            last_settings: HashMap::new(),
            primed: false,
            healthy: true,
        }
    }

    /// Also watch one profile row (the signed-in user's).
    pub fn watch_profile(mut self, user_id: &str) -> Self {
        self.watched_profile = Some(user_id.to_string());
        self
    }

    /// Also watch the `app_settings` rows.
    pub fn watch_settings(mut self) -> Self {
        self.watch_settings = true;
        self
    }

    pub fn watched_profile(&self) -> Option<&str> {
        self.watched_profile.as_deref()
    }

    /// Poll until the task is dropped or aborted.
    pub async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "Polling change source started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One poll, including connection-state transitions. Returns the number
    /// of change events published.
    pub async fn tick(&mut self) -> usize {
        match self.poll_once().await {
            Ok(changes) => {
                if !self.healthy {
                    info!("Change source recovered");
                    self.healthy = true;
                    self.hub.publish(RealtimeEvent::Resubscribed);
                }
                let count = changes.len();
                for change in changes {
                    self.hub.publish(RealtimeEvent::EntityChanged(change));
                }
                count
            }
            Err(e) => {
                if self.healthy {
                    warn!(error = %e, "Poll failed, marking connection lost");
                    self.healthy = false;
                    self.hub.publish(RealtimeEvent::ConnectionLost);
                } else {
                    debug!(error = %e, "Poll still failing");
                }
                0
            }
        }
    }

    /// Fetch and diff without publishing.
    async fn poll_once(&mut self) -> Result<Vec<Change>> {
        let current = self.backend.current_match().await?;
        let bets = match &current {
            Some(m) => self.backend.match_bets(&m.id).await?,
            None => Vec::new(),
        };
        let profile = match &self.watched_profile {
            Some(user_id) => Some(self.backend.fetch_profile(user_id).await?),
            None => None,
        };
        let settings = if self.watch_settings {
            self.backend.app_settings().await?
        } else {
            Vec::new()
        };

        let mut changes = Vec::new();
        if self.primed {
            diff_match(self.last_match.as_ref(), current.as_ref(), &mut changes);
            let match_id = current.as_ref().map(|m| m.id.as_str());
            diff_bets(&self.last_bets, &bets, match_id, &mut changes);
            if let (Some(old), Some(new)) = (&self.last_profile, &profile) {
                if old != new {
                    changes.push(Change::update(Table::Profiles, to_row(old), to_row(new)));
                }
            }
            diff_settings(&self.last_settings, &settings, &mut changes);
        }

        self.last_match = current;
        self.last_bets = bets.into_iter().map(|b| (b.id.clone(), b)).collect();
        self.last_profile = profile;
        self.last_settings = settings.into_iter().map(|s| (s.key.clone(), s)).collect();
        self.primed = true;
        Ok(changes)
    }
}

fn to_row<T: Serialize>(record: &T) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

fn diff_match(old: Option<&Match>, new: Option<&Match>, out: &mut Vec<Change>) {
    match (old, new) {
        (None, Some(new)) => out.push(Change::insert(Table::Matches, to_row(new))),
        (Some(old), None) => out.push(Change::delete(Table::Matches, to_row(old))),
        (Some(old), Some(new)) if old.id != new.id => {
            out.push(Change::insert(Table::Matches, to_row(new)))
        }
        (Some(old), Some(new)) if old != new => {
            out.push(Change::update(Table::Matches, to_row(old), to_row(new)))
        }
        _ => {}
    }
}

/// Bets are only compared within the match being polled; when the match
/// changes every new bet shows up as an insert and the old match's bets
/// are not reported as deleted.
fn diff_bets(
    old: &HashMap<String, Bet>,
    new: &[Bet],
    match_id: Option<&str>,
    out: &mut Vec<Change>,
) {
    for bet in new {
        match old.get(&bet.id) {
            None => out.push(Change::insert(Table::Bets, to_row(bet))),
            Some(prev) if prev != bet => {
                out.push(Change::update(Table::Bets, to_row(prev), to_row(bet)))
            }
            _ => {}
        }
    }
    for (id, prev) in old {
        if match_id == Some(prev.match_id.as_str()) && !new.iter().any(|b| &b.id == id) {
            out.push(Change::delete(Table::Bets, to_row(prev)));
        }
    }
}

/// Settings rows are only ever upserted, so removals are not reported.
fn diff_settings(old: &HashMap<String, AppSetting>, new: &[AppSetting], out: &mut Vec<Change>) {
    for row in new {
        match old.get(&row.key) {
            None => out.push(Change::insert(Table::AppSettings, to_row(row))),
            Some(prev) if prev.value != row.value => {
                out.push(Change::update(Table::AppSettings, to_row(prev), to_row(row)))
            }
            _ => {}
        }
    }
}
