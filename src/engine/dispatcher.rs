//! Realtime dispatcher.
//!
//! The single consumer of the change stream. It routes each event to the
//! aggregator and the state store, derives user notices (last call,
//! results, wins, wallet movements), follows the stream settings and
//! publishes a fresh [`BoardSnapshot`] after every event.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::aggregator::LiveAggregator;
use super::session::{Command, StoreHandle};
use crate::backend::Backend;
use crate::odds::{OddsBoard, OddsEngine, PoolTotals};
use crate::realtime::{Change, ChangeFilter, ChangeKind, RealtimeEvent, Subscription, Table};
use crate::storage::UserPreferences;
use crate::types::{BetStatus, Match, MatchStatus, Selection, StreamSettings};

/// A balance change this soon after a win notice is the payout itself.
const WIN_SUPPRESSION_WINDOW: Duration = Duration::from_secs(10);

/// How long a finished match's pool stays visible after a win.
const RESULT_REVEAL_WINDOW: Duration = Duration::from_secs(5);

/// Bets refetched for win detection.
const RECENT_BETS: u32 = 10;

const NOTICE_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    LastCall { match_id: String, label: String },
    WinnerDeclared { match_id: String, winner: Selection },
    BetWon { bet_id: String, selection: Selection, payout: Decimal },
    BalanceCredited { amount: Decimal },
    BalanceDebited { amount: Decimal },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::LastCall { label, .. } => write!(f, "LAST CALL! {label}"),
            Notice::WinnerDeclared { winner, .. } => write!(f, "{winner} WINS!"),
            Notice::BetWon { selection, payout, .. } => {
                write!(f, "Match Result: {selection} WINS! You won ₱{payout:.2}!")
            }
            Notice::BalanceCredited { amount } => write!(f, "Wallet credited ₱{amount:.2}"),
            Notice::BalanceDebited { amount } => write!(f, "Wallet debited ₱{amount:.2}"),
        }
    }
}

/// What the board API serves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BoardSnapshot {
    pub current_match: Option<Match>,
    pub totals: PoolTotals,
    pub board: Option<OddsBoard>,
    pub connected: bool,
    pub revealing_result: bool,
    pub stream: StreamSettings,
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    aggregator: LiveAggregator,
    store: StoreHandle,
    odds: OddsEngine,
    prefs: UserPreferences,
    notices: mpsc::Sender<Notice>,
    board: watch::Sender<BoardSnapshot>,
    current: Option<Match>,
    prev_status: Option<MatchStatus>,
    notified_winner: Option<(String, Selection)>,
    /// `None` until the first load, so old wins are never announced.
    my_bets: Option<HashMap<String, BetStatus>>,
    last_win_at: Option<Instant>,
    last_balance: Option<Decimal>,
    stream: StreamSettings,
    connected: bool,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: StoreHandle,
        odds: OddsEngine,
        prefs: UserPreferences,
    ) -> (Self, mpsc::Receiver<Notice>, watch::Receiver<BoardSnapshot>) {
        let (notices, notice_rx) = mpsc::channel(NOTICE_BUFFER);
        let (board, board_rx) = watch::channel(BoardSnapshot::default());
        let dispatcher = Self {
            aggregator: LiveAggregator::new(backend.clone()),
            backend,
            store,
            odds,
            prefs,
            notices,
            board,
            current: None,
            prev_status: None,
            notified_winner: None,
            my_bets: None,
            last_win_at: None,
            last_balance: None,
            stream: StreamSettings::default(),
            connected: true,
        };
        (dispatcher, notice_rx, board_rx)
    }

    /// Filters for the one subscription this dispatcher consumes.
    pub fn filters(user_id: Option<&str>) -> Vec<ChangeFilter> {
        let mut filters = vec![
            ChangeFilter::table(Table::Matches),
            ChangeFilter::table(Table::Bets),
            ChangeFilter::table(Table::AppSettings),
        ];
        if let Some(uid) = user_id {
            filters.push(ChangeFilter::table(Table::Profiles).eq("id", uid));
        }
        filters
    }

    pub fn totals(&self) -> PoolTotals {
        self.aggregator.totals()
    }

    /// Initial load. Nothing seen here produces a win or wallet notice.
    pub async fn bootstrap(&mut self) -> Result<()> {
        let result = self.resync().await;
        self.publish_board();
        result
    }

    /// Consume the subscription until every publisher is gone.
    pub async fn run(mut self, mut subscription: Subscription) {
        if let Err(e) = self.bootstrap().await {
            warn!(error = %e, "Initial load failed, waiting for changes");
        }
        while let Some(event) = subscription.next().await {
            if let Err(e) = self.handle(event).await {
                warn!(error = %e, "Failed to handle realtime event");
            }
        }
        self.aggregator.teardown();
        info!("Dispatcher stopped");
    }

    pub async fn handle(&mut self, event: RealtimeEvent) -> Result<()> {
        let result = match event {
            RealtimeEvent::EntityChanged(change) => match change.table {
                Table::Matches => self.refresh_match().await,
                Table::Bets => {
                    let mine = self.store.user_id().is_some_and(|uid| {
                        change.field_str("user_id").as_deref() == Some(uid.as_str())
                    });
                    // Both refreshes run; a failed pool fetch must not hide a win.
                    let pooled = self.aggregator.handle_change(&change).await.map(|_| ());
                    let own = if mine { self.refresh_my_bets().await } else { Ok(()) };
                    pooled.and(own)
                }
                Table::Profiles => {
                    let mine = self.store.user_id().is_some_and(|uid| {
                        change.field_str("id").as_deref() == Some(uid.as_str())
                    });
                    if mine {
                        self.refresh_profile().await
                    } else {
                        Ok(())
                    }
                }
                Table::AppSettings => self.apply_setting(&change).await,
                Table::TransactionRequests => Ok(()),
            },
            RealtimeEvent::ConnectionLost => {
                self.connected = false;
                self.store.send(Command::ConnectionLost).await
            }
            RealtimeEvent::Resubscribed => {
                self.connected = true;
                match self.store.send(Command::Reconnected).await {
                    Ok(()) => self.resync().await,
                    Err(e) => Err(e),
                }
            }
        };
        self.publish_board();
        result
    }

    async fn resync(&mut self) -> Result<()> {
        self.refresh_match().await?;
        self.aggregator.refresh().await?;
        self.refresh_my_bets().await?;
        self.refresh_profile().await?;
        self.refresh_settings().await;
        Ok(())
    }

    /// Settings failures keep the stream that is already playing.
    async fn refresh_settings(&mut self) {
        match self.backend.app_settings().await {
            Ok(rows) => self.stream = StreamSettings::from_rows(&rows),
            Err(e) => warn!(error = %e, "Failed to load stream settings"),
        }
    }

    async fn apply_setting(&mut self, change: &Change) -> Result<()> {
        if change.kind == ChangeKind::Delete {
            self.refresh_settings().await;
            return Ok(());
        }
        let (Some(key), Some(value)) = (change.field_str("key"), change.field_str("value")) else {
            return Ok(());
        };
        if self.stream.apply(&key, &value) {
            info!(key = %key, "Stream setting changed");
        }
        Ok(())
    }

    async fn refresh_match(&mut self) -> Result<()> {
        let latest = self.backend.current_match().await?;
        let latest_id = latest.as_ref().map(|m| m.id.clone());

        if self.current.as_ref().map(|m| &m.id) != latest_id.as_ref() {
            self.notified_winner = None;
            self.aggregator.switch_match(latest_id.as_deref()).await?;
        }

        let Some(m) = latest else {
            self.current = None;
            return Ok(());
        };

        if m.status == MatchStatus::Open {
            self.notified_winner = None;
        }

        if m.status == MatchStatus::LastCall
            && self.prev_status != Some(MatchStatus::LastCall)
            && self.prefs.match_alerts
        {
            self.emit(Notice::LastCall {
                match_id: m.id.clone(),
                label: format!("{} vs {}", m.meron_name, m.wala_name),
            });
        }

        let mut declared = false;
        if let (MatchStatus::Finished, Some(winner)) = (m.status, m.winner) {
            let key = (m.id.clone(), winner);
            if self.prev_status.is_some() && self.notified_winner.as_ref() != Some(&key) {
                self.notified_winner = Some(key);
                self.emit(Notice::WinnerDeclared { match_id: m.id.clone(), winner });
                declared = true;
            }
        }

        self.prev_status = Some(m.status);
        self.current = Some(m);

        if declared {
            // Settlement lands right after the result; pick it up now.
            self.refresh_my_bets().await?;
            self.refresh_profile().await?;
        }
        Ok(())
    }

    async fn refresh_my_bets(&mut self) -> Result<()> {
        let Some(uid) = self.store.user_id() else {
            return Ok(());
        };
        let bets = self.backend.user_bets(&uid, RECENT_BETS).await?;

        if let Some(previous) = &self.my_bets {
            let won: Vec<_> = bets
                .iter()
                .filter(|b| b.status == BetStatus::Won)
                .filter(|b| previous.get(&b.id).is_some_and(|s| *s != BetStatus::Won))
                .cloned()
                .collect();
            for bet in won {
                if self.prefs.payout_alerts {
                    self.last_win_at = Some(Instant::now());
                    self.emit(Notice::BetWon {
                        bet_id: bet.id.clone(),
                        selection: bet.selection,
                        payout: bet.payout,
                    });
                }
            }
        }

        self.my_bets = Some(bets.into_iter().map(|b| (b.id, b.status)).collect());
        Ok(())
    }

    async fn refresh_profile(&mut self) -> Result<()> {
        let Some(uid) = self.store.user_id() else {
            return Ok(());
        };
        let profile = self.backend.fetch_profile(&uid).await?;
        self.note_balance(profile.balance);
        self.store.send(Command::ProfileChanged(profile)).await
    }

    fn note_balance(&mut self, balance: Decimal) {
        let Some(previous) = self.last_balance.replace(balance) else {
            return;
        };
        let delta = balance - previous;
        if delta.is_zero() || !self.prefs.wallet_alerts {
            return;
        }
        let recent_win = self
            .last_win_at
            .is_some_and(|at| at.elapsed() < WIN_SUPPRESSION_WINDOW);
        if recent_win {
            debug!(%delta, "Balance change covered by win notice");
            return;
        }
        let amount = delta.abs();
        if delta.is_sign_positive() {
            self.emit(Notice::BalanceCredited { amount });
        } else {
            self.emit(Notice::BalanceDebited { amount });
        }
    }

    fn revealing_result(&self) -> bool {
        self.last_win_at
            .is_some_and(|at| at.elapsed() < RESULT_REVEAL_WINDOW)
    }

    fn publish_board(&self) {
        let totals = self.aggregator.totals();
        let revealing = self.revealing_result();
        let board = self.current.as_ref().map(|m| {
            self.odds.board(&totals, m.status, revealing, self.prefs.odds_format)
        });
        let snapshot = BoardSnapshot {
            current_match: self.current.clone(),
            totals,
            board,
            connected: self.connected,
            revealing_result: revealing,
            stream: self.stream.clone(),
            updated_at: Some(Utc::now()),
        };
        self.board.send_replace(snapshot);
    }

    fn emit(&self, notice: Notice) {
        info!(notice = %notice, "Notice");
        if let Err(e) = self.notices.try_send(notice) {
            warn!(error = %e, "Notice dropped");
        }
    }
}
