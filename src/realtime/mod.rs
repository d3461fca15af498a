//! Typed realtime change stream.
//!
//! Every change the client reacts to arrives as a [`RealtimeEvent`] on an
//! in-process [`Hub`]. Producers (the [`poll::PollingSource`] in the
//! binary) publish; consumers hold a filtered [`Subscription`]. Dropping a
//! subscription unsubscribes it.

pub mod poll;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Matches,
    Bets,
    Profiles,
    TransactionRequests,
    AppSettings,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Matches => "matches",
            Table::Bets => "bets",
            Table::Profiles => "profiles",
            Table::TransactionRequests => "transaction_requests",
            Table::AppSettings => "app_settings",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change. `new` is absent for deletes, `old` for inserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub table: Table,
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl Change {
    pub fn insert(table: Table, new: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            new: Some(new),
            old: None,
        }
    }

    pub fn update(table: Table, old: Value, new: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            new: Some(new),
            old: Some(old),
        }
    }

    pub fn delete(table: Table, old: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// Column value from the new row, or the old row for deletes.
    pub fn field(&self, column: &str) -> Option<&Value> {
        self.new
            .as_ref()
            .and_then(|row| row.get(column))
            .or_else(|| self.old.as_ref().and_then(|row| row.get(column)))
    }

    /// String view of a column, numbers rendered as text.
    pub fn field_str(&self, column: &str) -> Option<String> {
        match self.field(column)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    EntityChanged(Change),
    /// The feed stopped delivering; state may be stale.
    ConnectionLost,
    /// The feed is back (or this subscriber missed events). Refetch.
    Resubscribed,
}

/// Which changes a subscription wants.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: Table,
    pub kind: Option<ChangeKind>,
    /// `column = value` row filter.
    pub column: Option<(String, String)>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            kind: None,
            column: None,
        }
    }

    pub fn kind(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.column = Some((column.to_string(), value.to_string()));
        self
    }

    pub fn matches(&self, change: &Change) -> bool {
        if change.table != self.table {
            return false;
        }
        if self.kind.is_some_and(|k| k != change.kind) {
            return false;
        }
        match &self.column {
            Some((column, value)) => change.field_str(column).as_deref() == Some(value.as_str()),
            None => true,
        }
    }
}

/// In-process fan-out of realtime events.
#[derive(Debug, Clone)]
pub struct Hub {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every live subscriber. Returns how many received it.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to changes matching any of `filters`. Connection events
    /// are always delivered.
    pub fn subscribe(&self, filters: Vec<ChangeFilter>) -> Subscription {
        Subscription { rx: self.tx.subscribe(), filters }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<RealtimeEvent>,
    filters: Vec<ChangeFilter>,
}

impl Subscription {
    pub fn filters(&self) -> &[ChangeFilter] {
        &self.filters
    }

    fn wants(&self, change: &Change) -> bool {
        self.filters.iter().any(|f| f.matches(change))
    }

    /// Next relevant event, or `None` once every publisher is gone.
    pub async fn next(&mut self) -> Option<RealtimeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(RealtimeEvent::EntityChanged(change)) => {
                    if self.wants(&change) {
                        return Some(RealtimeEvent::EntityChanged(change));
                    }
                    debug!(table = %change.table, "Change filtered out");
                }
                Ok(other) => return Some(other),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, forcing resubscribe");
                    return Some(RealtimeEvent::Resubscribed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
