//! Core engine: live state, notices and user/operator flows.
//!
//! - `session`: single-owner application state store
//! - `aggregator`: live pool totals for the displayed match
//! - `dispatcher`: the one realtime consumer; notices and board snapshots
//! - `executor`: bet gates and placement
//! - `accountant`: cash in/out, upline request processing, transfers, PIN
//! - `account`: bet history and the user's own profile details
//! - `downline`: account approval and bans for recruiters
//! - `console`: operator match lifecycle, admin log, stream settings

pub mod session;
pub mod aggregator;
pub mod dispatcher;
pub mod executor;
pub mod accountant;
pub mod account;
pub mod downline;
pub mod console;

use std::sync::Arc;
use std::time::Duration;

use crate::backend::Backend;
use crate::realtime::poll::PollingSource;
use crate::realtime::{Hub, Subscription};
use dispatcher::Dispatcher;

/// The change feed for one client: the dispatcher's subscription and the
/// poller that feeds it. A signed-in user also gets their profile row
/// watched, which is what drives wallet notices.
///
/// Subscribe before the poller starts so no change is missed.
pub fn change_feed(
    backend: Arc<dyn Backend>,
    hub: &Hub,
    interval: Duration,
    user_id: Option<&str>,
) -> (Subscription, PollingSource) {
    let subscription = hub.subscribe(Dispatcher::filters(user_id));
    let mut source = PollingSource::new(backend, hub.clone(), interval).watch_settings();
    if let Some(uid) = user_id {
        source = source.watch_profile(uid);
    }
    (subscription, source)
}
