//! Application state store.
//!
//! One task owns [`AppState`]. Everything else sends [`Command`]s through
//! a [`StoreHandle`] and reads snapshots from a `watch` channel, so there
//! is never more than one writer.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::backend::auth::SessionInfo;
use crate::types::Profile;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppState {
    pub session: Option<SessionInfo>,
    pub profile: Option<Profile>,
    pub connected: bool,
}

impl AppState {
    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user_id.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    SignedIn {
        session: SessionInfo,
        profile: Option<Profile>,
    },
    ProfileChanged(Profile),
    SignedOut,
    ConnectionLost,
    Reconnected,
}

/// Apply one command. Returns whether the state changed.
pub fn apply(state: &mut AppState, command: Command) -> bool {
    match command {
        Command::SignedIn { session, profile } => {
            let profile = profile.filter(|p| p.id == session.user_id);
            state.session = Some(session);
            state.profile = profile;
            state.connected = true;
            true
        }
        Command::ProfileChanged(profile) => {
            if state.user_id() != Some(profile.id.as_str()) {
                debug!(profile_id = %profile.id, "Ignoring profile update for another user");
                return false;
            }
            if state.profile.as_ref() == Some(&profile) {
                return false;
            }
            state.profile = Some(profile);
            true
        }
        Command::SignedOut => {
            let changed = state.session.is_some() || state.profile.is_some();
            state.session = None;
            state.profile = None;
            changed
        }
        Command::ConnectionLost => std::mem::replace(&mut state.connected, false),
        Command::Reconnected => !std::mem::replace(&mut state.connected, true),
    }
}

/// A queued command, with an optional reply once it has been applied.
type Envelope = (Command, Option<oneshot::Sender<bool>>);

#[derive(Clone)]
pub struct StoreHandle {
    commands: mpsc::Sender<Envelope>,
    state: watch::Receiver<AppState>,
}

impl StoreHandle {
    /// Queue a command. The state may not reflect it yet when this returns.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send((command, None))
            .await
            .context("State store has shut down")
    }

    /// Queue a command and wait until the store has applied it. Returns
    /// whether the state changed; snapshots taken afterwards include it.
    pub async fn commit(&self, command: Command) -> Result<bool> {
        let (ack, applied) = oneshot::channel();
        self.commands
            .send((command, Some(ack)))
            .await
            .context("State store has shut down")?;
        applied.await.context("State store dropped the command")
    }

    pub fn snapshot(&self) -> AppState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AppState> {
        self.state.clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.borrow().user_id().map(str::to_string)
    }
}

/// Spawn the store task. It exits once every handle is dropped.
pub fn spawn_store() -> StoreHandle {
    let (commands, mut rx) = mpsc::channel::<Envelope>(64);
    let (tx, state) = watch::channel(AppState::default());

    tokio::spawn(async move {
        while let Some((command, ack)) = rx.recv().await {
            let label = command_label(&command);
            let changed = tx.send_if_modified(|state| apply(state, command));
            if changed {
                debug!(command = label, "State updated");
            }
            if let Some(ack) = ack {
                let _ = ack.send(changed);
            }
        }
        info!("State store stopped");
    });

    StoreHandle { commands, state }
}

fn command_label(command: &Command) -> &'static str {
    match command {
        Command::SignedIn { .. } => "signed_in",
        Command::ProfileChanged(_) => "profile_changed",
        Command::SignedOut => "signed_out",
        Command::ConnectionLost => "connection_lost",
        Command::Reconnected => "reconnected",
    }
}
