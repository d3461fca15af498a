//! ARENA: live match wagering client
//!
//! Entry point. Loads configuration, initialises structured logging,
//! signs in, wires the change stream into the dispatcher and serves the
//! live board until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use arena::backend::auth::{AuthClient, Session};
use arena::backend::rest::RestBackend;
use arena::backend::Backend;
use arena::config::{self, AppConfig};
use arena::dashboard::{self, routes::DashboardState};
use arena::engine::{self, dispatcher::Dispatcher};
use arena::engine::session::{spawn_store, Command, StoreHandle};
use arena::llm::openrouter::OpenRouterClient;
use arena::llm::SupportChat;
use arena::odds::OddsEngine;
use arena::realtime::Hub;
use arena::storage;

const BANNER: &str = r#"
    _    ____  _____ _   _    _
   / \  |  _ \| ____| \ | |  / \
  / _ \ | |_) |  _| |  \| | / _ \
 / ___ \|  _ <| |___| |\  |/ ___ \
/_/   \_\_| \_\_____|_| \_/_/   \_\

  Live pari-mutuel match client
  v0.1.0
"#;

/// How often the session expiry is checked.
const SESSION_CHECK_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        client_name = %cfg.client.name,
        backend = %cfg.backend.url,
        poll_interval_secs = cfg.client.poll_interval_secs,
        "ARENA starting up"
    );

    // -- Backend and session ---------------------------------------------

    let rest = Arc::new(RestBackend::new(
        &cfg.backend.url,
        AppConfig::resolve_secret(&cfg.backend.anon_key_env)?,
        &cfg.backend.proof_bucket,
    )?);
    let backend: Arc<dyn Backend> = rest.clone();
    let auth = AuthClient::new(
        &cfg.backend.url,
        AppConfig::resolve_secret(&cfg.backend.anon_key_env)?,
    )?;

    let store = spawn_store();
    let mut session = sign_in(&cfg, &auth, &rest, backend.as_ref(), &store).await;
    if session.is_none() {
        info!("Running as a spectator (no credentials)");
    }

    let prefs = storage::load_preferences(cfg.client.preferences_path.as_deref())
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load preferences, using defaults");
            storage::UserPreferences::default()
        });
    info!(odds_format = %prefs.odds_format, quick_bet = prefs.quick_bet, "Preferences loaded");

    // -- Change stream and dispatcher ------------------------------------

    let hub = Hub::default();
    let user_id = session.as_ref().map(|s| s.user_id.clone());
    let (subscription, source) = engine::change_feed(
        backend.clone(),
        &hub,
        Duration::from_secs(cfg.client.poll_interval_secs.max(1)),
        user_id.as_deref(),
    );
    tokio::spawn(source.run());

    let odds = OddsEngine::new(cfg.odds);
    let (dispatcher, mut notices, board) =
        Dispatcher::new(backend.clone(), store.clone(), odds, prefs);
    tokio::spawn(dispatcher.run(subscription));

    // -- Dashboard -------------------------------------------------------

    if cfg.dashboard.enabled {
        let mut state = DashboardState::new(board, store.watch(), odds, cfg.dashboard.odds_format);
        if let Some(support) = support_chat(&cfg, backend.clone()) {
            state = state.with_support(Arc::new(support));
        }
        dashboard::spawn_dashboard(Arc::new(state), cfg.dashboard.port);
    }

    // -- Main loop -------------------------------------------------------

    let mut session_check = tokio::time::interval(Duration::from_secs(SESSION_CHECK_SECS));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            Some(notice) = notices.recv() => {
                info!(notice = %notice, "Notice");
            }
            _ = session_check.tick() => {
                let due = session
                    .as_ref()
                    .filter(|s| s.needs_refresh(chrono::Utc::now()));
                let refreshed = match due {
                    Some(current) => Some(auth.refresh(current).await),
                    None => None,
                };
                match refreshed {
                    Some(Ok(next)) => {
                        install(&rest, &store, &next).await;
                        session = Some(next);
                    }
                    Some(Err(e)) => error!(error = %e, "Session refresh failed"),
                    None => {}
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    if let Some(current) = &session {
        if let Err(e) = auth.sign_out(current).await {
            warn!(error = %e, "Sign-out failed");
        }
        if let Err(e) = store.send(Command::SignedOut).await {
            warn!(error = %e, "Failed to clear session state");
        }
    }
    info!(subscribers = hub.subscriber_count(), "ARENA shut down cleanly.");

    Ok(())
}

/// Sign in with the configured credentials, when both are set.
async fn sign_in(
    cfg: &AppConfig,
    auth: &AuthClient,
    rest: &RestBackend,
    backend: &dyn Backend,
    store: &StoreHandle,
) -> Option<Session> {
    let identity = AppConfig::resolve_env(&cfg.client.identity_env).ok()?;
    let password = AppConfig::resolve_secret(&cfg.client.password_env).ok()?;

    match auth.sign_in(backend, &identity, &password).await {
        Ok(session) => {
            install(rest, store, &session).await;
            Some(session)
        }
        Err(e) => {
            error!(error = %e, "Sign-in failed");
            None
        }
    }
}

/// Install a (new or refreshed) session: token on the backend, profile in
/// the store.
async fn install(rest: &RestBackend, store: &StoreHandle, session: &Session) {
    use secrecy::{ExposeSecret, SecretString};

    let token = SecretString::new(session.access_token.expose_secret().clone());
    rest.set_access_token(Some(token)).await;

    let profile = match rest.fetch_profile(&session.user_id).await {
        Ok(p) => {
            info!(profile = %p, "Profile loaded");
            Some(p)
        }
        Err(e) => {
            warn!(error = %e, "Signed in but profile fetch failed");
            None
        }
    };
    let command = Command::SignedIn { session: session.info(), profile };
    if let Err(e) = store.commit(command).await {
        error!(error = %e, "Failed to record session");
    }
}

/// The support assistant, when enabled and keyed.
fn support_chat(cfg: &AppConfig, backend: Arc<dyn Backend>) -> Option<SupportChat> {
    if !cfg.support.enabled {
        return None;
    }
    let key = match AppConfig::resolve_secret(&cfg.support.api_key_env) {
        Ok(k) => k,
        Err(e) => {
            warn!(error = %e, "Support chat enabled but no API key, disabling");
            return None;
        }
    };
    match OpenRouterClient::new(
        key,
        Some(cfg.support.model.clone()),
        Some(cfg.support.max_tokens),
        Some(cfg.support.temperature),
    ) {
        Ok(client) => {
            info!(model = %cfg.support.model, "Support chat enabled");
            let knowledge = cfg.support.knowledge.clone();
            Some(SupportChat::new(Arc::new(client), backend, knowledge))
        }
        Err(e) => {
            error!(error = %e, "Failed to build support chat client");
            None
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arena=info"));

    if std::env::var("ARENA_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
