//! Persistence layer.
//!
//! Saves and loads user preferences to/from a JSON file. Everything else
//! the client shows is owned by the backend and refetched on start.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::odds::OddsFormat;

/// Default preferences file path.
const DEFAULT_PREFERENCES_FILE: &str = "arena_preferences.json";

/// Per-user display and alert preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub odds_format: OddsFormat,
    /// Skip the confirmation step for ordinary bets.
    pub quick_bet: bool,
    /// With quick bet on, still confirm large bets.
    pub confirm_bets: bool,
    pub match_alerts: bool,
    pub payout_alerts: bool,
    pub wallet_alerts: bool,
    pub sound_effects: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            odds_format: OddsFormat::Decimal,
            quick_bet: false,
            confirm_bets: true,
            match_alerts: true,
            payout_alerts: true,
            wallet_alerts: true,
            sound_effects: true,
        }
    }
}

/// Save preferences to a JSON file.
pub fn save_preferences(prefs: &UserPreferences, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_PREFERENCES_FILE);
    let json = serde_json::to_string_pretty(prefs)
        .context("Failed to serialise preferences")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write preferences to {path}"))?;

    debug!(path, odds_format = %prefs.odds_format, "Preferences saved");
    Ok(())
}

/// Load preferences from a JSON file.
/// A missing file yields the defaults.
pub fn load_preferences(path: Option<&str>) -> Result<UserPreferences> {
    let path = path.unwrap_or(DEFAULT_PREFERENCES_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved preferences, using defaults");
        return Ok(UserPreferences::default());
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read preferences from {path}"))?;

    let prefs: UserPreferences = serde_json::from_str(&json)
        .context(format!("Failed to parse preferences from {path}"))?;

    info!(
        path,
        odds_format = %prefs.odds_format,
        quick_bet = prefs.quick_bet,
        "Preferences loaded"
    );
    Ok(prefs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
