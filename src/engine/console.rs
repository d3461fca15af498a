//! Operator match console.
//!
//! Match lifecycle commands (create, status, winner, delete, cancel),
//! house liquidity and the per-match pool view. Lifecycle transitions
//! and payouts are enforced by the backend; failures carry its text.
//!
//! Also the admin-only extras: the admin log and the stream settings
//! every client's player follows.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::session::StoreHandle;
use crate::backend::Backend;
use crate::odds::PoolTotals;
use crate::types::{
    AdminLog, ArenaError, Match, MatchPatch, MatchStatus, NewAdminLog, NewMatch, Selection,
    StreamSetting, StreamSettings, ValidationError,
};

pub struct Console {
    backend: Arc<dyn Backend>,
    store: StoreHandle,
}

impl Console {
    pub fn new(backend: Arc<dyn Backend>, store: StoreHandle) -> Self {
        Self { backend, store }
    }

    /// The signed-in admin's id.
    fn operator(&self) -> Result<String> {
        let state = self.store.snapshot();
        let user_id = state.user_id().ok_or(ArenaError::NotSignedIn)?.to_string();
        match &state.profile {
            Some(p) if p.role.can_run_console() => Ok(user_id),
            _ => Err(ArenaError::Rejected("Only admins can run the match console".into()).into()),
        }
    }

    pub async fn list_matches(&self) -> Result<Vec<Match>> {
        self.backend.list_matches().await
    }

    pub async fn create_match(
        &self,
        meron_name: &str,
        wala_name: &str,
        fight_id: Option<&str>,
    ) -> Result<Match> {
        self.operator()?;
        let (meron, wala) = (meron_name.trim(), wala_name.trim());
        if meron.is_empty() || wala.is_empty() {
            return Err(ArenaError::from(ValidationError::MissingContestants).into());
        }

        let created = self
            .backend
            .create_match(&NewMatch {
                meron_name: meron.to_string(),
                wala_name: wala.to_string(),
                fight_id: fight_id.map(str::trim).filter(|f| !f.is_empty()).map(str::to_string),
                status: MatchStatus::Open,
            })
            .await
            .context("Error creating match")?;

        info!(match_id = %created.id, "{created}");
        Ok(created)
    }

    pub async fn set_status(&self, match_id: &str, status: MatchStatus) -> Result<()> {
        self.operator()?;
        self.backend
            .update_match(match_id, &MatchPatch { status: Some(status), ..MatchPatch::default() })
            .await
            .context("Error updating status")?;
        info!(match_id, status = %status, "Match status updated");
        Ok(())
    }

    /// Finish the match with a winner; the backend settles the bets.
    pub async fn declare_winner(&self, target: &Match, winner: Selection) -> Result<()> {
        let admin_id = self.operator()?;
        self.backend
            .update_match(
                &target.id,
                &MatchPatch {
                    status: Some(MatchStatus::Finished),
                    winner: Some(winner),
                },
            )
            .await
            .context("Error declaring winner")?;

        info!(match_id = %target.id, winner = %winner, "Winner declared");
        self.log_action(&admin_id, "DECLARE_WINNER", target, json!({ "winner": winner }))
            .await;
        Ok(())
    }

    /// Only succeeds while the match has no bets.
    pub async fn delete_match(&self, match_id: &str) -> Result<()> {
        self.operator()?;
        self.backend
            .delete_match(match_id)
            .await
            .context("Error deleting match (matches with bets cannot be deleted)")?;
        info!(match_id, "Match deleted");
        Ok(())
    }

    /// Cancel and refund every bet.
    pub async fn cancel_match(&self, target: &Match) -> Result<()> {
        let admin_id = self.operator()?;
        self.backend
            .cancel_match(&target.id)
            .await
            .context("Failed to cancel match")?;

        info!(match_id = %target.id, "Match cancelled, bets refunded");
        self.log_action(
            &admin_id,
            "CANCEL_MATCH",
            target,
            json!({ "previousStatus": target.status }),
        )
        .await;
        Ok(())
    }

    /// House liquidity on one side.
    pub async fn place_house_bet(
        &self,
        match_id: &str,
        selection: Selection,
        amount: Decimal,
    ) -> Result<()> {
        self.operator()?;
        if amount <= Decimal::ZERO {
            return Err(ArenaError::from(ValidationError::InvalidAmount).into());
        }
        self.backend
            .place_house_bet(match_id, selection, amount)
            .await
            .context("House bet failed")?;
        info!(match_id, selection = %selection, amount = %amount, "House bet placed");
        Ok(())
    }

    /// Totals per match across every non-cancelled bet, house included.
    pub async fn pool_totals(&self) -> Result<HashMap<String, PoolTotals>> {
        let bets = self.backend.active_bets().await?;
        Ok(PoolTotals::fold_all(&bets))
    }

    /// Most recent admin actions, newest first.
    pub async fn admin_logs(&self, limit: u32) -> Result<Vec<AdminLog>> {
        self.operator()?;
        self.backend.admin_logs(limit).await.context("Failed to load admin logs")
    }

    /// Current stream settings; missing rows fall back to the defaults.
    pub async fn stream_settings(&self) -> Result<StreamSettings> {
        let rows = self.backend.app_settings().await?;
        Ok(StreamSettings::from_rows(&rows))
    }

    /// Change the live stream. Every connected client picks it up from
    /// the settings feed.
    pub async fn set_stream(&self, setting: StreamSetting, value: &str) -> Result<()> {
        let admin_id = self.operator()?;
        let value = value.trim();
        if value.is_empty() {
            return Err(ArenaError::from(ValidationError::EmptySetting).into());
        }
        self.backend
            .upsert_setting(setting.key(), value)
            .await
            .context("Failed to save stream setting")?;

        info!(key = setting.key(), value, "Stream setting updated");
        self.write_log(NewAdminLog {
            admin_id,
            action_type: "UPDATE_STREAM".to_string(),
            target_id: None,
            target_name: Some(setting.key().to_string()),
            details: json!({ "key": setting.key(), "value": value }),
        })
        .await;
        Ok(())
    }

    async fn log_action(
        &self,
        admin_id: &str,
        action: &str,
        target: &Match,
        details: serde_json::Value,
    ) {
        self.write_log(NewAdminLog {
            admin_id: admin_id.to_string(),
            action_type: action.to_string(),
            target_id: Some(target.id.clone()),
            target_name: Some(format!("{} vs {}", target.meron_name, target.wala_name)),
            details,
        })
        .await;
    }

    async fn write_log(&self, log: NewAdminLog) {
        if let Err(e) = self.backend.insert_admin_log(&log).await {
            warn!(error = %e, action = %log.action_type, "Failed to write admin log");
        }
    }
}
