//! Downline management for recruiters.
//!
//! Agents and master agents approve or ban the accounts registered
//! under their referral code. Admins may act on any account.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::session::StoreHandle;
use crate::backend::Backend;
use crate::types::{ArenaError, NewAdminLog, Profile, ProfileStatus, Role};

pub struct Downline {
    backend: Arc<dyn Backend>,
    store: StoreHandle,
}

impl Downline {
    pub fn new(backend: Arc<dyn Backend>, store: StoreHandle) -> Self {
        Self { backend, store }
    }

    /// The signed-in recruiter.
    fn recruiter(&self) -> Result<Profile> {
        let state = self.store.snapshot();
        state.user_id().ok_or(ArenaError::NotSignedIn)?;
        match state.profile {
            Some(p) if p.role.can_manage_downline() => Ok(p),
            _ => Err(ArenaError::Rejected("Only agents can manage a downline".into()).into()),
        }
    }

    /// Every account the signed-in recruiter registered.
    pub async fn members(&self) -> Result<Vec<Profile>> {
        let recruiter = self.recruiter()?;
        self.backend
            .downline_profiles(&recruiter.id)
            .await
            .context("Failed to load downline")
    }

    /// Registrations still waiting for approval.
    pub async fn pending(&self) -> Result<Vec<Profile>> {
        let mut members = self.members().await?;
        members.retain(|p| p.status == ProfileStatus::Pending);
        Ok(members)
    }

    pub async fn approve(&self, member: &Profile) -> Result<Profile> {
        self.set_status(member, ProfileStatus::Active, "APPROVE_USER").await
    }

    pub async fn ban(&self, member: &Profile) -> Result<Profile> {
        self.set_status(member, ProfileStatus::Banned, "BAN_USER").await
    }

    async fn set_status(
        &self,
        member: &Profile,
        status: ProfileStatus,
        action: &str,
    ) -> Result<Profile> {
        let recruiter = self.recruiter()?;
        let own = member.created_by.as_deref() == Some(recruiter.id.as_str());
        if !own && recruiter.role != Role::Admin {
            return Err(ArenaError::Rejected("This account is not in your downline".into()).into());
        }
        if member.id == recruiter.id {
            return Err(ArenaError::Rejected("Cannot change your own account status".into()).into());
        }

        let updated = self
            .backend
            .set_profile_status(&member.id, status)
            .await
            .context("Failed to update account status")?;

        info!(member = %member.username, status = %status, "Account status changed");
        let log = NewAdminLog {
            admin_id: recruiter.id,
            action_type: action.to_string(),
            target_id: Some(member.id.clone()),
            target_name: Some(member.username.clone()),
            details: json!({ "previousStatus": member.status, "newStatus": status }),
        };
        if let Err(e) = self.backend.insert_admin_log(&log).await {
            warn!(error = %e, action, "Failed to write admin log");
        }
        Ok(updated)
    }
}
