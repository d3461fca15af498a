//! The signed-in user's own records: paged bet history and contact
//! details. Password changes go through `AuthClient::change_password`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use super::session::{Command, StoreHandle};
use crate::backend::Backend;
use crate::types::{ArenaError, ContactUpdate, HistoryBet, Page, PageRequest, Profile};

pub struct Account {
    backend: Arc<dyn Backend>,
    store: StoreHandle,
}

impl Account {
    pub fn new(backend: Arc<dyn Backend>, store: StoreHandle) -> Self {
        Self { backend, store }
    }

    fn user_id(&self) -> Result<String> {
        Ok(self.store.user_id().ok_or(ArenaError::NotSignedIn)?)
    }

    /// One page of bets, newest first, each with its match.
    pub async fn bet_history(&self, page: PageRequest) -> Result<Page<HistoryBet>> {
        let user_id = self.user_id()?;
        self.backend
            .bet_history(&user_id, page)
            .await
            .context("Failed to load bet history")
    }

    /// Save contact details and refresh the stored profile.
    pub async fn update_contact(&self, update: ContactUpdate) -> Result<Profile> {
        let user_id = self.user_id()?;
        let profile = self
            .backend
            .update_contact(&user_id, &update)
            .await
            .context("Failed to update profile")?;
        self.store.commit(Command::ProfileChanged(profile.clone())).await?;
        info!(user_id = %user_id, "Contact details updated");
        Ok(profile)
    }
}
