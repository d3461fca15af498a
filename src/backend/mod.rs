//! Hosted backend boundary.
//!
//! Defines the `Backend` trait (tables, remote procedures, proof uploads)
//! and the decode helpers every response goes through. Rows are parsed
//! into typed records and validated; anything that does not fit is a
//! typed [`ArenaError::Decode`], never a silent cast.
//!
//! - `rest`: PostgREST / storage implementation over `reqwest`
//! - `auth`: sign-in, sign-up, sign-out and token refresh

pub mod auth;
pub mod rest;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::{
    AdminLog, AppSetting, ArenaError, Bet, ContactUpdate, HistoryBet, Match, MatchPatch,
    NewAdminLog, NewBet, NewMatch, NewTransaction, NewTransactionRequest, Page, PageRequest,
    Profile, ProfileStatus, Referrer, RequestKind, RequestStatus, Selection, Transaction,
    TransactionRequest, Validate,
};

/// Abstraction over the hosted backend.
///
/// Row-level access control is the backend's; a call the signed-in user
/// may not make comes back as an error (or an empty result for reads).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Most recent match in any displayable status.
    async fn current_match(&self) -> Result<Option<Match>>;

    /// All matches, newest first.
    async fn list_matches(&self) -> Result<Vec<Match>>;

    /// Every non-cancelled bet on one match (house bets included).
    async fn match_bets(&self, match_id: &str) -> Result<Vec<Bet>>;

    /// Every non-cancelled bet across all matches.
    async fn active_bets(&self) -> Result<Vec<Bet>>;

    /// A user's most recent bets, newest first.
    async fn user_bets(&self, user_id: &str, limit: u32) -> Result<Vec<Bet>>;

    /// One page of a user's bets, newest first, with the match joined and
    /// the exact total count.
    async fn bet_history(&self, user_id: &str, page: PageRequest) -> Result<Page<HistoryBet>>;

    async fn fetch_profile(&self, user_id: &str) -> Result<Profile>;

    /// Accounts whose upline (`created_by`) is `upline_id`, newest first.
    async fn downline_profiles(&self, upline_id: &str) -> Result<Vec<Profile>>;

    /// Move an account through pending / active / banned.
    async fn set_profile_status(&self, user_id: &str, status: ProfileStatus) -> Result<Profile>;

    async fn update_contact(&self, user_id: &str, update: &ContactUpdate) -> Result<Profile>;

    /// Overwrite a balance. Returns the updated row; an empty update
    /// (no permission) is an error.
    async fn set_balance(&self, user_id: &str, balance: Decimal) -> Result<Profile>;

    async fn set_security_pin(&self, user_id: &str, pin: &str) -> Result<()>;

    async fn insert_bet(&self, bet: &NewBet) -> Result<()>;

    async fn insert_transaction(&self, tx: &NewTransaction) -> Result<()>;

    async fn user_transactions(&self, user_id: &str, limit: u32) -> Result<Vec<Transaction>>;

    async fn insert_request(&self, request: &NewTransactionRequest) -> Result<()>;

    async fn user_requests(&self, user_id: &str, limit: u32) -> Result<Vec<TransactionRequest>>;

    async fn pending_request(
        &self,
        user_id: &str,
        kind: RequestKind,
    ) -> Result<Option<TransactionRequest>>;

    /// Cash requests addressed to an upline, newest first. `None` lists
    /// every status.
    async fn incoming_requests(
        &self,
        upline_id: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<TransactionRequest>>;

    /// Close a request. Only a still-pending row is updated; an empty
    /// update is an error.
    async fn set_request_status(&self, request_id: &str, status: RequestStatus) -> Result<()>;

    async fn insert_admin_log(&self, log: &NewAdminLog) -> Result<()>;

    /// Most recent admin log entries, newest first.
    async fn admin_logs(&self, limit: u32) -> Result<Vec<AdminLog>>;

    /// Every `app_settings` row.
    async fn app_settings(&self) -> Result<Vec<AppSetting>>;

    /// Insert or replace one `app_settings` row.
    async fn upsert_setting(&self, key: &str, value: &str) -> Result<()>;

    async fn create_match(&self, new_match: &NewMatch) -> Result<Match>;

    async fn update_match(&self, match_id: &str, patch: &MatchPatch) -> Result<()>;

    async fn delete_match(&self, match_id: &str) -> Result<()>;

    /// RPC `cancel_match`: cancels and refunds every bet.
    async fn cancel_match(&self, match_id: &str) -> Result<()>;

    /// RPC `place_bot_bet`: house liquidity on one side.
    async fn place_house_bet(
        &self,
        match_id: &str,
        selection: Selection,
        amount: Decimal,
    ) -> Result<()>;

    /// RPC `get_referrer_info`: public referrer lookup by code.
    async fn referrer_by_code(&self, code: &str) -> Result<Option<Referrer>>;

    /// RPC `get_email_for_login`: username / phone → login email.
    async fn resolve_login(&self, identity: &str) -> Result<Option<String>>;

    /// Upload a payment proof and return its public URL.
    async fn upload_proof(&self, path: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String>;
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a JSON array of rows. One malformed row fails the whole batch.
pub fn decode_rows<T>(table: &str, value: Value) -> Result<Vec<T>, ArenaError>
where
    T: DeserializeOwned + Validate,
{
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => {
            return Err(ArenaError::Decode {
                table: table.to_string(),
                message: format!("expected an array of rows, got {}", json_kind(&other)),
            })
        }
    };

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| decode_row(table, row).map_err(|e| index_error(e, i)))
        .collect()
}

/// Decode a single row (object).
pub fn decode_row<T>(table: &str, value: Value) -> Result<T, ArenaError>
where
    T: DeserializeOwned + Validate,
{
    let record: T = serde_json::from_value(value).map_err(|e| ArenaError::Decode {
        table: table.to_string(),
        message: e.to_string(),
    })?;
    record.validate().map_err(|message| ArenaError::Decode {
        table: table.to_string(),
        message,
    })?;
    Ok(record)
}

/// First row of an array, if any.
pub fn decode_first<T>(table: &str, value: Value) -> Result<Option<T>, ArenaError>
where
    T: DeserializeOwned + Validate,
{
    Ok(decode_rows(table, value)?.into_iter().next())
}

fn index_error(err: ArenaError, index: usize) -> ArenaError {
    match err {
        ArenaError::Decode { table, message } => ArenaError::Decode {
            table,
            message: format!("row {index}: {message}"),
        },
        other => other,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
