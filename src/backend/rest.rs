//! PostgREST / storage implementation of [`Backend`].
//!
//! Base URL: `{project}/rest/v1/` for tables and RPCs,
//! `{project}/storage/v1/` for buckets.
//! Auth: `apikey: {anon}` on every call plus `Authorization: Bearer` with
//! the signed-in user's access token (anon key before sign-in).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{decode_first, decode_rows, Backend};
use crate::types::{
    AdminLog, AppSetting, ArenaError, Bet, ContactUpdate, HistoryBet, Match, MatchPatch,
    NewAdminLog, NewBet, NewMatch, NewTransaction, NewTransactionRequest, Page, PageRequest,
    Profile, ProfileStatus, Referrer, RequestKind, RequestStatus, Selection, Transaction,
    TransactionRequest, Validate, ValidationError,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const PROFILES: &str = "profiles";
const MATCHES: &str = "matches";
const BETS: &str = "bets";
const TRANSACTIONS: &str = "transactions";
const REQUESTS: &str = "transaction_requests";
const ADMIN_LOGS: &str = "admin_logs";
const APP_SETTINGS: &str = "app_settings";

/// Statuses whose matches can be shown on the board.
const DISPLAYABLE_STATUSES: &str = "(open,ongoing,closed,finished,last_call,cancelled)";

/// Bet statuses that count toward a pool.
const POOL_BET_STATUSES: &str = "(pending,won,lost)";

// ---------------------------------------------------------------------------
// Query helpers
// ---------------------------------------------------------------------------

/// `column=eq.value` with the value URL-encoded.
pub fn eq(column: &str, value: &str) -> String {
    format!("{column}=eq.{}", urlencoding::encode(value))
}

/// Join query fragments with `&`.
pub fn query(parts: &[String]) -> String {
    parts.join("&")
}

/// Total from a `Content-Range` header (`0-9/57`, `*/0`). `None` when the
/// count is unknown (`0-9/*`).
pub fn content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RestBackend {
    http: Client,
    base_url: String,
    anon_key: SecretString,
    proof_bucket: String,
    access_token: RwLock<Option<SecretString>>,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: SecretString, proof_bucket: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("ARENA/0.1.0")
            .build()
            .context("Failed to build HTTP client for backend")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            proof_bucket: proof_bucket.to_string(),
            access_token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Install (or clear) the signed-in user's access token.
    pub async fn set_access_token(&self, token: Option<SecretString>) {
        *self.access_token.write().await = token;
    }

    pub fn table_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/rest/v1/{table}", self.base_url)
        } else {
            format!("{}/rest/v1/{table}?{query}", self.base_url)
        }
    }

    pub fn rpc_url(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{name}", self.base_url)
    }

    pub fn public_object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{path}",
            self.base_url, self.proof_bucket
        )
    }

    // -- Internal helpers ------------------------------------------------

    async fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let token = self.access_token.read().await;
        let bearer = token
            .as_ref()
            .map(|t| t.expose_secret().clone())
            .unwrap_or_else(|| self.anon_key.expose_secret().clone());
        req.header("apikey", self.anon_key.expose_secret())
            .header("Authorization", format!("Bearer {bearer}"))
    }

    async fn select<T>(&self, table: &str, query: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Validate,
    {
        let url = self.table_url(table, query);
        debug!(url = %url, "Backend select");

        let resp = self
            .authorize(self.http.get(&url))
            .await
            .send()
            .await
            .with_context(|| format!("Backend select on {table} failed"))?;

        let body = read_json(resp).await?;
        Ok(decode_rows(table, body)?)
    }

    /// Select one page with an exact count.
    async fn select_page<T>(&self, table: &str, query: &str, page: PageRequest) -> Result<Page<T>>
    where
        T: DeserializeOwned + Validate,
    {
        let url = self.table_url(table, query);
        let (from, to) = page.range();
        debug!(url = %url, from, to, "Backend paged select");

        let resp = self
            .authorize(self.http.get(&url))
            .await
            .header("Range-Unit", "items")
            .header("Range", format!("{from}-{to}"))
            .header("Prefer", "count=exact")
            .send()
            .await
            .with_context(|| format!("Backend paged select on {table} failed"))?;

        let total = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total);
        let items: Vec<T> = decode_rows(table, read_json(resp).await?)?;
        let total = total.unwrap_or_else(|| {
            warn!(table, "No row count in response, estimating from page");
            from + items.len() as u64
        });

        Ok(Page {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn insert<B: Serialize + Sync + ?Sized>(&self, table: &str, body: &B) -> Result<Value> {
        let resp = self
            .authorize(self.http.post(self.table_url(table, "")))
            .await
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("Backend insert into {table} failed"))?;
        read_json(resp).await
    }

    async fn update<B: Serialize + Sync + ?Sized>(
        &self,
        table: &str,
        filter: &str,
        body: &B,
    ) -> Result<Value> {
        let resp = self
            .authorize(self.http.patch(self.table_url(table, filter)))
            .await
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("Backend update on {table} failed"))?;
        read_json(resp).await
    }

    async fn rpc(&self, name: &str, args: Value) -> Result<Value> {
        debug!(rpc = name, "Backend RPC");
        let resp = self
            .authorize(self.http.post(self.rpc_url(name)))
            .await
            .json(&args)
            .send()
            .await
            .with_context(|| format!("Backend RPC {name} failed"))?;
        read_json(resp).await
    }
}

/// Read a response body as JSON, mapping non-2xx to [`ArenaError::Backend`].
/// An empty body (204 / void RPC) reads as `null`.
pub(crate) async fn read_json(resp: Response) -> Result<Value> {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(ArenaError::Backend {
            status: status.as_u16(),
            message: backend_message(&text),
        }
        .into());
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).context("Backend returned invalid JSON")
}

/// Extract the human-readable message from a backend error body.
pub fn backend_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error_description", "msg", "error"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    body.to_string()
}

/// Interpret a `{ success, error }` RPC reply. Anything else counts as success.
pub fn check_rpc_reply(reply: &Value) -> Result<(), ArenaError> {
    if reply.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let reason = reply
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown error");
        return Err(ArenaError::Rejected(reason.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Backend trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Backend for RestBackend {
    async fn current_match(&self) -> Result<Option<Match>> {
        let q = query(&[
            "select=*".into(),
            format!("status=in.{DISPLAYABLE_STATUSES}"),
            "order=created_at.desc".into(),
            "limit=1".into(),
        ]);
        let url = self.table_url(MATCHES, &q);
        let resp = self
            .authorize(self.http.get(&url))
            .await
            .send()
            .await
            .context("Backend current match request failed")?;
        Ok(decode_first(MATCHES, read_json(resp).await?)?)
    }

    async fn list_matches(&self) -> Result<Vec<Match>> {
        self.select(MATCHES, "select=*&order=created_at.desc").await
    }

    async fn match_bets(&self, match_id: &str) -> Result<Vec<Bet>> {
        let q = query(&[
            "select=*".into(),
            eq("match_id", match_id),
            format!("status=in.{POOL_BET_STATUSES}"),
        ]);
        self.select(BETS, &q).await
    }

    async fn active_bets(&self) -> Result<Vec<Bet>> {
        let q = query(&["select=*".into(), format!("status=in.{POOL_BET_STATUSES}")]);
        self.select(BETS, &q).await
    }

    async fn user_bets(&self, user_id: &str, limit: u32) -> Result<Vec<Bet>> {
        let q = query(&[
            "select=*".into(),
            eq("user_id", user_id),
            "order=created_at.desc".into(),
            format!("limit={limit}"),
        ]);
        self.select(BETS, &q).await
    }

    async fn bet_history(&self, user_id: &str, page: PageRequest) -> Result<Page<HistoryBet>> {
        let q = query(&[
            "select=*,match:matches(*)".into(),
            eq("user_id", user_id),
            "order=created_at.desc".into(),
        ]);
        self.select_page(BETS, &q, page).await
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Profile> {
        let q = query(&["select=*".into(), eq("id", user_id)]);
        let rows: Vec<Profile> = self.select(PROFILES, &q).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ArenaError::NotFound(format!("profile {user_id}")).into())
    }

    async fn downline_profiles(&self, upline_id: &str) -> Result<Vec<Profile>> {
        let q = query(&[
            "select=*".into(),
            eq("created_by", upline_id),
            "order=created_at.desc".into(),
        ]);
        self.select(PROFILES, &q).await
    }

    async fn set_profile_status(&self, user_id: &str, status: ProfileStatus) -> Result<Profile> {
        let body = self
            .update(PROFILES, &eq("id", user_id), &json!({ "status": status }))
            .await?;
        let updated: Option<Profile> = decode_first(PROFILES, body)?;
        let profile = updated.ok_or_else(|| {
            ArenaError::Rejected("Insufficient permissions to change this account.".into())
        })?;
        info!(user_id, status = %profile.status, "Account status updated");
        Ok(profile)
    }

    async fn update_contact(&self, user_id: &str, update: &ContactUpdate) -> Result<Profile> {
        let body = self.update(PROFILES, &eq("id", user_id), update).await?;
        let updated: Option<Profile> = decode_first(PROFILES, body)?;
        updated.ok_or_else(|| ArenaError::NotFound(format!("profile {user_id}")).into())
    }

    async fn set_balance(&self, user_id: &str, balance: Decimal) -> Result<Profile> {
        let body = self
            .update(PROFILES, &eq("id", user_id), &json!({ "balance": balance }))
            .await?;
        let updated: Option<Profile> = decode_first(PROFILES, body)?;
        let profile = updated.ok_or_else(|| {
            ArenaError::Rejected(
                "Update failed: Insufficient permissions to modify user balance.".into(),
            )
        })?;
        info!(user_id, balance = %profile.balance, "Balance updated");
        Ok(profile)
    }

    async fn set_security_pin(&self, user_id: &str, pin: &str) -> Result<()> {
        self.update(PROFILES, &eq("id", user_id), &json!({ "security_pin": pin }))
            .await?;
        info!(user_id, "Security PIN updated");
        Ok(())
    }

    async fn insert_bet(&self, bet: &NewBet) -> Result<()> {
        self.insert(BETS, bet).await?;
        info!(
            match_id = %bet.match_id,
            selection = %bet.selection,
            amount = %bet.amount,
            "Bet inserted"
        );
        Ok(())
    }

    async fn insert_transaction(&self, tx: &NewTransaction) -> Result<()> {
        self.insert(TRANSACTIONS, tx).await?;
        Ok(())
    }

    async fn user_transactions(&self, user_id: &str, limit: u32) -> Result<Vec<Transaction>> {
        let q = query(&[
            "select=*".into(),
            format!(
                "or=(sender_id.eq.{id},receiver_id.eq.{id})",
                id = urlencoding::encode(user_id)
            ),
            "order=created_at.desc".into(),
            format!("limit={limit}"),
        ]);
        self.select(TRANSACTIONS, &q).await
    }

    async fn insert_request(&self, request: &NewTransactionRequest) -> Result<()> {
        self.insert(REQUESTS, request).await?;
        info!(
            kind = ?request.kind,
            amount = %request.amount,
            method = ?request.payment_method,
            "Transaction request submitted"
        );
        Ok(())
    }

    async fn user_requests(&self, user_id: &str, limit: u32) -> Result<Vec<TransactionRequest>> {
        let q = query(&[
            "select=*".into(),
            eq("user_id", user_id),
            "order=created_at.desc".into(),
            format!("limit={limit}"),
        ]);
        self.select(REQUESTS, &q).await
    }

    async fn pending_request(
        &self,
        user_id: &str,
        kind: RequestKind,
    ) -> Result<Option<TransactionRequest>> {
        let q = query(&[
            "select=*".into(),
            eq("user_id", user_id),
            eq("type", kind.as_str()),
            eq("status", "pending"),
            "limit=1".into(),
        ]);
        let rows: Vec<TransactionRequest> = self.select(REQUESTS, &q).await?;
        Ok(rows.into_iter().next())
    }

    async fn incoming_requests(
        &self,
        upline_id: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<TransactionRequest>> {
        let mut parts = vec!["select=*".to_string(), eq("upline_id", upline_id)];
        if let Some(status) = status {
            parts.push(eq("status", status.as_str()));
        }
        parts.push("order=created_at.desc".into());
        self.select(REQUESTS, &query(&parts)).await
    }

    async fn set_request_status(&self, request_id: &str, status: RequestStatus) -> Result<()> {
        let filter = query(&[eq("id", request_id), eq("status", "pending")]);
        let body = self
            .update(REQUESTS, &filter, &json!({ "status": status }))
            .await?;
        let updated: Vec<TransactionRequest> = decode_rows(REQUESTS, body)?;
        if updated.is_empty() {
            return Err(ArenaError::from(ValidationError::RequestProcessed).into());
        }
        info!(request_id, status = status.as_str(), "Request closed");
        Ok(())
    }

    async fn insert_admin_log(&self, log: &NewAdminLog) -> Result<()> {
        self.insert(ADMIN_LOGS, log).await?;
        debug!(action = %log.action_type, target = ?log.target_name, "Admin action logged");
        Ok(())
    }

    async fn admin_logs(&self, limit: u32) -> Result<Vec<AdminLog>> {
        let q = query(&[
            "select=*".into(),
            "order=created_at.desc".into(),
            format!("limit={limit}"),
        ]);
        self.select(ADMIN_LOGS, &q).await
    }

    async fn app_settings(&self) -> Result<Vec<AppSetting>> {
        self.select(APP_SETTINGS, "select=*").await
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<()> {
        let resp = self
            .authorize(self.http.post(self.table_url(APP_SETTINGS, "on_conflict=key")))
            .await
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&json!({ "key": key, "value": value, "updated_at": Utc::now() }))
            .send()
            .await
            .context("Backend settings upsert failed")?;
        read_json(resp).await?;
        info!(key, "Setting saved");
        Ok(())
    }

    async fn create_match(&self, new_match: &NewMatch) -> Result<Match> {
        let body = self.insert(MATCHES, new_match).await?;
        let created: Option<Match> = decode_first(MATCHES, body)?;
        created.ok_or_else(|| ArenaError::Rejected("Match was not created".into()).into())
    }

    async fn update_match(&self, match_id: &str, patch: &MatchPatch) -> Result<()> {
        self.update(MATCHES, &eq("id", match_id), patch).await?;
        Ok(())
    }

    async fn delete_match(&self, match_id: &str) -> Result<()> {
        let resp = self
            .authorize(self.http.delete(self.table_url(MATCHES, &eq("id", match_id))))
            .await
            .send()
            .await
            .context("Backend delete match failed")?;
        read_json(resp).await?;
        Ok(())
    }

    async fn cancel_match(&self, match_id: &str) -> Result<()> {
        let reply = self
            .rpc("cancel_match", json!({ "match_id_input": match_id }))
            .await?;
        check_rpc_reply(&reply)?;
        Ok(())
    }

    async fn place_house_bet(
        &self,
        match_id: &str,
        selection: Selection,
        amount: Decimal,
    ) -> Result<()> {
        let reply = self
            .rpc(
                "place_bot_bet",
                json!({
                    "p_match_id": match_id,
                    "p_selection": selection.as_str(),
                    "p_amount": amount,
                }),
            )
            .await?;
        check_rpc_reply(&reply)?;
        Ok(())
    }

    async fn referrer_by_code(&self, code: &str) -> Result<Option<Referrer>> {
        let reply = self
            .rpc("get_referrer_info", json!({ "code_input": code }))
            .await?;
        let referrer: Option<Referrer> = match reply {
            Value::Object(_) => Some(super::decode_row("referrer", reply)?),
            other => decode_first("referrer", other)?,
        };
        Ok(referrer)
    }

    async fn resolve_login(&self, identity: &str) -> Result<Option<String>> {
        let reply = self
            .rpc("get_email_for_login", json!({ "identity_input": identity }))
            .await?;
        Ok(reply
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }

    async fn upload_proof(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/storage/v1/object/{}/{path}",
            self.base_url, self.proof_bucket
        );
        let size = bytes.len();
        let resp = self
            .authorize(self.http.post(&url))
            .await
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .context("Proof upload request failed")?;

        if let Err(e) = read_json(resp).await {
            warn!(path, error = %e, "Proof upload rejected");
            return Err(e);
        }

        info!(path, size, "Payment proof uploaded");
        Ok(self.public_object_url(path))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
