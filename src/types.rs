//! Shared types for the ARENA client.
//!
//! These mirror the backend-owned records (profiles, matches, bets,
//! transactions, cash requests, admin logs). Every row decoded from the
//! backend goes through serde's strict enum matching plus [`Validate`],
//! so a malformed row fails closed instead of being cast.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Validation hook
// ---------------------------------------------------------------------------

/// Post-decode shape checks that serde alone cannot express.
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

fn non_negative(field: &str, value: Decimal) -> Result<(), String> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(format!("{field} must not be negative (got {value})"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Account role. Everything other than `User` is an operator tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    MasterAgent,
    Agent,
    Loader,
    User,
}

impl Role {
    pub fn is_operator(&self) -> bool {
        !matches!(self, Role::User)
    }

    /// Roles allowed to run the match console.
    pub fn can_run_console(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Roles that approve, ban and list the accounts they recruited.
    pub fn can_manage_downline(&self) -> bool {
        matches!(self, Role::Admin | Role::MasterAgent | Role::Agent)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::MasterAgent => write!(f, "master_agent"),
            Role::Agent => write!(f, "agent"),
            Role::Loader => write!(f, "loader"),
            Role::User => write!(f, "user"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Pending,
    Active,
    Banned,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Pending => "pending",
            ProfileStatus::Active => "active",
            ProfileStatus::Banned => "banned",
        }
    }
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub balance: Decimal,
    /// Upline: the account that referred / approves this one.
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub facebook_url: Option<String>,
    pub status: ProfileStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub security_pin: Option<String>,
}

impl Validate for Profile {
    fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("profile id is empty".into());
        }
        Ok(())
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) ₱{:.2}", self.username, self.role, self.balance)
    }
}

// ---------------------------------------------------------------------------
// Match
// ---------------------------------------------------------------------------

/// Match lifecycle: open → last_call → closed → ongoing → finished/cancelled.
/// Transitions are enforced server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Open,
    LastCall,
    Closed,
    Ongoing,
    Finished,
    Cancelled,
}

impl MatchStatus {
    pub const ALL: &'static [MatchStatus] = &[
        MatchStatus::Open,
        MatchStatus::LastCall,
        MatchStatus::Closed,
        MatchStatus::Ongoing,
        MatchStatus::Finished,
        MatchStatus::Cancelled,
    ];

    /// Only an open match takes new bets from players.
    pub fn accepts_bets(&self) -> bool {
        matches!(self, MatchStatus::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Open => "open",
            MatchStatus::LastCall => "last_call",
            MatchStatus::Closed => "closed",
            MatchStatus::Ongoing => "ongoing",
            MatchStatus::Finished => "finished",
            MatchStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MatchStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatchStatus::ALL
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown match status: {s}"))
    }
}

/// Outcome a bet is placed on (and the winner of a finished match).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Meron,
    Wala,
    Draw,
}

impl Selection {
    pub const ALL: &'static [Selection] = &[Selection::Meron, Selection::Wala, Selection::Draw];

    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::Meron => "meron",
            Selection::Wala => "wala",
            Selection::Draw => "draw",
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Meron => write!(f, "MERON"),
            Selection::Wala => write!(f, "WALA"),
            Selection::Draw => write!(f, "DRAW"),
        }
    }
}

impl std::str::FromStr for Selection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "meron" => Ok(Selection::Meron),
            "wala" => Ok(Selection::Wala),
            "draw" => Ok(Selection::Draw),
            _ => Err(anyhow::anyhow!("Unknown selection: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub meron_name: String,
    pub wala_name: String,
    pub status: MatchStatus,
    #[serde(default)]
    pub winner: Option<Selection>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub fight_id: Option<String>,
    #[serde(default)]
    pub meron_bet_total: Option<Decimal>,
    #[serde(default)]
    pub wala_bet_total: Option<Decimal>,
    #[serde(default)]
    pub is_maintain_mode: bool,
}

impl Match {
    /// Short display tag, e.g. `#A1B2`.
    pub fn short_tag(&self) -> String {
        let head: String = self.id.chars().take(4).collect();
        format!("#{}", head.to_uppercase())
    }

    /// Helper to build a sample match for tests.
    #[cfg(test)]
    pub fn sample(id: &str, status: MatchStatus) -> Self {
        Match {
            id: id.to_string(),
            meron_name: "Red".to_string(),
            wala_name: "Blue".to_string(),
            status,
            winner: None,
            created_at: Utc::now(),
            fight_id: None,
            meron_bet_total: None,
            wala_bet_total: None,
            is_maintain_mode: false,
        }
    }
}

impl Validate for Match {
    fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("match id is empty".into());
        }
        if self.meron_name.trim().is_empty() || self.wala_name.trim().is_empty() {
            return Err("match has an empty contestant name".into());
        }
        Ok(())
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Match {} {} vs {} [{}]",
            self.short_tag(),
            self.meron_name,
            self.wala_name,
            self.status
        )?;
        if let Some(w) = self.winner {
            write!(f, " winner={w}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Cancelled,
}

impl BetStatus {
    /// Cancelled (refunded) bets never count toward the pool.
    pub fn counts_toward_pool(&self) -> bool {
        !matches!(self, BetStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    /// `None` for house bets.
    #[serde(default)]
    pub user_id: Option<String>,
    pub match_id: String,
    pub amount: Decimal,
    pub selection: Selection,
    pub status: BetStatus,
    #[serde(default)]
    pub payout: Decimal,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_bot: bool,
}

impl Bet {
    #[cfg(test)]
    pub fn sample(id: &str, match_id: &str, selection: Selection, amount: Decimal) -> Self {
        Bet {
            id: id.to_string(),
            user_id: Some("user-1".to_string()),
            match_id: match_id.to_string(),
            amount,
            selection,
            status: BetStatus::Pending,
            payout: Decimal::ZERO,
            created_at: Utc::now(),
            is_bot: false,
        }
    }
}

impl Validate for Bet {
    fn validate(&self) -> Result<(), String> {
        non_negative("amount", self.amount)?;
        non_negative("payout", self.payout)
    }
}

// ---------------------------------------------------------------------------
// Transactions & cash requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Load,
    Withdraw,
    Bet,
    Win,
    Commission,
    Transfer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub receiver_id: Option<String>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub created_at: DateTime<Utc>,
}

impl Validate for Transaction {
    fn validate(&self) -> Result<(), String> {
        non_negative("amount", self.amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    CashIn,
    CashOut,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::CashIn => "cash_in",
            RequestKind::CashOut => "cash_out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Gcash,
    Maya,
    Crypto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    Bnb,
    Sol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub upline_id: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub proof_url: Option<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub chain: Option<Chain>,
    #[serde(default)]
    pub converted_amount: Option<Decimal>,
    #[serde(default)]
    pub exchange_rate: Option<Decimal>,
}

impl Validate for TransactionRequest {
    fn validate(&self) -> Result<(), String> {
        non_negative("amount", self.amount)?;
        if self.kind == RequestKind::CashOut
            && self.payment_method == Some(PaymentMethod::Crypto)
            && self.wallet_address.is_none()
        {
            return Err("crypto cash-out without wallet address".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminLog {
    pub id: String,
    pub admin_id: String,
    pub action_type: String,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Validate for AdminLog {}

/// Public referrer info returned by the referral-code lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referrer {
    pub id: String,
    pub username: String,
}

impl Validate for Referrer {}

// ---------------------------------------------------------------------------
// Bet history
// ---------------------------------------------------------------------------

/// Largest page the history listing serves.
pub const MAX_PAGE_SIZE: u32 = 50;

/// One-based page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Inclusive row range `(from, to)`.
    pub fn range(&self) -> (u64, u64) {
        let size = u64::from(self.page_size.max(1));
        let from = u64::from(self.page.max(1) - 1) * size;
        (from, from + size - 1)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Exact row count across all pages.
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.page_size.max(1)))
    }
}

/// A bet with its match joined in (`match:matches(*)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryBet {
    #[serde(flatten)]
    pub bet: Bet,
    /// Absent when the match row is gone.
    #[serde(default, rename = "match")]
    pub fight: Option<Match>,
}

impl Validate for HistoryBet {
    fn validate(&self) -> Result<(), String> {
        self.bet.validate()?;
        match &self.fight {
            Some(m) => m.validate(),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// App settings
// ---------------------------------------------------------------------------

pub const DEFAULT_STREAM_URL: &str = "https://test-streams.mux.dev/x36xhzz/x36xhzz.m3u8";
pub const DEFAULT_STREAM_TITLE: &str = "LIVE ARENA";

/// One `app_settings` key/value row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSetting {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Validate for AppSetting {
    fn validate(&self) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("setting key is empty".into());
        }
        Ok(())
    }
}

/// The settings that drive the live stream panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSetting {
    Url,
    Title,
}

impl StreamSetting {
    pub const ALL: &'static [StreamSetting] = &[StreamSetting::Url, StreamSetting::Title];

    pub fn key(&self) -> &'static str {
        match self {
            StreamSetting::Url => "stream_url",
            StreamSetting::Title => "stream_title",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.key() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub url: String,
    pub title: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            title: DEFAULT_STREAM_TITLE.to_string(),
        }
    }
}

impl StreamSettings {
    /// Defaults overlaid with whatever stream rows exist.
    pub fn from_rows(rows: &[AppSetting]) -> Self {
        let mut settings = Self::default();
        for row in rows {
            settings.apply(&row.key, &row.value);
        }
        settings
    }

    /// Apply one key/value. Unknown keys are ignored. Returns whether
    /// anything changed.
    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        let slot = match StreamSetting::from_key(key) {
            Some(StreamSetting::Url) => &mut self.url,
            Some(StreamSetting::Title) => &mut self.title,
            None => return false,
        };
        if slot == value {
            return false;
        }
        *slot = value.to_string();
        true
    }
}

// ---------------------------------------------------------------------------
// Insert / update payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBet {
    pub user_id: String,
    pub match_id: String,
    pub amount: Decimal,
    pub selection: Selection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMatch {
    pub meron_name: String,
    pub wala_name: String,
    pub fight_id: Option<String>,
    pub status: MatchStatus,
}

/// Partial update of a match row; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MatchStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Selection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransaction {
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransactionRequest {
    pub user_id: String,
    pub upline_id: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub payment_method: PaymentMethod,
    pub proof_url: Option<String>,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub wallet_address: Option<String>,
    pub chain: Option<Chain>,
    pub converted_amount: Option<Decimal>,
    pub exchange_rate: Option<Decimal>,
}

/// Contact fields a user may edit on their own profile. Blank clears.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContactUpdate {
    pub facebook_url: Option<String>,
    pub phone_number: Option<String>,
}

impl ContactUpdate {
    pub fn new(facebook_url: &str, phone_number: &str) -> Self {
        let field = |v: &str| Some(v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            facebook_url: field(facebook_url),
            phone_number: field(phone_number),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAdminLog {
    pub admin_id: String,
    pub action_type: String,
    pub target_id: Option<String>,
    pub target_name: Option<String>,
    pub details: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Client-side soft gates. The message is what the user sees.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Betting is closed for this match.")]
    BettingClosed,

    #[error("Please enter a valid amount")]
    InvalidAmount,

    #[error("Minimum bet amount is ₱{min}.")]
    BelowMinimum { min: Decimal },

    #[error("Maximum bet for Draw is ₱{max}.")]
    DrawCapExceeded { max: Decimal },

    #[error("Insufficient balance.")]
    InsufficientBalance,

    #[error("You already have a pending request.")]
    PendingRequest,

    #[error("Please select a payment method")]
    MissingMethod,

    #[error("Please attach a payment proof")]
    MissingProof,

    #[error("Please enter a valid wallet address")]
    InvalidWalletAddress,

    #[error("Please select a chain")]
    MissingChain,

    #[error("Please fill in all account details")]
    MissingAccountDetails,

    #[error("Invalid Security PIN")]
    InvalidPin,

    #[error("PIN must be exactly 4 digits")]
    PinFormat,

    #[error("PINs do not match")]
    PinMismatch,

    #[error("Both contestant names are required")]
    MissingContestants,

    #[error("Enter your username, phone or email")]
    EmptyIdentity,

    #[error("A request is already being submitted")]
    AlreadySubmitting,

    #[error("Password must be at least {min} characters.")]
    PasswordTooShort { min: usize },

    #[error("Passwords do not match.")]
    PasswordMismatch,

    #[error("This request has already been processed.")]
    RequestProcessed,

    #[error("Stream setting cannot be empty")]
    EmptySetting,
}

/// Domain-specific error types for ARENA.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Malformed {table} row: {message}")]
    Decode { table: String, message: String },

    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("No upline found to process this request.")]
    NoUpline,

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Record not found: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
