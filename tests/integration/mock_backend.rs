//! In-memory backend for integration testing.
//!
//! Provides a deterministic `Backend` implementation holding matches,
//! bets, profiles and wallet rows in memory, with the server-side rules
//! the client relies on (bets debit the balance, closed matches refuse
//! bets, cancelling refunds, only pending requests can be closed).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use arena::backend::Backend;
use arena::types::*;

#[derive(Default)]
struct Tables {
    matches: Vec<Match>,
    bets: Vec<Bet>,
    profiles: Vec<Profile>,
    transactions: Vec<NewTransaction>,
    requests: Vec<TransactionRequest>,
    admin_logs: Vec<AdminLog>,
    settings: Vec<AppSetting>,
    uploads: Vec<String>,
}

/// A mock backend. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MockBackend {
    tables: Arc<Mutex<Tables>>,
    /// If set, every operation returns this error.
    force_error: Arc<Mutex<Option<String>>>,
}

pub fn profile(id: &str, role: Role, balance: Decimal, upline: Option<&str>) -> Profile {
    Profile {
        id: id.to_string(),
        username: format!("{id}-name"),
        role,
        balance,
        created_by: upline.map(str::to_string),
        referral_code: None,
        phone_number: None,
        facebook_url: None,
        status: ProfileStatus::Active,
        created_at: Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(),
        is_bot: false,
        security_pin: None,
    }
}

/// A freshly registered account waiting for its recruiter.
pub fn pending_profile(id: &str, upline: &str) -> Profile {
    Profile {
        status: ProfileStatus::Pending,
        ..profile(id, Role::User, Decimal::ZERO, Some(upline))
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, profile: Profile) -> Self {
        self.tables.lock().unwrap().profiles.push(profile);
        self
    }

    /// Add an open match and return its id.
    pub fn open_match(&self, meron: &str, wala: &str) -> String {
        let m = Match {
            id: Uuid::new_v4().to_string(),
            meron_name: meron.to_string(),
            wala_name: wala.to_string(),
            status: MatchStatus::Open,
            winner: None,
            created_at: Utc::now(),
            fight_id: None,
            meron_bet_total: None,
            wala_bet_total: None,
            is_maintain_mode: false,
        };
        let id = m.id.clone();
        self.tables.lock().unwrap().matches.push(m);
        id
    }

    /// A bet placed by someone else, straight into the table.
    pub fn external_bet(&self, match_id: &str, selection: Selection, amount: Decimal) {
        self.tables.lock().unwrap().bets.push(Bet {
            id: Uuid::new_v4().to_string(),
            user_id: Some("someone-else".to_string()),
            match_id: match_id.to_string(),
            amount,
            selection,
            status: BetStatus::Pending,
            payout: Decimal::ZERO,
            created_at: Utc::now(),
            is_bot: false,
        });
    }

    /// Settle a match the way the backend does: winners paid at the pool
    /// odds, losers marked lost.
    pub fn settle(&self, match_id: &str, winner: Selection, odds: Decimal) {
        let mut t = self.tables.lock().unwrap();
        if let Some(m) = t.matches.iter_mut().find(|m| m.id == match_id) {
            m.status = MatchStatus::Finished;
            m.winner = Some(winner);
        }
        let mut credits = Vec::new();
        for bet in t.bets.iter_mut().filter(|b| b.match_id == match_id) {
            if bet.selection == winner {
                bet.status = BetStatus::Won;
                bet.payout = (bet.amount * odds).round_dp(2);
                if let Some(uid) = &bet.user_id {
                    credits.push((uid.clone(), bet.payout));
                }
            } else {
                bet.status = BetStatus::Lost;
            }
        }
        for (uid, payout) in credits {
            if let Some(p) = t.profiles.iter_mut().find(|p| p.id == uid) {
                p.balance += payout;
            }
        }
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn balance(&self, user_id: &str) -> Decimal {
        self.tables
            .lock()
            .unwrap()
            .profiles
            .iter()
            .find(|p| p.id == user_id)
            .map(|p| p.balance)
            .unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<TransactionRequest> {
        self.tables.lock().unwrap().requests.clone()
    }

    pub fn transactions(&self) -> Vec<NewTransaction> {
        self.tables.lock().unwrap().transactions.clone()
    }

    pub fn set_balance_for(&self, user_id: &str, balance: Decimal) {
        let mut t = self.tables.lock().unwrap();
        if let Some(p) = t.profiles.iter_mut().find(|p| p.id == user_id) {
            p.balance = balance;
        }
    }

    pub fn profile_status(&self, user_id: &str) -> Option<ProfileStatus> {
        let t = self.tables.lock().unwrap();
        t.profiles.iter().find(|p| p.id == user_id).map(|p| p.status)
    }

    pub fn request_status(&self, request_id: &str) -> Option<RequestStatus> {
        let t = self.tables.lock().unwrap();
        t.requests.iter().find(|r| r.id == request_id).map(|r| r.status)
    }

    /// Write a setting directly, as another operator's console would.
    pub fn set_setting(&self, key: &str, value: &str) {
        let mut t = self.tables.lock().unwrap();
        Self::write_setting(&mut t, key, value);
    }

    /// A finished bet for `user_id`, `minutes_ago` old, on a fresh match.
    pub fn history_bet(&self, user_id: &str, amount: Decimal, minutes_ago: i64) {
        let created_at = Utc::now() - Duration::minutes(minutes_ago);
        let mut t = self.tables.lock().unwrap();
        let fight = Match {
            id: Uuid::new_v4().to_string(),
            meron_name: "Red".to_string(),
            wala_name: "Blue".to_string(),
            status: MatchStatus::Finished,
            winner: Some(Selection::Meron),
            created_at,
            fight_id: None,
            meron_bet_total: None,
            wala_bet_total: None,
            is_maintain_mode: false,
        };
        t.bets.push(Bet {
            id: Uuid::new_v4().to_string(),
            user_id: Some(user_id.to_string()),
            match_id: fight.id.clone(),
            amount,
            selection: Selection::Meron,
            status: BetStatus::Won,
            payout: amount * Decimal::TWO,
            created_at,
            is_bot: false,
        });
        t.matches.push(fight);
    }

    pub fn admin_actions(&self) -> Vec<String> {
        self.tables
            .lock()
            .unwrap()
            .admin_logs
            .iter()
            .map(|l| l.action_type.clone())
            .collect()
    }

    fn check(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(ArenaError::Backend { status: 500, message: msg.clone() }.into()),
            None => Ok(()),
        }
    }

    fn rejected(message: &str) -> anyhow::Error {
        ArenaError::Backend { status: 400, message: message.to_string() }.into()
    }

    fn write_setting(t: &mut Tables, key: &str, value: &str) {
        let row = AppSetting {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Some(Utc::now()),
        };
        match t.settings.iter_mut().find(|s| s.key == key) {
            Some(existing) => *existing = row,
            None => t.settings.push(row),
        }
    }

    fn update_profile(&self, user_id: &str, f: impl FnOnce(&mut Profile)) -> Result<Profile> {
        let mut t = self.tables.lock().unwrap();
        let p = t
            .profiles
            .iter_mut()
            .find(|p| p.id == user_id)
            .ok_or_else(|| Self::rejected("Profile update affected no rows"))?;
        f(p);
        Ok(p.clone())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn current_match(&self) -> Result<Option<Match>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t
            .matches
            .iter()
            .filter(|m| m.status != MatchStatus::Cancelled)
            .max_by_key(|m| m.created_at)
            .cloned())
    }

    async fn list_matches(&self) -> Result<Vec<Match>> {
        self.check()?;
        let mut matches = self.tables.lock().unwrap().matches.clone();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn match_bets(&self, match_id: &str) -> Result<Vec<Bet>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.bets
            .iter()
            .filter(|b| b.match_id == match_id && b.status.counts_toward_pool())
            .cloned()
            .collect())
    }

    async fn active_bets(&self) -> Result<Vec<Bet>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.bets.iter().filter(|b| b.status.counts_toward_pool()).cloned().collect())
    }

    async fn user_bets(&self, user_id: &str, limit: u32) -> Result<Vec<Bet>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.bets
            .iter()
            .rev()
            .filter(|b| b.user_id.as_deref() == Some(user_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn bet_history(&self, user_id: &str, page: PageRequest) -> Result<Page<HistoryBet>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        let mut mine: Vec<&Bet> =
            t.bets.iter().filter(|b| b.user_id.as_deref() == Some(user_id)).collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let (from, to) = page.range();
        let items = mine
            .iter()
            .skip(from as usize)
            .take((to - from + 1) as usize)
            .map(|b| HistoryBet {
                bet: (*b).clone(),
                fight: t.matches.iter().find(|m| m.id == b.match_id).cloned(),
            })
            .collect();
        Ok(Page {
            items,
            total: mine.len() as u64,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Profile> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        t.profiles
            .iter()
            .find(|p| p.id == user_id)
            .cloned()
            .ok_or_else(|| anyhow!("Profile not found: {user_id}"))
    }

    async fn downline_profiles(&self, upline_id: &str) -> Result<Vec<Profile>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.profiles
            .iter()
            .filter(|p| p.created_by.as_deref() == Some(upline_id))
            .cloned()
            .collect())
    }

    async fn set_profile_status(&self, user_id: &str, status: ProfileStatus) -> Result<Profile> {
        self.check()?;
        self.update_profile(user_id, |p| p.status = status)
    }

    async fn update_contact(&self, user_id: &str, update: &ContactUpdate) -> Result<Profile> {
        self.check()?;
        self.update_profile(user_id, |p| {
            p.facebook_url = update.facebook_url.clone();
            p.phone_number = update.phone_number.clone();
        })
    }

    async fn set_balance(&self, user_id: &str, balance: Decimal) -> Result<Profile> {
        self.check()?;
        let mut t = self.tables.lock().unwrap();
        let p = t
            .profiles
            .iter_mut()
            .find(|p| p.id == user_id)
            .ok_or_else(|| Self::rejected("Balance update affected no rows"))?;
        p.balance = balance;
        Ok(p.clone())
    }

    async fn set_security_pin(&self, user_id: &str, pin: &str) -> Result<()> {
        self.check()?;
        let mut t = self.tables.lock().unwrap();
        if let Some(p) = t.profiles.iter_mut().find(|p| p.id == user_id) {
            p.security_pin = Some(pin.to_string());
        }
        Ok(())
    }

    async fn insert_bet(&self, bet: &NewBet) -> Result<()> {
        self.check()?;
        let mut t = self.tables.lock().unwrap();
        let open = t
            .matches
            .iter()
            .any(|m| m.id == bet.match_id && m.status.accepts_bets());
        if !open {
            return Err(Self::rejected("Match is not open for betting"));
        }
        let p = t
            .profiles
            .iter_mut()
            .find(|p| p.id == bet.user_id)
            .ok_or_else(|| Self::rejected("Unknown user"))?;
        if p.balance < bet.amount {
            return Err(Self::rejected("Insufficient balance"));
        }
        p.balance -= bet.amount;
        t.bets.push(Bet {
            id: Uuid::new_v4().to_string(),
            user_id: Some(bet.user_id.clone()),
            match_id: bet.match_id.clone(),
            amount: bet.amount,
            selection: bet.selection,
            status: BetStatus::Pending,
            payout: Decimal::ZERO,
            created_at: Utc::now(),
            is_bot: false,
        });
        Ok(())
    }

    async fn insert_transaction(&self, tx: &NewTransaction) -> Result<()> {
        self.check()?;
        self.tables.lock().unwrap().transactions.push(tx.clone());
        Ok(())
    }

    async fn user_transactions(&self, user_id: &str, limit: u32) -> Result<Vec<Transaction>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.transactions
            .iter()
            .rev()
            .filter(|tx| {
                tx.sender_id.as_deref() == Some(user_id)
                    || tx.receiver_id.as_deref() == Some(user_id)
            })
            .take(limit as usize)
            .map(|tx| Transaction {
                id: Uuid::new_v4().to_string(),
                sender_id: tx.sender_id.clone(),
                receiver_id: tx.receiver_id.clone(),
                amount: tx.amount,
                kind: tx.kind,
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn insert_request(&self, request: &NewTransactionRequest) -> Result<()> {
        self.check()?;
        self.tables.lock().unwrap().requests.push(TransactionRequest {
            id: Uuid::new_v4().to_string(),
            user_id: Some(request.user_id.clone()),
            upline_id: request.upline_id.clone(),
            amount: request.amount,
            kind: request.kind,
            status: request.status,
            created_at: Utc::now(),
            proof_url: request.proof_url.clone(),
            payment_method: Some(request.payment_method),
            account_name: request.account_name.clone(),
            account_number: request.account_number.clone(),
            wallet_address: request.wallet_address.clone(),
            chain: request.chain,
            converted_amount: request.converted_amount,
            exchange_rate: request.exchange_rate,
        });
        Ok(())
    }

    async fn user_requests(&self, user_id: &str, limit: u32) -> Result<Vec<TransactionRequest>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.requests
            .iter()
            .rev()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn pending_request(
        &self,
        user_id: &str,
        kind: RequestKind,
    ) -> Result<Option<TransactionRequest>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.requests
            .iter()
            .find(|r| {
                r.user_id.as_deref() == Some(user_id)
                    && r.kind == kind
                    && r.status == RequestStatus::Pending
            })
            .cloned())
    }

    async fn incoming_requests(
        &self,
        upline_id: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<TransactionRequest>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.requests
            .iter()
            .rev()
            .filter(|r| r.upline_id == upline_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    async fn set_request_status(&self, request_id: &str, status: RequestStatus) -> Result<()> {
        self.check()?;
        let mut t = self.tables.lock().unwrap();
        let pending = t
            .requests
            .iter_mut()
            .find(|r| r.id == request_id && r.status == RequestStatus::Pending);
        match pending {
            Some(request) => {
                request.status = status;
                Ok(())
            }
            None => Err(ArenaError::from(ValidationError::RequestProcessed).into()),
        }
    }

    async fn insert_admin_log(&self, log: &NewAdminLog) -> Result<()> {
        self.check()?;
        self.tables.lock().unwrap().admin_logs.push(AdminLog {
            id: Uuid::new_v4().to_string(),
            admin_id: log.admin_id.clone(),
            action_type: log.action_type.clone(),
            target_id: log.target_id.clone(),
            target_name: log.target_name.clone(),
            details: log.details.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn admin_logs(&self, limit: u32) -> Result<Vec<AdminLog>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.admin_logs.iter().rev().take(limit as usize).cloned().collect())
    }

    async fn app_settings(&self) -> Result<Vec<AppSetting>> {
        self.check()?;
        Ok(self.tables.lock().unwrap().settings.clone())
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        let mut t = self.tables.lock().unwrap();
        Self::write_setting(&mut t, key, value);
        Ok(())
    }

    async fn create_match(&self, new_match: &NewMatch) -> Result<Match> {
        self.check()?;
        let m = Match {
            id: Uuid::new_v4().to_string(),
            meron_name: new_match.meron_name.clone(),
            wala_name: new_match.wala_name.clone(),
            status: new_match.status,
            winner: None,
            created_at: Utc::now(),
            fight_id: new_match.fight_id.clone(),
            meron_bet_total: None,
            wala_bet_total: None,
            is_maintain_mode: false,
        };
        self.tables.lock().unwrap().matches.push(m.clone());
        Ok(m)
    }

    async fn update_match(&self, match_id: &str, patch: &MatchPatch) -> Result<()> {
        self.check()?;
        let mut t = self.tables.lock().unwrap();
        let m = t
            .matches
            .iter_mut()
            .find(|m| m.id == match_id)
            .ok_or_else(|| Self::rejected("Match not found"))?;
        if let Some(status) = patch.status {
            m.status = status;
        }
        if patch.winner.is_some() {
            m.winner = patch.winner;
        }
        Ok(())
    }

    async fn delete_match(&self, match_id: &str) -> Result<()> {
        self.check()?;
        let mut t = self.tables.lock().unwrap();
        if t.bets.iter().any(|b| b.match_id == match_id) {
            return Err(Self::rejected(
                "update or delete on table \"matches\" violates foreign key",
            ));
        }
        t.matches.retain(|m| m.id != match_id);
        Ok(())
    }

    async fn cancel_match(&self, match_id: &str) -> Result<()> {
        self.check()?;
        let mut t = self.tables.lock().unwrap();
        let m = t
            .matches
            .iter_mut()
            .find(|m| m.id == match_id)
            .ok_or_else(|| Self::rejected("Match not found"))?;
        if m.status == MatchStatus::Finished {
            return Err(Self::rejected("Match already settled"));
        }
        m.status = MatchStatus::Cancelled;

        let mut refunds = Vec::new();
        for bet in t.bets.iter_mut().filter(|b| b.match_id == match_id) {
            bet.status = BetStatus::Cancelled;
            if let Some(uid) = &bet.user_id {
                refunds.push((uid.clone(), bet.amount));
            }
        }
        for (uid, amount) in refunds {
            if let Some(p) = t.profiles.iter_mut().find(|p| p.id == uid) {
                p.balance += amount;
            }
        }
        Ok(())
    }

    async fn place_house_bet(
        &self,
        match_id: &str,
        selection: Selection,
        amount: Decimal,
    ) -> Result<()> {
        self.check()?;
        self.tables.lock().unwrap().bets.push(Bet {
            id: Uuid::new_v4().to_string(),
            user_id: None,
            match_id: match_id.to_string(),
            amount,
            selection,
            status: BetStatus::Pending,
            payout: Decimal::ZERO,
            created_at: Utc::now(),
            is_bot: true,
        });
        Ok(())
    }

    async fn referrer_by_code(&self, code: &str) -> Result<Option<Referrer>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.profiles
            .iter()
            .find(|p| p.referral_code.as_deref() == Some(code))
            .map(|p| Referrer { id: p.id.clone(), username: p.username.clone() }))
    }

    async fn resolve_login(&self, identity: &str) -> Result<Option<String>> {
        self.check()?;
        let t = self.tables.lock().unwrap();
        Ok(t.profiles
            .iter()
            .find(|p| p.username == identity || p.phone_number.as_deref() == Some(identity))
            .map(|p| format!("{}@arena.test", p.id)))
    }

    async fn upload_proof(
        &self,
        path: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String> {
        self.check()?;
        self.tables.lock().unwrap().uploads.push(path.to_string());
        Ok(format!("https://storage.test/payment_proofs/{path}"))
    }
}
