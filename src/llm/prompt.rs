//! Support prompt assembly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use super::ChatMessage;
use crate::backend::Backend;
use crate::types::{Bet, Profile, ProfileStatus, Role, Transaction, TransactionRequest};

/// Rows of each kind included in the context.
const CONTEXT_ROWS: u32 = 10;

/// Conversation turns kept when prompting.
pub const HISTORY_LIMIT: usize = 12;

const SYSTEM_PROMPT: &str = "You are the support assistant for ARENA, a live sabong betting app. \
Answer in Tagalog unless the user writes in another language. Be brief, friendly and concrete. \
Use only the account data in the user context; if something is not there, say you cannot see it \
and suggest contacting their agent. Never invent balances, results or request statuses. \
Do not promise winnings or encourage bigger bets.";

const PAGES_PROMPT: &str = "App pages: Home shows the live match, odds and the bet slip. \
Wallet has Cash In, Cash Out and Transfer. History lists bets and transactions. \
Settings holds the odds format, bet confirmation and alert toggles.";

const CASH_PROMPT: &str = "Cash in and cash out go to the user's upline (agent) for approval. \
Cash in needs a payment proof screenshot; cash out needs account details and a security PIN. \
Only one pending cash out is allowed at a time. Pending requests are waiting for the agent.";

const CALM_PROMPT: &str = "If the user is upset about a loss or a delay, acknowledge it calmly, \
explain what the data shows and suggest a break when losses keep repeating.";

/// Profile fields shared with the model. The security PIN never is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub balance: Decimal,
    pub status: ProfileStatus,
    pub created_at: DateTime<Utc>,
    pub referral_code: Option<String>,
}

impl From<&Profile> for ProfileSummary {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id.clone(),
            username: p.username.clone(),
            role: p.role,
            balance: p.balance,
            status: p.status,
            created_at: p.created_at,
            referral_code: p.referral_code.clone(),
        }
    }
}

/// What the assistant may see about the user. Fetch failures are listed in
/// `context_errors` instead of failing the chat.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SupportContext {
    pub profile: Option<ProfileSummary>,
    pub recent_transactions: Vec<Transaction>,
    pub recent_requests: Vec<TransactionRequest>,
    pub recent_bets: Vec<Bet>,
    pub context_errors: Vec<String>,
}

impl SupportContext {
    pub async fn gather(backend: &dyn Backend, profile: Option<&Profile>) -> Self {
        let Some(profile) = profile else {
            return Self {
                context_errors: vec!["not signed in".to_string()],
                ..Self::default()
            };
        };

        let (transactions, requests, bets) = tokio::join!(
            backend.user_transactions(&profile.id, CONTEXT_ROWS),
            backend.user_requests(&profile.id, CONTEXT_ROWS),
            backend.user_bets(&profile.id, CONTEXT_ROWS),
        );

        let mut ctx = Self {
            profile: Some(ProfileSummary::from(profile)),
            ..Self::default()
        };
        ctx.recent_transactions = keep(transactions, "transactions", &mut ctx.context_errors);
        ctx.recent_requests = keep(requests, "requests", &mut ctx.context_errors);
        ctx.recent_bets = keep(bets, "bets", &mut ctx.context_errors);
        ctx
    }
}

fn keep<T>(result: anyhow::Result<Vec<T>>, what: &str, errors: &mut Vec<String>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!(error = %e, what, "Support context fetch failed");
        errors.push(format!("{what}: {e}"));
        Vec::new()
    })
}

/// System prompts, then the last `HISTORY_LIMIT` turns of `history`.
pub fn build_messages(
    knowledge: Option<&str>,
    context: &SupportContext,
    history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let knowledge = knowledge
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .unwrap_or("(none provided).");
    let context_json = serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string());

    let mut messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::system(format!("Admin prompt knowledge: {knowledge}")),
        ChatMessage::system(format!("User context (JSON): {context_json}")),
        ChatMessage::system(PAGES_PROMPT),
        ChatMessage::system(CASH_PROMPT),
        ChatMessage::system(CALM_PROMPT),
    ];
    let skip = history.len().saturating_sub(HISTORY_LIMIT);
    messages.extend(history[skip..].iter().cloned());
    messages
}
