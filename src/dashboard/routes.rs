//! Dashboard API route handlers.
//!
//! All endpoints return JSON. Live data comes from the dispatcher's board
//! channel and the state store; handlers only read the latest value.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

use crate::engine::dispatcher::BoardSnapshot;
use crate::engine::session::AppState;
use crate::llm::{ChatMessage, SupportChat};
use crate::odds::{OddsBoard, OddsDisplay, OddsEngine, OddsFormat};
use crate::types::{MatchStatus, Role, Selection};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub board: watch::Receiver<BoardSnapshot>,
    pub session: watch::Receiver<AppState>,
    pub odds: OddsEngine,
    pub default_format: OddsFormat,
    pub support: Option<Arc<SupportChat>>,
}

impl DashboardState {
    pub fn new(
        board: watch::Receiver<BoardSnapshot>,
        session: watch::Receiver<AppState>,
        odds: OddsEngine,
        default_format: OddsFormat,
    ) -> Self {
        Self {
            board,
            session,
            odds,
            default_format,
            support: None,
        }
    }

    pub fn with_support(mut self, support: Arc<SupportChat>) -> Self {
        self.support = Some(support);
        self
    }
}

pub type SharedState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FormatQuery {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    pub side: Selection,
    pub stake: f64,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OddsResponse {
    pub match_id: Option<String>,
    pub status: Option<MatchStatus>,
    pub board: Option<OddsBoard>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnResponse {
    pub side: Selection,
    pub stake: f64,
    pub odds: OddsDisplay,
    pub projected_return: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub signed_in: bool,
    pub connected: bool,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub role: Option<Role>,
    pub balance: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct SupportRequest {
    pub messages: Vec<ChatMessage>,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl DashboardState {
    fn format(&self, requested: Option<&str>) -> Result<OddsFormat, Response> {
        match requested {
            None => Ok(self.default_format),
            Some(s) => s
                .parse::<OddsFormat>()
                .map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/board
pub async fn get_board(State(state): State<SharedState>) -> Json<BoardSnapshot> {
    Json(state.board.borrow().clone())
}

/// GET /api/odds?format=
pub async fn get_odds(
    State(state): State<SharedState>,
    Query(query): Query<FormatQuery>,
) -> Result<Json<OddsResponse>, Response> {
    let format = state.format(query.format.as_deref())?;
    let snapshot = state.board.borrow().clone();

    let response = match &snapshot.current_match {
        Some(m) => OddsResponse {
            match_id: Some(m.id.clone()),
            status: Some(m.status),
            board: Some(state.odds.board(
                &snapshot.totals,
                m.status,
                snapshot.revealing_result,
                format,
            )),
        },
        None => OddsResponse { match_id: None, status: None, board: None },
    };
    Ok(Json(response))
}

/// GET /api/return?side=&stake=&format=
pub async fn get_projected_return(
    State(state): State<SharedState>,
    Query(query): Query<ReturnQuery>,
) -> Result<Json<ReturnResponse>, Response> {
    let format = state.format(query.format.as_deref())?;
    if query.side == Selection::Draw {
        return Err(error(StatusCode::BAD_REQUEST, "Draw pays a fixed multiplier"));
    }
    if !query.stake.is_finite() || query.stake < 0.0 {
        return Err(error(StatusCode::BAD_REQUEST, "Stake must be a non-negative number"));
    }

    let totals = state.board.borrow().totals;
    let side = totals.side_f64(query.side);
    let combined = totals.two_sided_f64();
    Ok(Json(ReturnResponse {
        side: query.side,
        stake: query.stake,
        odds: state.odds.display(side, combined, format),
        projected_return: state.odds.projected_return(query.stake, side, combined),
    }))
}

/// GET /api/session
pub async fn get_session(State(state): State<SharedState>) -> Json<SessionResponse> {
    let app = state.session.borrow().clone();
    let profile = app.profile.as_ref();
    Json(SessionResponse {
        signed_in: app.session.is_some(),
        connected: app.connected,
        user_id: app.user_id().map(str::to_string),
        username: profile.map(|p| p.username.clone()),
        role: profile.map(|p| p.role),
        balance: profile.map(|p| p.balance),
    })
}

/// POST /api/support
pub async fn post_support(
    State(state): State<SharedState>,
    Json(request): Json<SupportRequest>,
) -> Response {
    let Some(support) = state.support.clone() else {
        return error(StatusCode::SERVICE_UNAVAILABLE, "Support chat is disabled");
    };
    if request.messages.is_empty() {
        return error(StatusCode::BAD_REQUEST, "No message to answer");
    }

    let profile = state.session.borrow().profile.clone();
    match support.reply(profile.as_ref(), &request.messages).await {
        Ok(reply) => Json(json!({ "reply": reply })).into_response(),
        Err(e) => {
            warn!(error = %e, "Support chat failed");
            error(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
