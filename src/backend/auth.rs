//! Authentication against the hosted backend's auth service.
//!
//! Endpoints: `/auth/v1/token?grant_type=password|refresh_token`,
//! `/auth/v1/signup`, `/auth/v1/logout`, `/auth/v1/user`.
//! Users may sign in with a username or phone number; those are resolved
//! to the login email through an RPC first.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::rest::read_json;
use super::Backend;
use crate::types::{ArenaError, Referrer, ValidationError};

/// Message the auth service returns for a bad identity/password pair.
const INVALID_CREDENTIALS: &str = "Invalid login credentials";

/// Refresh this long before the token actually expires.
const REFRESH_MARGIN_SECS: i64 = 60;

pub const MIN_PASSWORD_LEN: usize = 6;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An authenticated session. Tokens never leave this struct unredacted.
#[derive(Debug)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Token-free view of a session, safe to share in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            expires_at: self.expires_at,
        }
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    user: AuthUser,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            user_id: self.user.id,
            email: self.user.email,
            access_token: SecretString::new(self.access_token),
            refresh_token: SecretString::new(self.refresh_token),
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
        }
    }
}

/// Public registration form.
#[derive(Debug)]
pub struct SignUpForm {
    pub email: String,
    pub password: SecretString,
    pub username: String,
    pub phone_number: Option<String>,
    pub facebook_url: Option<String>,
    pub referrer: Option<Referrer>,
}

impl SignUpForm {
    /// Sign-up body. Profile fields ride in the user metadata; the backend
    /// creates the profile row from them.
    fn payload(&self) -> Value {
        json!({
            "email": self.email.trim(),
            "password": self.password.expose_secret(),
            "data": {
                "username": self.username.trim(),
                "role": "user",
                "phone_number": self.phone_number,
                "facebook_url": self.facebook_url,
                "created_by": self.referrer.as_ref().map(|r| r.id.clone()),
                "is_public_registration": true,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A new password is at least [`MIN_PASSWORD_LEN`] characters and
/// matches its confirmation.
pub fn validate_password(password: &str, confirm: &str) -> Result<(), ValidationError> {
    if password != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort { min: MIN_PASSWORD_LEN });
    }
    Ok(())
}

/// The identifier actually sent to the auth service: the resolved email
/// when the lookup produced one, otherwise the raw input.
pub fn login_identifier(resolved: Option<String>, raw: &str) -> String {
    resolved
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Rewrite auth-service messages into what the user should see.
pub fn friendly_auth_error(message: &str) -> String {
    if message == INVALID_CREDENTIALS {
        "Invalid username/phone or password".to_string()
    } else {
        message.to_string()
    }
}

/// Look up a referral code. Lookup failures are logged and treated as
/// "no referrer" so registration can still proceed.
pub async fn lookup_referrer(backend: &dyn Backend, code: &str) -> Option<Referrer> {
    let code = code.trim();
    if code.is_empty() {
        return None;
    }
    match backend.referrer_by_code(code).await {
        Ok(found) => found,
        Err(e) => {
            warn!(code, error = %e, "Referrer lookup failed");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AuthClient {
    http: Client,
    base_url: String,
    anon_key: SecretString,
}

impl AuthClient {
    pub fn new(base_url: &str, anon_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("ARENA/0.1.0")
            .build()
            .context("Failed to build HTTP client for auth")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    /// Sign in with a username, phone number or email.
    pub async fn sign_in(
        &self,
        backend: &dyn Backend,
        identity: &str,
        password: &SecretString,
    ) -> Result<Session> {
        let raw = identity.trim();
        if raw.is_empty() {
            return Err(ArenaError::from(ValidationError::EmptyIdentity).into());
        }

        let resolved = match backend.resolve_login(raw).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Identity resolution failed, proceeding with raw input");
                None
            }
        };
        let login = login_identifier(resolved, raw);

        let resp = self
            .http
            .post(self.url("token?grant_type=password"))
            .header("apikey", self.anon_key.expose_secret())
            .json(&json!({ "email": login, "password": password.expose_secret() }))
            .send()
            .await
            .context("Sign-in request failed")?;

        let body = read_json(resp).await.map_err(|e| match e.downcast::<ArenaError>() {
            Ok(ArenaError::Backend { message, .. }) => {
                anyhow::Error::from(ArenaError::Rejected(friendly_auth_error(&message)))
            }
            Ok(other) => other.into(),
            Err(e) => e,
        })?;

        let token: TokenResponse =
            serde_json::from_value(body).context("Failed to parse sign-in response")?;
        let session = token.into_session();
        info!(user_id = %session.user_id, "Signed in");
        Ok(session)
    }

    /// Register a new player account. Returns the new user id.
    pub async fn sign_up(&self, form: &SignUpForm) -> Result<String> {
        let resp = self
            .http
            .post(self.url("signup"))
            .header("apikey", self.anon_key.expose_secret())
            .json(&form.payload())
            .send()
            .await
            .context("Sign-up request failed")?;

        let body = read_json(resp).await?;
        let user_id = body
            .get("user")
            .and_then(|u| u.get("id"))
            .or_else(|| body.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .context("Sign-up response did not include a user id")?;

        info!(user_id = %user_id, referred = form.referrer.is_some(), "Account registered");
        Ok(user_id)
    }

    pub async fn sign_out(&self, session: &Session) -> Result<()> {
        let resp = self
            .http
            .post(self.url("logout"))
            .header("apikey", self.anon_key.expose_secret())
            .header(
                "Authorization",
                format!("Bearer {}", session.access_token.expose_secret()),
            )
            .send()
            .await
            .context("Sign-out request failed")?;
        read_json(resp).await?;
        info!(user_id = %session.user_id, "Signed out");
        Ok(())
    }

    /// Replace the signed-in user's password.
    pub async fn change_password(
        &self,
        session: &Session,
        password: &SecretString,
        confirm: &SecretString,
    ) -> Result<()> {
        validate_password(password.expose_secret(), confirm.expose_secret())
            .map_err(ArenaError::from)?;

        let resp = self
            .http
            .put(self.url("user"))
            .header("apikey", self.anon_key.expose_secret())
            .header(
                "Authorization",
                format!("Bearer {}", session.access_token.expose_secret()),
            )
            .json(&json!({ "password": password.expose_secret() }))
            .send()
            .await
            .context("Password change request failed")?;
        read_json(resp).await?;
        info!(user_id = %session.user_id, "Password changed");
        Ok(())
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh(&self, session: &Session) -> Result<Session> {
        let resp = self
            .http
            .post(self.url("token?grant_type=refresh_token"))
            .header("apikey", self.anon_key.expose_secret())
            .json(&json!({ "refresh_token": session.refresh_token.expose_secret() }))
            .send()
            .await
            .context("Token refresh request failed")?;

        let body = read_json(resp).await?;
        let token: TokenResponse =
            serde_json::from_value(body).context("Failed to parse refresh response")?;
        let refreshed = token.into_session();
        info!(
            user_id = %refreshed.user_id,
            expires_at = %refreshed.expires_at,
            "Session refreshed"
        );
        Ok(refreshed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
