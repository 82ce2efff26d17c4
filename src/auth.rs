use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode, Url};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::GraphConfig;
use crate::error::{redact_response_body, Error, Result};
use crate::store::SessionStore;

/// Tokens are treated as expired this many seconds before their real expiry,
/// so a token handed to the gateway survives the call it is attached to.
const EXPIRY_SKEW_SECONDS: i64 = 60;

const STATE_BYTES: usize = 32;

/// An authenticated session against the identity provider.
///
/// Either *valid* (access token present, expiry in the future) or *expired*;
/// no other states are exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_SKEW_SECONDS) >= self.expires_at
    }

    fn from_token_response(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: Utc::now() + Duration::seconds(response.expires_in as i64),
            scope: response.scope,
        }
    }
}

/// Token endpoint success payload. `access_token` and `expires_in` are
/// required; a response missing either is a failed exchange.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Drives the OAuth2 authorization-code grant and owns the session lifecycle:
/// Unauthenticated → (code exchange) → Authenticated → (expiry) →
/// refresh → Authenticated, or back to Unauthenticated when the refresh path
/// is unusable. Unauthenticated is re-enterable; the flow simply restarts.
pub struct Authenticator {
    config: Arc<GraphConfig>,
    http: Client,
    store: Option<SessionStore>,
    // Holding this lock across the refresh call is the single-flight gate:
    // concurrent callers that find an expired session all await one refresh.
    session: Mutex<Option<Session>>,
}

impl Authenticator {
    pub fn new(config: Arc<GraphConfig>, http: Client) -> Self {
        Self {
            config,
            http,
            store: None,
            session: Mutex::new(None),
        }
    }

    /// Attaches a persistent session store and restores any session it holds.
    pub fn with_store(mut self, store: SessionStore) -> Result<Self> {
        let restored = store.load()?;
        if restored.is_some() {
            info!("restored persisted session from store");
        }
        self.store = Some(store);
        self.session = Mutex::new(restored);
        Ok(self)
    }

    /// Seeds the in-memory session directly (e.g. from an external store).
    pub async fn restore_session(&self, session: Session) {
        *self.session.lock().await = Some(session);
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.session.lock().await.clone()
    }

    /// Builds the authorization URL for user consent. Deterministic for a
    /// given `state`; no side effects.
    pub fn build_authorization_url(&self, state: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.config.authorize_endpoint())
            .map_err(|e| Error::Config(format!("invalid authorize endpoint: {e}")))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.config.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("response_mode", "query")
                .append_pair("scope", &self.config.scope_string());
            if let Some(state) = state {
                pairs.append_pair("state", state);
            }
            pairs.append_pair("prompt", "select_account");
        }

        Ok(url)
    }

    /// Exchanges an authorization code for tokens and enters Authenticated.
    pub async fn exchange_code(&self, code: &str) -> Result<Session> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", &self.config.scope_string()),
        ];

        let session = self.request_token(&form, TokenFailure::Exchange).await?;

        let mut guard = self.session.lock().await;
        *guard = Some(session.clone());
        self.persist(Some(&session));
        info!("authorization code exchanged, session established");
        Ok(session)
    }

    /// Returns the current session if unexpired, refreshing it otherwise.
    ///
    /// Refresh failures are not retried here; [`Error::SessionExpired`] tells
    /// the caller to restart the authorization-code flow.
    pub async fn get_valid_session(&self) -> Result<Session> {
        let mut guard = self.session.lock().await;
        match guard.clone() {
            Some(session) if !session.is_expired() => Ok(session),
            Some(session) => {
                let refreshed = self.refresh_locked(session).await;
                self.apply_refresh(&mut guard, refreshed)
            }
            None => Err(Error::SessionExpired {
                reason: "not authenticated".to_string(),
            }),
        }
    }

    /// Bounded re-authentication used by the gateway when the remote API
    /// rejects a token mid-call (clock skew, out-of-band revocation). If
    /// another caller already replaced the rejected token, the replacement is
    /// returned without touching the identity provider.
    pub async fn refresh_after_rejection(&self, stale_token: &str) -> Result<Session> {
        let mut guard = self.session.lock().await;
        match guard.clone() {
            Some(session) if session.access_token != stale_token => Ok(session),
            Some(session) => {
                let refreshed = self.refresh_locked(session).await;
                self.apply_refresh(&mut guard, refreshed)
            }
            None => Err(Error::SessionExpired {
                reason: "not authenticated".to_string(),
            }),
        }
    }

    /// Destroys the session, in memory and at rest.
    pub async fn logout(&self) -> Result<()> {
        *self.session.lock().await = None;
        if let Some(store) = &self.store {
            store.clear()?;
        }
        info!("session destroyed");
        Ok(())
    }

    // Refresh body. Caller must hold the session lock.
    async fn refresh_locked(&self, current: Session) -> Result<Session> {
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            return Err(Error::SessionExpired {
                reason: "access token expired and no refresh token was granted".to_string(),
            });
        };

        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", &self.config.scope_string()),
        ];

        let mut session = self.request_token(&form, TokenFailure::Refresh).await?;
        // Providers may rotate or omit the refresh token; keep the old one
        // when the response carries none.
        if session.refresh_token.is_none() {
            session.refresh_token = current.refresh_token;
        }
        info!("access token refreshed, new expiry {}", session.expires_at);
        Ok(session)
    }

    fn apply_refresh(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, Option<Session>>,
        refreshed: Result<Session>,
    ) -> Result<Session> {
        match refreshed {
            Ok(session) => {
                **guard = Some(session.clone());
                self.persist(Some(&session));
                Ok(session)
            }
            Err(error) => {
                // Refresh path is unusable: drop the session so the state
                // machine re-enters Unauthenticated.
                warn!("token refresh failed, clearing session: {error}");
                **guard = None;
                self.persist(None);
                Err(error)
            }
        }
    }

    async fn request_token(&self, form: &[(&str, &str)], kind: TokenFailure) -> Result<Session> {
        let endpoint = self.config.token_endpoint();
        let response = self.http.post(&endpoint).form(form).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(kind.error(token_failure_reason(status, &body)));
        }

        match serde_json::from_str::<TokenResponse>(&body) {
            Ok(token) => Ok(Session::from_token_response(token)),
            Err(e) => Err(kind.error(format!("token response missing required fields: {e}"))),
        }
    }

    fn persist(&self, session: Option<&Session>) {
        let Some(store) = &self.store else {
            return;
        };
        // Best effort: a broken store must not take down an otherwise valid
        // authentication path.
        let outcome = match session {
            Some(session) => store.save(session),
            None => store.clear(),
        };
        if let Err(error) = outcome {
            warn!("failed to persist session state: {error}");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TokenFailure {
    Exchange,
    Refresh,
}

impl TokenFailure {
    fn error(self, reason: String) -> Error {
        match self {
            Self::Exchange => Error::AuthExchange { reason },
            Self::Refresh => Error::SessionExpired { reason },
        }
    }
}

fn token_failure_reason(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(parsed) if !parsed.error_description.is_empty() => {
            format!("{}: {}", parsed.error, parsed.error_description)
        }
        Ok(parsed) => parsed.error,
        Err(_) => format!("status {}: {}", status, redact_response_body(body)),
    }
}

/// Generates a random URL-safe `state` value for CSRF protection.
pub fn generate_state() -> Result<String> {
    let mut bytes = [0u8; STATE_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| Error::Config("failed to generate random state".to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
