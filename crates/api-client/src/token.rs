//! OAuth2 token lifecycle.
//!
//! `TokenManager` owns the credential state machine: login/exchange into a
//! session, refresh on expiry, best-effort revoke on logout, and a hard
//! `reset` that clears everything. The HTTP layer consults
//! [`TokenManager::access_token`] before every authorized request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, warn};
use tokio::sync::Mutex;

use mirrorkit_core::SecretStore;

use crate::auth::{AuthClient, TokenResponse};
use crate::error::{ApiError, Result};

const ACCESS_TOKEN_KEY: &str = "accessToken";
const ACCESS_TOKEN_EXPIRY_KEY: &str = "accessTokenExpiry";
const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Treat a token as expired this many seconds before its actual expiry so
/// requests in flight at the boundary do not race the server's clock.
const EXPIRY_LEEWAY_SECS: i64 = 30;

/// Current credential state.
///
/// The access token may be absent or expired while the refresh token is
/// present; the session counts as logged in for as long as a refresh token
/// exists.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub access_token: Option<String>,
    pub access_token_expiry: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn logged_in(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Access token if present and not within the expiry leeway.
    fn valid_access_token(&self) -> Option<String> {
        let token = self.access_token.as_ref()?;
        let expiry = self.access_token_expiry?;
        if Utc::now() + ChronoDuration::seconds(EXPIRY_LEEWAY_SECS) < expiry {
            Some(token.clone())
        } else {
            None
        }
    }
}

/// Notified when the session is torn down so the owning layer can drop
/// in-flight work and present a logged-out state.
pub trait SessionDelegate: Send + Sync {
    fn session_reset(&self);
}

/// OAuth2 token state machine.
pub struct TokenManager {
    auth: AuthClient,
    secrets: Arc<dyn SecretStore>,
    delegate: Option<Arc<dyn SessionDelegate>>,
    state: Mutex<Credential>,
    /// Single-flight guard: concurrent refreshes queue here, and the waiters
    /// reuse the winner's token instead of issuing their own request.
    flight: Mutex<()>,
    /// Bumped on every reset. Results from requests started under an older
    /// epoch are discarded rather than resurrecting a torn-down session.
    epoch: AtomicU64,
}

impl TokenManager {
    /// Create a manager, loading any persisted credential from the secret
    /// store.
    pub fn new(
        auth: AuthClient,
        secrets: Arc<dyn SecretStore>,
        delegate: Option<Arc<dyn SessionDelegate>>,
    ) -> Result<Self> {
        let credential = Self::load_credential(secrets.as_ref())?;
        debug!(
            "Token manager initialized (logged_in={})",
            credential.logged_in()
        );
        Ok(Self {
            auth,
            secrets,
            delegate,
            state: Mutex::new(credential),
            flight: Mutex::new(()),
            epoch: AtomicU64::new(0),
        })
    }

    fn load_credential(secrets: &dyn SecretStore) -> Result<Credential> {
        let access_token = secrets.get_secret(ACCESS_TOKEN_KEY)?;
        let access_token_expiry = secrets
            .get_secret(ACCESS_TOKEN_EXPIRY_KEY)?
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        let refresh_token = secrets.get_secret(REFRESH_TOKEN_KEY)?;
        Ok(Credential {
            access_token,
            access_token_expiry,
            refresh_token,
        })
    }

    pub async fn logged_in(&self) -> bool {
        self.state.lock().await.logged_in()
    }

    /// Monotonic counter identifying the current session generation.
    pub fn session_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Password login. Rejected while a session already exists.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.logged_in() {
            return Err(ApiError::AlreadyLoggedIn);
        }
        match self.auth.login(username, password).await {
            Ok(response) => self.store_response(&mut state, response),
            Err(err) => Err(self.absorb_failure(&mut state, err)),
        }
    }

    /// Authorization-code exchange. Rejected while a session already exists.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.logged_in() {
            return Err(ApiError::AlreadyLoggedIn);
        }
        match self.auth.exchange_authorization_code(code, redirect_uri).await {
            Ok(response) => self.store_response(&mut state, response),
            Err(err) => Err(self.absorb_failure(&mut state, err)),
        }
    }

    /// One-time migration of a pre-OAuth session token. Rejected while a
    /// session already exists.
    pub async fn exchange_legacy_token(&self, legacy_token: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.logged_in() {
            return Err(ApiError::AlreadyLoggedIn);
        }
        match self.auth.exchange_legacy_token(legacy_token).await {
            Ok(response) => self.store_response(&mut state, response),
            Err(err) => Err(self.absorb_failure(&mut state, err)),
        }
    }

    /// Return a usable access token, refreshing first when the cached one is
    /// expired. This is the request-interceptor entry point.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.state.lock().await.valid_access_token() {
            return Ok(token);
        }
        self.refresh().await
    }

    /// Refresh the access token. Concurrent callers are collapsed into a
    /// single request; a missing refresh token resets the session before the
    /// error surfaces.
    pub async fn refresh(&self) -> Result<String> {
        let _flight = self.flight.lock().await;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let snapshot = self.state.lock().await.clone();
        // Another caller may have finished refreshing while we waited on the
        // flight guard.
        if let Some(token) = snapshot.valid_access_token() {
            return Ok(token);
        }
        let Some(refresh_token) = snapshot.refresh_token else {
            let mut state = self.state.lock().await;
            self.reset_locked(&mut state);
            return Err(ApiError::MissingRefreshToken);
        };

        match self.auth.refresh(&refresh_token).await {
            Ok(response) => {
                let mut state = self.state.lock().await;
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    debug!("Discarding refresh result from a reset session");
                    return Err(ApiError::MissingRefreshToken);
                }
                let token = response.access_token.clone();
                self.store_response(&mut state, response)?;
                Ok(token)
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                Err(self.absorb_failure(&mut state, err))
            }
        }
    }

    /// Best-effort revoke of the refresh token, then an unconditional reset.
    pub async fn logout(&self) {
        let refresh_token = self.state.lock().await.refresh_token.clone();
        if let Some(token) = refresh_token {
            if let Err(err) = self.auth.revoke(&token).await {
                warn!("Token revocation failed, resetting anyway: {}", err);
            }
        }
        self.reset().await;
    }

    /// Clear the session: memory, persisted secrets, and epoch. Always
    /// succeeds; secret-store failures are logged, not surfaced.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        self.reset_locked(&mut state);
    }

    fn reset_locked(&self, state: &mut Credential) {
        *state = Credential::default();
        for key in [ACCESS_TOKEN_KEY, ACCESS_TOKEN_EXPIRY_KEY, REFRESH_TOKEN_KEY] {
            if let Err(err) = self.secrets.delete_secret(key) {
                warn!("Failed to clear secret '{}': {}", key, err);
            }
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(delegate) = &self.delegate {
            delegate.session_reset();
        }
        debug!("Session reset");
    }

    /// Fatal server rejections tear the session down before the error
    /// surfaces; everything else passes through untouched.
    fn absorb_failure(&self, state: &mut Credential, err: ApiError) -> ApiError {
        if err.is_fatal_auth() {
            warn!("Fatal auth error, resetting session: {}", err);
            self.reset_locked(state);
        }
        err
    }

    fn store_response(&self, state: &mut Credential, response: TokenResponse) -> Result<()> {
        let expiry = Utc::now() + ChronoDuration::seconds(response.expires_in);
        state.access_token = Some(response.access_token);
        state.access_token_expiry = Some(expiry);
        // The server may rotate the refresh token or retain the old one.
        if let Some(refresh_token) = response.refresh_token {
            state.refresh_token = Some(refresh_token);
        }

        if let Some(token) = &state.access_token {
            self.secrets
                .set_secret(ACCESS_TOKEN_KEY, token)
                .map_err(ApiError::Core)?;
        }
        self.secrets
            .set_secret(ACCESS_TOKEN_EXPIRY_KEY, &expiry.timestamp().to_string())
            .map_err(ApiError::Core)?;
        if let Some(refresh_token) = &state.refresh_token {
            self.secrets
                .set_secret(REFRESH_TOKEN_KEY, refresh_token)
                .map_err(ApiError::Core)?;
        }
        Ok(())
    }
}
