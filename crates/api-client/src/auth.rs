//! OAuth2 HTTP client for the identity server.
//!
//! Thin wire layer: it speaks the token and revocation endpoints and
//! classifies structured rejections. Session state lives in
//! [`crate::token::TokenManager`].

use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::{ApiError, AuthErrorCode, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Successful response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
    /// Absent when the server retains the existing refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Structured error body from the identity server.
#[derive(Debug, Deserialize)]
struct OauthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the OAuth2 token and revocation endpoints.
#[derive(Debug, Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl AuthClient {
    /// Create a new auth client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the identity server (e.g., "https://auth.example.com")
    /// * `client_id` - The registered OAuth2 client id
    pub fn new(base_url: &str, client_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
        })
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("Auth response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("Auth response error ({}): {}", status, preview);
    }

    /// Parse a token endpoint response, mapping error bodies to
    /// [`ApiError::Oauth`] when they carry a structured code.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<OauthErrorResponse>(&body) {
                return Err(ApiError::Oauth {
                    status: status.as_u16(),
                    code: AuthErrorCode::parse(&error.error),
                    description: error.error_description.unwrap_or(error.error),
                });
            }
            return Err(ApiError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize auth response. Body: {}, Error: {}",
                body,
                e
            );
            ApiError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    async fn token_grant(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let url = format!("{}/oauth/token", self.base_url);
        let response = self.client.post(&url).form(form).send().await?;
        Self::parse_response(response).await
    }

    /// Password grant.
    ///
    /// POST /oauth/token (grant_type=password)
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResponse> {
        debug!("Requesting password grant for {}", username);
        self.token_grant(&[
            ("grant_type", "password"),
            ("client_id", &self.client_id),
            ("username", username),
            ("password", password),
        ])
        .await
    }

    /// Authorization-code grant.
    ///
    /// POST /oauth/token (grant_type=authorization_code)
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        debug!("Exchanging authorization code");
        self.token_grant(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.client_id),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    /// Exchange a pre-OAuth session token for a token pair. Used once when
    /// migrating sessions issued by the old login endpoint.
    ///
    /// POST /oauth/token (grant_type=legacy_token)
    pub async fn exchange_legacy_token(&self, legacy_token: &str) -> Result<TokenResponse> {
        debug!("Exchanging legacy session token");
        self.token_grant(&[
            ("grant_type", "legacy_token"),
            ("client_id", &self.client_id),
            ("token", legacy_token),
        ])
        .await
    }

    /// Refresh-token grant.
    ///
    /// POST /oauth/token (grant_type=refresh_token)
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        debug!("Requesting refresh grant");
        self.token_grant(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    /// Revoke a refresh token.
    ///
    /// POST /oauth/revoke
    pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
        let url = format!("{}/oauth/revoke", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);
        if !status.is_success() {
            return Err(ApiError::api(
                status.as_u16(),
                format!("Revoke failed: {}", body),
            ));
        }
        Ok(())
    }
}
