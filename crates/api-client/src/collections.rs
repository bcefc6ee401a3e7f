//! Authorized collection fetching.
//!
//! `CollectionClient` pulls whole server collections page by page, decoding
//! elements leniently, and implements the [`CollectionSource`] seam the sync
//! layer reconciles against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use mirrorkit_core::{decode_collection, CollectionSource, RemoteRecord};

use crate::error::{ApiError, Result};
use crate::token::TokenManager;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Field carrying the stable unique id in every collection element.
const ID_FIELD: &str = "id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionPage {
    items: Vec<serde_json::Value>,
    #[serde(default)]
    next_page: Option<u64>,
}

/// Client for the collections API.
pub struct CollectionClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl CollectionClient {
    pub fn new(base_url: &str, tokens: Arc<TokenManager>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// GET one page of `/api/v1/collections/{name}`.
    async fn fetch_page(
        &self,
        token: &str,
        name: &str,
        scope: Option<&str>,
        page: Option<u64>,
    ) -> Result<CollectionPage> {
        let url = format!("{}/api/v1/collections/{}", self.base_url, name);
        let mut request = self.client.get(&url).bearer_auth(token);
        if let Some(scope) = scope {
            request = request.query(&[("scope", scope)]);
        }
        if let Some(page) = page {
            request = request.query(&[("page", page.to_string())]);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(ApiError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize collection page. Body: {}, Error: {}",
                body,
                e
            );
            ApiError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Fetch one page, forcing exactly one token refresh + retry when the
    /// server rejects the bearer token.
    async fn fetch_page_authorized(
        &self,
        name: &str,
        scope: Option<&str>,
        page: Option<u64>,
    ) -> Result<CollectionPage> {
        let token = self.tokens.access_token().await?;
        match self.fetch_page(&token, name, scope, page).await {
            Err(err) if err.status_code() == Some(401) => {
                debug!("Bearer token rejected, refreshing once and retrying");
                let token = self.tokens.refresh().await?;
                self.fetch_page(&token, name, scope, page).await
            }
            other => other,
        }
    }

    /// Fetch and decode an entire collection, following `nextPage` until
    /// exhausted. Individually undecodable elements are dropped.
    pub async fn fetch_all(&self, name: &str, scope: Option<&str>) -> Result<Vec<RemoteRecord>> {
        let mut records = Vec::new();
        let mut page = None;
        loop {
            let current = self.fetch_page_authorized(name, scope, page).await?;
            let envelope = serde_json::Value::Array(current.items);
            records.extend(decode_collection(&envelope, ID_FIELD).map_err(ApiError::Core)?);
            match current.next_page {
                Some(next) => page = Some(next),
                None => break,
            }
        }
        debug!("Fetched {} record(s) from collection '{}'", records.len(), name);
        Ok(records)
    }
}

#[async_trait]
impl CollectionSource for CollectionClient {
    async fn fetch_collection(
        &self,
        collection: &str,
        scope: Option<&str>,
    ) -> mirrorkit_core::Result<Vec<RemoteRecord>> {
        self.fetch_all(collection, scope).await.map_err(Into::into)
    }
}
