//! HTTP layer: OAuth2 token lifecycle and authorized collection fetching.

mod auth;
mod collections;
mod error;
mod token;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthClient, TokenResponse};
pub use collections::CollectionClient;
pub use error::{ApiError, ApiRetryClass, AuthErrorCode, Result};
pub use token::{Credential, SessionDelegate, TokenManager};
