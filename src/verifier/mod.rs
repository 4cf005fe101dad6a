//! # Token Verifiers
//!
//! A [`TokenVerifier`] answers "what does the IdP know about this token?".
//!
//! - [`RemoteTokenVerifier`] asks the IdP token-info endpoint over HTTP
//! - [`CachingTokenVerifier`] decorates any verifier with a bounded TTL cache
//!   and coalesces concurrent lookups of the same token into one call
//!
//! ```rust,no_run
//! use oauth_realm::token::{MapperSettings, TokenInfoMapper};
//! use oauth_realm::verifier::{
//!     CacheSettings, CachingTokenVerifier, HttpClientSettings, RemoteTokenVerifier,
//!     TokenVerifier,
//! };
//! use std::sync::Arc;
//!
//! let mapper = TokenInfoMapper::new(MapperSettings::new("user_id", "expires_in", "scope"));
//! let remote = RemoteTokenVerifier::new(
//!     "https://idp.example/oauth2/tokeninfo",
//!     mapper,
//!     HttpClientSettings::default(),
//! )?;
//! let verifier = CachingTokenVerifier::new(Arc::new(remote), CacheSettings::default());
//! let info = verifier.token_info("some-token")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::AuthError;
use crate::token::TokenInfo;
use std::sync::Arc;

pub mod caching;
pub mod remote;

pub use caching::{CacheSettings, CacheStats, CachingTokenVerifier, ExpirationPredicate};
pub use remote::{HttpClientSettings, ProxySettings, RemoteTokenVerifier, RemoteVerifierError};

/// Resolves a raw token string to its [`TokenInfo`].
///
/// - `Ok(Some(info))` the token is known
/// - `Ok(None)` the token is unknown (no usable diagnostic)
/// - `Err(_)` verification could not be completed, or the IdP explained a refusal
pub trait TokenVerifier: Send + Sync {
    fn token_info(&self, token: &str) -> Result<Option<TokenInfo>, AuthError>;
}

impl<T: TokenVerifier + ?Sized> TokenVerifier for Arc<T> {
    fn token_info(&self, token: &str) -> Result<Option<TokenInfo>, AuthError> {
        (**self).token_info(token)
    }
}

impl<T: TokenVerifier + ?Sized> TokenVerifier for Box<T> {
    fn token_info(&self, token: &str) -> Result<Option<TokenInfo>, AuthError> {
        (**self).token_info(token)
    }
}
