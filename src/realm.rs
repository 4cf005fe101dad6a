//! # OAuth Realm
//!
//! Ties the pieces together for one request:
//!
//! ```text
//! Authorization header
//!   -> AccessToken::parse          not bearer: NotApplicable
//!   -> TokenVerifier::token_info   cache, then IdP
//!   -> RoleMapper::roles_for
//!   -> Principal { user_id, roles }  or  Rejection (401 + Bearer challenge)
//! ```
//!
//! Every failure collapses to the same 401; the cause is only logged.

use crate::error::{AuthError, Rejection};
use crate::roles::{RoleMapper, RoleMappingWatcher};
use crate::settings::{RealmSettings, SettingsError};
use crate::token::AccessToken;
use crate::verifier::{
    CacheSettings, CacheStats, CachingTokenVerifier, RemoteTokenVerifier, RemoteVerifierError,
    TokenVerifier,
};
use http::{header, HeaderMap};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Realm type identifier.
pub const REALM_TYPE: &str = "oauth";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub roles: BTreeSet<String>,
    /// Scopes granted to the token, for the protected service to inspect
    pub scopes: BTreeSet<String>,
}

impl Principal {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// What arrived with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// An HTTP request and its `Authorization` header, if any
    Http { authorization: Option<String> },
    /// Internal transport traffic; never handled by this realm
    Transport,
}

impl Credentials {
    pub fn http(authorization: Option<&str>) -> Self {
        Credentials::Http {
            authorization: authorization.map(str::to_string),
        }
    }

    /// Take the `Authorization` header from a request. A header that is not
    /// valid text counts as absent.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::http(
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok()),
        )
    }
}

/// Result of [`OAuthRealm::authenticate_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Not a bearer credential; another realm may handle it
    NotApplicable,
    Authenticated(Principal),
    Rejected(Rejection),
}

#[derive(Debug, Error)]
pub enum RealmError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Verifier(#[from] RemoteVerifierError),
}

/// Bearer-token realm backed by IdP token introspection.
pub struct OAuthRealm {
    name: String,
    verifier: Arc<dyn TokenVerifier>,
    cache: Option<Arc<CachingTokenVerifier>>,
    roles: Arc<RoleMapper>,
    watcher: Option<RoleMappingWatcher>,
}

impl OAuthRealm {
    /// A realm over any verifier. Role reloads do not touch the verifier.
    pub fn new(
        name: impl Into<String>,
        verifier: Arc<dyn TokenVerifier>,
        roles: Arc<RoleMapper>,
    ) -> Self {
        Self {
            name: name.into(),
            verifier,
            cache: None,
            roles,
            watcher: None,
        }
    }

    /// A realm over a token cache; every role mapping reload empties the
    /// cache so role changes apply from the next request on.
    pub fn with_cache(
        name: impl Into<String>,
        cache: Arc<CachingTokenVerifier>,
        roles: Arc<RoleMapper>,
    ) -> Self {
        let on_reload = Arc::clone(&cache);
        roles.add_listener(move || on_reload.invalidate_all());
        Self {
            name: name.into(),
            verifier: Arc::clone(&cache) as Arc<dyn TokenVerifier>,
            cache: Some(cache),
            roles,
            watcher: None,
        }
    }

    /// Build the full realm: IdP client, token cache, role mapping and its
    /// file watcher.
    ///
    /// A role mapping directory that cannot be watched is logged and the
    /// realm keeps the mapping loaded at startup.
    pub fn from_settings(settings: &RealmSettings) -> Result<Self, RealmError> {
        let remote = RemoteTokenVerifier::from_settings(settings)?;
        let cache = Arc::new(CachingTokenVerifier::new(
            Arc::new(remote),
            CacheSettings::from_settings(settings)?,
        ));
        let roles = Arc::new(RoleMapper::from_settings(settings)?);

        let mut realm = Self::with_cache(settings.realm_name(), cache, Arc::clone(&roles));
        match roles.watch() {
            Ok(watcher) => realm.watcher = Some(watcher),
            Err(e) => error!(
                path = %roles.path().display(),
                error = %e,
                "cannot watch role mapping file, changes need a restart"
            ),
        }
        info!(realm = %realm.name, "oauth realm ready");
        Ok(realm)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn realm_type(&self) -> &'static str {
        REALM_TYPE
    }

    #[must_use]
    pub fn supports(&self, credentials: &Credentials) -> bool {
        matches!(credentials, Credentials::Http { .. })
    }

    /// The bearer token carried by `credentials`, if this realm applies.
    pub fn token(&self, credentials: &Credentials) -> Result<Option<AccessToken>, AuthError> {
        match credentials {
            Credentials::Http { authorization } => AccessToken::parse(authorization.as_deref()),
            Credentials::Transport => Ok(None),
        }
    }

    /// Resolve a token to a principal.
    pub fn authenticate(&self, token: &AccessToken) -> Result<Principal, AuthError> {
        let info = match self.verifier.token_info(token.as_str()) {
            Ok(Some(info)) if !info.is_expired() => info,
            Ok(_) => {
                debug!(token = %token.fingerprint(), "token unknown or expired");
                return Err(AuthError::VerificationAbsent);
            }
            Err(e) => {
                info!(
                    realm = %self.name,
                    token = %token.fingerprint(),
                    kind = e.kind(),
                    error = %e,
                    "authentication failed"
                );
                return Err(e);
            }
        };

        let roles = self.roles.roles_for(&info.user_id, &info.scopes);
        debug!(user = %info.user_id, roles = ?roles, "authenticated");
        Ok(Principal {
            user_id: info.user_id,
            roles,
            scopes: info.scopes,
        })
    }

    /// Single entry point for a request.
    pub fn authenticate_request(&self, credentials: &Credentials) -> AuthOutcome {
        let token = match self.token(credentials) {
            Ok(Some(token)) => token,
            Ok(None) => return AuthOutcome::NotApplicable,
            Err(e) => {
                debug!(kind = e.kind(), "rejecting bearer credential");
                return AuthOutcome::Rejected(e.rejection());
            }
        };
        match self.authenticate(&token) {
            Ok(principal) => AuthOutcome::Authenticated(principal),
            Err(e) => AuthOutcome::Rejected(e.rejection()),
        }
    }

    /// Users are only known through their tokens.
    #[must_use]
    pub fn lookup_user(&self, _username: &str) -> Option<Principal> {
        None
    }

    #[must_use]
    pub fn supports_user_lookup(&self) -> bool {
        false
    }

    /// Token cache counters, when the realm runs over a cache.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    #[must_use]
    pub fn role_mapper(&self) -> &Arc<RoleMapper> {
        &self.roles
    }

    /// Whether the role mapping file is being watched.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }
}
