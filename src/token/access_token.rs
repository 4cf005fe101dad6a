use crate::error::AuthError;
use std::fmt;

/// Case-sensitive scheme prefix, single space included.
pub const BEARER_AUTH_PREFIX: &str = "Bearer ";

/// A bearer access token taken from an `Authorization` header.
///
/// Only [`AccessToken::parse`] builds one, so the token string is never empty.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccessToken {
    token: String,
}

impl AccessToken {
    /// Extract the token from an `Authorization` header value.
    ///
    /// - no header, or any other scheme: `Ok(None)`, another realm may own it
    /// - `Bearer ` followed by blanks only: [`AuthError::MalformedCredential`]
    /// - otherwise the trimmed remainder
    ///
    /// ```rust
    /// use oauth_realm::token::AccessToken;
    ///
    /// let token = AccessToken::parse(Some("Bearer  abc ")).unwrap().unwrap();
    /// assert_eq!(token.as_str(), "abc");
    /// assert!(AccessToken::parse(Some("Basic dXNlcjpwYXNz")).unwrap().is_none());
    /// assert!(AccessToken::parse(Some("Bearer   ")).is_err());
    /// ```
    pub fn parse(header: Option<&str>) -> Result<Option<Self>, AuthError> {
        let Some(header) = header else {
            return Ok(None);
        };
        let Some(rest) = header.strip_prefix(BEARER_AUTH_PREFIX) else {
            return Ok(None);
        };
        let token = rest.trim();
        if token.is_empty() {
            return Err(AuthError::MalformedCredential);
        }
        Ok(Some(Self {
            token: token.to_string(),
        }))
    }

    /// Whether the header uses the bearer scheme at all.
    #[must_use]
    pub fn is_bearer(header: &str) -> bool {
        header.starts_with(BEARER_AUTH_PREFIX)
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Header form, `Bearer <token>`.
    #[must_use]
    pub fn principal(&self) -> String {
        format!("{BEARER_AUTH_PREFIX}{}", self.token)
    }

    /// Log-safe fingerprint of the token.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        super::fingerprint(&self.token)
    }
}

// The raw token is a credential: keep it out of debug output.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
