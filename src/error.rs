//! # Error Module
//!
//! Every per-request failure of the realm is an [`AuthError`]. The variants keep
//! the internal distinction (malformed header, unknown token, IdP unreachable,
//! payload drift) for logs, while [`AuthError::challenge`] and
//! [`AuthError::rejection`] collapse all of them to the single externally
//! visible outcome: `401 Unauthorized` with a `Bearer` challenge.
//!
//! ```rust
//! use oauth_realm::error::AuthError;
//!
//! let err = AuthError::DelegateChallenge {
//!     www_authenticate: "error=invalid_token".to_string(),
//! };
//! assert_eq!(
//!     err.challenge().to_string(),
//!     r#"Bearer realm="security" charset="UTF-8" delegateError="error=invalid_token""#
//! );
//! ```

use http::{header, HeaderValue, Response, StatusCode};
use std::fmt;
use thiserror::Error;

/// Realm name advertised in every `WWW-Authenticate` challenge.
pub const CHALLENGE_REALM: &str = "security";

/// Authentication failure, per request.
///
/// `Clone` so that callers coalesced on one in-flight IdP call can all receive
/// the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// `Authorization` starts with `Bearer ` but carries no token.
    #[error("malformed bearer credential: empty token")]
    MalformedCredential,
    /// The IdP does not know the token (non-2xx without a challenge), or the
    /// resolved token info has expired.
    #[error("access token is unknown or expired")]
    VerificationAbsent,
    /// The IdP refused the token and explained why in its own challenge.
    #[error("identity provider rejected the token: {www_authenticate}")]
    DelegateChallenge {
        /// Raw `WWW-Authenticate` value returned by the IdP
        www_authenticate: String,
    },
    /// The IdP could not be reached (refused, timeout, DNS, truncated body).
    #[error("could not reach identity provider: {cause}")]
    Transport {
        /// Text of the underlying transport error
        cause: String,
    },
    /// The IdP answered 2xx but the body does not match the configured fields.
    #[error("cannot decode token info field '{field}': {reason}")]
    PayloadDecoding {
        /// Configured field name that failed (or `<body>` for a non-JSON body)
        field: String,
        /// What was wrong with it
        reason: String,
    },
}

impl AuthError {
    pub(crate) fn transport(cause: impl fmt::Display) -> Self {
        AuthError::Transport {
            cause: cause.to_string(),
        }
    }

    pub(crate) fn payload(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AuthError::PayloadDecoding {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly kind, used as a structured log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MalformedCredential => "malformed_credential",
            AuthError::VerificationAbsent => "verification_absent",
            AuthError::DelegateChallenge { .. } => "delegate_challenge",
            AuthError::Transport { .. } => "transport",
            AuthError::PayloadDecoding { .. } => "payload_decoding",
        }
    }

    /// The challenge to send back. Only an IdP-provided challenge leaks into
    /// the response; every other cause gets the generic one.
    #[must_use]
    pub fn challenge(&self) -> Challenge {
        match self {
            AuthError::DelegateChallenge { www_authenticate } => {
                Challenge::bearer().with_delegate_error(www_authenticate.clone())
            }
            _ => Challenge::bearer(),
        }
    }

    /// Collapse this error to the 401 rejection seen by the caller.
    #[must_use]
    pub fn rejection(&self) -> Rejection {
        Rejection {
            challenge: self.challenge(),
        }
    }
}

/// A `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Authentication scheme, always `Bearer` for this realm
    pub scheme: &'static str,
    /// Realm parameter
    pub realm: &'static str,
    /// Charset parameter
    pub charset: &'static str,
    /// IdP challenge text, forwarded as `delegateError`
    pub delegate_error: Option<String>,
}

impl Challenge {
    /// The generic `Bearer realm="security" charset="UTF-8"` challenge.
    #[must_use]
    pub fn bearer() -> Self {
        Self {
            scheme: "Bearer",
            realm: CHALLENGE_REALM,
            charset: "UTF-8",
            delegate_error: None,
        }
    }

    #[must_use]
    pub fn with_delegate_error(mut self, delegate_error: impl Into<String>) -> Self {
        self.delegate_error = Some(delegate_error.into());
        self
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} realm=\"{}\" charset=\"{}\"",
            self.scheme, self.realm, self.charset
        )?;
        if let Some(delegate) = &self.delegate_error {
            // quoted-string: escape `\` before `"`
            let escaped = delegate.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, " delegateError=\"{escaped}\"")?;
        }
        Ok(())
    }
}

/// The externally visible outcome of any failed authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub challenge: Challenge,
}

impl Rejection {
    /// Always `401 Unauthorized`.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    /// Header value for `WWW-Authenticate`.
    #[must_use]
    pub fn www_authenticate(&self) -> String {
        self.challenge.to_string()
    }

    /// Render the rejection as an HTTP response with a small JSON body.
    pub fn into_response(self) -> Response<String> {
        let body = serde_json::json!({
            "error": "unauthorized",
            "reason": "Authentication failed",
        })
        .to_string();

        let mut response = Response::new(body);
        *response.status_mut() = self.status();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        match HeaderValue::from_str(&self.www_authenticate()) {
            Ok(value) => {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
            Err(_) => {
                // IdP text with control characters: fall back to the generic challenge.
                if let Ok(value) = HeaderValue::from_str(&Challenge::bearer().to_string()) {
                    headers.insert(header::WWW_AUTHENTICATE, value);
                }
            }
        }
        response
    }
}
