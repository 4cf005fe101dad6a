//! # oauth-realm
//!
//! Bearer-token authentication realm. A request's `Authorization: Bearer`
//! token is verified against an identity provider's token-info
//! (introspection) endpoint, the answer is cached, and the user is mapped to
//! roles from a hot-reloaded YAML file.
//!
//! ## Architecture
//!
//! - **[`token`]** - bearer parsing, [`TokenInfo`](token::TokenInfo) and the
//!   introspection body decoder
//! - **[`verifier`]** - the remote IdP verifier and the coalescing TTL cache
//! - **[`roles`]** - identity → roles mapping with file watching
//! - **[`realm`]** - [`OAuthRealm`], one authentication decision per request
//! - **[`error`]** - failure taxonomy and the `401` challenge
//! - **[`settings`]** - flat dotted-key configuration
//! - **[`logging`]** - `tracing` subscriber setup for the binary
//! - **[`cli`]** - operator commands
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oauth_realm::{AuthOutcome, Credentials, OAuthRealm, RealmSettings};
//!
//! let settings = RealmSettings::from_file("config/oauth_realm.yml")?;
//! let realm = OAuthRealm::from_settings(&settings)?;
//!
//! match realm.authenticate_request(&Credentials::http(Some("Bearer 2YotnFZFEjr1zCsicMWpAA"))) {
//!     AuthOutcome::Authenticated(principal) => println!("{} {:?}", principal.user_id, principal.roles),
//!     AuthOutcome::Rejected(rejection) => {
//!         let response = rejection.into_response();
//!         assert_eq!(response.status(), 401);
//!     }
//!     AuthOutcome::NotApplicable => {}
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli;
pub mod error;
pub mod logging;
pub mod realm;
pub mod roles;
pub mod settings;
pub mod token;
pub mod verifier;

pub use error::{AuthError, Challenge, Rejection};
pub use realm::{AuthOutcome, Credentials, OAuthRealm, Principal, REALM_TYPE};
pub use roles::{RoleMapper, RoleMapping, RoleMappingSettings};
pub use settings::{RealmSettings, SettingsError};
pub use token::{AccessToken, TokenInfo};
pub use verifier::{CachingTokenVerifier, RemoteTokenVerifier, TokenVerifier};
