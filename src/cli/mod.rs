//! # CLI Module
//!
//! Operator commands for the `oauth-realm` binary.
//!
//! ### `check`
//!
//! Authenticate one `Authorization` header value against the configured IdP
//! and print the outcome as JSON:
//!
//! ```bash
//! oauth-realm --config realm.yml check --header "Bearer 2YotnFZFEjr1zCsicMWpAA"
//! ```
//!
//! ### `roles`
//!
//! Print the roles the role mapping file grants to a user:
//!
//! ```bash
//! oauth-realm --config realm.yml roles alice
//! ```
//!
//! ### `watch`
//!
//! Keep watching the role mapping file and log every reload:
//!
//! ```bash
//! OAUTH_REALM_LOG_FORMAT=pretty oauth-realm --config realm.yml watch
//! ```
//!
//! Settings come from `--config` (or `OAUTH_REALM_CONFIG`), then any
//! `--set key=value` overrides.

mod commands;


pub use commands::{load_settings, run_cli, Cli, Commands};
