use crate::realm::{AuthOutcome, Credentials, OAuthRealm};
use crate::roles::RoleMapper;
use crate::settings::RealmSettings;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Command-line interface for the OAuth realm
#[derive(Parser, Debug)]
#[command(name = "oauth-realm")]
#[command(about = "Bearer-token realm backed by IdP token introspection", long_about = None)]
pub struct Cli {
    /// Realm settings file (YAML)
    #[arg(short, long, global = true, env = "OAUTH_REALM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override a setting, e.g. `--set token-info.cache.max-size=100`
    #[arg(long = "set", global = true, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub overrides: Vec<(String, String)>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate one credential and print the outcome
    Check {
        /// Full `Authorization` header value
        #[arg(long, conflicts_with = "token", required_unless_present = "token")]
        header: Option<String>,

        /// Raw bearer token, sent as `Bearer <token>`
        #[arg(long)]
        token: Option<String>,
    },
    /// Print the roles mapped to a user
    Roles {
        /// User identifier as returned by the IdP
        user: String,
    },
    /// Watch the role mapping file and log reloads
    Watch {
        /// Stop after this many seconds instead of running until killed
        #[arg(long)]
        for_secs: Option<u64>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Settings file (if any) with the command line overrides applied.
pub fn load_settings(cli: &Cli) -> Result<RealmSettings> {
    let mut settings = match &cli.config {
        Some(path) => RealmSettings::from_file(path)
            .with_context(|| format!("loading realm settings from {}", path.display()))?,
        None => RealmSettings::new(),
    };
    for (key, value) in &cli.overrides {
        settings.set(key.clone(), value);
    }
    Ok(settings)
}

/// Run a parsed command line.
pub fn run_cli(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    match cli.command {
        Commands::Check { header, token } => {
            let header = match (header, token) {
                (Some(header), _) => header,
                (None, Some(token)) => format!("Bearer {token}"),
                (None, None) => bail!("either --header or --token is required"),
            };
            check(&settings, &header)
        }
        Commands::Roles { user } => {
            let mapper = RoleMapper::from_settings(&settings)?;
            let roles = mapper.roles_for(&user, &BTreeSet::new());
            println!(
                "{}",
                serde_json::json!({ "user_id": user, "roles": roles })
            );
            Ok(())
        }
        Commands::Watch { for_secs } => watch(&settings, for_secs.map(Duration::from_secs)),
    }
}

fn check(settings: &RealmSettings, header: &str) -> Result<()> {
    let realm = OAuthRealm::from_settings(settings).context("building realm")?;
    let outcome = realm.authenticate_request(&Credentials::http(Some(header)));
    let rendered = match &outcome {
        AuthOutcome::NotApplicable => serde_json::json!({ "outcome": "not_applicable" }),
        AuthOutcome::Authenticated(principal) => serde_json::json!({
            "outcome": "authenticated",
            "user_id": principal.user_id,
            "roles": principal.roles,
            "scopes": principal.scopes,
        }),
        AuthOutcome::Rejected(rejection) => serde_json::json!({
            "outcome": "rejected",
            "status": rejection.status().as_u16(),
            "www_authenticate": rejection.www_authenticate(),
        }),
    };
    println!("{rendered}");
    if matches!(outcome, AuthOutcome::Rejected(_)) {
        bail!("authentication rejected");
    }
    Ok(())
}

/// Log the size of every newly active mapping. The listener lives inside the
/// mapper, so it only holds a weak reference back to it.
pub(crate) fn log_reloads(mapper: &Arc<RoleMapper>) {
    let observed = Arc::downgrade(mapper);
    mapper.add_listener(move || {
        if let Some(mapper) = observed.upgrade() {
            info!(
                identities = mapper.mapping().identities(),
                "role mapping now active"
            );
        }
    });
}

fn watch(settings: &RealmSettings, limit: Option<Duration>) -> Result<()> {
    let mapper = Arc::new(RoleMapper::from_settings(settings)?);
    log_reloads(&mapper);
    let _watcher = mapper
        .watch()
        .with_context(|| format!("watching {}", mapper.path().display()))?;

    let started = Instant::now();
    loop {
        match limit {
            Some(limit) => {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    return Ok(());
                }
                std::thread::park_timeout(limit - elapsed);
            }
            None => std::thread::park(),
        }
    }
}
