use clap::Parser;
use oauth_realm::cli::{run_cli, Cli};
use oauth_realm::logging::{init_logging_with_config, LogConfig};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging_with_config(&LogConfig::from_env())?;
    run_cli(cli)
}
