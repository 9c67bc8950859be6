use clap::Parser;
use ipwarm::cli::{self, Cli};
use ipwarm::config::AppConfig;
use ipwarm::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let logging = logging::init_logging(config.log_dir.as_deref())?;
    tracing::debug!(?config, "Configuration loaded");

    cli::execute(cli, config, &logging).await
}
