use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use triagen_core::broadcast::ObserverHandle;
use triagen_core::{Actor, Engine, EngineConfig, Role};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (TRIAGEN_* environment variables still apply)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Escalation journal path (overrides TRIAGEN_JOURNAL_PATH)
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Delay of the response check in seconds (overrides TRIAGEN_RESPONSE_DELAY_SECS)
    #[arg(long)]
    response_delay_secs: Option<u64>,

    /// Log every event published on the general topic
    #[arg(long, default_value_t = false)]
    tail: bool,

    /// Print the resolved configuration as TOML and exit
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

fn resolve_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::from_env().context("reading TRIAGEN_* environment")?,
    };
    if let Some(journal) = &args.journal {
        config.journal_path = Some(journal.clone());
    }
    if let Some(secs) = args.response_delay_secs {
        config.response_check_delay_secs = secs;
    }
    config.validate().context("validating config")?;
    Ok(config)
}

async fn tail(mut observer: ObserverHandle) {
    while let Some(envelope) = observer.recv().await {
        info!(
            topic = %envelope.topic,
            event = %envelope.name,
            payload = %envelope.payload,
            "Published"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;

    if args.print_config {
        print!(
            "{}",
            toml::to_string_pretty(&config).context("serializing config")?
        );
        return Ok(());
    }

    info!(
        journal = ?config.journal_path,
        response_delay_secs = config.response_check_delay_secs,
        "Triagen daemon starting"
    );

    let mut engine = Engine::from_config(config).context("building engine")?;
    engine.seed_teams().await.context("seeding teams")?;

    if args.tail {
        let observer = engine
            .registry()
            .connect(&Actor::new("triagen-daemon", Role::Admin));
        tokio::spawn(tail(observer));
    }

    engine.start();
    info!("Ready. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("Shutting down");
    engine.shutdown().await;
    Ok(())
}
