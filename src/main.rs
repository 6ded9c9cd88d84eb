use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drci::batch::{classify_and_report, dedup_disable_issues, BatchContext};
use drci::config::AppConfig;
use drci::server::{create_router, AppState};
use drci::shutdown::{graceful_shutdown, wait_for_shutdown};

#[derive(Parser)]
#[command(name = "drci", about = "Classifies CI failures on pull requests and reports them")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify recently active pull requests and update their status comments once
    Run {
        /// Look back this many minutes for workflow activity
        #[arg(long)]
        window_minutes: Option<u64>,
    },
    /// Close duplicated disable issues
    DedupDisableIssues,
    /// Serve the HTTP trigger endpoint
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run { window_minutes } => {
            let window_minutes = window_minutes.unwrap_or(config.drci.window_minutes);
            let ctx = Arc::new(BatchContext::from_config(Arc::new(config))?);
            let summary = classify_and_report(ctx, window_minutes).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::DedupDisableIssues => {
            let ctx = BatchContext::from_config(Arc::new(config))?;
            let kept = dedup_disable_issues(&ctx).await?;
            for issue in kept {
                println!("#{} {}", issue.number, issue.title);
            }
        }
        Command::Serve => serve(config).await?,
    }

    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        repo = %config.github.repo_full_name(),
        "Starting Dr. CI server"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config)?);
    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&state).await;
    Ok(())
}
