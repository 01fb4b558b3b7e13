use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tokwatch_common::{BrowserBackend, Config};
use tokwatch_scout::accounts::{load_accounts, AccountListError};
use tokwatch_scout::account::SessionSettings;
use tokwatch_scout::browser::{BrowserSession, BrowserlessSession, ChromeSession};
use tokwatch_scout::recovery::{OperatorPrompt, RetryPolicy};
use tokwatch_scout::run::RunController;
use tokwatch_scout::writer::SnapshotWriter;

#[derive(Parser)]
#[command(name = "tokwatch-scout")]
#[command(about = "Snapshot the latest posts of monitored TikTok accounts")]
#[command(version)]
struct Cli {
    /// Account list, one handle per line (overrides USER_FILE)
    #[arg(long)]
    accounts: Option<PathBuf>,

    /// Directory for snapshot records (overrides LOGS_DIR)
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Posts to capture per account, at least 1 (overrides VIDEO_COUNT)
    #[arg(long, value_parser = parse_post_count)]
    posts: Option<usize>,

    /// Browser backend: chrome or browserless (overrides BROWSER_BACKEND)
    #[arg(long)]
    backend: Option<BrowserBackend>,

    /// Wait for the operator after an account stays blocked through all retries
    #[arg(long)]
    pause_on_block: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    if let Err(e) = init_logging() {
        eprintln!("Error: failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("tokwatch=info".parse()?);
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    info!("tokwatch scout starting");

    let mut config = Config::from_env()?;
    if let Some(path) = cli.accounts {
        config.user_file = path;
    }
    if let Some(dir) = cli.logs_dir {
        config.logs_dir = dir;
    }
    if let Some(posts) = cli.posts {
        config.video_count = posts;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    config.log_redacted();

    let accounts = match load_accounts(&config.user_file).await {
        Ok(accounts) => accounts,
        Err(e @ (AccountListError::Missing { .. } | AccountListError::Empty { .. })) => {
            error!("{e}");
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    match config.proxy.as_deref() {
        Some(_) => info!("Proxy configured, routing browser traffic through it"),
        None => info!("No proxy configured, connecting directly"),
    }
    let browser = build_browser(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let settings = SessionSettings {
        navigation_timeout: config.navigation_timeout,
        ready_timeout: config.ready_timeout,
        post_limit: config.video_count,
    };
    let retry = RetryPolicy::new(config.retry_max_attempts, config.retry_base);

    let mut controller = RunController::new(
        browser,
        SnapshotWriter::new(&config.logs_dir),
        settings,
        retry,
        config.account_budget,
        shutdown_rx,
    )?;
    if cli.pause_on_block {
        controller = controller.with_manual_override(Box::new(OperatorPrompt));
    }

    let report = controller.run(&accounts).await;

    for account in report.identity_mismatches() {
        info!(account = account.handle(), "Snapshot written with unverified identity");
    }
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn parse_post_count(raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn build_browser(config: &Config) -> Result<Box<dyn BrowserSession>> {
    let browser: Box<dyn BrowserSession> = match config.backend {
        BrowserBackend::Chrome => Box::new(ChromeSession::new(
            &config.chrome_bin,
            &config.user_agent,
            config.proxy.as_deref(),
        )),
        BrowserBackend::Browserless => {
            let url = config
                .browserless_url
                .as_deref()
                .context("BROWSERLESS_URL is required for the browserless backend")?;
            Box::new(BrowserlessSession::new(
                url,
                config.browserless_token.as_deref(),
                &config.user_agent,
                config.proxy.as_deref(),
            )?)
        }
    };
    Ok(browser)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, finishing current account then stopping"),
                    _ = sigterm.recv() => info!("Received SIGTERM, finishing current account then stopping"),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                info!("Received Ctrl+C, finishing current account then stopping");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received Ctrl+C, finishing current account then stopping");
    }
}
