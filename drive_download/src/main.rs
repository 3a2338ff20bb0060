//! drive_download CLI - Download every file from Google Drive.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use drive_download::{
    download_all, AcquireAuthorization, Authenticator, DriveClient, InstalledAppFlow,
    ServiceAccountFlow, TokenStore,
};

/// Download files from Google Drive.
#[derive(Parser)]
#[command(name = "drive_download")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to save downloaded files.
    #[arg(long, default_value = "drive_download")]
    save_dir: PathBuf,

    /// Path to Google API OAuth client credentials file.
    #[arg(long, default_value = "credentials.json")]
    credentials: PathBuf,

    /// Path to token file.
    #[arg(long, default_value = "token.pkl")]
    token: PathBuf,

    /// Number of files to fetch per API call.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u32).range(1..=1000))]
    page_size: u32,

    /// Authenticate with a service account key instead of the browser consent flow.
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    service_account: Option<PathBuf>,

    /// Seconds to wait for the browser to complete the consent flow.
    #[arg(long, default_value_t = 300)]
    auth_timeout: u64,

    /// Print the consent URL without trying to open a browser.
    #[arg(long)]
    no_browser: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DRIVE_DOWNLOAD_LOG")
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(ChronoLocal::new("%H:%M:%S".to_string()))
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Program failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let flow: Box<dyn AcquireAuthorization> = match &cli.service_account {
        Some(path) => Box::new(
            ServiceAccountFlow::from_file(path)
                .with_context(|| format!("Failed to load service account from {:?}", path))?,
        ),
        None => Box::new(
            InstalledAppFlow::new(&cli.credentials)
                .with_timeout(Duration::from_secs(cli.auth_timeout))
                .with_browser(!cli.no_browser),
        ),
    };

    let authenticator = Authenticator::new(TokenStore::new(&cli.token), flow);
    let auth = authenticator
        .authenticate()
        .await
        .context("Authentication failed")?;

    let client = DriveClient::new(auth);
    let report = download_all(&client, &cli.save_dir, cli.page_size)
        .await
        .with_context(|| format!("Failed to prepare download directory {:?}", cli.save_dir))?;

    info!(
        "Summary: {} downloaded, {} skipped, {} failed",
        report.downloaded, report.skipped, report.failed
    );
    report.into_result().context("Could not list Drive files")?;

    Ok(())
}
