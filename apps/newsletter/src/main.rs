use std::{io, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{CancelHandle, HttpNewsletterApi, SubscriptionFlow};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod wizard;

#[derive(Parser, Debug)]
#[command(about = "Subscribe to the newsletter and choose the teams to follow")]
struct Args {
    /// Base url of the newsletter API.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Subscribe without prompting.
    #[arg(long)]
    email: Option<String>,
    /// Team id to follow in unattended mode; repeat for several teams.
    #[arg(long = "team", requires = "email")]
    teams: Vec<i64>,
}

/// First Ctrl-C abandons the request in flight, a second one quits.
fn spawn_interrupt_watcher(cancel: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        cancel.cancel();
        warn!("newsletter: interrupted, pending request abandoned; press Ctrl-C again to quit");
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(args.config.as_deref())?;
    if let Some(api_url) = args.api_url {
        settings.api_base_url = api_url;
    }
    info!(
        "newsletter: api={} timeout_secs={}",
        settings.api_base_url, settings.request_timeout_secs
    );

    let api = HttpNewsletterApi::with_timeout(&settings.api_base_url, settings.request_timeout())
        .context("failed to build API client")?;
    let mut flow = SubscriptionFlow::new(Arc::new(api));
    let mut stdout = io::stdout();
    spawn_interrupt_watcher(flow.cancel_handle());

    match args.email {
        Some(email) => wizard::run_unattended(&mut flow, &email, &args.teams, &mut stdout).await,
        None => {
            let stdin = io::stdin();
            wizard::run_interactive(&mut flow, &mut stdin.lock(), &mut stdout).await
        }
    }
}
