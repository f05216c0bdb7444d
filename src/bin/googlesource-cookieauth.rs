use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use googlesource_auth::{
    cookieauth::{self, REFRESH_INTERVAL},
    credentials::{Credentials, Selector},
    gitconfig::GitBinary,
};
use tracing::{error, info};

const PROGRAM: &str = "googlesource-cookieauth";

/// Write a cookie file for git's http.cookieFile from the configured
/// accounts.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Where to write the cookies; "-" for stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Keep running and rewrite the cookies every 45 minutes.
    #[arg(long)]
    run_as_daemon: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    googlesource_auth::init_tracing("info");
    let args = Args::parse();

    if !args.run_as_daemon {
        return write_once(&args).await;
    }

    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(err) = write_once(&args).await {
            error!(message = "Cannot refresh cookies", error = ?err);
        }
    }
}

async fn write_once(args: &Args) -> anyhow::Result<()> {
    let git = GitBinary::find().context("cannot find git")?;
    let credentials = Credentials::new(git, Selector::default());
    let output = cookieauth::write_cookies(&credentials, args.output.as_deref(), PROGRAM)
        .await
        .context("cannot write cookies")?;
    if let cookieauth::Output::File(path) = output {
        info!(message = "Wrote cookies", path = %path.display());
    }
    Ok(())
}
