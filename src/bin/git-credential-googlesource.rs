use std::io::Write;

use anyhow::Context;
use clap::Parser;
use googlesource_auth::{
    credentials::{Credentials, Selector},
    gitconfig::GitBinary,
    helper::{self, Credential, USERNAME},
};
use tracing::debug;

/// git credential helper for googlesource.com and Cloud Source Repositories.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// The credential helper action: get, store or erase.
    action: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    googlesource_auth::init_tracing("warn");
    let args = Args::parse();

    if args.action != "get" {
        return Ok(());
    }

    let request = Credential::read(std::io::stdin().lock())
        .context("cannot read the credential request")?;
    let git = GitBinary::find().context("cannot find git")?;
    let Some(url) = helper::request_url(&git, &request).await? else {
        debug!(message = "Skipping unsupported host", host = ?request.host);
        return Ok(());
    };

    let credentials = Credentials::new(git, Selector::default());
    let token = credentials
        .make_token(Some(&url))
        .await
        .with_context(|| format!("cannot create a token for {}", url))?;

    let mut stdout = std::io::stdout().lock();
    request
        .answer(USERNAME, token.access_token())
        .write(&mut stdout)
        .context("cannot write the credential")?;
    stdout.flush()?;
    Ok(())
}
