use std::io::Write;

use anyhow::{bail, Context};
use clap::Parser;
use googlesource_auth::{
    credentials::{Credentials, Selector},
    gitconfig::GitBinary,
    helper::USERNAME,
};

/// GIT_ASKPASS helper answering with the account's access token.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// The prompt git shows, e.g. "Username for 'https://...': ".
    prompt: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    googlesource_auth::init_tracing("warn");
    let args = Args::parse();
    let prompt = args.prompt.to_lowercase();

    let answer = if prompt.contains("username") {
        USERNAME.to_owned()
    } else if prompt.contains("password") {
        let git = GitBinary::find().context("cannot find git")?;
        let credentials = Credentials::new(git, Selector::default());
        let token = credentials
            .make_token(None)
            .await
            .context("cannot create a token")?;
        token.access_token
    } else {
        bail!("unknown prompt: {:?}", args.prompt);
    };

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(answer.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
