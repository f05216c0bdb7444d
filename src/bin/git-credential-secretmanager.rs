use anyhow::Context;
use clap::Parser;
use googlesource_auth::{
    auth::application_default::Environment,
    secretmanager::{self, SecretManagerClient, VERSION_ENV},
};

/// git credential helper answering with a password stored in Secret Manager.
#[derive(Debug, Parser)]
#[command(about)]
struct Args {
    /// Secret version, e.g. projects/p/secrets/s/versions/latest.
    #[arg(long, env = VERSION_ENV)]
    version: Option<String>,
    /// The credential helper action: get, store or erase.
    action: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    googlesource_auth::init_tracing("warn");
    let args = Args::parse();

    let version = args
        .version
        .filter(|version| !version.is_empty())
        .with_context(|| format!("--version or {} must be set", VERSION_ENV))?;
    if args.action.as_deref() != Some("get") {
        return Ok(());
    }

    let client = SecretManagerClient::new(reqwest::Client::new(), &Environment::from_env())
        .context("cannot find application default credentials")?;
    secretmanager::generate_creds(
        std::io::stdin().lock(),
        std::io::stdout().lock(),
        &client,
        &version,
    )
    .await?;
    Ok(())
}
