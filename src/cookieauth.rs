//! Writing a cookie file for every googlesource URL configured in git.

use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::future::try_join_all;
use tracing::debug;
use url::Url;

use crate::{
    cookies::{make_cookies, write_cookie_file, Cookie},
    credentials::{self, ConfigStore, Credentials},
    gitconfig::{self, GitBinary},
};

/// How often the daemon mode rewrites the cookie file.
pub const REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(45 * 60);
pub const KEY_COOKIE_FILE: &str = "google.cookieFile";
const DEFAULT_URLS: [&str; 2] = [
    "https://googlesource.com",
    "https://source.developers.google.com",
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read the list of URLs in git-config: {0}")]
    ListUrls(#[from] gitconfig::Error),
    #[error("cannot create a token for {url}: {source}")]
    Token {
        url: Url,
        #[source]
        source: credentials::Error,
    },
    #[error(transparent)]
    CookieFileConfig(#[from] credentials::config::Error),
    #[error("cannot determine the home directory")]
    NoHome,
    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the cookies go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout,
    File(PathBuf),
}

/// `urls` plus the root URLs of googlesource.com and Cloud Source
/// Repositories, unless already present.
pub fn with_default_urls(mut urls: Vec<Url>) -> Vec<Url> {
    for default in DEFAULT_URLS {
        let Ok(default) = Url::parse(default) else {
            continue;
        };
        let present = urls.iter().any(|url| {
            url.host_str() == default.host_str() && matches!(url.path(), "" | "/")
        });
        if !present {
            urls.push(default);
        }
    }
    urls
}

/// Cookies for all `urls`, resolved concurrently.
pub async fn collect_cookies<S>(
    credentials: &Credentials<S>,
    urls: &[Url],
) -> Result<Vec<Cookie>, Error>
where
    S: ConfigStore,
{
    let per_url = try_join_all(urls.iter().map(|url| async move {
        let token = credentials
            .make_token(Some(url))
            .await
            .map_err(|source| Error::Token {
                url: url.clone(),
                source,
            })?;
        Ok::<_, Error>(make_cookies(url, &token))
    }))
    .await?;
    Ok(per_url.into_iter().flatten().collect())
}

/// `explicit` if given (`-` meaning stdout), then `google.cookieFile`, then
/// `~/.git-credential-cache/googlesource-cookieauth-cookie`.
pub async fn output<S>(store: &S, explicit: Option<&Path>) -> Result<Output, Error>
where
    S: ConfigStore + ?Sized,
{
    let path = match explicit {
        Some(path) => Some(path.to_owned()),
        None => store.path_config(KEY_COOKIE_FILE, None).await?,
    };
    match path {
        Some(path) if path.as_os_str() == "-" => Ok(Output::Stdout),
        Some(path) => Ok(Output::File(path)),
        None => {
            let home = dirs::home_dir().ok_or(Error::NoHome)?;
            Ok(Output::File(
                home.join(".git-credential-cache")
                    .join("googlesource-cookieauth-cookie"),
            ))
        }
    }
}

/// Resolve every configured URL and write the cookie file once.
pub async fn write_cookies(
    credentials: &Credentials<GitBinary>,
    explicit_output: Option<&Path>,
    program: &str,
) -> Result<Output, Error> {
    let urls = with_default_urls(credentials.store.list_urls().await?);
    debug!(message = "Making cookies", urls = ?urls.iter().map(Url::as_str).collect::<Vec<_>>());

    let cookies = collect_cookies(credentials, &urls).await?;
    let output = output(&credentials.store, explicit_output).await?;

    match &output {
        Output::Stdout => write_cookie_file(std::io::stdout().lock(), program, Utc::now(), &cookies)
            .map_err(|source| Error::Write {
                path: PathBuf::from("-"),
                source,
            })?,
        Output::File(path) => write_file(path, program, &cookies).map_err(|source| Error::Write {
            path: path.clone(),
            source,
        })?,
    }
    Ok(output)
}

fn write_file(path: &Path, program: &str, cookies: &[Cookie]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        create_private_dir(dir)?;
    }
    let file = open_private_file(path)?;
    write_cookie_file(std::io::BufWriter::new(file), program, Utc::now(), cookies)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(unix)]
fn open_private_file(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private_file(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}
