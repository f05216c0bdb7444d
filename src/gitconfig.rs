//! git-config as a [`ConfigStore`], read through the `git` binary.

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use url::Url;

use crate::{
    credentials::config::{self, ConfigStore, Kind},
    process::{self, CommandRunner, TokioCommandRunner},
};

const SECTION: &str = "google.";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot find the git binary")]
    NotFound,
    #[error(transparent)]
    Process(#[from] process::Error),
    #[error("git config exited with {0}")]
    Exit(String),
    #[error("cannot parse the URL {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// A git executable plus `-c` overrides passed to every invocation.
#[derive(Clone)]
pub struct GitBinary {
    pub path: PathBuf,
    /// Extra `name=value` configs, as with `git -c`.
    pub configs: Vec<String>,
    pub runner: Arc<dyn CommandRunner>,
}

impl GitBinary {
    /// Find `git` on `PATH`.
    pub fn find() -> Result<Self, Error> {
        let path = process::find_executable("git").ok_or(Error::NotFound)?;
        Ok(Self::new(path, Arc::new(TokioCommandRunner::default())))
    }

    pub fn new(path: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path,
            configs: Vec::new(),
            runner,
        }
    }

    fn base_args(&self) -> Vec<String> {
        self.configs
            .iter()
            .flat_map(|config| ["-c".to_owned(), config.clone()])
            .collect()
    }

    /// Every URL that has a `google.<URL>.<key>` entry.
    pub async fn list_urls(&self) -> Result<Vec<Url>, Error> {
        let mut args = self.base_args();
        args.extend(["config", "--name-only", "--list", "--null"].map(str::to_owned));

        let output = self.runner.run(&self.path, &args).await?;
        if !output.success() {
            return Err(Error::Exit(exit_description(output.code)));
        }

        let names = String::from_utf8_lossy(&output.stdout);
        let mut urls = BTreeSet::new();
        for name in names.split('\0') {
            let Some(rest) = name.strip_prefix(SECTION) else {
                continue;
            };
            let subsection = match rest.rfind('.') {
                Some(i) if i > 0 => &rest[..i],
                _ => rest,
            };
            if !subsection.contains("://") {
                continue;
            }
            let url = Url::parse(subsection).map_err(|source| Error::Url {
                url: subsection.to_owned(),
                source,
            })?;
            urls.insert(url);
        }
        Ok(urls.into_iter().collect())
    }

    async fn lookup(&self, kind: Kind, key: &str, url: Option<&Url>) -> Result<Option<String>, Error> {
        let mut args = self.base_args();
        args.push("config".to_owned());
        args.push(
            match kind {
                Kind::Bool => "--bool",
                Kind::Path => "--path",
                Kind::String => "--no-type",
            }
            .to_owned(),
        );
        match url {
            Some(url) => {
                args.push("--get-urlmatch".to_owned());
                args.push(key.to_owned());
                args.push(url.to_string());
            }
            None => args.push(key.to_owned()),
        }

        let output = self.runner.run(&self.path, &args).await?;
        match output.code {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_owned(),
            )),
            // The key doesn't exist in the config.
            Some(1) => Ok(None),
            code => Err(Error::Exit(exit_description(code))),
        }
    }
}

fn exit_description(code: Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_owned(), |code| format!("status {}", code))
}

#[async_trait::async_trait]
impl ConfigStore for GitBinary {
    async fn get(&self, kind: Kind, key: &str, url: Option<&Url>) -> Result<Option<String>, config::Error> {
        self.lookup(kind, key, url)
            .await
            .map_err(|err| config::Error {
                key: key.to_owned(),
                url: url.cloned(),
                source: Box::new(err),
            })
    }
}
