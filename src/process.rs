//! Running external programs (`git`, `gcloud`).

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: PathBuf, timeout: Duration },
}

/// What a finished child process left behind. Stderr is inherited, so only
/// stdout is captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
}

impl Output {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> Result<Output, Error>;
}

/// Spawns real processes on the tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner {
    /// Kill the child if it runs longer than this.
    pub timeout: Option<Duration>,
}

#[async_trait::async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<Output, Error> {
        debug!(message = "Running command", program = %program.display(), ?args);

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child)
                .await
                .map_err(|_| Error::Timeout {
                    program: program.to_owned(),
                    timeout,
                })?,
            None => child.await,
        };
        let output = output.map_err(|source| Error::Spawn {
            program: program.to_owned(),
            source,
        })?;

        Ok(Output {
            code: output.status.code(),
            stdout: output.stdout,
        })
    }
}

/// Look `name` up on `PATH`, like a shell would.
pub fn find_executable(name: impl AsRef<OsStr>) -> Option<PathBuf> {
    let name = name.as_ref();
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        candidates(&dir, name)
            .into_iter()
            .find(|candidate| is_executable(candidate))
    })
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &OsStr) -> Vec<PathBuf> {
    let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_owned());
    let mut out = vec![dir.join(name)];
    for ext in exts.split(';').filter(|ext| !ext.is_empty()) {
        let mut file = name.to_os_string();
        file.push(ext);
        out.push(dir.join(file));
    }
    out
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &OsStr) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Make `path` absolute against the current directory without touching the
/// filesystem beyond that.
pub fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_owned());
    }
    Ok(std::env::current_dir()?.join(path))
}
