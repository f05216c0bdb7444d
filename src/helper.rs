//! The git credential helper `key=value` protocol.
//!
//! See <https://git-scm.com/docs/git-credential#IOFMT>.

use std::io::{BufRead, Write};

use url::Url;

use crate::credentials::{config, ConfigStore};

/// What the googlesource helpers answer as the username.
pub const USERNAME: &str = "git-service-account";
/// Lets the helper hand out tokens over plain HTTP for matching URLs.
pub const KEY_ALLOW_HTTP: &str = "google.allowHTTPForCredentialHelper";
const SOURCE_DEVELOPERS_HOST: &str = "source.developers.google.com";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot parse the git-credential input: {0:?}")]
    Malformed(String),
    #[error("cannot read the git-credential input: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("HTTP is not allowed for {0}; set {} to allow it", KEY_ALLOW_HTTP)]
    HttpNotAllowed(Url),
    #[error("unknown protocol: {0:?}")]
    Unknown(String),
    #[error("cannot build a URL from the request: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Config(#[from] config::Error),
}

/// Hosts the googlesource helper answers for.
pub fn is_supported_host(host: &str) -> bool {
    host == SOURCE_DEVELOPERS_HOST || host.ends_with(".googlesource.com")
}

/// Refuse to send a token over anything but HTTPS, unless HTTP is explicitly
/// allowed for `url`.
pub async fn check_protocol<S>(store: &S, url: &Url) -> Result<(), ProtocolError>
where
    S: ConfigStore + ?Sized,
{
    match url.scheme() {
        "https" => Ok(()),
        "http" => {
            if store.bool_config_or(KEY_ALLOW_HTTP, Some(url), false).await? {
                Ok(())
            } else {
                Err(ProtocolError::HttpNotAllowed(url.clone()))
            }
        }
        other => Err(ProtocolError::Unknown(other.to_owned())),
    }
}

/// The URL to make a token for, or `None` when the host is not one the
/// helper answers for. A supported host needs an allowed protocol.
pub async fn request_url<S>(store: &S, request: &Credential) -> Result<Option<Url>, ProtocolError>
where
    S: ConfigStore + ?Sized,
{
    if !request.host.as_deref().is_some_and(is_supported_host) {
        return Ok(None);
    }
    let protocol = request.protocol.as_deref().unwrap_or_default();
    if !matches!(protocol, "https" | "http") {
        return Err(ProtocolError::Unknown(protocol.to_owned()));
    }
    let Some(url) = request.to_url()? else {
        return Ok(None);
    };
    check_protocol(store, &url).await?;
    Ok(Some(url))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<String>,
}

impl Credential {
    /// Read attributes until a blank line or end of input.
    pub fn read<R: BufRead>(r: R) -> Result<Self, Error> {
        let mut credential = Self::default();
        for line in r.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::Malformed(line.to_owned()))?;
            let value = Some(value.to_owned());
            match key {
                "protocol" => credential.protocol = value,
                "host" => credential.host = value,
                "path" => credential.path = value,
                "username" => credential.username = value,
                "password" => credential.password = value,
                "url" => credential.url = value,
                _ => {}
            }
        }
        Ok(credential)
    }

    /// Write the set attributes in a fixed order.
    pub fn write<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        let fields = [
            ("protocol", &self.protocol),
            ("host", &self.host),
            ("path", &self.path),
            ("username", &self.username),
            ("password", &self.password),
            ("url", &self.url),
        ];
        for (key, value) in fields {
            if let Some(value) = value.as_deref().filter(|value| !value.is_empty()) {
                writeln!(w, "{}={}", key, value)?;
            }
        }
        w.flush()
    }

    /// The helper's answer: protocol and host echoed back with the given
    /// username and password.
    pub fn answer(&self, username: &str, password: &str) -> Self {
        Self {
            protocol: self.protocol.clone(),
            host: self.host.clone(),
            username: Some(username.to_owned()),
            password: Some(password.to_owned()),
            ..Self::default()
        }
    }

    /// `protocol://host/path`, if protocol and host are known.
    pub fn to_url(&self) -> Result<Option<Url>, url::ParseError> {
        let (Some(protocol), Some(host)) = (&self.protocol, &self.host) else {
            return Ok(None);
        };
        let mut url = Url::parse(&format!("{}://{}", protocol, host))?;
        if let Some(path) = &self.path {
            url.set_path(path);
        }
        Ok(Some(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::config::testing::MemoryStore;

    fn render(credential: &Credential) -> String {
        let mut out = Vec::new();
        credential.write(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn round_trips_complete_record() {
        let input = "protocol=https\nhost=example.com\npath=/asdf\nusername=foo\npassword=hunter2\nurl=example.com\n";
        let credential = Credential::read(input.as_bytes()).unwrap();
        assert_eq!(render(&credential), input);
    }

    #[test]
    fn round_trips_partial_record() {
        let credential = Credential::read("protocol=https\n".as_bytes()).unwrap();
        assert_eq!(render(&credential), "protocol=https\n");
    }

    #[test]
    fn answer_has_stable_field_order() {
        let input = "protocol=https\nhost=example.com\npath=/asdf\n";
        let credential = Credential::read(input.as_bytes()).unwrap();

        let answer = credential.answer(USERNAME, "hunter2");

        assert_eq!(
            render(&answer),
            "protocol=https\nhost=example.com\nusername=git-service-account\npassword=hunter2\n"
        );
    }

    #[test]
    fn stops_at_blank_line_and_ignores_unknown_keys() {
        let input = "capability[]=authtype\nhost=a.googlesource.com\n\nhost=ignored\n";
        let credential = Credential::read(input.as_bytes()).unwrap();
        assert_eq!(credential.host.as_deref(), Some("a.googlesource.com"));
    }

    #[test]
    fn value_may_contain_equals() {
        let credential = Credential::read("password=a=b\n".as_bytes()).unwrap();
        assert_eq!(credential.password.as_deref(), Some("a=b"));
    }

    #[test]
    fn rejects_line_without_equals() {
        let err = Credential::read("protocol https\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Malformed(line) if line == "protocol https"));
    }

    #[test]
    fn builds_url() {
        let credential =
            Credential::read("protocol=https\nhost=a.googlesource.com\npath=repo.git\n".as_bytes())
                .unwrap();
        assert_eq!(
            credential.to_url().unwrap().unwrap().as_str(),
            "https://a.googlesource.com/repo.git"
        );
        assert_eq!(Credential::default().to_url().unwrap(), None);
    }

    #[test]
    fn supported_hosts() {
        assert!(is_supported_host("chromium.googlesource.com"));
        assert!(is_supported_host("chromium-review.googlesource.com"));
        assert!(is_supported_host("source.developers.google.com"));
        assert!(!is_supported_host("googlesource.com"));
        assert!(!is_supported_host("github.com"));
        assert!(!is_supported_host("evilgooglesource.com"));
    }

    #[tokio::test]
    async fn https_is_always_allowed() {
        let url = Url::parse("https://a.googlesource.com/repo").unwrap();
        check_protocol(&MemoryStore::default(), &url).await.unwrap();
    }

    #[tokio::test]
    async fn http_needs_explicit_opt_in() {
        let url = Url::parse("http://a.googlesource.com/repo").unwrap();

        let err = check_protocol(&MemoryStore::default(), &url)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HttpNotAllowed(_)));

        let store = MemoryStore::default().set_for("http://a.googlesource.com", KEY_ALLOW_HTTP, "true");
        check_protocol(&store, &url).await.unwrap();

        let store = MemoryStore::default().set(KEY_ALLOW_HTTP, "false");
        assert!(check_protocol(&store, &url).await.is_err());
    }

    #[tokio::test]
    async fn request_for_unsupported_host_is_skipped() {
        let request = Credential::read("protocol=https\nhost=github.com\n".as_bytes()).unwrap();
        assert_eq!(request_url(&MemoryStore::default(), &request).await.unwrap(), None);

        let request = Credential::read("protocol=https\n".as_bytes()).unwrap();
        assert_eq!(request_url(&MemoryStore::default(), &request).await.unwrap(), None);
    }

    #[tokio::test]
    async fn request_without_protocol_is_refused() {
        let request = Credential::read("host=chromium.googlesource.com\n".as_bytes()).unwrap();

        let err = request_url(&MemoryStore::default(), &request)
            .await
            .unwrap_err();

        assert!(matches!(err, ProtocolError::Unknown(protocol) if protocol.is_empty()));
    }

    #[tokio::test]
    async fn request_url_checks_the_protocol() {
        let store = MemoryStore::default();
        let request = Credential::read(
            "protocol=https\nhost=chromium.googlesource.com\npath=src.git\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(
            request_url(&store, &request).await.unwrap().unwrap().as_str(),
            "https://chromium.googlesource.com/src.git"
        );

        let request =
            Credential::read("protocol=http\nhost=chromium.googlesource.com\n".as_bytes()).unwrap();
        assert!(matches!(
            request_url(&store, &request).await,
            Err(ProtocolError::HttpNotAllowed(_))
        ));

        let request =
            Credential::read("protocol=ssh\nhost=chromium.googlesource.com\n".as_bytes()).unwrap();
        assert!(matches!(
            request_url(&store, &request).await,
            Err(ProtocolError::Unknown(protocol)) if protocol == "ssh"
        ));
    }

    #[tokio::test]
    async fn other_protocols_are_refused() {
        let url = Url::parse("ssh://a.googlesource.com/repo").unwrap();
        let err = check_protocol(&MemoryStore::default(), &url)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Unknown(protocol) if protocol == "ssh"));
    }
}
