//! Cookies for `http.cookieFile`, derived from access tokens.

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use url::Url;

use crate::auth::Token;

pub const COOKIE_NAME: &str = "o";
pub const ROOT_DOMAIN: &str = "googlesource.com";
const REVIEW_SUFFIX: &str = "-review";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: String,
    pub expires: DateTime<Utc>,
    pub secure: bool,
}

/// Cookies that authenticate git against `url` with `token`.
///
/// `googlesource.com` itself gets a cookie for every subdomain. A
/// `FOO.googlesource.com` or `FOO-review.googlesource.com` host gets a cookie
/// for both of those hosts, since they serve the same repositories.
pub fn make_cookies(url: &Url, token: &Token) -> Vec<Cookie> {
    // No HttpOnly: git skips `#HttpOnly_` lines in a cookie file.
    let path = match url.path() {
        "" => "/",
        path => path,
    };
    let path = path.strip_suffix(".git").unwrap_or(path);
    let host = url.host_str().unwrap_or_default();

    let cookie = |domain: String| Cookie {
        name: COOKIE_NAME.to_owned(),
        value: token.access_token.clone(),
        path: path.to_owned(),
        domain,
        expires: token.expiry,
        secure: url.scheme() == "https",
    };

    if host == ROOT_DOMAIN {
        return vec![cookie(format!(".{}", host))];
    }
    if let Some(subdomain) = host.strip_suffix(&format!(".{}", ROOT_DOMAIN)) {
        let subdomain = subdomain.strip_suffix(REVIEW_SUFFIX).unwrap_or(subdomain);
        return vec![
            cookie(format!("{}.{}", subdomain, ROOT_DOMAIN)),
            cookie(format!("{}{}.{}", subdomain, REVIEW_SUFFIX, ROOT_DOMAIN)),
        ];
    }
    vec![cookie(host.to_owned())]
}

fn flag(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Write `cookies` in the Netscape cookie-file format git and curl read.
pub fn write_cookie_file<W: Write>(
    mut w: W,
    program: &str,
    now: DateTime<Utc>,
    cookies: &[Cookie],
) -> std::io::Result<()> {
    writeln!(
        w,
        "# Created by {} at {}",
        program,
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    )?;
    for cookie in cookies {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            cookie.domain,
            flag(cookie.domain.starts_with('.')),
            cookie.path,
            flag(cookie.secure),
            cookie.expires.timestamp(),
            cookie.name,
            cookie.value,
        )?;
    }
    w.flush()
}
