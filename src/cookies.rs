//! Browser cookie import
//!
//! Some sites only list their episodes to a browser that already passed a
//! challenge. Cookies exported from that browser in the Netscape
//! `cookies.txt` format can be injected into the HTTP session before any
//! page is fetched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading exported cookies
#[derive(Debug, Error)]
pub enum CookieError {
    /// The cookie export could not be read
    #[error("Failed to read cookie file {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },
}

/// Supplies cookies for a domain
pub trait CookieSupplier {
    /// Returns `Set-Cookie`-style strings for every cookie that applies to `domain`
    fn cookies_for(&self, domain: &str) -> Result<Vec<String>, CookieError>;

    /// Short human-readable origin of the cookies, for diagnostics
    fn describe(&self) -> String;
}

/// Cookies exported from a browser in Netscape format
///
/// Each non-comment line has seven tab-separated fields:
/// domain, include-subdomains flag, path, secure flag, expiry, name, value.
#[derive(Debug, Clone)]
pub struct NetscapeCookieFile {
    browser: String,
    path: PathBuf,
}

impl NetscapeCookieFile {
    pub fn new(browser: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            browser: browser.into(),
            path: path.into(),
        }
    }

    /// Default export location for `browser` next to the configuration file
    pub fn default_path(config_dir: &Path, browser: &str) -> PathBuf {
        config_dir.join("cookies").join(format!("{}.txt", browser))
    }

    /// Parses the export contents, keeping cookies that apply to `domain`
    fn parse(contents: &str, domain: &str) -> Vec<String> {
        let domain = domain.trim_start_matches('.').to_ascii_lowercase();

        contents
            .lines()
            .filter_map(|line| {
                // curl marks HttpOnly cookies with this prefix instead of commenting them out
                let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
                if line.trim().is_empty() || line.starts_with('#') {
                    return None;
                }

                let fields: Vec<&str> = line.split('\t').collect();
                if fields.len() < 7 {
                    return None;
                }

                let cookie_domain = fields[0].trim_start_matches('.').to_ascii_lowercase();
                let applies = domain == cookie_domain
                    || domain.ends_with(&format!(".{}", cookie_domain));
                if !applies {
                    return None;
                }

                let path = fields[2];
                let secure = fields[3].eq_ignore_ascii_case("TRUE");
                let (name, value) = (fields[5], fields[6]);

                let mut cookie = format!("{}={}; Domain={}; Path={}", name, value, cookie_domain, path);
                if secure {
                    cookie.push_str("; Secure");
                }
                Some(cookie)
            })
            .collect()
    }
}

impl CookieSupplier for NetscapeCookieFile {
    fn cookies_for(&self, domain: &str) -> Result<Vec<String>, CookieError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| CookieError::ReadFailed {
            path: self.path.clone(),
            source,
        })?;

        Ok(Self::parse(&contents, domain))
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.browser, self.path.display())
    }
}
