//! HTTP session handling
//!
//! Providers read remote pages through the [`PageFetcher`] trait. The
//! production implementation, [`HttpSession`], wraps a blocking `reqwest`
//! client with a browser user agent, a cookie jar and the crate's retry
//! policy. A session is opened per series by a [`SessionFactory`] and
//! dropped when that series is done.

use crate::cookies::CookieSupplier;
use crate::retry::{RetryPolicy, Retryable, execute_with_retry};
use crate::timing::ThreadSleeper;
use reqwest::blocking::Client;
use reqwest::cookie::Jar;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// User agent sent with every request
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36 Edg/140.0.0.0";

/// Errors that can occur while talking to a remote site
#[derive(Debug, Error)]
pub enum HttpError {
    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The request failed before a response was received, or the body could not be read
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status
    #[error("HTTP {code} from {url}")]
    Status { code: u16, url: String },
}

impl Retryable for HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            HttpError::ClientBuild(_) => false,
            HttpError::Transport { .. } => true,
            HttpError::Status { code, .. } => is_transient_status(*code),
        }
    }
}

/// Statuses worth repeating: timeouts, throttling and server errors
pub(crate) fn is_transient_status(code: u16) -> bool {
    matches!(code, 408 | 429 | 500..=599)
}

/// A fetched page after all redirects were followed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// The URL the last redirect pointed to
    pub final_url: String,
    /// The response body as text
    pub body: String,
}

/// Reads remote pages
pub trait PageFetcher {
    /// Fetches `url`, following redirects, with retries already applied
    fn get(&self, url: &str) -> Result<FetchedPage, HttpError>;
}

/// Settings shared by all sessions of a run
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A cookie-aware HTTP client scoped to the processing of one series
pub struct HttpSession {
    client: Client,
    jar: Arc<Jar>,
    retry: RetryPolicy,
}

impl HttpSession {
    /// Creates a session with an empty cookie jar
    pub fn new(settings: &SessionSettings) -> Result<Self, HttpError> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(HttpError::ClientBuild)?;

        Ok(Self {
            client,
            jar,
            retry: settings.retry,
        })
    }

    /// Adds `Set-Cookie`-style strings to the jar for `domain`
    ///
    /// Returns the number of cookies added.
    pub fn add_cookies(&self, domain: &str, cookies: &[String]) -> usize {
        let Ok(origin) = url::Url::parse(&format!("https://{}/", domain)) else {
            warn!("Cannot build cookie origin for domain '{}'", domain);
            return 0;
        };

        for cookie in cookies {
            self.jar.add_cookie_str(cookie, &origin);
        }
        cookies.len()
    }

    fn get_once(&self, url: &str) -> Result<FetchedPage, HttpError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| HttpError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                code: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().to_string();
        let body = response.text().map_err(|source| HttpError::Transport {
            url: url.to_string(),
            source,
        })?;

        Ok(FetchedPage { final_url, body })
    }
}

impl PageFetcher for HttpSession {
    fn get(&self, url: &str) -> Result<FetchedPage, HttpError> {
        debug!("GET {}", url);
        execute_with_retry(&self.retry, &ThreadSleeper, url, || self.get_once(url))
    }
}

/// Opens a fresh session for each series
pub trait SessionFactory {
    fn open_session(&self, locator: &str) -> Result<Box<dyn PageFetcher>, HttpError>;
}

/// Builds [`HttpSession`]s, optionally preloaded with browser cookies
pub struct HttpSessionFactory {
    settings: SessionSettings,
    cookies: Option<Box<dyn CookieSupplier>>,
}

impl HttpSessionFactory {
    pub fn new(settings: SessionSettings, cookies: Option<Box<dyn CookieSupplier>>) -> Self {
        Self { settings, cookies }
    }

    fn load_cookies(&self, session: &HttpSession, locator: &str) {
        let Some(supplier) = &self.cookies else {
            return;
        };

        let Some(domain) = domain_of(locator) else {
            warn!("Could not extract a domain from '{}', skipping cookies", locator);
            return;
        };

        info!("Loading cookies for '{}' from {}", domain, supplier.describe());
        match supplier.cookies_for(&domain) {
            Ok(cookies) => {
                let count = session.add_cookies(&domain, &cookies);
                info!("Loaded {} cookie(s) for '{}'", count, domain);
            }
            Err(e) => warn!("Failed to load cookies for '{}': {}", domain, e),
        }
    }
}

impl SessionFactory for HttpSessionFactory {
    fn open_session(&self, locator: &str) -> Result<Box<dyn PageFetcher>, HttpError> {
        let session = HttpSession::new(&self.settings)?;
        self.load_cookies(&session, locator);
        Ok(Box::new(session))
    }
}

/// Host part of a URL, if it has one
pub fn domain_of(locator: &str) -> Option<String> {
    url::Url::parse(locator)
        .ok()?
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_of() {
        assert_eq!(
            domain_of("https://filecrypt.cc/Container/ABC.html"),
            Some("filecrypt.cc".to_string())
        );
        assert_eq!(domain_of("not a url"), None);
    }

    #[test]
    fn test_status_classification() {
        let status = |code| HttpError::Status {
            code,
            url: "https://example.org".to_string(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
    }

    #[test]
    fn test_session_accepts_cookies() {
        let session = HttpSession::new(&SessionSettings::default()).unwrap();
        let added = session.add_cookies("example.org", &["sid=abc; Path=/".to_string()]);
        assert_eq!(added, 1);
    }
}
