//! Episode discovery on link-aggregation pages
//!
//! A [`Provider`] knows how to read one class of listing page: it turns
//! the page into [`Episode`] candidates and resolves a candidate's
//! [`LinkToken`] into a URL a downloader can fetch. Providers are selected
//! by a [`ProviderRegistry`] that asks each registered provider, in
//! registration order, whether it can handle a series' locator.

mod filecrypt;
mod renderer;
mod viewcrate;

pub use filecrypt::FileCryptProvider;
pub use renderer::{CommandRenderer, PageRenderer, RenderError};
pub use viewcrate::ViewCrateProvider;

use crate::episode::{Episode, LinkToken, Watermark};
use crate::http::{HttpError, PageFetcher};
use crate::retry::{RetryPolicy, Retryable};
use crate::timing::ThreadSleeper;
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during discovery or link resolution
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The remote page could not be fetched (retries already applied)
    #[error("Network error: {0}")]
    Network(#[from] HttpError),

    /// An expected marker or element is missing from the page
    #[error("Unexpected page structure: {0}")]
    ContentStructure(String),

    /// The browser helper failed
    #[error("Page rendering failed: {0}")]
    Render(#[from] RenderError),

    /// No registered provider accepts the locator
    #[error("No suitable provider found for URL: {0}")]
    NoProvider(String),

    /// The link token was produced by a different provider
    #[error("Provider '{provider}' cannot resolve link {token}")]
    WrongLinkToken {
        provider: &'static str,
        token: LinkToken,
    },
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result of reading a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Every parseable episode entry on the page, downloaded or not
    ///
    /// Zero usually means the page was blocked or asked for a CAPTCHA.
    pub total_known: usize,
    /// Entries ahead of the watermark, sorted by season and episode
    pub candidates: Vec<Episode>,
}

impl Discovery {
    /// Builds a discovery result from every entry found on a page
    ///
    /// Entries not ahead of `watermark` are dropped, repeated
    /// `(season, episode, source)` triples keep their first occurrence, and
    /// the rest is ordered by season, episode and source registration
    /// order. Alternatives from different sources are all kept.
    pub fn from_entries(entries: Vec<Episode>, watermark: Watermark) -> Self {
        let total_known = entries.len();
        let mut seen = HashSet::new();

        let mut candidates: Vec<Episode> = entries
            .into_iter()
            .filter(|e| watermark.admits(e.season, e.episode_number))
            .filter(|e| seen.insert((e.season, e.episode_number, e.source)))
            .collect();

        candidates.sort_by_key(|e| (e.season, e.episode_number, e.source.registration_index()));

        Self {
            total_known,
            candidates,
        }
    }
}

/// Reads one class of listing page
pub trait Provider {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Returns true if this provider understands pages at `locator`
    fn can_handle(&self, locator: &str) -> bool;

    /// Lists the episodes at `locator` that are ahead of `watermark`
    fn discover_episodes(
        &self,
        session: &dyn PageFetcher,
        locator: &str,
        watermark: Watermark,
    ) -> Result<Discovery, ProviderError>;

    /// Follows the redirect chain behind `link` and returns a directly fetchable URL
    ///
    /// Fails with [`ProviderError::ContentStructure`] when the expected
    /// redirect marker is absent.
    fn resolve_download_url(
        &self,
        session: &dyn PageFetcher,
        link: &LinkToken,
    ) -> Result<String, ProviderError>;
}

/// Ordered list of providers; the first one accepting a locator wins
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in providers in their fixed order
    ///
    /// The card/grid provider needs a browser and is only registered when
    /// a renderer is available. Its renderer calls are retried with `retry`.
    pub fn standard(renderer: Option<Box<dyn PageRenderer>>, retry: RetryPolicy) -> Self {
        let mut registry = Self::new().with(Box::new(FileCryptProvider::new()));
        if let Some(renderer) = renderer {
            let provider =
                ViewCrateProvider::new(renderer).with_retry(retry, Box::new(ThreadSleeper));
            registry = registry.with(Box::new(provider));
        }
        registry
    }

    /// Appends a provider after the ones already registered
    pub fn with(mut self, provider: Box<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn select(&self, locator: &str) -> Result<&dyn Provider, ProviderError> {
        self.providers
            .iter()
            .find(|p| p.can_handle(locator))
            .map(|p| p.as_ref())
            .ok_or_else(|| ProviderError::NoProvider(locator.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::Source;

    fn entry(season: u32, episode: u32, source: Source, link: &str) -> Episode {
        Episode {
            season,
            episode_number: episode,
            source,
            link: LinkToken::Url(link.to_string()),
            display_name: format!("S{:02}E{:02}", season, episode),
        }
    }

    #[test]
    fn test_only_episodes_ahead_of_watermark_are_candidates() {
        let entries = vec![
            entry(1, 5, Source::GoFile, "a"),
            entry(1, 6, Source::GoFile, "b"),
            entry(1, 7, Source::GoFile, "c"),
        ];

        let discovery = Discovery::from_entries(entries, Watermark::new(1, 6));

        assert_eq!(discovery.total_known, 3);
        assert_eq!(discovery.candidates.len(), 1);
        assert_eq!(discovery.candidates[0].episode_number, 7);
    }

    #[test]
    fn test_alternatives_are_kept_and_duplicates_dropped() {
        let entries = vec![
            entry(1, 8, Source::PixelDrain, "p8"),
            entry(1, 7, Source::PixelDrain, "p7"),
            entry(1, 7, Source::GoFile, "g7"),
            entry(1, 7, Source::GoFile, "g7-mirror"),
        ];

        let discovery = Discovery::from_entries(entries, Watermark::default());

        let order: Vec<(u32, Source, &LinkToken)> = discovery
            .candidates
            .iter()
            .map(|e| (e.episode_number, e.source, &e.link))
            .collect();
        assert_eq!(
            order,
            vec![
                (7, Source::GoFile, &LinkToken::Url("g7".to_string())),
                (7, Source::PixelDrain, &LinkToken::Url("p7".to_string())),
                (8, Source::PixelDrain, &LinkToken::Url("p8".to_string())),
            ]
        );
        assert_eq!(discovery.total_known, 4);
    }

    #[test]
    fn test_empty_page_reports_zero_total() {
        let discovery = Discovery::from_entries(Vec::new(), Watermark::default());
        assert_eq!(discovery.total_known, 0);
        assert!(discovery.candidates.is_empty());
    }

    #[test]
    fn test_registry_first_match_wins() {
        let registry = ProviderRegistry::standard(None, RetryPolicy::default());

        let provider = registry
            .select("https://filecrypt.cc/Container/ABC.html")
            .unwrap();
        assert_eq!(provider.name(), "filecrypt");

        assert!(matches!(
            registry.select("https://viewcrate.cc/abc"),
            Err(ProviderError::NoProvider(_))
        ));
    }
}
