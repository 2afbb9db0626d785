//! Provider for filecrypt.cc containers
//!
//! A container lists one table row per hosted file. The row's title cell
//! carries the file name (and thus the episode code), an external-link
//! anchor names the file host, and a download button carries the id of an
//! intermediate link page. That link page embeds the next hop in a
//! `top.location.href` script assignment, which finally redirects to the
//! file host.

use super::{Discovery, Provider, ProviderError};
use crate::episode::{Episode, LinkToken, Source, Watermark, parse_episode_code};
use crate::http::PageFetcher;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use tracing::debug;

const FILECRYPT_HOST: &str = "filecrypt.cc";
const FILECRYPT_BASE_URL: &str = "https://filecrypt.cc";

/// Provider for filecrypt.cc container pages
pub struct FileCryptProvider {
    base_url: String,
}

impl FileCryptProvider {
    pub fn new() -> Self {
        Self::with_base_url(FILECRYPT_BASE_URL)
    }

    /// Creates a provider whose link pages live below `base_url`
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn link_page_url(&self, link_id: &str) -> String {
        format!("{}/Link/{}.html", self.base_url, link_id)
    }

    /// Extracts every episode row of a container page
    fn parse_rows(html: &str) -> Result<Vec<Episode>, ProviderError> {
        let document = Html::parse_document(html);
        let row_selector = selector("tr.kwj3")?;
        let link_selector = selector("a.external_link")?;
        let title_selector = selector("td[title]")?;
        let button_selector = selector("button.download, button.downloaded")?;

        let mut episodes = Vec::new();

        for row in document.select(&row_selector) {
            let Some(source) = Self::row_source(row, &link_selector) else {
                continue;
            };

            let Some(file_name) = row
                .select(&title_selector)
                .next()
                .and_then(|cell| cell.value().attr("title"))
            else {
                continue;
            };

            let Some((season, episode_number)) = parse_episode_code(file_name) else {
                continue;
            };

            let Some(link_id) = row
                .select(&button_selector)
                .next()
                .and_then(first_data_attribute)
            else {
                debug!("Row '{}' has no download button, skipping", file_name);
                continue;
            };

            episodes.push(Episode {
                season,
                episode_number,
                source,
                link: LinkToken::RedirectPageId(link_id.to_string()),
                display_name: file_name.to_string(),
            });
        }

        Ok(episodes)
    }

    /// Determines the file host of a row from its external link texts
    ///
    /// Hosts are checked in source registration order, so a row mentioning
    /// both resolves to the first registered one.
    fn row_source(row: ElementRef<'_>, link_selector: &Selector) -> Option<Source> {
        let texts: Vec<String> = row
            .select(link_selector)
            .map(|a| a.text().collect::<String>().to_lowercase())
            .collect();

        Source::ALL
            .into_iter()
            .find(|source| texts.iter().any(|text| text.contains(source.host())))
    }

    /// Pulls the script redirect target out of a link page
    fn script_redirect(body: &str) -> Option<String> {
        static REDIRECT: OnceLock<Option<Regex>> = OnceLock::new();
        let regex = REDIRECT
            .get_or_init(|| Regex::new(r"top\.location\.href\s*=\s*'([^']*)'").ok())
            .as_ref()?;

        regex
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|target| !target.is_empty())
    }
}

impl Default for FileCryptProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for FileCryptProvider {
    fn name(&self) -> &'static str {
        "filecrypt"
    }

    fn can_handle(&self, locator: &str) -> bool {
        locator.contains(FILECRYPT_HOST)
    }

    fn discover_episodes(
        &self,
        session: &dyn PageFetcher,
        locator: &str,
        watermark: Watermark,
    ) -> Result<Discovery, ProviderError> {
        let page = session.get(locator)?;
        let entries = Self::parse_rows(&page.body)?;
        debug!("Container {} lists {} episode row(s)", locator, entries.len());
        Ok(Discovery::from_entries(entries, watermark))
    }

    fn resolve_download_url(
        &self,
        session: &dyn PageFetcher,
        link: &LinkToken,
    ) -> Result<String, ProviderError> {
        let link_page_url = match link {
            LinkToken::RedirectPageId(id) => self.link_page_url(id),
            LinkToken::Url(url) => url.clone(),
            other => {
                return Err(ProviderError::WrongLinkToken {
                    provider: self.name(),
                    token: other.clone(),
                });
            }
        };

        let link_page = session.get(&link_page_url)?;
        let intermediate = Self::script_redirect(&link_page.body).ok_or_else(|| {
            ProviderError::ContentStructure(format!(
                "Could not find intermediate JS redirect link on {}",
                link_page_url
            ))
        })?;

        debug!("Following intermediate redirect {}", intermediate);
        let landing = session.get(&intermediate)?;
        Ok(landing.final_url)
    }
}

/// Parses a CSS selector, reporting failures as a structure error
pub(super) fn selector(css: &str) -> Result<Selector, ProviderError> {
    Selector::parse(css)
        .map_err(|e| ProviderError::ContentStructure(format!("invalid selector '{}': {:?}", css, e)))
}

/// Value of the first `data-*` attribute of an element
fn first_data_attribute(element: ElementRef<'_>) -> Option<&str> {
    element
        .value()
        .attrs()
        .find(|(name, value)| name.starts_with("data-") && !value.is_empty())
        .map(|(_, value)| value)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::http::{FetchedPage, HttpError};
    use std::collections::HashMap;

    /// Serves canned pages keyed by URL
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub pages: HashMap<String, FetchedPage>,
    }

    impl FakeFetcher {
        pub fn page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(
                url.to_string(),
                FetchedPage {
                    final_url: url.to_string(),
                    body: body.to_string(),
                },
            );
            self
        }

        pub fn redirect(mut self, url: &str, final_url: &str) -> Self {
            self.pages.insert(
                url.to_string(),
                FetchedPage {
                    final_url: final_url.to_string(),
                    body: String::new(),
                },
            );
            self
        }
    }

    impl PageFetcher for FakeFetcher {
        fn get(&self, url: &str) -> Result<FetchedPage, HttpError> {
            self.pages.get(url).cloned().ok_or_else(|| HttpError::Status {
                code: 404,
                url: url.to_string(),
            })
        }
    }

    const CONTAINER: &str = r#"
        <html><body><table>
          <tr class="kwj3">
            <td title="Dark.S01E05.German.1080p.mkv">Dark.S01E05...</td>
            <td><a class="external_link">gofile.io</a></td>
            <td><button class="download" data-qx="L5G">Download</button></td>
          </tr>
          <tr class="kwj3">
            <td title="Dark.S01E06.German.1080p.mkv">Dark.S01E06...</td>
            <td><a class="external_link">PixelDrain.com</a></td>
            <td><button class="downloaded" data-qx="L6P">Download</button></td>
          </tr>
          <tr class="kwj3">
            <td title="Dark.S01E06.German.1080p.mkv">Dark.S01E06...</td>
            <td><a class="external_link">gofile.io</a></td>
            <td><button class="download" data-qx="L6G">Download</button></td>
          </tr>
          <tr class="kwj3">
            <td title="Dark.S01E07.German.1080p.mkv">Dark.S01E07...</td>
            <td><a class="external_link">rapidgator.net</a></td>
            <td><button class="download" data-qx="L7R">Download</button></td>
          </tr>
          <tr class="kwj3">
            <td title="Dark.Trailer.mkv">Trailer</td>
            <td><a class="external_link">gofile.io</a></td>
            <td><button class="download" data-qx="LTR">Download</button></td>
          </tr>
        </table></body></html>
    "#;

    const CONTAINER_URL: &str = "https://filecrypt.cc/Container/ABC.html";

    #[test]
    fn test_discovery_keeps_all_sources_and_filters_watermark() {
        let fetcher = FakeFetcher::default().page(CONTAINER_URL, CONTAINER);
        let provider = FileCryptProvider::new();

        let discovery = provider
            .discover_episodes(&fetcher, CONTAINER_URL, Watermark::new(1, 5))
            .unwrap();

        assert_eq!(discovery.total_known, 3);
        let candidates: Vec<(u32, Source, LinkToken)> = discovery
            .candidates
            .into_iter()
            .map(|e| (e.episode_number, e.source, e.link))
            .collect();
        assert_eq!(
            candidates,
            vec![
                (6, Source::GoFile, LinkToken::RedirectPageId("L6G".to_string())),
                (6, Source::PixelDrain, LinkToken::RedirectPageId("L6P".to_string())),
            ]
        );
    }

    #[test]
    fn test_blocked_page_has_no_entries() {
        let fetcher = FakeFetcher::default().page(CONTAINER_URL, "<html><body>captcha</body></html>");
        let provider = FileCryptProvider::new();

        let discovery = provider
            .discover_episodes(&fetcher, CONTAINER_URL, Watermark::default())
            .unwrap();

        assert_eq!(discovery.total_known, 0);
    }

    #[test]
    fn test_resolve_follows_script_redirect() {
        let fetcher = FakeFetcher::default()
            .page(
                "https://filecrypt.cc/Link/L6G.html",
                "<script>top.location.href='https://filecrypt.cc/go/xyz';</script>",
            )
            .redirect("https://filecrypt.cc/go/xyz", "https://gofile.io/d/AbCd");
        let provider = FileCryptProvider::new();

        let url = provider
            .resolve_download_url(&fetcher, &LinkToken::RedirectPageId("L6G".to_string()))
            .unwrap();

        assert_eq!(url, "https://gofile.io/d/AbCd");
    }

    #[test]
    fn test_resolve_without_marker_is_structure_error() {
        let fetcher = FakeFetcher::default().page(
            "https://filecrypt.cc/Link/L6G.html",
            "<html>Please solve the captcha</html>",
        );
        let provider = FileCryptProvider::new();

        let result =
            provider.resolve_download_url(&fetcher, &LinkToken::RedirectPageId("L6G".to_string()));

        assert!(matches!(result, Err(ProviderError::ContentStructure(_))));
    }

    #[test]
    fn test_click_tokens_are_rejected() {
        let provider = FileCryptProvider::new();
        let token = LinkToken::ClickTargetId {
            page_url: "https://viewcrate.cc/x".to_string(),
            target_id: "z".to_string(),
        };

        let result = provider.resolve_download_url(&FakeFetcher::default(), &token);

        assert!(matches!(result, Err(ProviderError::WrongLinkToken { .. })));
    }

    #[test]
    fn test_can_handle() {
        let provider = FileCryptProvider::new();
        assert!(provider.can_handle(CONTAINER_URL));
        assert!(!provider.can_handle("https://viewcrate.cc/abc"));
    }
}
