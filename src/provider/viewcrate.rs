//! Provider for viewcrate.cc pages
//!
//! Episodes are laid out as cards inside the `#x_r` grid. Each card names
//! its episode code in a `data-*` attribute and holds one row per file
//! host; the download itself is a script-driven button, so resolution
//! goes through a [`PageRenderer`] that can click it.

use super::filecrypt::selector;
use super::{Discovery, PageRenderer, Provider, ProviderError, RenderError};
use crate::episode::{Episode, LinkToken, Source, Watermark, parse_episode_code};
use crate::http::PageFetcher;
use crate::retry::{RetryPolicy, execute_with_retry};
use crate::timing::{Sleeper, ThreadSleeper};
use scraper::{ElementRef, Html};
use tracing::debug;

const VIEWCRATE_HOST: &str = "viewcrate.cc";

/// Provider for viewcrate.cc card grids
pub struct ViewCrateProvider {
    renderer: Box<dyn PageRenderer>,
    retry: RetryPolicy,
    sleeper: Box<dyn Sleeper>,
}

impl ViewCrateProvider {
    pub fn new(renderer: Box<dyn PageRenderer>) -> Self {
        Self {
            renderer,
            retry: RetryPolicy::default(),
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Replaces the retry limits and the sleeper used between renderer attempts
    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Box<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    fn parse_cards(html: &str, page_url: &str) -> Result<Vec<Episode>, ProviderError> {
        let document = Html::parse_document(html);
        let card_selector = selector("#x_r > div")?;
        let links_selector = selector("div.bg-gray-800")?;
        let name_selector = selector("span")?;
        let button_selector = selector("div[role='button'][data-z]")?;

        let mut episodes = Vec::new();

        for card in document.select(&card_selector) {
            let Some((season, episode_number)) = data_attributes(card)
                .into_iter()
                .find_map(|(_, value)| parse_episode_code(value))
            else {
                continue;
            };

            let Some(links) = card.select(&links_selector).next() else {
                continue;
            };

            for row in links
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().name() == "div")
            {
                let Some(source) = data_attributes(row)
                    .into_iter()
                    .find_map(|(_, value)| value.parse::<Source>().ok())
                else {
                    continue;
                };

                let Some(display_name) = row
                    .select(&name_selector)
                    .next()
                    .map(|span| span.text().collect::<String>().trim().to_string())
                else {
                    continue;
                };

                let Some(target_id) = row
                    .select(&button_selector)
                    .next()
                    .and_then(|button| button.value().attr("data-z"))
                    .filter(|z| !z.is_empty())
                else {
                    continue;
                };

                episodes.push(Episode {
                    season,
                    episode_number,
                    source,
                    link: LinkToken::ClickTargetId {
                        page_url: page_url.to_string(),
                        target_id: target_id.to_string(),
                    },
                    display_name,
                });
            }
        }

        Ok(episodes)
    }
}

impl Provider for ViewCrateProvider {
    fn name(&self) -> &'static str {
        "viewcrate"
    }

    fn can_handle(&self, locator: &str) -> bool {
        locator.contains(VIEWCRATE_HOST)
    }

    fn discover_episodes(
        &self,
        _session: &dyn PageFetcher,
        locator: &str,
        watermark: Watermark,
    ) -> Result<Discovery, ProviderError> {
        let html = execute_with_retry(&self.retry, self.sleeper.as_ref(), locator, || {
            self.renderer.render(locator)
        })?;
        let entries = Self::parse_cards(&html, locator)?;
        debug!("Grid {} lists {} episode link(s)", locator, entries.len());
        Ok(Discovery::from_entries(entries, watermark))
    }

    fn resolve_download_url(
        &self,
        _session: &dyn PageFetcher,
        link: &LinkToken,
    ) -> Result<String, ProviderError> {
        let LinkToken::ClickTargetId {
            page_url,
            target_id,
        } = link
        else {
            return Err(ProviderError::WrongLinkToken {
                provider: self.name(),
                token: link.clone(),
            });
        };

        let button = format!("div[role='button'][data-z='{}']", target_id);
        execute_with_retry(&self.retry, self.sleeper.as_ref(), page_url, || {
            self.renderer.click(page_url, &button)
        })
        .map_err(|e| match e {
            RenderError::ElementNotFound(selector) => ProviderError::ContentStructure(format!(
                "Could not find download button with selector: {}",
                selector
            )),
            other => ProviderError::Render(other),
        })
    }
}

/// All `data-*` attributes of an element
fn data_attributes(element: ElementRef<'_>) -> Vec<(&str, &str)> {
    element
        .value()
        .attrs()
        .filter(|(name, _)| name.starts_with("data-"))
        .collect()
}
