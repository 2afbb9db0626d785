//! Episode candidates and download watermarks
//!
//! This module provides the value types that flow from a provider's
//! discovery step to the downloaders: the [`Episode`] candidate itself, the
//! [`Source`] it can be fetched from, the provider-specific [`LinkToken`],
//! and the [`Watermark`] recording how far a series has been downloaded.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// File hosts an episode can be downloaded from
///
/// The declaration order is the registration order used to break ties
/// between candidates of the same episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// gofile.io, fetched through the external downloader
    GoFile,
    /// pixeldrain.com, fetched through the phased HTTP downloader
    PixelDrain,
}

impl Source {
    /// All known sources in registration order
    pub const ALL: [Source; 2] = [Source::GoFile, Source::PixelDrain];

    /// The lowercase key used in configuration and page markup
    pub fn key(self) -> &'static str {
        match self {
            Source::GoFile => "gofile",
            Source::PixelDrain => "pixeldrain",
        }
    }

    /// The host name that identifies this source in link texts
    pub fn host(self) -> &'static str {
        match self {
            Source::GoFile => "gofile.io",
            Source::PixelDrain => "pixeldrain.com",
        }
    }

    /// Position in [`Source::ALL`]
    pub fn registration_index(self) -> usize {
        Self::ALL
            .iter()
            .position(|s| *s == self)
            .unwrap_or(Self::ALL.len())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown source '{}'", s))
    }
}

/// Provider-specific handle used to resolve the final download URL
///
/// Each variant is only meaningful to the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkToken {
    /// A plain URL
    Url(String),
    /// Identifier of an intermediate redirect page
    RedirectPageId(String),
    /// A click target on a rendered page
    ClickTargetId { page_url: String, target_id: String },
}

impl fmt::Display for LinkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkToken::Url(url) => f.write_str(url),
            LinkToken::RedirectPageId(id) => write!(f, "redirect:{}", id),
            LinkToken::ClickTargetId { target_id, .. } => write!(f, "click:{}", target_id),
        }
    }
}

/// One discovered, not yet downloaded episode/source pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub season: u32,
    pub episode_number: u32,
    pub source: Source,
    pub link: LinkToken,
    /// Diagnostic only
    pub display_name: String,
}

impl Episode {
    /// Position of this episode in season-major order
    pub fn watermark(&self) -> Watermark {
        Watermark::new(self.season, self.episode_number)
    }
}

/// Highest season/episode already downloaded for a series
///
/// Ordering is lexicographic with the season first, so S02E01 is ahead of
/// S01E12.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Watermark {
    pub season: u32,
    pub episode: u32,
}

impl Watermark {
    pub fn new(season: u32, episode: u32) -> Self {
        Self { season, episode }
    }

    /// True when an episode at `season`/`episode` has not been downloaded yet
    pub fn admits(&self, season: u32, episode: u32) -> bool {
        Watermark::new(season, episode) > *self
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}E{:02}", self.season, self.episode)
    }
}

/// Extracts the season and episode from an `S01E02`-style code
///
/// The first match anywhere in `text` wins; the check is case-insensitive.
pub fn parse_episode_code(text: &str) -> Option<(u32, u32)> {
    static CODE: OnceLock<Option<Regex>> = OnceLock::new();
    let regex = CODE
        .get_or_init(|| Regex::new(r"[Ss](\d+)[Ee](\d+)").ok())
        .as_ref()?;

    let captures = regex.captures(text)?;
    let season = captures.get(1)?.as_str().parse().ok()?;
    let episode = captures.get(2)?.as_str().parse().ok()?;
    Some((season, episode))
}

/// Builds the `Show - S01E02` base name shared by all downloaders
pub fn episode_base_name(series_name: &str, season: u32, episode: u32) -> String {
    format!("{} - S{:02}E{:02}", series_name, season, episode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_episode_code() {
        assert_eq!(parse_episode_code("Show.S01E07.1080p.mkv"), Some((1, 7)));
        assert_eq!(parse_episode_code("show s2e13 web"), Some((2, 13)));
        assert_eq!(parse_episode_code("Show - Episode 4"), None);
        assert_eq!(parse_episode_code("S01E02 S01E03"), Some((1, 2)));
    }

    #[test]
    fn test_watermark_is_season_major() {
        let mark = Watermark::new(1, 12);
        assert!(mark.admits(2, 1));
        assert!(mark.admits(1, 13));
        assert!(!mark.admits(1, 12));
        assert!(!mark.admits(1, 3));
        assert!(Watermark::new(2, 1) > Watermark::new(1, 99));
    }

    #[test]
    fn test_default_watermark_admits_everything() {
        assert!(Watermark::default().admits(1, 1));
    }

    #[test]
    fn test_source_round_trips_through_key() {
        for source in Source::ALL {
            assert_eq!(source.key().parse::<Source>(), Ok(source));
        }
        assert_eq!("PixelDrain".parse::<Source>(), Ok(Source::PixelDrain));
        assert!("mega".parse::<Source>().is_err());
    }

    #[test]
    fn test_episode_base_name() {
        assert_eq!(episode_base_name("Dark", 1, 3), "Dark - S01E03");
        assert_eq!(episode_base_name("Dark", 3, 10), "Dark - S03E10");
    }
}
