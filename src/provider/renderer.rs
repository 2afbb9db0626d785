//! Browser rendering for script-heavy listing pages
//!
//! Some listing pages only show their episode cards after client-side
//! scripts ran, and only navigate to the file host when a button is
//! clicked. Rendering is delegated to an external helper command that
//! drives a real browser.

use crate::retry::Retryable;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while rendering a page
#[derive(Debug, Error)]
pub enum RenderError {
    /// The helper command could not be run
    #[error("Renderer unavailable: {0}")]
    Unavailable(String),

    /// The helper ran but reported a failure
    #[error("Renderer failed with exit code {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    /// The click target does not exist on the page
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The helper produced output that is not usable
    #[error("Invalid renderer output: {0}")]
    InvalidOutput(String),
}

impl Retryable for RenderError {
    fn is_retryable(&self) -> bool {
        matches!(self, RenderError::Unavailable(_) | RenderError::Failed { .. })
    }
}

/// Browser-automation capability
pub trait PageRenderer {
    /// Loads `url`, lets its scripts run, and returns the resulting HTML
    fn render(&self, url: &str) -> Result<String, RenderError>;

    /// Loads `url`, clicks the element matching `selector`, and returns the URL navigated to
    fn click(&self, url: &str, selector: &str) -> Result<String, RenderError>;
}

/// Exit code the helper uses to signal a missing click target
const EXIT_ELEMENT_NOT_FOUND: i32 = 3;

/// Renderer backed by an external helper command
///
/// The helper is invoked as `<command...> render <url>` and must print the
/// rendered HTML, or as `<command...> click <url> <selector>` and must
/// print the URL the click navigated to. Exit code 3 on `click` means the
/// selector matched nothing.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    /// Creates a renderer from a command line; returns None for an empty one
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn run(&self, action_args: &[&str]) -> Result<String, RenderError> {
        debug!("Running renderer {} {:?}", self.program, action_args);

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(action_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                RenderError::Unavailable(format!("Failed to spawn {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            return Err(RenderError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|e| RenderError::InvalidOutput(format!("Invalid UTF-8 in output: {}", e)))
    }
}

impl PageRenderer for CommandRenderer {
    fn render(&self, url: &str) -> Result<String, RenderError> {
        self.run(&["render", url])
    }

    fn click(&self, url: &str, selector: &str) -> Result<String, RenderError> {
        let stdout = self.run(&["click", url, selector]).map_err(|e| match e {
            RenderError::Failed {
                code: Some(EXIT_ELEMENT_NOT_FOUND),
                ..
            } => RenderError::ElementNotFound(selector.to_string()),
            other => other,
        })?;

        let target = stdout.trim();
        if target.is_empty() {
            return Err(RenderError::InvalidOutput(
                "click produced no URL".to_string(),
            ));
        }
        Ok(target.to_string())
    }
}
