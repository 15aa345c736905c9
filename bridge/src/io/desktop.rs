//! Window discovery for the target application.
//!
//! The [`WindowLocator`] trait decouples dispatch from the desktop backend.
//! [`CommandWindowLocator`] lists windows through an external tool (default
//! `wmctrl -lG`); tests use scripted locators.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, instrument};

use crate::io::process::run_tool;

const LIST_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// A window the effector can act on. Threaded explicitly through every
/// effector call; nothing holds a "current window".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    /// Backend window id (e.g. `0x03a00007`).
    pub id: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
}

/// Predicate over visible windows: title text and minimum size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowQuery {
    /// Case-insensitive substrings; a window matches if its title contains any.
    /// Empty means any titled window.
    pub title_contains: Vec<String>,
    pub min_width: u32,
    pub min_height: u32,
}

impl WindowQuery {
    pub fn matches(&self, window: &WindowHandle) -> bool {
        let title = window.title.trim().to_lowercase();
        if title.is_empty() {
            return false;
        }
        let title_ok = self.title_contains.is_empty()
            || self
                .title_contains
                .iter()
                .any(|needle| title.contains(&needle.to_lowercase()));
        title_ok && window.width >= self.min_width && window.height >= self.min_height
    }

    /// First matching window in listing order.
    pub fn select<'a>(&self, windows: &'a [WindowHandle]) -> Option<&'a WindowHandle> {
        windows.iter().find(|window| self.matches(window))
    }
}

impl fmt::Display for WindowQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "title ~ {:?}, at least {}x{}",
            self.title_contains, self.min_width, self.min_height
        )
    }
}

/// Finds the target window.
pub trait WindowLocator {
    /// `Ok(None)` when nothing matches; `Err` only when the backend itself fails.
    fn find(&self, query: &WindowQuery) -> Result<Option<WindowHandle>>;
}

/// Locator that runs a window-listing tool and parses `wmctrl -lG` output.
#[derive(Debug, Clone)]
pub struct CommandWindowLocator {
    pub list_command: Vec<String>,
    pub timeout: Duration,
}

impl WindowLocator for CommandWindowLocator {
    #[instrument(skip_all, fields(query = %query))]
    fn find(&self, query: &WindowQuery) -> Result<Option<WindowHandle>> {
        let output = run_tool(
            &self.list_command,
            None,
            self.timeout,
            LIST_OUTPUT_LIMIT_BYTES,
        )
        .context("list windows")?;
        output.ensure_success("window listing")?;
        let listing = String::from_utf8_lossy(&output.stdout);
        let windows = parse_window_listing(&listing);
        debug!(count = windows.len(), "listed windows");
        Ok(query.select(&windows).cloned())
    }
}

/// Parse `wmctrl -lG` rows: `id desktop x y width height host title...`.
///
/// Rows that do not fit the layout are skipped.
pub fn parse_window_listing(listing: &str) -> Vec<WindowHandle> {
    static ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(\S+)\s+-?\d+\s+-?\d+\s+-?\d+\s+(\d+)\s+(\d+)\s+\S+ ?(.*)$")
            .expect("window row regex")
    });

    listing
        .lines()
        .filter_map(|line| {
            let caps = ROW_RE.captures(line.trim_end())?;
            Some(WindowHandle {
                id: caps[1].to_string(),
                width: caps[2].parse().ok()?,
                height: caps[3].parse().ok()?,
                title: caps[4].to_string(),
            })
        })
        .collect()
}
