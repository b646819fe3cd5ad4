//! Console configuration.
//!
//! Reads from environment variables (a `.env` file is honoured by the
//! binary via dotenvy):
//!   WINDROUTE_BACKEND_URL         - backend base URL (default: http://127.0.0.1:8000/)
//!   WINDROUTE_REQUEST_TIMEOUT_MS  - per-request timeout (default: 5000)
//!   WINDROUTE_POLL_INTERVAL_MS    - reconciliation period (default: 2000)
//!   WINDROUTE_AUTHORITY           - `backend` or `grace:<ms>` (default: backend)
//!   WINDROUTE_LAYOUT              - path to the layout YAML (optional)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Who wins when reconciliation and a local intent disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileAuthority {
    /// Backend state always overwrites local state.
    #[default]
    Backend,
    /// Reconciliation holds off for this long after a local intent.
    LocalGrace(Duration),
}

impl FromStr for ReconcileAuthority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("backend") {
            return Ok(Self::Backend);
        }
        if let Some(ms) = s.strip_prefix("grace:") {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("invalid grace period {ms:?}"))?;
            return Ok(Self::LocalGrace(Duration::from_millis(ms)));
        }
        bail!("unknown authority {s:?} (expected `backend` or `grace:<ms>`)")
    }
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub backend_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub authority: ReconcileAuthority,
    pub layout_path: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000/".to_string(),
            request_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
            authority: ReconcileAuthority::Backend,
            layout_path: None,
        }
    }
}

impl ConsoleConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults, malformed
    /// values are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("WINDROUTE_BACKEND_URL") {
            config.backend_url = url;
        }
        if let Some(ms) = lookup("WINDROUTE_REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis("WINDROUTE_REQUEST_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("WINDROUTE_POLL_INTERVAL_MS") {
            config.poll_interval = parse_millis("WINDROUTE_POLL_INTERVAL_MS", &ms)?;
        }
        if let Some(authority) = lookup("WINDROUTE_AUTHORITY") {
            config.authority = authority
                .parse()
                .context("WINDROUTE_AUTHORITY is malformed")?;
        }
        if let Some(path) = lookup("WINDROUTE_LAYOUT") {
            config.layout_path = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn authority(mut self, authority: ReconcileAuthority) -> Self {
        self.authority = authority;
        self
    }

    pub fn layout_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.layout_path = Some(path.into());
        self
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    let ms: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of milliseconds, got {raw:?}"))?;
    if ms == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(Duration::from_millis(ms))
}
