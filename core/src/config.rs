//! Dispatcher-wide configuration.
//!
//! # Design
//! Everything is supplied at construction; the dispatcher never re-reads
//! configuration mid-run. Every field has a serde default, so a config
//! document only needs the fields it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::options::TransportOptions;
use crate::request::is_header_line;

pub const DEFAULT_WINDOW_SIZE: usize = 5;
pub const DEFAULT_MULTI_TIMEOUT: f64 = 1.0;
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

pub const ENV_WINDOW_SIZE: &str = "ROLLING_WINDOW_SIZE";
pub const ENV_MULTI_TIMEOUT: &str = "ROLLING_MULTI_TIMEOUT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum number of transfers in flight at once.
    pub window_size: usize,
    /// Upper bound, in seconds, on a single wait for completions.
    pub multi_timeout: f64,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub options: TransportOptions,
    /// Raw `Name: value` lines sent with every request that has none of its own.
    pub headers: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            multi_timeout: DEFAULT_MULTI_TIMEOUT,
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            options: TransportOptions::new(),
            headers: Vec::new(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, DispatchError> {
        let config: DispatcherConfig = serde_json::from_str(raw)?;
        config.validate()
    }

    /// Apply `ROLLING_WINDOW_SIZE` and `ROLLING_MULTI_TIMEOUT` when set.
    pub fn with_env_overrides(self) -> Result<Self, DispatchError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, DispatchError> {
        if let Some(raw) = lookup(ENV_WINDOW_SIZE) {
            self.window_size = raw.trim().parse().map_err(|_| DispatchError::InvalidConfig {
                field: "window_size",
                reason: format!("{ENV_WINDOW_SIZE}={raw:?} is not an integer"),
            })?;
        }
        if let Some(raw) = lookup(ENV_MULTI_TIMEOUT) {
            self.multi_timeout = raw.trim().parse().map_err(|_| DispatchError::InvalidConfig {
                field: "multi_timeout",
                reason: format!("{ENV_MULTI_TIMEOUT}={raw:?} is not a number"),
            })?;
        }
        self.validate()
    }

    pub fn validate(mut self) -> Result<Self, DispatchError> {
        if self.window_size == 0 {
            return Err(DispatchError::InvalidConfig {
                field: "window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.multi_timeout <= 0.0 || Duration::try_from_secs_f64(self.multi_timeout).is_err() {
            return Err(DispatchError::InvalidConfig {
                field: "multi_timeout",
                reason: format!("must be a positive number of seconds, got {}", self.multi_timeout),
            });
        }
        if let Some(bad) = self.headers.iter().find(|line| !is_header_line(line)) {
            return Err(DispatchError::MalformedHeader(bad.clone()));
        }
        self.options = self.options.validate()?;
        Ok(self)
    }

    /// The wait bound as a `Duration`. Saturates for values `validate` rejects.
    pub fn multi_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.multi_timeout).unwrap_or(Duration::MAX)
    }
}
