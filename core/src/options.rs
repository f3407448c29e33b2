//! Transport option keys and the precedence-ordered merge that turns a
//! `RequestDescriptor` into a `PreparedRequest`.
//!
//! # Design
//! Options are a typed key/value map rather than an open bag: each
//! `OptionKey` accepts exactly one `OptionValue` kind, checked when a
//! descriptor or config is built, so transports can read values without
//! re-validating. Merging is an explicit overlay in six steps (see
//! [`prepare`]); a later step replaces an earlier one on key collision.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::http::PreparedRequest;
use crate::request::RequestDescriptor;

/// A transport option understood by every `Transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKey {
    FollowRedirects,
    MaxRedirects,
    /// Whole-transfer timeout.
    Timeout,
    ConnectTimeout,
    VerifyPeer,
    UserAgent,
    /// Prefix the returned body with the status line and response headers.
    IncludeResponseHeaders,
}

impl OptionKey {
    /// Whether `value` has the kind this key expects.
    pub fn accepts(self, value: &OptionValue) -> bool {
        match self {
            OptionKey::FollowRedirects
            | OptionKey::VerifyPeer
            | OptionKey::IncludeResponseHeaders => {
                matches!(value, OptionValue::Flag(_))
            }
            OptionKey::MaxRedirects => matches!(value, OptionValue::Count(_)),
            OptionKey::Timeout | OptionKey::ConnectTimeout => {
                matches!(value, OptionValue::Seconds(s) if s.is_finite() && *s >= 0.0)
            }
            OptionKey::UserAgent => matches!(value, OptionValue::Text(_)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OptionKey::FollowRedirects => "follow_redirects",
            OptionKey::MaxRedirects => "max_redirects",
            OptionKey::Timeout => "timeout",
            OptionKey::ConnectTimeout => "connect_timeout",
            OptionKey::VerifyPeer => "verify_peer",
            OptionKey::UserAgent => "user_agent",
            OptionKey::IncludeResponseHeaders => "include_response_headers",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a transport option.
///
/// Untagged in JSON: `true`, `5`, `2.5` and `"agent/1.0"` map to `Flag`,
/// `Count`, `Seconds` and `Text`. An integer given for a seconds-valued key
/// is accepted and widened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Flag(bool),
    Count(u64),
    Seconds(f64),
    Text(String),
}

/// Ordered option map with last-writer-wins overlay semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportOptions {
    entries: BTreeMap<OptionKey, OptionValue>,
}

impl TransportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Validation happens in [`TransportOptions::validate`].
    pub fn with(mut self, key: OptionKey, value: OptionValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: OptionKey, value: OptionValue) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: OptionKey) -> Option<&OptionValue> {
        self.entries.get(&key)
    }

    pub fn remove(&mut self, key: OptionKey) -> Option<OptionValue> {
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OptionKey, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Copy every entry of `other` over `self`, replacing on collision.
    pub fn overlay(&mut self, other: &TransportOptions) {
        for (key, value) in other.iter() {
            self.entries.insert(key, value.clone());
        }
    }

    /// Normalize integer seconds to `Seconds` and reject kind mismatches.
    pub fn validate(mut self) -> Result<Self, DispatchError> {
        for (key, value) in self.entries.iter_mut() {
            let widened = match (*key, &*value) {
                (OptionKey::Timeout | OptionKey::ConnectTimeout, OptionValue::Count(n)) => {
                    Some(OptionValue::Seconds(*n as f64))
                }
                _ => None,
            };
            if let Some(seconds) = widened {
                *value = seconds;
            }
            if !key.accepts(value) {
                return Err(DispatchError::InvalidOption {
                    key: *key,
                    value: value.clone(),
                });
            }
        }
        Ok(self)
    }

    pub fn flag(&self, key: OptionKey) -> Option<bool> {
        match self.get(key) {
            Some(OptionValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn count(&self, key: OptionKey) -> Option<u64> {
        match self.get(key) {
            Some(OptionValue::Count(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn duration(&self, key: OptionKey) -> Option<Duration> {
        match self.get(key) {
            Some(OptionValue::Seconds(s)) => Duration::try_from_secs_f64(*s).ok(),
            Some(OptionValue::Count(n)) => Some(Duration::from_secs(*n)),
            _ => None,
        }
    }

    pub fn text(&self, key: OptionKey) -> Option<&str> {
        match self.get(key) {
            Some(OptionValue::Text(s)) => Some(s),
            _ => None,
        }
    }
}

impl FromIterator<(OptionKey, OptionValue)> for TransportOptions {
    fn from_iter<I: IntoIterator<Item = (OptionKey, OptionValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Merge dispatcher defaults and per-request overrides into a
/// `PreparedRequest`.
///
/// Precedence, lowest first:
/// 1. computed defaults: redirect following with a bounded count, or
///    explicitly disabled when the config restricts it;
/// 2. `config.options`;
/// 3. `config.headers` (turns response-header echoing off when non-empty);
/// 4. the request's own options;
/// 5. the request's own headers, which replace the defaults entirely when
///    present (even if empty) and turn response-header echoing off;
/// 6. target, method and body, taken from the request only.
pub fn prepare(config: &DispatcherConfig, request: &RequestDescriptor) -> PreparedRequest {
    let mut options = TransportOptions::new();
    if config.follow_redirects {
        options.set(OptionKey::FollowRedirects, OptionValue::Flag(true));
        options.set(OptionKey::MaxRedirects, OptionValue::Count(u64::from(config.max_redirects)));
    } else {
        options.set(OptionKey::FollowRedirects, OptionValue::Flag(false));
    }

    options.overlay(&config.options);

    let mut headers = config.headers.clone();
    if !headers.is_empty() {
        options.set(OptionKey::IncludeResponseHeaders, OptionValue::Flag(false));
    }

    if let Some(overrides) = request.options() {
        options.overlay(overrides);
    }

    if let Some(custom) = request.headers() {
        headers = custom.to_vec();
        options.set(OptionKey::IncludeResponseHeaders, OptionValue::Flag(false));
    }

    PreparedRequest {
        target: request.target().to_string(),
        method: request.method(),
        body: request.body().cloned(),
        headers,
        options,
    }
}
