//! Client-level settings derived from per-request options.
//!
//! reqwest fixes redirect policy, certificate checking, connect timeout and
//! user agent when a `Client` is built, so requests are grouped by the
//! subset of their options that maps to those settings and each group
//! shares one pooled client.

use std::time::Duration;

use rolling_core::{OptionKey, TransportOptions};

/// Redirect limit used when following is on but no count was given.
pub const DEFAULT_MAX_REDIRECTS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientProfile {
    pub follow_redirects: bool,
    pub max_redirects: u64,
    pub verify_peer: bool,
    pub connect_timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self {
            follow_redirects: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            verify_peer: true,
            connect_timeout_ms: None,
            user_agent: None,
        }
    }
}

impl ClientProfile {
    pub fn from_options(options: &TransportOptions) -> Self {
        let defaults = Self::default();
        Self {
            follow_redirects: options
                .flag(OptionKey::FollowRedirects)
                .unwrap_or(defaults.follow_redirects),
            max_redirects: options
                .count(OptionKey::MaxRedirects)
                .unwrap_or(defaults.max_redirects),
            verify_peer: options.flag(OptionKey::VerifyPeer).unwrap_or(defaults.verify_peer),
            connect_timeout_ms: options
                .duration(OptionKey::ConnectTimeout)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            user_agent: options.text(OptionKey::UserAgent).map(str::to_string),
        }
    }

    pub fn build(&self) -> Result<reqwest::Client, reqwest::Error> {
        let redirect = if self.follow_redirects {
            let limit = usize::try_from(self.max_redirects).unwrap_or(usize::MAX);
            reqwest::redirect::Policy::limited(limit)
        } else {
            reqwest::redirect::Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .redirect(redirect)
            .danger_accept_invalid_certs(!self.verify_peer);
        if let Some(ms) = self.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        builder.build()
    }
}
