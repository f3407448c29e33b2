//! Error types for the dispatcher.
//!
//! # Design
//! Transport failures are not errors here: they travel inside
//! `TransportMeta` with the completion. `DispatchError` covers the three
//! cases that do reach the caller: constructing a malformed request or
//! config, a callback fault that stopped scheduling, and an external stop.

use std::fmt;

use crate::options::{OptionKey, OptionValue};

/// Boxed error type accepted from caller-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by `Dispatcher` and request constructors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A request was built with an empty (or all-whitespace) target.
    #[error("request target must not be empty")]
    EmptyTarget,

    /// A raw header line is not of the form `Name: value`.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// An option value has the wrong kind for its key.
    #[error("option `{key}` does not accept value {value:?}")]
    InvalidOption { key: OptionKey, value: OptionValue },

    /// A configuration field is out of range.
    #[error("invalid config field `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The configuration document could not be parsed.
    #[error("config parse failed: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A callback returned a non-recoverable error.
    #[error("callback for {target} failed: {source}")]
    Callback {
        target: String,
        #[source]
        source: BoxError,
    },

    /// A callback panicked.
    #[error("callback for {target} panicked: {message}")]
    CallbackPanicked { target: String, message: String },

    /// The run was stopped through its `StopSignal`.
    #[error("dispatch stopped, {dropped} pending requests dropped")]
    Cancelled { dropped: usize },
}

/// Error returned by a completion callback.
///
/// Any `std::error::Error + Send + Sync` converts into a fatal
/// `CallbackError`, so `?` works inside callbacks. Wrap with
/// [`CallbackError::recoverable`] to report a problem without stopping the
/// dispatcher.
pub struct CallbackError {
    source: BoxError,
    recoverable: bool,
}

impl CallbackError {
    pub fn fatal(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
            recoverable: false,
        }
    }

    pub fn recoverable(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}

impl<E> From<E> for CallbackError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::fatal(err)
    }
}

impl fmt::Debug for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackError")
            .field("source", &self.source)
            .field("recoverable", &self.recoverable)
            .finish()
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.recoverable {
            write!(f, "recoverable: {}", self.source)
        } else {
            write!(f, "{}", self.source)
        }
    }
}

/// Result type returned by completion callbacks.
pub type CallbackResult = Result<(), CallbackError>;
