//! Rolling HTTP request dispatcher core.
//!
//! # Overview
//! Queue any number of independent GET/POST requests and execute them with
//! at most `window_size` in flight at a time. Each completion is handed to a
//! per-request callback and a dispatcher-wide callback, and immediately
//! replaced by the next queued request until the queue runs dry.
//!
//! # Design
//! - The core never touches the network. It builds `PreparedRequest` values
//!   and consumes `Transfer` values; a [`Transport`] implementation does the
//!   multiplexed I/O in between (see the `rolling-transport` crate).
//! - Scheduling is single-threaded: one `Dispatcher` owns its queue,
//!   in-flight table and transport.
//! - Transport failures are data (`TransportMeta::error_code`), not errors.
//!   The only run-level failures are a callback fault and an external stop.
//! - [`mock::ScriptedTransport`] replays scripted outcomes on a virtual clock
//!   for deterministic tests.

pub mod callback;
pub mod config;
pub mod error;
pub mod http;
pub mod mock;
pub mod options;
pub mod request;
pub mod scheduler;
pub mod transport;

pub use callback::{Completion, GlobalCallback};
pub use config::DispatcherConfig;
pub use error::{BoxError, CallbackError, CallbackResult, DispatchError};
pub use http::{FormBody, Method, PreparedRequest, Transfer, TransportErrorKind, TransportMeta};
pub use options::{prepare, OptionKey, OptionValue, TransportOptions};
pub use request::{RequestCallback, RequestDescriptor};
pub use scheduler::{Dispatcher, Phase, StopSignal, Submitter};
pub use transport::{Handle, Transport};
