//! HTTP transport for the rolling dispatcher.
//!
//! [`HttpTransport`] implements `rolling_core::Transport` with reqwest on a
//! private current-thread tokio runtime, so the dispatcher itself stays
//! synchronous. Requests sharing the same client-level options share one
//! connection pool.
//!
//! ```no_run
//! use rolling_core::{DispatcherConfig, RequestDescriptor};
//!
//! let mut dispatcher = rolling_transport::http_dispatcher(DispatcherConfig::default())?;
//! dispatcher.set_callback(|body, meta, request| {
//!     println!("{} -> {} ({} bytes)", request.target(), meta.status, body.len());
//!     Ok(())
//! });
//! dispatcher.enqueue(RequestDescriptor::get("http://127.0.0.1:3000/delay/10")?);
//! dispatcher.enqueue(RequestDescriptor::get("http://127.0.0.1:3000/status/404")?);
//! dispatcher.run(Some(2))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod fetch;
pub mod profile;
pub mod transport;

pub use error::TransportError;
pub use fetch::fetch;
pub use profile::ClientProfile;
pub use transport::HttpTransport;

use rolling_core::{Dispatcher, DispatcherConfig};

pub type HttpDispatcher = Dispatcher<HttpTransport>;

/// A dispatcher over a fresh [`HttpTransport`].
pub fn http_dispatcher(config: DispatcherConfig) -> Result<HttpDispatcher, TransportError> {
    Ok(Dispatcher::new(HttpTransport::new()?, config)?)
}
