use thiserror::Error;

/// Failure to bring up the HTTP transport itself.
///
/// Per-transfer failures never use this type; they are reported as data in
/// `TransportMeta`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build async runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Dispatch(#[from] rolling_core::DispatchError),
}
