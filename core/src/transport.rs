//! The seam between the scheduler and whatever executes transfers.
//!
//! # Design
//! A `Transport` is a multiplexer: `start` registers a transfer and returns
//! immediately, `wait` blocks (bounded) until at least one registered
//! transfer has finished and reports every finished one. The scheduler is
//! the only caller and owns the transport, so the trait takes `&mut self`
//! throughout and needs no interior locking.

use std::fmt;
use std::time::Duration;

use crate::http::{PreparedRequest, Transfer};

/// Opaque identity of one started transfer.
///
/// Issued by [`Transport::start`]; unique among the transfers a transport
/// has in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub trait Transport {
    /// Execute one request to completion on the calling thread.
    fn perform(&mut self, request: &PreparedRequest) -> Transfer;

    /// Register a transfer. Failures surface later as a completed `Transfer`
    /// whose metadata carries the error, never as a panic or early return.
    fn start(&mut self, request: PreparedRequest) -> Handle;

    /// Block for at most `timeout` until at least one started transfer
    /// finishes and return every transfer that finished, in the order the
    /// transport observed them. May return an empty list on timeout, and
    /// returns an empty list at once when nothing is in flight.
    fn wait(&mut self, timeout: Duration) -> Vec<(Handle, Transfer)>;

    /// Number of transfers started but not yet reported by `wait`.
    fn in_flight(&self) -> usize;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn perform(&mut self, request: &PreparedRequest) -> Transfer {
        (**self).perform(request)
    }

    fn start(&mut self, request: PreparedRequest) -> Handle {
        (**self).start(request)
    }

    fn wait(&mut self, timeout: Duration) -> Vec<(Handle, Transfer)> {
        (**self).wait(timeout)
    }

    fn in_flight(&self) -> usize {
        (**self).in_flight()
    }
}
