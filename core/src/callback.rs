//! Completion delivery: the per-request callback, then the global one.
//!
//! # Design
//! Both callbacks run for every completion, even after a fault has been
//! captured, so in-flight work drained after a fault is still reported. The
//! sink never decides whether a fault stops scheduling; it only turns the
//! callbacks' errors and panics into the first `DispatchError` it saw for
//! this completion and leaves first-fault-wins bookkeeping to the scheduler.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::error::{CallbackResult, DispatchError};
use crate::http::{Transfer, TransportMeta};
use crate::request::RequestDescriptor;

/// Dispatcher-wide callback, invoked after the per-request one.
pub type GlobalCallback =
    Box<dyn FnMut(&[u8], &TransportMeta, &RequestDescriptor) -> CallbackResult>;

/// A finished request: what the transport returned plus the originating
/// descriptor.
#[derive(Debug)]
pub struct Completion {
    pub body: Vec<u8>,
    pub meta: TransportMeta,
    pub request: RequestDescriptor,
}

impl Completion {
    pub fn new(transfer: Transfer, request: RequestDescriptor) -> Self {
        Self {
            body: transfer.body,
            meta: transfer.meta,
            request,
        }
    }
}

#[derive(Default)]
pub(crate) struct CallbackSink {
    global: Option<GlobalCallback>,
}

impl CallbackSink {
    pub(crate) fn set_global(&mut self, callback: GlobalCallback) {
        self.global = Some(callback);
    }

    /// Run both callbacks for `completion`.
    ///
    /// Returns the first non-recoverable failure; a second failure from the
    /// global callback is logged and discarded.
    pub(crate) fn dispatch(&mut self, completion: &Completion) -> Result<(), DispatchError> {
        let body = completion.body.as_slice();
        let meta = &completion.meta;
        let request = &completion.request;
        let mut fault = None;

        if let Some(callback) = request.callback().cloned() {
            let outcome = guarded(request.target(), || callback(body, meta, request));
            record(&mut fault, outcome);
        }
        if let Some(global) = self.global.as_mut() {
            let outcome = guarded(request.target(), || global(body, meta, request));
            record(&mut fault, outcome);
        }

        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn record(fault: &mut Option<DispatchError>, outcome: Result<(), DispatchError>) {
    if let Err(err) = outcome {
        if fault.is_some() {
            warn!(error = %err, "discarding second callback fault for the same completion");
        } else {
            *fault = Some(err);
        }
    }
}

/// Invoke one callback, catching panics and classifying its error.
fn guarded(target: &str, call: impl FnOnce() -> CallbackResult) -> Result<(), DispatchError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) if err.is_recoverable() => {
            warn!(url = target, error = %err, "callback reported a recoverable error");
            Ok(())
        }
        Ok(Err(err)) => Err(DispatchError::Callback {
            target: target.to_string(),
            source: err.into_source(),
        }),
        Err(payload) => Err(DispatchError::CallbackPanicked {
            target: target.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
