//! The rolling scheduler.
//!
//! # Design
//! One `Dispatcher` owns the pending queue, the in-flight table and the
//! transport; nothing else mutates them, so no locking is involved. A run
//! fills the window, then loops on the transport's bounded `wait`. Each
//! reported completion is removed from the in-flight table, handed to the
//! callbacks, and immediately replaced by the next pending request, one for
//! one, so the window stays as full as the queue allows.
//!
//! The first callback fault (or a raised `StopSignal`) discards the pending
//! queue and stops all new starts, but the loop keeps waiting until every
//! already-started transfer has been reported. No handle is abandoned.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, debug_span, warn};

use crate::callback::{CallbackSink, Completion};
use crate::config::DispatcherConfig;
use crate::error::{CallbackResult, DispatchError};
use crate::http::{FormBody, TransportMeta};
use crate::options::{prepare, TransportOptions};
use crate::request::RequestDescriptor;
use crate::transport::{Handle, Transport};

/// Last state a `Dispatcher` reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Starting the initial window.
    Filling,
    /// Waiting, completing and replenishing.
    Draining,
    Done,
    Faulted,
    Cancelled,
}

/// Enqueues follow-up requests from inside a callback.
///
/// Submissions are moved into the pending queue after each completion is
/// dispatched. A submission made once the run has faulted or been stopped
/// is dropped.
#[derive(Clone, Default)]
pub struct Submitter {
    inbox: Rc<RefCell<Vec<RequestDescriptor>>>,
}

impl Submitter {
    pub fn submit(&self, request: RequestDescriptor) {
        self.inbox.borrow_mut().push(request);
    }

    fn take(&self) -> Vec<RequestDescriptor> {
        std::mem::take(&mut *self.inbox.borrow_mut())
    }
}

/// Thread-safe request to stop a run.
///
/// Checked after every bounded wait and before every replacement start. A
/// stopped run starts nothing new, drains what is in flight and returns
/// [`DispatchError::Cancelled`]. The flag clears when `run` returns.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Why a run stopped starting new transfers.
enum Halt {
    Fault(DispatchError),
    Stopped { dropped: usize },
}

pub struct Dispatcher<T: Transport> {
    config: DispatcherConfig,
    transport: T,
    pending: VecDeque<RequestDescriptor>,
    sink: CallbackSink,
    submitter: Submitter,
    stop: StopSignal,
    phase: Phase,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, config: DispatcherConfig) -> Result<Self, DispatchError> {
        Ok(Self {
            config: config.validate()?,
            transport,
            pending: VecDeque::new(),
            sink: CallbackSink::default(),
            submitter: Submitter::default(),
            stop: StopSignal::default(),
            phase: Phase::Idle,
        })
    }

    /// Register the dispatcher-wide callback, run after each per-request one.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&[u8], &TransportMeta, &RequestDescriptor) -> CallbackResult + 'static,
    {
        self.sink.set_global(Box::new(callback));
    }

    pub fn enqueue(&mut self, request: RequestDescriptor) {
        self.pending.push_back(request);
    }

    pub fn enqueue_get(
        &mut self,
        target: impl Into<String>,
        headers: Option<Vec<String>>,
        options: Option<TransportOptions>,
    ) -> Result<(), DispatchError> {
        let request = refine(RequestDescriptor::get(target)?, headers, options)?;
        self.enqueue(request);
        Ok(())
    }

    pub fn enqueue_post(
        &mut self,
        target: impl Into<String>,
        body: FormBody,
        headers: Option<Vec<String>>,
        options: Option<TransportOptions>,
    ) -> Result<(), DispatchError> {
        let request = refine(RequestDescriptor::post(target, body)?, headers, options)?;
        self.enqueue(request);
        Ok(())
    }

    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Execute every queued request.
    ///
    /// `window_size` overrides the configured window for this run. A single
    /// queued request takes the synchronous path of [`Dispatcher::run_single`].
    /// Transport failures are reported to callbacks, not returned here; the
    /// error is the first callback fault, or `Cancelled` after a stop.
    pub fn run(&mut self, window_size: Option<usize>) -> Result<(), DispatchError> {
        let window_size = window_size.unwrap_or(self.config.window_size).max(1);
        self.absorb_submissions();
        let outcome = loop {
            if self.stop.is_stopped() {
                let dropped = self.discard_pending("stop requested");
                self.phase = Phase::Cancelled;
                break Err(DispatchError::Cancelled { dropped });
            }
            if self.pending.len() > 1 {
                break self.run_rolling(window_size);
            }
            let Some(request) = self.pending.pop_front() else {
                break Ok(());
            };
            if let Err(err) = self.run_single(request) {
                break Err(err);
            }
            self.absorb_submissions();
        };
        self.stop.reset();
        outcome
    }

    /// Execute one request synchronously and dispatch its completion.
    pub fn run_single(&mut self, request: RequestDescriptor) -> Result<(), DispatchError> {
        let prepared = prepare(&self.config, &request);
        debug!(url = %prepared.target, method = %prepared.method, "performing single request");
        let transfer = self.transport.perform(&prepared);
        let completion = Completion::new(transfer, request);
        log_completion(None, &completion);
        match self.sink.dispatch(&completion) {
            Ok(()) => {
                self.phase = Phase::Done;
                Ok(())
            }
            Err(err) => {
                self.phase = Phase::Faulted;
                self.discard_submissions();
                Err(err)
            }
        }
    }

    fn run_rolling(&mut self, window_size: usize) -> Result<(), DispatchError> {
        let window = window_size.min(self.pending.len()).max(1);
        let span = debug_span!("rolling_run", window, queued = self.pending.len());
        let _entered = span.enter();

        let mut inflight: HashMap<Handle, RequestDescriptor> = HashMap::with_capacity(window);
        let mut halt: Option<Halt> = None;

        self.phase = Phase::Filling;
        while inflight.len() < window {
            let Some(request) = self.pending.pop_front() else { break };
            self.start(&mut inflight, request);
        }

        self.phase = Phase::Draining;
        while !inflight.is_empty() {
            let finished = self.transport.wait(self.config.multi_timeout());

            if halt.is_none() && self.stop.is_stopped() {
                let dropped = self.discard_pending("stop requested");
                halt = Some(Halt::Stopped { dropped });
            }

            for (handle, transfer) in finished {
                let Some(request) = inflight.remove(&handle) else {
                    warn!(%handle, "transport reported an unknown handle");
                    continue;
                };
                let completion = Completion::new(transfer, request);
                log_completion(Some(handle), &completion);

                if let Err(err) = self.sink.dispatch(&completion) {
                    if halt.is_some() {
                        warn!(error = %err, "discarding callback fault raised while draining");
                    } else {
                        self.discard_pending("callback fault");
                        halt = Some(Halt::Fault(err));
                    }
                }

                if halt.is_none() && self.stop.is_stopped() {
                    let dropped = self.discard_pending("stop requested");
                    halt = Some(Halt::Stopped { dropped });
                }
                if halt.is_some() {
                    self.discard_submissions();
                    continue;
                }
                self.absorb_submissions();
                if let Some(next) = self.pending.pop_front() {
                    self.start(&mut inflight, next);
                }
            }
            debug!(in_flight = inflight.len(), pending = self.pending.len(), "window updated");
        }
        debug_assert!(self.pending.is_empty());

        match halt {
            None => {
                self.phase = Phase::Done;
                Ok(())
            }
            Some(Halt::Fault(err)) => {
                self.phase = Phase::Faulted;
                Err(err)
            }
            Some(Halt::Stopped { dropped }) => {
                self.phase = Phase::Cancelled;
                Err(DispatchError::Cancelled { dropped })
            }
        }
    }

    fn start(
        &mut self,
        inflight: &mut HashMap<Handle, RequestDescriptor>,
        request: RequestDescriptor,
    ) {
        let prepared = prepare(&self.config, &request);
        let handle = self.transport.start(prepared);
        debug!(%handle, url = request.target(), "transfer started");
        let previous = inflight.insert(handle, request);
        debug_assert!(previous.is_none(), "transport reused an in-flight handle");
    }

    fn absorb_submissions(&mut self) {
        self.pending.extend(self.submitter.take());
    }

    fn discard_submissions(&mut self) {
        let dropped = self.submitter.take().len();
        if dropped > 0 {
            warn!(dropped, "dropping requests submitted after the run halted");
        }
    }

    fn discard_pending(&mut self, reason: &str) -> usize {
        self.discard_submissions();
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            warn!(dropped, reason, "pending requests will not be started");
        }
        dropped
    }
}

fn refine(
    mut request: RequestDescriptor,
    headers: Option<Vec<String>>,
    options: Option<TransportOptions>,
) -> Result<RequestDescriptor, DispatchError> {
    if let Some(headers) = headers {
        request = request.with_headers(headers)?;
    }
    if let Some(options) = options {
        request = request.with_options(options)?;
    }
    Ok(request)
}

fn log_completion(handle: Option<Handle>, completion: &Completion) {
    let meta = &completion.meta;
    debug!(
        handle = handle.map(Handle::as_raw),
        url = completion.request.target(),
        status = meta.status,
        error_code = meta.error_code,
        elapsed_ms = u64::try_from(meta.elapsed.as_millis()).unwrap_or(u64::MAX),
        "transfer completed"
    );
}
