//! Deterministic in-memory transport for tests and dry runs.
//!
//! # Design
//! `ScriptedTransport` runs on a virtual clock measured in ticks. Each target
//! is scripted with an outcome and a latency; a transfer started at tick `t`
//! with latency `d` completes at tick `t + d`. `wait` jumps the clock to the
//! earliest pending completion and reports every transfer due at that tick,
//! in start order. Latency only orders completions; it never sleeps.
//!
//! The transport records what it was asked to do so tests can check the
//! scheduler's window and conservation invariants after the fact.

use std::collections::HashMap;
use std::time::Duration;

use crate::http::{PreparedRequest, Transfer, TransportErrorKind, TransportMeta};
use crate::transport::{Handle, Transport};

/// Scripted outcome for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub latency: u64,
    outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Response { status: u16, body: Vec<u8> },
    Failure { kind: TransportErrorKind, message: String },
}

impl Script {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            latency: 1,
            outcome: Outcome::Response {
                status,
                body: body.into(),
            },
        }
    }

    pub fn failure(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            latency: 1,
            outcome: Outcome::Failure {
                kind,
                message: message.into(),
            },
        }
    }

    /// Complete `ticks` after starting.
    pub fn after(mut self, ticks: u64) -> Self {
        self.latency = ticks;
        self
    }

    fn transfer(&self, request: &PreparedRequest) -> Transfer {
        let elapsed = Duration::from_millis(self.latency);
        match &self.outcome {
            Outcome::Response { status, body } => Transfer {
                body: body.clone(),
                meta: TransportMeta::succeeded(*status, elapsed)
                    .with_extra("effective_url", request.target.as_str())
                    .with_extra("size_download", body.len()),
            },
            Outcome::Failure { kind, message } => Transfer::failed(*kind, message.clone(), elapsed),
        }
    }
}

/// State observed at the start of one `wait` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSnapshot {
    pub tick: u64,
    pub in_flight: usize,
    pub started: usize,
    pub completed: usize,
}

#[derive(Debug)]
struct Active {
    handle: Handle,
    target: String,
    due: u64,
    transfer: Transfer,
}

#[derive(Debug)]
pub struct ScriptedTransport {
    scripts: HashMap<String, Script>,
    fallback: Script,
    clock: u64,
    next_handle: u64,
    active: Vec<Active>,
    started: Vec<PreparedRequest>,
    performed: Vec<PreparedRequest>,
    completed: Vec<String>,
    reported: usize,
    waits: Vec<WaitSnapshot>,
    max_in_flight: usize,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Unscripted targets answer `200` with an empty body after one tick.
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            fallback: Script::ok(Vec::new()),
            clock: 0,
            next_handle: 1,
            active: Vec::new(),
            started: Vec::new(),
            performed: Vec::new(),
            completed: Vec::new(),
            reported: 0,
            waits: Vec::new(),
            max_in_flight: 0,
        }
    }

    pub fn script(mut self, target: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(target.into(), script);
        self
    }

    pub fn fallback(mut self, script: Script) -> Self {
        self.fallback = script;
        self
    }

    fn script_for(&self, target: &str) -> &Script {
        self.scripts.get(target).unwrap_or(&self.fallback)
    }

    /// Requests passed to `start`, in start order.
    pub fn started(&self) -> &[PreparedRequest] {
        &self.started
    }

    /// Requests passed to `perform`.
    pub fn performed(&self) -> &[PreparedRequest] {
        &self.performed
    }

    /// Targets in the order their completions were reported.
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn waits(&self) -> &[WaitSnapshot] {
        &self.waits
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn now(&self) -> u64 {
        self.clock
    }
}

impl Transport for ScriptedTransport {
    fn perform(&mut self, request: &PreparedRequest) -> Transfer {
        let transfer = self.script_for(&request.target).transfer(request);
        self.performed.push(request.clone());
        self.completed.push(request.target.clone());
        transfer
    }

    fn start(&mut self, request: PreparedRequest) -> Handle {
        let handle = Handle::from_raw(self.next_handle);
        self.next_handle += 1;
        let script = self.script_for(&request.target);
        let due = self.clock + script.latency;
        let transfer = script.transfer(&request);
        self.active.push(Active {
            handle,
            target: request.target.clone(),
            due,
            transfer,
        });
        self.started.push(request);
        self.max_in_flight = self.max_in_flight.max(self.active.len());
        handle
    }

    fn wait(&mut self, _timeout: Duration) -> Vec<(Handle, Transfer)> {
        self.waits.push(WaitSnapshot {
            tick: self.clock,
            in_flight: self.active.len(),
            started: self.started.len(),
            completed: self.reported,
        });
        let Some(due) = self.active.iter().map(|a| a.due).min() else {
            return Vec::new();
        };
        self.clock = due;

        let (ready, rest): (Vec<Active>, Vec<Active>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|a| a.due == due);
        self.active = rest;

        self.reported += ready.len();
        ready
            .into_iter()
            .map(|a| {
                self.completed.push(a.target);
                (a.handle, a.transfer)
            })
            .collect()
    }

    fn in_flight(&self) -> usize {
        self.active.len()
    }
}
