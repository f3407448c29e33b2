//! `Transport` backed by reqwest on a private current-thread runtime.
//!
//! # Design
//! The dispatcher is synchronous, so the runtime is only driven from
//! inside `perform` and `wait`. Started transfers are spawned into a
//! `JoinSet`; while the scheduler is between calls they make no progress,
//! which is fine because the scheduler always returns to `wait` while
//! anything is in flight.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rolling_core::{Handle, PreparedRequest, Transfer, Transport, TransportErrorKind};
use tokio::runtime::{Builder, Runtime};
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::fetch::fetch;
use crate::profile::ClientProfile;

pub struct HttpTransport {
    runtime: Runtime,
    clients: HashMap<ClientProfile, reqwest::Client>,
    tasks: JoinSet<Transfer>,
    handles: HashMap<task::Id, Handle>,
    /// Transfers that finished without being spawned, reported on the next `wait`.
    ready: Vec<(Handle, Transfer)>,
    next_handle: u64,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            clients: HashMap::new(),
            tasks: JoinSet::new(),
            handles: HashMap::new(),
            ready: Vec::new(),
            next_handle: 0,
        })
    }

    /// Number of distinct pooled clients built so far.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn client_for(&mut self, request: &PreparedRequest) -> Result<reqwest::Client, reqwest::Error> {
        let profile = ClientProfile::from_options(&request.options);
        if let Some(client) = self.clients.get(&profile) {
            return Ok(client.clone());
        }
        debug!(?profile, "building client");
        let client = profile.build()?;
        self.clients.insert(profile, client.clone());
        Ok(client)
    }

    fn next_handle(&mut self) -> Handle {
        self.next_handle += 1;
        Handle::from_raw(self.next_handle)
    }

    fn finish(
        &mut self,
        id: task::Id,
        outcome: Result<Transfer, JoinError>,
    ) -> Option<(Handle, Transfer)> {
        let Some(handle) = self.handles.remove(&id) else {
            warn!(task = %id, "completion for untracked task");
            return None;
        };
        let transfer = outcome.unwrap_or_else(|err| {
            Transfer::failed(
                TransportErrorKind::Other,
                format!("transfer task failed: {err}"),
                Duration::ZERO,
            )
        });
        Some((handle, transfer))
    }
}

impl Transport for HttpTransport {
    fn perform(&mut self, request: &PreparedRequest) -> Transfer {
        let started = Instant::now();
        match self.client_for(request) {
            Ok(client) => self.runtime.block_on(fetch(client, request.clone())),
            Err(err) => {
                Transfer::failed(TransportErrorKind::Malformed, err.to_string(), started.elapsed())
            }
        }
    }

    fn start(&mut self, request: PreparedRequest) -> Handle {
        let handle = self.next_handle();
        match self.client_for(&request) {
            Ok(client) => {
                let abort = self.tasks.spawn_on(fetch(client, request), self.runtime.handle());
                self.handles.insert(abort.id(), handle);
            }
            Err(err) => {
                let failed = Transfer::failed(
                    TransportErrorKind::Malformed,
                    err.to_string(),
                    Duration::ZERO,
                );
                self.ready.push((handle, failed));
            }
        }
        handle
    }

    fn wait(&mut self, timeout: Duration) -> Vec<(Handle, Transfer)> {
        let mut done = std::mem::take(&mut self.ready);
        if self.tasks.is_empty() {
            return done;
        }

        if done.is_empty() {
            let tasks = &mut self.tasks;
            let first = self.runtime.block_on(async move {
                tokio::time::timeout(timeout, tasks.join_next_with_id()).await
            });
            match first {
                Ok(Some(Ok((id, transfer)))) => done.extend(self.finish(id, Ok(transfer))),
                Ok(Some(Err(err))) => {
                    let id = err.id();
                    done.extend(self.finish(id, Err(err)));
                }
                Ok(None) | Err(_) => return done,
            }
        }

        // Collect whatever else is already finished without blocking.
        while let Some(outcome) = self.tasks.try_join_next_with_id() {
            match outcome {
                Ok((id, transfer)) => done.extend(self.finish(id, Ok(transfer))),
                Err(err) => {
                    let id = err.id();
                    done.extend(self.finish(id, Err(err)));
                }
            }
        }
        done
    }

    fn in_flight(&self) -> usize {
        self.tasks.len() + self.ready.len()
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            debug!(abandoned = self.tasks.len(), "aborting unfinished transfers");
        }
        self.tasks.abort_all();
    }
}
