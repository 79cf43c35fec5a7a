/// Two-layer admission control in front of the runner
///
/// 1. In-flight counter: rejects immediately once `max_requests` requests are
///    accepted, so callers never queue behind a saturated worker pool.
/// 2. Worker semaphore: blocks until one of `max_workers` execution slots is
///    free (or the run context is cancelled).
///
/// Both are released by dropping the returned [`AdmissionTicket`].
use crate::config::types::{Result, SandboxError};
use crate::exec::context::RunContext;
use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, warn};
use std::sync::{PoisonError, RwLock};

#[derive(Debug)]
pub struct AdmissionGate {
    max_requests: usize,
    in_flight: RwLock<usize>,
    max_workers: usize,
    slots_tx: Sender<()>,
    slots_rx: Receiver<()>,
}

/// Proof of admission. Holds one request slot and one worker slot.
#[derive(Debug)]
#[must_use = "dropping the ticket releases the admission immediately"]
pub struct AdmissionTicket<'a> {
    // field order: the worker slot is freed before the request slot
    _worker: WorkerSlot<'a>,
    _request: RequestSlot<'a>,
}

#[derive(Debug)]
struct RequestSlot<'a> {
    gate: &'a AdmissionGate,
}

#[derive(Debug)]
struct WorkerSlot<'a> {
    gate: &'a AdmissionGate,
}

impl AdmissionGate {
    pub fn new(max_workers: usize, max_requests: usize) -> Self {
        let max_workers = max_workers.max(1);
        let (slots_tx, slots_rx) = crossbeam_channel::bounded(max_workers);
        Self {
            max_requests: max_requests.max(1),
            in_flight: RwLock::new(0),
            max_workers,
            slots_tx,
            slots_rx,
        }
    }

    /// Admit one request, blocking for a worker slot.
    pub fn admit(&self, ctx: &RunContext) -> Result<AdmissionTicket<'_>> {
        let request = self.enter()?;
        let worker = self.acquire_worker(ctx)?;
        Ok(AdmissionTicket {
            _worker: worker,
            _request: request,
        })
    }

    /// Requests currently admitted, including those waiting for a worker.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Workers currently executing.
    pub fn active_workers(&self) -> usize {
        self.slots_tx.len()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    fn enter(&self) -> Result<RequestSlot<'_>> {
        if self.in_flight() >= self.max_requests {
            return Err(too_many_requests());
        }

        let mut count = self
            .in_flight
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // re-check: another request may have taken the last slot
        if *count >= self.max_requests {
            return Err(too_many_requests());
        }
        *count += 1;
        Ok(RequestSlot { gate: self })
    }

    fn acquire_worker(&self, ctx: &RunContext) -> Result<WorkerSlot<'_>> {
        select! {
            send(self.slots_tx, ()) -> res => {
                res.map_err(|_| SandboxError::Unavailable("worker pool closed".to_string()))?;
                Ok(WorkerSlot { gate: self })
            },
            recv(ctx.cancelled()) -> _ => {
                debug!("request cancelled while waiting for a worker");
                Err(SandboxError::Unavailable(
                    "request cancelled while waiting for a worker".to_string(),
                ))
            },
        }
    }
}

fn too_many_requests() -> SandboxError {
    warn!("admission rejected: too many requests");
    SandboxError::Unavailable("Too many requests".to_string())
}

impl Drop for RequestSlot<'_> {
    fn drop(&mut self) {
        let mut count = self
            .gate
            .in_flight
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
    }
}

impl Drop for WorkerSlot<'_> {
    fn drop(&mut self) {
        let _ = self.gate.slots_rx.try_recv();
    }
}
