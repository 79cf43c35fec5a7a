//! Streaming output capture for one child process.
//!
//! A capture spawns the command in its own process group and hands back an
//! [`OutputStreams`]. Behind it run three kinds of threads:
//!
//! - one reader per output pipe, forwarding chunks as they arrive
//! - a waiter that owns the child and reports its exit status
//! - a supervisor racing exit against the deadline and the run context
//!
//! The supervisor kills the whole group on timeout or cancellation. The
//! waiter sweeps the group once the leader has exited but before reaping it.
//! Readers then get a short grace period to hit end-of-file; a descendant
//! that left the group can hold the pipes open forever, so past the grace
//! period the readers are told to stop. Only after both readers are joined
//! and the after-exit hook has run is the [`ExitReport`] published. Once the
//! report is observable no further chunk can be produced.
//!
//! Each stream forwards at most its [`OutputLimits`] share; the rest is read
//! and dropped.

use super::context::RunContext;
use crate::config::loader::OutputLimits;
use crate::config::types::{Result, SandboxError};
use crate::kernel::process_group::{kill_process_group, wait_exited_unreaped};
use crossbeam_channel::{select, Receiver, Select, Sender};
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const CHUNK_SIZE: usize = 4096;
/// How long readers may keep running after the group is gone.
const READER_GRACE: Duration = Duration::from_millis(250);
/// Upper bound on how long a reader takes to notice a stop request.
const POLL_INTERVAL_MS: libc::c_int = 50;

type ExitHook = Box<dyn FnOnce() + Send + 'static>;

/// How a captured process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, absent when killed by a signal
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Some output was dropped at an output limit or when readers were stopped
    pub output_truncated: bool,
    pub elapsed: Duration,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn from_status(status: Option<ExitStatus>, elapsed: Duration) -> Self {
        Self {
            exit_code: status.and_then(|s| s.code()),
            signal: status.and_then(|s| s.signal()),
            timed_out: false,
            cancelled: false,
            output_truncated: false,
            elapsed,
        }
    }
}

/// Configures and starts a capture.
pub struct OutputCapture {
    timeout: Duration,
    limits: OutputLimits,
    stdin: Option<Vec<u8>>,
    after_exit: Option<ExitHook>,
}

impl fmt::Debug for OutputCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputCapture")
            .field("timeout", &self.timeout)
            .field("limits", &self.limits)
            .field("stdin", &self.stdin.as_ref().map(Vec::len))
            .field("after_exit", &self.after_exit.is_some())
            .finish()
    }
}

impl OutputCapture {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            limits: OutputLimits::default(),
            stdin: None,
            after_exit: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_output_limits(&mut self, limits: OutputLimits) {
        self.limits = limits;
    }

    /// Bytes written to the child's stdin, which is then closed.
    pub fn set_stdin(&mut self, input: Vec<u8>) {
        self.stdin = Some(input);
    }

    /// Runs exactly once: after the child is gone and both pipes are drained,
    /// or immediately if the child cannot be spawned.
    pub fn set_after_exit_hook<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.after_exit = Some(Box::new(hook));
    }

    /// Spawn `command` and start streaming its output.
    ///
    /// Stdio and the process group of `command` are overridden.
    pub fn capture(mut self, ctx: &RunContext, mut command: Command) -> Result<OutputStreams> {
        command
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let started = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                if let Some(hook) = self.after_exit.take() {
                    hook();
                }
                return Err(SandboxError::Process(format!(
                    "failed to spawn {:?}: {}",
                    command.get_program(),
                    e
                )));
            }
        };
        let pid = child.id();
        log::debug!("Spawned process group {}", pid);

        let (stdout_tx, stdout_rx) = crossbeam_channel::unbounded();
        let (stderr_tx, stderr_rx) = crossbeam_channel::unbounded();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        // never sent on; disconnects once every reader has returned
        let (finished_tx, finished_rx) = crossbeam_channel::bounded::<()>(0);

        let shared = Arc::new(ReaderShared {
            combined_limit: self.limits.combined_limit,
            combined_used: AtomicUsize::new(0),
            truncated: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        });
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            let reader = PipeReader {
                tx: stdout_tx,
                limit: self.limits.stdout_limit,
                forwarded: 0,
                shared: Arc::clone(&shared),
                _finished: finished_tx.clone(),
            };
            readers.push(thread::spawn(move || reader.pump(pipe)));
        }
        if let Some(pipe) = child.stderr.take() {
            let reader = PipeReader {
                tx: stderr_tx,
                limit: self.limits.stderr_limit,
                forwarded: 0,
                shared: Arc::clone(&shared),
                _finished: finished_tx.clone(),
            };
            readers.push(thread::spawn(move || reader.pump(pipe)));
        }
        drop(finished_tx);
        if let (Some(mut pipe), Some(input)) = (child.stdin.take(), self.stdin.take()) {
            thread::spawn(move || {
                if let Err(e) = pipe.write_all(&input) {
                    if e.kind() != ErrorKind::BrokenPipe {
                        log::debug!("stdin write to {} failed: {}", pid, e);
                    }
                }
            });
        }

        thread::spawn(move || {
            if let Err(e) = wait_exited_unreaped(pid) {
                log::debug!("waitid on {} failed: {}", pid, e);
            }
            // descendants left in the group would hold the pipes open
            kill_process_group(pid);
            let _ = exit_tx.send(child.wait());
        });

        let supervisor = Supervisor {
            pid,
            started,
            timeout: self.timeout,
            cancelled: ctx.cancelled().clone(),
            exit: exit_rx,
            readers,
            readers_finished: finished_rx,
            shared,
            after_exit: self.after_exit.take(),
            done: done_tx,
        };
        let handle = thread::spawn(move || supervisor.run());

        Ok(OutputStreams {
            stdout: stdout_rx,
            stderr: stderr_rx,
            done: done_rx,
            state: StreamState::Producing,
            stdout_open: true,
            stderr_open: true,
            report: None,
            supervisor: Some(handle),
        })
    }
}

/// State shared by both readers of one capture.
struct ReaderShared {
    combined_limit: usize,
    combined_used: AtomicUsize,
    truncated: AtomicBool,
    stop: AtomicBool,
}

struct PipeReader {
    tx: Sender<Vec<u8>>,
    limit: usize,
    forwarded: usize,
    shared: Arc<ReaderShared>,
    _finished: Sender<()>,
}

impl PipeReader {
    /// Forward a pipe in chunks until EOF or a stop request. Keeps draining
    /// past the output limits and after the consumer goes away so the child
    /// never blocks on a full pipe.
    fn pump<R: Read + AsRawFd>(mut self, mut pipe: R) {
        let fd = pipe.as_raw_fd();
        let mut buf = [0u8; CHUNK_SIZE];
        let mut consumer_alive = true;
        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                self.shared.truncated.store(true, Ordering::SeqCst);
                break;
            }
            match wait_readable(fd) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    log::debug!("output pipe poll failed: {}", e);
                    break;
                }
            }
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let granted = self.grant(n);
                    if consumer_alive
                        && granted > 0
                        && self.tx.send(buf[..granted].to_vec()).is_err()
                    {
                        consumer_alive = false;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("output pipe read failed: {}", e);
                    break;
                }
            }
        }
    }

    /// How many of `n` freshly read bytes may be forwarded.
    fn grant(&mut self, n: usize) -> usize {
        let wanted = n.min(self.limit.saturating_sub(self.forwarded));
        let mut granted = 0;
        let combined_limit = self.shared.combined_limit;
        let _ = self
            .shared
            .combined_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                granted = wanted.min(combined_limit.saturating_sub(used));
                Some(used + granted)
            });
        self.forwarded += granted;
        if granted < n {
            self.shared.truncated.store(true, Ordering::SeqCst);
        }
        granted
    }
}

/// Wait up to one poll interval for `fd` to become readable or hang up.
fn wait_readable(fd: RawFd) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let rc = unsafe { libc::poll(&mut pfd, 1, POLL_INTERVAL_MS) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}

struct Supervisor {
    pid: u32,
    started: Instant,
    timeout: Duration,
    cancelled: Receiver<()>,
    exit: Receiver<std::io::Result<ExitStatus>>,
    readers: Vec<JoinHandle<()>>,
    readers_finished: Receiver<()>,
    shared: Arc<ReaderShared>,
    after_exit: Option<ExitHook>,
    done: Sender<ExitReport>,
}

impl Supervisor {
    fn run(mut self) {
        let deadline = crossbeam_channel::at(self.started + self.timeout);
        let (status, timed_out, cancelled) = select! {
            recv(self.exit) -> status => (status, false, false),
            recv(deadline) -> _ => {
                log::info!("Process group {} exceeded {:?}, killing", self.pid, self.timeout);
                kill_process_group(self.pid);
                (self.exit.recv(), true, false)
            },
            recv(self.cancelled) -> _ => {
                log::info!("Run cancelled, killing process group {}", self.pid);
                kill_process_group(self.pid);
                (self.exit.recv(), false, true)
            },
        };

        let status = match status {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                log::warn!("wait on {} failed: {}", self.pid, e);
                None
            }
            Err(_) => None,
        };

        let grace = crossbeam_channel::after(READER_GRACE);
        select! {
            recv(self.readers_finished) -> _ => {},
            recv(grace) -> _ => {
                log::warn!(
                    "Output pipes of {} still open after the group exited; abandoning them",
                    self.pid
                );
                self.shared.stop.store(true, Ordering::SeqCst);
            },
        }

        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                log::warn!("output reader for {} panicked", self.pid);
            }
        }

        if let Some(hook) = self.after_exit.take() {
            hook();
        }

        let mut report = ExitReport::from_status(status, self.started.elapsed());
        report.timed_out = timed_out;
        report.cancelled = cancelled;
        report.output_truncated = self.shared.truncated.load(Ordering::SeqCst);
        log::debug!("Process group {} finished: {:?}", self.pid, report);
        let _ = self.done.send(report);
    }
}

/// Consumer-side lifecycle of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Chunks may still arrive
    Producing,
    /// Done was received; buffered chunks remain
    Draining,
    /// Every chunk and the done event have been delivered
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Always the last event
    Done(ExitReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub report: ExitReport,
}

/// Receiving side of a capture.
///
/// The raw channels are available for callers that want their own select
/// loop; [`next_event`](Self::next_event) orders everything so that `Done`
/// comes after the last chunk.
pub struct OutputStreams {
    stdout: Receiver<Vec<u8>>,
    stderr: Receiver<Vec<u8>>,
    done: Receiver<ExitReport>,
    state: StreamState,
    stdout_open: bool,
    stderr_open: bool,
    report: Option<ExitReport>,
    supervisor: Option<JoinHandle<()>>,
}

impl fmt::Debug for OutputStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStreams")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl OutputStreams {
    pub fn stdout(&self) -> &Receiver<Vec<u8>> {
        &self.stdout
    }

    pub fn stderr(&self) -> &Receiver<Vec<u8>> {
        &self.stderr
    }

    pub fn done(&self) -> &Receiver<ExitReport> {
        &self.done
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Block for the next event. Returns `None` once closed.
    pub fn next_event(&mut self) -> Option<OutputEvent> {
        loop {
            match self.state {
                StreamState::Closed => return None,
                StreamState::Draining => {
                    if let Ok(chunk) = self.stdout.try_recv() {
                        return Some(OutputEvent::Stdout(chunk));
                    }
                    if let Ok(chunk) = self.stderr.try_recv() {
                        return Some(OutputEvent::Stderr(chunk));
                    }
                    self.state = StreamState::Closed;
                    if let Some(handle) = self.supervisor.take() {
                        let _ = handle.join();
                    }
                    return self.report.take().map(OutputEvent::Done);
                }
                StreamState::Producing => {
                    if let Some(event) = self.select_producing() {
                        return Some(event);
                    }
                }
            }
        }
    }

    fn select_producing(&mut self) -> Option<OutputEvent> {
        let mut sel = Select::new();
        let out_idx = self.stdout_open.then(|| sel.recv(&self.stdout));
        let err_idx = self.stderr_open.then(|| sel.recv(&self.stderr));
        let done_idx = sel.recv(&self.done);

        let op = sel.select();
        let idx = op.index();
        if Some(idx) == out_idx {
            match op.recv(&self.stdout) {
                Ok(chunk) => return Some(OutputEvent::Stdout(chunk)),
                Err(_) => self.stdout_open = false,
            }
        } else if Some(idx) == err_idx {
            match op.recv(&self.stderr) {
                Ok(chunk) => return Some(OutputEvent::Stderr(chunk)),
                Err(_) => self.stderr_open = false,
            }
        } else {
            debug_assert_eq!(idx, done_idx);
            let report = op.recv(&self.done).unwrap_or_else(|_| {
                log::warn!("capture supervisor exited without a report");
                ExitReport::from_status(None, Duration::ZERO)
            });
            self.report = Some(report);
            self.state = StreamState::Draining;
        }
        None
    }

    /// Drain everything into memory.
    pub fn collect(mut self) -> CollectedOutput {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(event) = self.next_event() {
            match event {
                OutputEvent::Stdout(chunk) => stdout.extend_from_slice(&chunk),
                OutputEvent::Stderr(chunk) => stderr.extend_from_slice(&chunk),
                OutputEvent::Done(report) => {
                    return CollectedOutput {
                        stdout,
                        stderr,
                        report,
                    }
                }
            }
        }
        // next_event always yields Done before closing
        CollectedOutput {
            stdout,
            stderr,
            report: ExitReport::from_status(None, Duration::ZERO),
        }
    }
}
