//! Child process supervision with a per-test deadline.
//!
//! ## Wait strategy
//!
//! Two helper threads feed one channel. A waiter thread blocks in `wait()` on the child and
//! sends [`Event::Exited`] when it terminates; a relay thread drains the child's stdout pipe and
//! forwards each chunk. The supervising thread blocks in `recv_timeout` with whatever is left of
//! the deadline, so it wakes for child output, for the child exiting, or for the deadline.
//! Output wake-ups loop back with the same deadline.
//!
//! The child is shared with the waiter through [`SharedChild`], so it can be killed while the
//! waiter is blocked. On expiry it is killed with SIGKILL and the waiter's reap is awaited. A
//! child that has already exited when the deadline fires is reported with its real status.
//!
//! Output still buffered in the pipe after the exit is collected for at most
//! [`OUTPUT_GRACE`]. A background process that inherited the pipe keeps the relay thread alive
//! until it closes its copy, but it never holds up the report.

use std::borrow::Cow;
use std::io::{self, Read};
use std::process::{ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use shared_child::SharedChild;

use crate::errors::{HarnessError, HarnessResult};
use crate::identity::TestIdentity;

/// How long to keep collecting output after the child exited.
pub const OUTPUT_GRACE: Duration = Duration::from_millis(100);

const RELAY_CHUNK: usize = 4096;

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    /// The platform reported neither an exit code nor a signal.
    Unknown,
}

impl Termination {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Termination::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Termination::Signaled(signal);
            }
        }
        Termination::Unknown
    }
}

/// Result of one supervised child.
#[derive(Debug, Clone)]
pub struct Supervised {
    pub termination: Termination,
    /// Everything the child wrote to stdout before it ended.
    pub output: String,
}

enum Event {
    Chunk(Vec<u8>),
    Closed,
    Exited(io::Result<ExitStatus>),
}

#[derive(Debug, Clone, Copy)]
pub struct Supervisor {
    timeout: Duration,
}

impl Supervisor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Launch `command` for `identity` and supervise it to completion or deadline.
    ///
    /// Stdout is captured; stdin is closed; stderr is inherited. The child has been reaped
    /// when this returns.
    ///
    /// ## Errors
    ///
    /// - [`HarnessError::ProcessCreationFailure`] if the child cannot be launched
    /// - [`HarnessError::ProcessControlFailure`] if it cannot be waited on or killed
    #[tracing::instrument(skip_all, fields(test = %identity, timeout_ms = self.timeout.as_millis() as u64))]
    pub fn supervise(&self, identity: &TestIdentity, mut command: Command) -> HarnessResult<Supervised> {
        let control = |source: io::Error| HarnessError::ProcessControlFailure {
            identity: identity.clone(),
            source,
        };

        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::inherit());
        let started = Instant::now();
        let child = SharedChild::spawn(&mut command).map_err(|source| HarnessError::ProcessCreationFailure {
            identity: identity.clone(),
            source,
        })?;
        let child = Arc::new(child);
        tracing::debug!(pid = child.id(), "launched child");

        let (tx, events) = mpsc::channel();
        if let Err(e) = start_helpers(&child, tx) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(control(e));
        }

        let deadline = started + self.timeout;
        let mut captured = Vec::new();
        let termination = match wait_for_exit(&events, deadline, &mut captured) {
            Some(status) => Termination::from_status(status.map_err(control)?),
            None => match child.try_wait().map_err(control)? {
                Some(status) => {
                    tracing::debug!("child exited as the deadline expired");
                    Termination::from_status(status)
                }
                None => {
                    tracing::debug!(pid = child.id(), "deadline expired, killing child");
                    child.kill().map_err(control)?;
                    reaped(&events, &mut captured).map_err(control)?;
                    Termination::TimedOut
                }
            },
        };
        drain(&events, Instant::now() + OUTPUT_GRACE, &mut captured);

        tracing::debug!(
            ?termination,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reaped child"
        );
        Ok(Supervised {
            termination,
            output: String::from_utf8_lossy(&captured).into_owned(),
        })
    }
}

/// Start the waiter and relay threads, both reporting on `tx`.
fn start_helpers(child: &Arc<SharedChild>, tx: Sender<Event>) -> io::Result<()> {
    let stdout = child
        .take_stdout()
        .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
    let relay_tx = tx.clone();
    thread::Builder::new()
        .name("procharness-relay".to_string())
        .spawn(move || relay(stdout, relay_tx))?;

    let waited = Arc::clone(child);
    thread::Builder::new()
        .name("procharness-waiter".to_string())
        .spawn(move || {
            let _ = tx.send(Event::Exited(waited.wait()));
        })?;
    Ok(())
}

fn relay(mut stdout: ChildStdout, tx: Sender<Event>) {
    let mut buf = [0_u8; RELAY_CHUNK];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Event::Chunk(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(error = %e, "relay read failed");
                break;
            }
        }
    }
    let _ = tx.send(Event::Closed);
}

/// Block until the child exits or `deadline` passes. Returns `None` at the deadline.
fn wait_for_exit(
    events: &Receiver<Event>,
    deadline: Instant,
    captured: &mut Vec<u8>,
) -> Option<io::Result<ExitStatus>> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match events.recv_timeout(remaining) {
            Ok(Event::Chunk(bytes)) => captured.extend_from_slice(&bytes),
            Ok(Event::Closed) => {}
            Ok(Event::Exited(status)) => return Some(status),
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => {
                return Some(Err(io::Error::other("child waiter stopped without a status")));
            }
        }
    }
}

/// Block until the waiter reports the killed child reaped.
fn reaped(events: &Receiver<Event>, captured: &mut Vec<u8>) -> io::Result<()> {
    loop {
        match events.recv() {
            Ok(Event::Chunk(bytes)) => captured.extend_from_slice(&bytes),
            Ok(Event::Closed) => {}
            Ok(Event::Exited(status)) => return status.map(drop),
            Err(_) => return Err(io::Error::other("child waiter stopped without a status")),
        }
    }
}

/// Collect relayed output until the pipe closes or `until` passes.
fn drain(events: &Receiver<Event>, until: Instant, captured: &mut Vec<u8>) {
    loop {
        let remaining = until.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(Event::Chunk(bytes)) => captured.extend_from_slice(&bytes),
            Ok(Event::Exited(_)) => {}
            Ok(Event::Closed) | Err(_) => return,
        }
    }
}

/// Conventional name for a signal number, `signal N` when unknown.
pub fn signal_name(signal: i32) -> Cow<'static, str> {
    let name = match signal {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        4 => "SIGILL",
        5 => "SIGTRAP",
        6 => "SIGABRT",
        8 => "SIGFPE",
        9 => "SIGKILL",
        11 => "SIGSEGV",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        #[cfg(any(target_os = "linux", target_os = "android"))]
        7 => "SIGBUS",
        #[cfg(any(target_os = "linux", target_os = "android"))]
        10 => "SIGUSR1",
        #[cfg(any(target_os = "linux", target_os = "android"))]
        12 => "SIGUSR2",
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        10 => "SIGBUS",
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        30 => "SIGUSR1",
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        31 => "SIGUSR2",
        other => return Cow::Owned(format!("signal {other}")),
    };
    Cow::Borrowed(name)
}
