//! Running one test body and turning what happened into a report line.
//!
//! ## Classification
//!
//! | Body did                                   | Line                                     |
//! |--------------------------------------------|------------------------------------------|
//! | returned `()` / `Ok(())`                   | `NAME: PASS`                             |
//! | returned or unwound with a [`Failure`]     | `NAME: FAIL (message)` or `NAME: FAIL`   |
//! | returned any other error                   | `NAME: FAIL with exception (error):`     |
//! | panicked with a string message             | `NAME: FAIL with exception (message):`   |
//! | panicked with any other payload            | `NAME: FAIL with exception:`             |
//!
//! The two `with exception` forms are followed by the output of the [`DiagnosticDump`]
//! collaborator when the harness was given one.
//!
//! Panics raised by a body are not printed by the panic hook; the report line is the only
//! output a panic produces.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::identity::TestIdentity;

/// Error type test bodies return.
pub type CaseError = Box<dyn Error + Send + Sync + 'static>;

/// Return type for fallible test bodies.
pub type CaseResult = Result<(), CaseError>;

/// Child exit status for a failed case.
pub const EXIT_FAILED: i32 = 1;

/// An explicit test failure.
///
/// Return it (see [`fail!`](crate::fail)) or unwind with it ([`Failure::raise`]); both are
/// reported as `FAIL (message)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Failure {
    message: String,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Fail the running case from anywhere below the test body.
    pub fn raise(message: impl Into<String>) -> ! {
        panic::panic_any(Self::new(message))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for Failure {}

/// Return `Err(Failure)` from the enclosing test body.
#[macro_export]
macro_rules! fail {
    () => {
        return ::std::result::Result::Err($crate::Failure::default().into())
    };
    ($($arg:tt)+) => {
        return ::std::result::Result::Err($crate::Failure::new(::std::format!($($arg)+)).into())
    };
}

/// Fail the enclosing test body unless `cond` holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fail!($($arg)+);
        }
    };
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::fail!("{}", ::std::stringify!($cond));
        }
    };
}

/// Anything a test body may return.
pub trait IntoCaseResult {
    fn into_case_result(self) -> CaseResult;
}

impl IntoCaseResult for () {
    fn into_case_result(self) -> CaseResult {
        Ok(())
    }
}

impl<E> IntoCaseResult for Result<(), E>
where
    E: Into<CaseError>,
{
    fn into_case_result(self) -> CaseResult {
        self.map_err(Into::into)
    }
}

/// Why a case failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// An explicit [`Failure`].
    Failure(Failure),
    /// Any other error, or a panic with a string message.
    Error { description: String },
    /// A panic whose payload carries nothing printable.
    Opaque,
}

impl Fault {
    pub fn from_error(error: CaseError) -> Self {
        match error.downcast::<Failure>() {
            Ok(failure) => Fault::Failure(*failure),
            Err(other) => Fault::Error {
                description: other.to_string(),
            },
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Failure>() {
            Ok(failure) => return Fault::Failure(*failure),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<&'static str>() {
            Ok(message) => {
                return Fault::Error {
                    description: (*message).to_string(),
                };
            }
            Err(payload) => payload,
        };
        match payload.downcast::<String>() {
            Ok(message) => Fault::Error { description: *message },
            Err(_) => Fault::Opaque,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail(Fault),
}

impl Outcome {
    pub fn passed(&self) -> bool {
        matches!(self, Outcome::Pass)
    }

    /// Exit status a child process reports this outcome with.
    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { EXIT_FAILED }
    }
}

/// Optional collaborator that adds a diagnostic dump below `with exception` lines.
pub trait DiagnosticDump {
    /// Text to print after the fault line, or `None` for nothing.
    fn dump(&self, fault: &Fault) -> Option<String>;
}

/// Dumps the backtrace of the thread classifying the fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktraceDump;

impl DiagnosticDump for BacktraceDump {
    fn dump(&self, _fault: &Fault) -> Option<String> {
        Some(Backtrace::force_capture().to_string())
    }
}

thread_local! {
    /// Set while a test body runs on this thread; its panics are reported, not printed.
    static IN_BODY: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Wrap the current panic hook so it stays silent for panics inside test bodies.
///
/// Installed once per process; panics elsewhere still reach the previous hook.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !IN_BODY.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

/// Run `body` exactly once and classify how it ended.
pub fn execute<F, R>(body: F) -> Outcome
where
    F: FnOnce() -> R,
    R: IntoCaseResult,
{
    install_quiet_hook();
    IN_BODY.with(|flag| flag.set(true));
    let result = panic::catch_unwind(AssertUnwindSafe(|| body().into_case_result()));
    IN_BODY.with(|flag| flag.set(false));

    match result {
        Ok(Ok(())) => Outcome::Pass,
        Ok(Err(error)) => Outcome::Fail(Fault::from_error(error)),
        Err(payload) => Outcome::Fail(Fault::from_panic(payload)),
    }
}

/// Render the report block for `identity`, newline terminated.
pub fn render(identity: &TestIdentity, outcome: &Outcome, dump: Option<&dyn DiagnosticDump>) -> String {
    let fault = match outcome {
        Outcome::Pass => return format!("{identity}: PASS\n"),
        Outcome::Fail(fault) => fault,
    };

    let mut block = match fault {
        Fault::Failure(failure) if failure.message().is_empty() => format!("{identity}: FAIL\n"),
        Fault::Failure(failure) => format!("{identity}: FAIL ({})\n", failure.message()),
        Fault::Error { description } => format!("{identity}: FAIL with exception ({description}):\n"),
        Fault::Opaque => format!("{identity}: FAIL with exception:\n"),
    };

    if !matches!(fault, Fault::Failure(_)) {
        if let Some(text) = dump.and_then(|d| d.dump(fault)) {
            block.push_str(&text);
            if !text.ends_with('\n') {
                block.push('\n');
            }
        }
    }
    block
}
