#![forbid(unsafe_code)]
//! procharness: a process-isolated unit test harness
//!
//! Test programs construct a [`Harness`] from their command line, register each case with
//! [`Harness::run`], and hand the resulting [`cli::ExitCode`] back to the shell. Every case runs
//! in a fresh child process with its own deadline, so a crash, abort or endless loop in one case
//! is reported as a single `FAIL` line instead of taking the whole run down.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. Every module
//!   outside of tests enforces `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test bodies**: Panics are part of the contract. They are caught and classified by
//!   [`outcome::execute`] like any other failure.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod arguments;
pub mod cli;
pub mod errors;
pub mod harness;
pub mod identity;
pub mod outcome;
pub mod registry;
pub mod report;
pub mod supervisor;
pub mod version;

pub use arguments::Arguments;
pub use errors::{HarnessError, HarnessResult};
pub use harness::{Harness, HarnessBuilder};
pub use identity::{CaseKey, TestIdentity};
pub use outcome::{BacktraceDump, CaseError, CaseResult, DiagnosticDump, Failure, Fault, Outcome};
pub use report::Summary;
