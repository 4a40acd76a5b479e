//! Command-line surface for harness programs
//!
//! ## Options
//!
//! - `-A NAME=VALUE` - Set a named argument for test bodies (repeatable)
//! - `-d`, `--debug`, `--run-directly` - Run tests in-process, without isolation
//! - `-l FILE`, `--log-file FILE` - Append PASS/FAIL output to FILE as well
//! - `-r GROUP.SUBGROUP.N`, `--run` - Run only the named tests (repeatable)
//! - `-t MS`, `--timeout MS` - Per-test timeout in milliseconds (default 5000)
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros. Harness construction and test
//! registration return `HarnessResult<T>`; only the top-level [`run`] function turns errors
//! into a process exit.

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use clap::error::ErrorKind;

use crate::errors::HarnessError;
use crate::harness::{Harness, HarnessBuilder};
use crate::version::PROCHARNESS_VERSION;

/// Default per-test timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
    /// Broken test suite or environment, as opposed to failing tests.
    pub const USAGE: ExitCode = ExitCode(2);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<HarnessError> for CliError {
    fn from(err: HarnessError) -> Self {
        match err {
            // clap renders its own usage block
            HarnessError::Usage(e) => CliError::new(e.to_string(), ExitCode::USAGE),
            other => CliError::new(format!("{:?}", miette::Report::new(other)), ExitCode::USAGE),
        }
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Options every harness program accepts.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(version = PROCHARNESS_VERSION)]
#[command(about = "Run each test case in its own time-limited child process", long_about = None)]
pub struct Options {
    /// Named argument for test bodies (repeatable)
    #[arg(short = 'A', value_name = "NAME=VALUE")]
    pub arguments: Vec<String>,

    /// Run tests in-process, without isolation or timeout (for debuggers)
    #[arg(short = 'd', long = "debug", visible_alias = "run-directly")]
    pub run_directly: bool,

    /// Also append PASS/FAIL lines to FILE
    #[arg(short = 'l', long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Run only this test (repeatable)
    #[arg(short = 'r', long = "run", value_name = "GROUP.SUBGROUP.N")]
    pub run: Vec<String>,

    /// Per-test timeout in milliseconds
    #[arg(short = 't', long = "timeout", value_name = "MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            arguments: Vec::new(),
            run_directly: false,
            log_file: None,
            run: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Entry point for harness programs.
///
/// Builds a [`Harness`] for `group` from the process arguments, hands it to `suite`, and exits
/// with the run's exit code. This is the only place where `process::exit` is called for the
/// parent process.
pub fn run<F>(group: &str, suite: F) -> !
where
    F: FnOnce(&mut Harness) -> Result<(), HarnessError>,
{
    run_with(HarnessBuilder::new(group), suite)
}

/// Like [`run`], for a builder carrying collaborators such as a diagnostic dump.
pub fn run_with<F>(builder: HarnessBuilder, suite: F) -> !
where
    F: FnOnce(&mut Harness) -> Result<(), HarnessError>,
{
    match execute(builder, suite) {
        Ok(exit_code) => process::exit(exit_code.0),
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

fn execute<F>(builder: HarnessBuilder, suite: F) -> CliResult<ExitCode>
where
    F: FnOnce(&mut Harness) -> Result<(), HarnessError>,
{
    let options = match Options::try_parse() {
        Ok(options) => options,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => return Err(HarnessError::from(e).into()),
    };
    let mut harness = builder.options(options).build()?;
    suite(&mut harness)?;
    Ok(harness.finish()?)
}

// ============================================================================
// Tests
// ============================================================================
