//! Fatal harness errors.
//!
//! Everything here aborts the run: a broken test suite or environment, never a test outcome.
//! Test-body failures are [`crate::outcome::Fault`]s and stay local to one case.

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::identity::TestIdentity;

#[derive(Debug, Error, Diagnostic)]
pub enum HarnessError {
    #[error("duplicate test identity {identity}")]
    #[diagnostic(
        code(procharness::duplicate_test),
        help("each GROUP.SUBGROUP.N may be registered once per run")
    )]
    DuplicateTestIdentity { identity: TestIdentity },

    #[error("invalid argument `{argument}`: {reason}")]
    #[diagnostic(code(procharness::invalid_argument))]
    InvalidArgument { argument: String, reason: String },

    #[error("{0}")]
    #[diagnostic(code(procharness::usage), help("run with --help for the list of options"))]
    Usage(#[from] clap::Error),

    #[error("cannot open log file {}", path.display())]
    #[diagnostic(code(procharness::log_open))]
    LogOpenFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot launch child process for {identity}")]
    #[diagnostic(code(procharness::process_creation))]
    ProcessCreationFailure {
        identity: TestIdentity,
        #[source]
        source: io::Error,
    },

    #[error("lost control of child process for {identity}")]
    #[diagnostic(code(procharness::process_control))]
    ProcessControlFailure {
        identity: TestIdentity,
        #[source]
        source: io::Error,
    },

    #[error("cannot write test output")]
    #[diagnostic(code(procharness::output))]
    Output(#[source] io::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
