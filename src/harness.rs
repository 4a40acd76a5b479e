//! The test harness: registration, isolation, accounting.
//!
//! ## Process model
//!
//! A harness program runs twice per test. The parent re-executes its own binary with
//! [`CHILD_ENV`] naming one test and supervises that child under the configured deadline. In
//! the child, every `run()` for other tests is a no-op; the named test runs in-process, its
//! report block goes to stdout, and the child exits with the outcome's status without returning
//! to the caller. The parent relays the captured block to its own sinks.
//!
//! Registration order must therefore be deterministic: a child that never reaches its test
//! writes [`NOT_REGISTERED_MARKER`], exits with [`EXIT_NOT_REGISTERED`], and the parent reports
//! the test as failed. A body exiting with that status on its own is reported by status.

use std::env;
use std::ffi::OsString;
use std::io::{self, Write};
use std::process::{self, Command};
use std::time::Duration;

use clap::Parser;

use crate::arguments::Arguments;
use crate::cli::{ExitCode, Options};
use crate::errors::{HarnessError, HarnessResult};
use crate::identity::{CaseKey, TestIdentity, parse_selector};
use crate::outcome::{self, DiagnosticDump, EXIT_FAILED, IntoCaseResult};
use crate::registry::{Admission, Registry};
use crate::report::{Logger, Summary, Tally};
use crate::supervisor::{Supervised, Supervisor, Termination, signal_name};

/// Environment variable carrying `GROUP.SUBGROUP.N` to a re-executed child.
pub const CHILD_ENV: &str = "PROCHARNESS_CHILD";

/// Child exit status when the named test was never registered.
pub const EXIT_NOT_REGISTERED: i32 = 97;

/// Stdout line a child writes before exiting with [`EXIT_NOT_REGISTERED`].
pub const NOT_REGISTERED_MARKER: &str = "#procharness: test not registered in child";

/// Process-wide settings fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    pub run_directly: bool,
    pub timeout: Duration,
    pub log_file: Option<std::path::PathBuf>,
}

pub struct HarnessBuilder {
    group: String,
    options: Options,
    dump: Option<Box<dyn DiagnosticDump>>,
    console: Option<Box<dyn Write>>,
    child_target: Option<OsString>,
}

impl HarnessBuilder {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            options: Options::default(),
            dump: None,
            console: None,
            child_target: env::var_os(CHILD_ENV),
        }
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Print this collaborator's dump below `FAIL with exception` lines.
    pub fn diagnostics(mut self, dump: impl DiagnosticDump + 'static) -> Self {
        self.dump = Some(Box::new(dump));
        self
    }

    /// Write report blocks to `console` instead of stderr.
    pub fn console(mut self, console: impl Write + 'static) -> Self {
        self.console = Some(Box::new(console));
        self
    }

    /// Validate the options, open the log file, and build the harness.
    ///
    /// ## Errors
    ///
    /// - [`HarnessError::InvalidArgument`] for a malformed `-A` or `-r` value
    /// - [`HarnessError::LogOpenFailure`] if the log file cannot be opened
    pub fn build(self) -> HarnessResult<Harness> {
        let group = self.group;
        let options = self.options;

        let arguments = Arguments::from_assignments(&options.arguments)?;
        let selection = options
            .run
            .iter()
            .map(|selector| parse_selector(selector, &group))
            .collect::<HarnessResult<Vec<_>>>()?;

        let child_target = self
            .child_target
            .map(|raw| {
                let raw = raw.to_str().ok_or_else(|| HarnessError::InvalidArgument {
                    argument: CHILD_ENV.to_string(),
                    reason: "not valid UTF-8".to_string(),
                })?;
                parse_selector(raw, &group)
            })
            .transpose()?;

        // the parent relays child output to the log file
        let logger = match (&child_target, self.console) {
            (Some(_), _) => Logger::for_child(),
            (None, Some(console)) => Logger::new(console, options.log_file.as_deref())?,
            (None, None) => Logger::open(options.log_file.as_deref())?,
        };

        let config = RunConfiguration {
            run_directly: options.run_directly,
            timeout: Duration::from_millis(options.timeout_ms),
            log_file: options.log_file,
        };
        tracing::debug!(
            %group,
            run_directly = config.run_directly,
            timeout_ms = options.timeout_ms,
            selected = selection.len(),
            child = child_target.is_some(),
            "harness configured"
        );

        Ok(Harness {
            registry: Registry::new(group.clone(), selection),
            group,
            supervisor: Supervisor::new(config.timeout),
            config,
            arguments,
            tally: Tally::default(),
            logger,
            dump: self.dump,
            child_target,
            finished: false,
        })
    }
}

/// Registers test cases and runs each in its own supervised child process.
pub struct Harness {
    group: String,
    config: RunConfiguration,
    registry: Registry,
    arguments: Arguments,
    tally: Tally,
    logger: Logger,
    supervisor: Supervisor,
    dump: Option<Box<dyn DiagnosticDump>>,
    /// Set when this process is a re-executed child running exactly this test.
    child_target: Option<CaseKey>,
    finished: bool,
}

impl Harness {
    pub fn builder(group: impl Into<String>) -> HarnessBuilder {
        HarnessBuilder::new(group)
    }

    /// Build a harness for `group` from a full argument vector (program name first).
    pub fn from_args<I, T>(group: &str, args: I) -> HarnessResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let options = Options::try_parse_from(args)?;
        HarnessBuilder::new(group).options(options).build()
    }

    /// Run the case `subgroup.number` with `body`.
    ///
    /// Cases outside an active `-r` selection are skipped silently and not counted. Test
    /// failures are reported and counted, never returned.
    ///
    /// ## Errors
    ///
    /// - [`HarnessError::DuplicateTestIdentity`] if this case already ran
    /// - [`HarnessError::ProcessCreationFailure`] / [`HarnessError::ProcessControlFailure`] if
    ///   the child process cannot be launched or supervised
    /// - [`HarnessError::Output`] if the report cannot be written
    pub fn run<F, R>(&mut self, subgroup: &str, number: u32, body: F) -> HarnessResult<()>
    where
        F: FnOnce() -> R,
        R: IntoCaseResult,
    {
        let key = CaseKey::new(subgroup, number);
        match self.child_target.as_ref().map(|target| *target == key) {
            Some(true) => self.run_as_child(&key, body),
            Some(false) => return Ok(()),
            None => {}
        }

        if self.registry.admit(&key)? == Admission::Filtered {
            tracing::trace!(subgroup, number, "not selected");
            return Ok(());
        }

        let identity = key.in_group(&self.group);
        self.tally.record_executed();
        let passed = if self.config.run_directly {
            self.run_inline(&identity, body)?
        } else {
            self.run_isolated(&identity)?
        };
        if passed {
            self.tally.record_passed();
        }
        Ok(())
    }

    fn run_inline<F, R>(&mut self, identity: &TestIdentity, body: F) -> HarnessResult<bool>
    where
        F: FnOnce() -> R,
        R: IntoCaseResult,
    {
        let outcome = outcome::execute(body);
        let block = outcome::render(identity, &outcome, self.dump.as_deref());
        self.logger.emit(&block)?;
        Ok(outcome.passed())
    }

    fn run_isolated(&mut self, identity: &TestIdentity) -> HarnessResult<bool> {
        self.logger.flush()?;

        let executable = env::current_exe().map_err(|source| HarnessError::ProcessCreationFailure {
            identity: identity.clone(),
            source,
        })?;
        let mut command = Command::new(executable);
        command.args(self.child_args()).env(CHILD_ENV, identity.to_string());

        let supervised = self.supervisor.supervise(identity, command)?;
        let (block, passed) = settle(identity, supervised);
        self.logger.emit(&block)?;
        Ok(passed)
    }

    fn run_as_child<F, R>(&mut self, key: &CaseKey, body: F) -> !
    where
        F: FnOnce() -> R,
        R: IntoCaseResult,
    {
        let identity = key.in_group(&self.group);
        let outcome = outcome::execute(body);
        let block = outcome::render(&identity, &outcome, self.dump.as_deref());
        let code = match self.logger.emit(&block) {
            Ok(()) => outcome.exit_code(),
            Err(e) => {
                tracing::error!(error = %e, "child could not write its report");
                EXIT_FAILED
            }
        };
        process::exit(code)
    }

    /// Arguments a child needs to rebuild the same argument store.
    fn child_args(&self) -> Vec<String> {
        self.arguments
            .iter()
            .flat_map(|(name, value)| ["-A".to_string(), format!("{name}={value}")])
            .collect()
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn is_selective(&self) -> bool {
        self.registry.is_selective()
    }

    pub fn has_run(&self, subgroup: &str, number: u32) -> bool {
        self.registry.has_run(&CaseKey::new(subgroup, number))
    }

    pub fn summary(&self) -> Summary {
        self.tally.summary(self.registry.unrun_count())
    }

    /// End the run: report selected tests that never ran and compute the exit code.
    pub fn finish(mut self) -> HarnessResult<ExitCode> {
        if self.child_target.is_some() {
            exit_unregistered();
        }
        self.report_unrun()?;
        let summary = self.summary();
        tracing::info!(group = %self.group, %summary, "run complete");
        Ok(if summary.success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }

    fn report_unrun(&mut self) -> HarnessResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let lines: Vec<String> = self
            .registry
            .unrun()
            .map(|key| format!("no such test {}", key.in_group(&self.group)))
            .collect();
        for line in lines {
            self.logger.advise(&line)?;
        }
        Ok(())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if self.child_target.is_some() {
            exit_unregistered();
        }
        if let Err(e) = self.report_unrun() {
            tracing::warn!(error = %e, "could not report unrun tests");
        }
    }
}

fn exit_unregistered() -> ! {
    tracing::warn!("child finished without reaching its test");
    let mut stdout = io::stdout();
    let _ = writeln!(stdout, "{NOT_REGISTERED_MARKER}");
    let _ = stdout.flush();
    process::exit(EXIT_NOT_REGISTERED)
}

/// Turn a supervised child into the block to relay and whether it passed.
///
/// A child normally reports its own line; one is synthesised when it could not (killed,
/// timed out, never reached its test) or did not (exited directly from the body).
fn settle(identity: &TestIdentity, supervised: Supervised) -> (String, bool) {
    let mut block = supervised.output;
    if !block.is_empty() && !block.ends_with('\n') {
        block.push('\n');
    }
    let unregistered = block.lines().any(|line| line == NOT_REGISTERED_MARKER);
    if unregistered {
        block = block
            .lines()
            .filter(|line| *line != NOT_REGISTERED_MARKER)
            .map(|line| format!("{line}\n"))
            .collect();
    }
    let reported = block.lines().any(|line| is_report_line(line, identity));

    let (verdict, passed) = match supervised.termination {
        Termination::Exited(0) => ((!reported).then(|| "PASS".to_string()), true),
        Termination::Exited(EXIT_NOT_REGISTERED) if unregistered => {
            (Some("FAIL (test not registered in child)".to_string()), false)
        }
        Termination::Exited(code) => ((!reported).then(|| format!("FAIL (exit status {code})")), false),
        Termination::Signaled(signal) => (Some(format!("FAIL ({})", signal_name(signal))), false),
        Termination::TimedOut => (Some("FAIL (timed out)".to_string()), false),
        Termination::Unknown => (Some("FAIL (unknown termination)".to_string()), false),
    };
    if let Some(verdict) = verdict {
        block.push_str(&format!("{identity}: {verdict}\n"));
    }
    (block, passed)
}

fn is_report_line(line: &str, identity: &TestIdentity) -> bool {
    line.strip_prefix(identity.to_string().as_str())
        .is_some_and(|rest| rest.starts_with(": PASS") || rest.starts_with(": FAIL"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::outcome::{CaseResult, Fault};
    use crate::report::tests::SharedBuffer;
    use crate::{Failure, fail};

    fn direct(run: &[&str]) -> (Harness, SharedBuffer) {
        let console = SharedBuffer::default();
        let options = Options {
            run_directly: true,
            run: run.iter().map(|s| s.to_string()).collect(),
            ..Options::default()
        };
        let harness = Harness::builder("core")
            .options(options)
            .console(console.clone())
            .build()
            .unwrap();
        (harness, console)
    }

    fn supervised(termination: Termination, output: &str) -> Supervised {
        Supervised {
            termination,
            output: output.to_string(),
        }
    }

    fn id() -> TestIdentity {
        TestIdentity::new("core", "parse", 1)
    }

    #[test]
    fn test_passing_case_is_counted() {
        let (mut harness, console) = direct(&[]);
        harness.run("parse", 1, || {}).unwrap();
        assert!(harness.has_run("parse", 1));
        assert_eq!(
            harness.summary(),
            Summary {
                executed: 1,
                passed: 1,
                failed: 0,
                unrun: 0
            }
        );
        assert_eq!(console.contents(), "core.parse.1: PASS\n");
        assert_eq!(harness.finish().unwrap(), ExitCode::SUCCESS);
    }

    #[test]
    fn test_failing_case_is_reported_not_returned() {
        let (mut harness, console) = direct(&[]);
        harness.run("parse", 2, || -> CaseResult { fail!("boom") }).unwrap();
        assert_eq!(console.contents(), "core.parse.2: FAIL (boom)\n");
        assert_eq!(harness.summary().failed, 1);
        assert_eq!(harness.finish().unwrap(), ExitCode::FAILURE);
    }

    #[test]
    fn test_panicking_case_does_not_abort_run() {
        let (mut harness, console) = direct(&[]);
        harness
            .run("parse", 1, || -> CaseResult { Failure::raise("deep") })
            .unwrap();
        harness.run("parse", 2, || {}).unwrap();
        assert_eq!(console.contents(), "core.parse.1: FAIL (deep)\ncore.parse.2: PASS\n");
        assert_eq!(harness.summary().passed, 1);
    }

    #[test]
    fn test_duplicate_identity_is_fatal() {
        let (mut harness, _console) = direct(&[]);
        harness.run("parse", 1, || {}).unwrap();
        let mut ran_again = false;
        let err = harness.run("parse", 1, || ran_again = true).unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateTestIdentity { .. }));
        assert!(!ran_again);
        assert_eq!(harness.summary().executed, 1);
    }

    #[test]
    fn test_unselected_case_is_silent_noop() {
        let (mut harness, console) = direct(&["core.parse.2"]);
        assert!(harness.is_selective());
        let mut ran = false;
        harness.run("parse", 1, || ran = true).unwrap();
        assert!(!ran);
        assert!(!harness.has_run("parse", 1));
        assert_eq!(harness.summary().executed, 0);
        assert_eq!(console.contents(), "");

        harness.run("parse", 2, || {}).unwrap();
        assert_eq!(console.contents(), "core.parse.2: PASS\n");
        assert_eq!(harness.finish().unwrap(), ExitCode::SUCCESS);
    }

    #[test]
    fn test_unrun_selection_reported_once() {
        let (mut harness, console) = direct(&["core.lex.5", "parse.9", "core.parse.1"]);
        harness.run("parse", 1, || {}).unwrap();
        let summary = harness.summary();
        assert_eq!(summary.unrun, 2);
        assert_eq!(summary.failed, summary.executed + summary.unrun - summary.passed);
        assert_eq!(harness.finish().unwrap(), ExitCode::FAILURE);
        assert_eq!(
            console.contents(),
            "core.parse.1: PASS\nno such test core.lex.5\nno such test core.parse.9\n"
        );
    }

    #[test]
    fn test_drop_reports_unrun_selection() {
        let (harness, console) = direct(&["core.lex.5"]);
        drop(harness);
        assert_eq!(console.contents(), "no such test core.lex.5\n");
    }

    #[test]
    fn test_invalid_selector_rejected_at_build() {
        let options = Options {
            run: vec!["core.parse.first".to_string()],
            ..Options::default()
        };
        let err = Harness::builder("core")
            .options(options)
            .console(SharedBuffer::default())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, HarnessError::InvalidArgument { .. }));
    }

    #[test]
    fn test_diagnostics_collaborator_used_for_exceptions() {
        struct Marker;
        impl DiagnosticDump for Marker {
            fn dump(&self, fault: &Fault) -> Option<String> {
                Some(format!("dump for {fault:?}"))
            }
        }
        let console = SharedBuffer::default();
        let mut harness = Harness::builder("core")
            .options(Options {
                run_directly: true,
                ..Options::default()
            })
            .console(console.clone())
            .diagnostics(Marker)
            .build()
            .unwrap();
        harness
            .run("io", 1, || -> Result<(), std::io::Error> { Err(std::io::Error::other("gone")) })
            .unwrap();
        assert_eq!(
            console.contents(),
            "core.io.1: FAIL with exception (gone):\ndump for Error { description: \"gone\" }\n"
        );
    }

    #[test]
    fn test_from_args_populates_arguments() {
        let harness = Harness::from_args("core", ["prog", "-d", "-A", "seed=7", "-t", "20"]).unwrap();
        assert_eq!(harness.group(), "core");
        assert_eq!(harness.arguments().get("seed"), Some("7"));
        assert!(harness.config().run_directly);
        assert_eq!(harness.config().timeout, Duration::from_millis(20));
        assert_eq!(harness.child_args(), vec!["-A", "seed=7"]);
    }

    #[test]
    fn test_from_args_rejects_malformed_assignment() {
        let err = Harness::from_args("core", ["prog", "-A", "seed"]).err().unwrap();
        assert!(matches!(err, HarnessError::InvalidArgument { .. }));
        let err = Harness::from_args("core", ["prog", "--bogus"]).err().unwrap();
        assert!(matches!(err, HarnessError::Usage(_)));
    }

    #[test]
    fn test_settle_keeps_child_report() {
        let (block, passed) = settle(&id(), supervised(Termination::Exited(0), "core.parse.1: PASS\n"));
        assert!(passed);
        assert_eq!(block, "core.parse.1: PASS\n");

        let (block, passed) = settle(&id(), supervised(Termination::Exited(1), "core.parse.1: FAIL (boom)\n"));
        assert!(!passed);
        assert_eq!(block, "core.parse.1: FAIL (boom)\n");
    }

    #[test]
    fn test_settle_relays_body_output() {
        let (block, _) = settle(&id(), supervised(Termination::Exited(0), "hello\ncore.parse.1: PASS\n"));
        assert_eq!(block, "hello\ncore.parse.1: PASS\n");
    }

    #[test]
    fn test_settle_timeout_and_signal() {
        let (block, passed) = settle(&id(), supervised(Termination::TimedOut, "partial"));
        assert!(!passed);
        assert_eq!(block, "partial\ncore.parse.1: FAIL (timed out)\n");

        let (block, passed) = settle(&id(), supervised(Termination::Signaled(6), ""));
        assert!(!passed);
        insta::assert_snapshot!(block.trim_end(), @"core.parse.1: FAIL (SIGABRT)");
    }

    #[test]
    fn test_settle_synthesises_missing_report() {
        let (block, passed) = settle(&id(), supervised(Termination::Exited(0), ""));
        assert!(passed);
        assert_eq!(block, "core.parse.1: PASS\n");

        let (block, passed) = settle(&id(), supervised(Termination::Exited(7), ""));
        assert!(!passed);
        assert_eq!(block, "core.parse.1: FAIL (exit status 7)\n");

        let marker = format!("{NOT_REGISTERED_MARKER}\n");
        let (block, passed) = settle(&id(), supervised(Termination::Exited(EXIT_NOT_REGISTERED), &marker));
        assert!(!passed);
        assert_eq!(block, "core.parse.1: FAIL (test not registered in child)\n");
    }

    #[test]
    fn test_settle_reserved_status_without_marker_is_plain_exit() {
        let (block, passed) = settle(&id(), supervised(Termination::Exited(EXIT_NOT_REGISTERED), ""));
        assert!(!passed);
        assert_eq!(block, "core.parse.1: FAIL (exit status 97)\n");
    }

    #[test]
    fn test_report_line_must_match_identity() {
        assert!(is_report_line("core.parse.1: PASS", &id()));
        assert!(!is_report_line("core.parse.10: PASS", &id()));
        assert!(!is_report_line("core.parse.1: maybe", &id()));
    }
}
