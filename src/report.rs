//! Run accounting and the PASS/FAIL output sinks.
//!
//! Every report block goes to the console and, when a log file was configured, to the log file
//! as well. Blocks are written with a single `write_all` per sink and flushed immediately, so
//! nothing is left buffered when a child process is launched or exits.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::errors::{HarnessError, HarnessResult};

/// Dual-sink writer for report blocks.
pub struct Logger {
    console: Box<dyn Write>,
    log_file: Option<File>,
}

impl Logger {
    /// Console on stderr, plus `log_path` opened for appending when given.
    pub fn open(log_path: Option<&Path>) -> HarnessResult<Self> {
        Self::new(Box::new(io::stderr()), log_path)
    }

    /// Console on `console`, plus `log_path` opened for appending when given.
    ///
    /// ## Errors
    ///
    /// [`HarnessError::LogOpenFailure`] when the log file cannot be opened.
    pub fn new(console: Box<dyn Write>, log_path: Option<&Path>) -> HarnessResult<Self> {
        let log_file = log_path
            .map(|path| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| HarnessError::LogOpenFailure {
                        path: path.to_path_buf(),
                        source,
                    })
            })
            .transpose()?;
        Ok(Self { console, log_file })
    }

    /// Logger for a child process: reports go to stdout, which the parent captures and relays.
    pub fn for_child() -> Self {
        Self {
            console: Box::new(io::stdout()),
            log_file: None,
        }
    }

    /// Write one report block to every sink.
    pub fn emit(&mut self, block: &str) -> HarnessResult<()> {
        self.console.write_all(block.as_bytes()).map_err(HarnessError::Output)?;
        self.console.flush().map_err(HarnessError::Output)?;
        if let Some(file) = self.log_file.as_mut() {
            file.write_all(block.as_bytes()).map_err(HarnessError::Output)?;
            file.flush().map_err(HarnessError::Output)?;
        }
        Ok(())
    }

    /// Write an advisory line to the console only.
    pub fn advise(&mut self, line: &str) -> HarnessResult<()> {
        writeln!(self.console, "{line}").map_err(HarnessError::Output)?;
        self.console.flush().map_err(HarnessError::Output)
    }

    pub fn flush(&mut self) -> HarnessResult<()> {
        self.console.flush().map_err(HarnessError::Output)?;
        if let Some(file) = self.log_file.as_mut() {
            file.flush().map_err(HarnessError::Output)?;
        }
        Ok(())
    }
}

/// Executed and passed counters for one harness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    executed: usize,
    passed: usize,
}

impl Tally {
    pub fn record_executed(&mut self) {
        self.executed += 1;
    }

    pub fn record_passed(&mut self) {
        self.passed += 1;
    }

    /// Counts for the run so far; `unrun` selected cases count as failures.
    pub fn summary(&self, unrun: usize) -> Summary {
        Summary {
            executed: self.executed,
            passed: self.passed,
            failed: (self.executed + unrun).saturating_sub(self.passed),
            unrun,
        }
    }
}

/// Summary of a test run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub executed: usize,
    pub passed: usize,
    pub failed: usize,
    pub unrun: usize,
}

impl Summary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} executed, {} passed, {} failed", self.executed, self.passed, self.failed)?;
        if self.unrun > 0 {
            write!(f, " ({} selected but not found)", self.unrun)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Cloneable in-memory sink for capturing console output.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn temp_log(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("procharness_{}_{}.log", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_emit_writes_both_sinks() {
        let path = temp_log("both_sinks");
        let console = SharedBuffer::default();
        let mut logger = Logger::new(Box::new(console.clone()), Some(&path)).unwrap();

        logger.emit("core.a.1: PASS\n").unwrap();
        logger.emit("core.a.2: FAIL (boom)\n").unwrap();

        let expected = "core.a.1: PASS\ncore.a.2: FAIL (boom)\n";
        assert_eq!(console.contents(), expected);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), expected);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_log_file_is_appended() {
        let path = temp_log("append");
        std::fs::write(&path, "earlier run\n").unwrap();
        let mut logger = Logger::new(Box::new(SharedBuffer::default()), Some(&path)).unwrap();
        logger.emit("core.a.1: PASS\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier run\ncore.a.1: PASS\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_advisory_lines_skip_log_file() {
        let path = temp_log("advisory");
        let console = SharedBuffer::default();
        let mut logger = Logger::new(Box::new(console.clone()), Some(&path)).unwrap();
        logger.advise("no such test core.a.9").unwrap();
        assert_eq!(console.contents(), "no such test core.a.9\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unopenable_log_is_fatal() {
        let path = std::env::temp_dir().join("procharness_missing_dir").join("nested").join("x.log");
        let err = Logger::open(Some(&path)).err().unwrap();
        assert!(matches!(err, HarnessError::LogOpenFailure { .. }));
    }

    #[test]
    fn test_failed_counts_unrun_selection() {
        let mut tally = Tally::default();
        tally.record_executed();
        tally.record_passed();
        tally.record_executed();
        let summary = tally.summary(2);
        assert_eq!(summary.failed, 3);
        assert!(!summary.success());
        assert_eq!(summary.to_string(), "2 executed, 1 passed, 3 failed (2 selected but not found)");

        assert!(Tally::default().summary(0).success());
    }
}
