//! procharness self-test program
//!
//! A harness program exercising every outcome the harness classifies. The suite to register is
//! picked with `-A suite=NAME` (default `basic`); end-to-end tests drive this binary.

use std::io::Write;
use std::thread;
use std::time::Duration;

use procharness::{BacktraceDump, CaseResult, Failure, Harness, HarnessResult, ensure, fail};

fn main() {
    // Initialize structured logging with env-based filter, defaulting to warn so the
    // PASS/FAIL stream stays clean
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    procharness::cli::run_with(Harness::builder("selftest").diagnostics(BacktraceDump), register);
}

fn register(harness: &mut Harness) -> HarnessResult<()> {
    let suite = harness.arguments().get_or("suite", "basic").to_string();
    match suite.as_str() {
        "basic" => basic(harness),
        "timeout" => timeout(harness),
        "crash" => crash(harness),
        "exit" => exit(harness),
        "duplicate" => duplicate(harness),
        "output" => output(harness),
        "args" => args(harness),
        "dump" => dump(harness),
        "unstable" => unstable(harness),
        other => {
            eprintln!("unknown suite `{other}`");
            Ok(())
        }
    }
}

fn basic(harness: &mut Harness) -> HarnessResult<()> {
    harness.run("pass", 1, || {})?;
    harness.run("pass", 2, || -> CaseResult {
        ensure!(2 + 2 == 4);
        Ok(())
    })?;
    harness.run("fail", 1, || -> CaseResult { fail!("boom") })?;
    harness.run("fail", 2, || -> CaseResult { fail!() })?;
    harness.run("raise", 1, || -> CaseResult { Failure::raise("raised from helper") })?;
    harness.run("error", 1, || -> Result<(), std::io::Error> {
        Err(std::io::Error::other("disk on fire"))
    })?;
    harness.run("panic", 1, || -> CaseResult { panic!("kaboom") })?;
    harness.run("panic", 2, || -> CaseResult { std::panic::panic_any(42_u8) })?;
    Ok(())
}

fn timeout(harness: &mut Harness) -> HarnessResult<()> {
    let sleep_ms: u64 = harness.arguments().parse("sleep_ms")?.unwrap_or(500);
    harness.run("sleep", 1, move || thread::sleep(Duration::from_millis(sleep_ms)))?;
    harness.run("spin", 1, || -> CaseResult {
        loop {
            std::hint::spin_loop();
        }
    })?;
    harness.run("after", 1, || {})?;
    Ok(())
}

fn crash(harness: &mut Harness) -> HarnessResult<()> {
    harness.run("abort", 1, || -> CaseResult { std::process::abort() })?;
    harness.run("after", 1, || {})?;
    Ok(())
}

fn exit(harness: &mut Harness) -> HarnessResult<()> {
    harness.run("exit", 1, || -> CaseResult { std::process::exit(0) })?;
    harness.run("exit", 2, || -> CaseResult { std::process::exit(7) })?;
    harness.run("exit", 3, || -> CaseResult { std::process::exit(97) })?;
    Ok(())
}

fn duplicate(harness: &mut Harness) -> HarnessResult<()> {
    harness.run("twice", 1, || {})?;
    harness.run("twice", 1, || {})?;
    Ok(())
}

fn output(harness: &mut Harness) -> HarnessResult<()> {
    harness.run("print", 1, || {
        println!("hello from the child");
        let _ = std::io::stdout().flush();
    })?;
    Ok(())
}

fn args(harness: &mut Harness) -> HarnessResult<()> {
    // read again inside the child, from the arguments forwarded to it
    let value = harness.arguments().get_or("expect", "").to_string();
    harness.run("value", 1, move || -> CaseResult {
        ensure!(value == "forwarded", "child saw {value:?}");
        Ok(())
    })?;
    Ok(())
}

fn dump(harness: &mut Harness) -> HarnessResult<()> {
    harness.run("opaque", 1, || -> CaseResult { std::panic::panic_any(()) })?;
    Ok(())
}

/// Registers a test only in the parent, so its child never reaches it.
fn unstable(harness: &mut Harness) -> HarnessResult<()> {
    if std::env::var_os(procharness::harness::CHILD_ENV).is_none() {
        harness.run("ghost", 1, || {})?;
    }
    Ok(())
}
