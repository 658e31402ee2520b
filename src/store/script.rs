//! Script runners
//!
//! Script bodies are opaque to the engine. [`CommandScriptRunner`] pipes
//! them into an external interpreter (for example `mongosh`), bounded by a
//! timeout. [`RecordingScriptRunner`] only remembers what it was given.

use crate::store::{ScriptRunner, StoreError};
use crossbeam_channel::{bounded, Receiver};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// How often a running script is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long to wait for output readers after the child has exited
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Runs each script by spawning `program args...` and writing the body to its stdin
///
/// A non-zero exit status fails the script; its stderr becomes the error message.
#[derive(Debug, Clone)]
pub struct CommandScriptRunner {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandScriptRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    /// Build from an argv list (`["mongosh", "--quiet", "mongodb://..."]`)
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }

    /// Kill the script if it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn spawn(&self) -> Result<Child, StoreError> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StoreError::Script(format!("failed to start '{}': {}", self.program, e)))
    }
}

/// Drain a pipe on its own thread so a chatty child never blocks on a full pipe
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        let _ = tx.send(out);
    });
    rx
}

/// Write the body to stdin off the calling thread
fn feed(stdin: Option<ChildStdin>, body: &str) {
    if let Some(mut stdin) = stdin {
        let body = body.to_string();
        thread::spawn(move || {
            // A script may exit without reading stdin; its exit status decides success
            let _ = stdin.write_all(body.as_bytes());
        });
    }
}

impl ScriptRunner for CommandScriptRunner {
    fn execute_script(&self, body: &str) -> Result<(), StoreError> {
        let start = Instant::now();
        let mut child = self.spawn()?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        feed(child.stdin.take(), body);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(limit) = self.timeout {
                if start.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(timed_out(limit));
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        if let Some(limit) = self.timeout {
            if start.elapsed() > limit {
                return Err(timed_out(limit));
            }
        }

        let out = stdout.recv_timeout(OUTPUT_GRACE).unwrap_or_default();
        let err = stderr.recv_timeout(OUTPUT_GRACE).unwrap_or_default();

        if !out.trim().is_empty() {
            log::debug!("script output: {}", out.trim_end());
        }

        if status.success() {
            Ok(())
        } else {
            let detail = if err.trim().is_empty() { out } else { err };
            Err(StoreError::Script(format!(
                "'{}' exited with {}: {}",
                self.program,
                status,
                detail.trim()
            )))
        }
    }
}

fn timed_out(limit: Duration) -> StoreError {
    StoreError::Timeout(format!(
        "script exceeded {}s",
        limit.as_secs_f64()
    ))
}

/// Remembers every script body without running it
#[derive(Debug, Default)]
pub struct RecordingScriptRunner {
    executed: Mutex<Vec<String>>,
}

impl RecordingScriptRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bodies in execution order
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|scripts| scripts.clone())
            .unwrap_or_default()
    }
}

impl ScriptRunner for RecordingScriptRunner {
    fn execute_script(&self, body: &str) -> Result<(), StoreError> {
        let mut executed = self
            .executed
            .lock()
            .map_err(|e| StoreError::Other(format!("Failed to lock script log: {e}")))?;
        executed.push(body.to_string());
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandScriptRunner {
        CommandScriptRunner::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_command_runner_passes_body_on_stdin() {
        let runner = sh("grep -q createCollection");
        assert!(runner.execute_script("db.createCollection('users');").is_ok());
        assert!(runner.execute_script("db.users.drop();").is_err());
    }

    #[test]
    fn test_command_runner_reports_stderr() {
        let runner = sh("echo boom >&2; exit 3");
        match runner.execute_script("") {
            Err(StoreError::Script(msg)) => assert!(msg.contains("boom"), "{msg}"),
            other => panic!("Expected Script error, got {other:?}"),
        }
    }

    #[test]
    fn test_command_runner_times_out() {
        let runner = sh("sleep 5").with_timeout(Duration::from_millis(100));
        let start = Instant::now();
        let result = runner.execute_script("");
        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_large_body_to_child_ignoring_stdin_still_times_out() {
        let runner = CommandScriptRunner::new("sleep", vec!["3".to_string()])
            .with_timeout(Duration::from_millis(100));
        let body = "x".repeat(1024 * 1024);

        let start = Instant::now();
        let result = runner.execute_script(&body);
        assert!(matches!(result, Err(StoreError::Timeout(_))), "{result:?}");
        assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());
    }

    #[test]
    fn test_command_runner_missing_program() {
        let runner = CommandScriptRunner::new("docshift-no-such-binary", vec![]);
        assert!(matches!(runner.execute_script("x"), Err(StoreError::Script(_))));
    }

    #[test]
    fn test_from_argv() {
        assert!(CommandScriptRunner::from_argv(&[]).is_none());
        let runner = CommandScriptRunner::from_argv(&["mongosh".to_string(), "--quiet".to_string()])
            .unwrap();
        assert_eq!(runner.program(), "mongosh");
    }

    #[test]
    fn test_recording_runner_keeps_order() {
        let runner = RecordingScriptRunner::new();
        runner.execute_script("one").unwrap();
        runner.execute_script("two").unwrap();
        assert_eq!(runner.executed(), vec!["one".to_string(), "two".to_string()]);
    }
}
