//! Child processes with a deadline, an output cap and cooperative cancellation

use once_cell::sync::Lazy;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STDERR_CAP: usize = 8 * 1024;

/// Shared cancellation signal, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was requested
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(operation.to_string()));
        }
        Ok(())
    }
}

static INTERRUPT: Lazy<CancelFlag> = Lazy::new(CancelFlag::new);

/// Flag raised by Ctrl-C once [`watch_interrupts`] is running
pub fn interrupt_flag() -> CancelFlag {
    INTERRUPT.clone()
}

/// Raise the interrupt flag on the first Ctrl-C and exit on the second
pub fn watch_interrupts() -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    thread::Builder::new().name("interrupts".to_string()).spawn(move || {
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            log::warn!("Interrupt received, cancelling");
            eprintln!("Interrupted; press Ctrl-C again to abort immediately");
            INTERRUPT.cancel();

            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    })?;
    Ok(())
}

/// A point in time after which an operation gives up
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    pub fn check(&self, operation: &str) -> Result<()> {
        let elapsed = self.start.elapsed();
        if elapsed > self.budget {
            return Err(Error::Timeout {
                operation: operation.to_string(),
                elapsed,
            });
        }
        Ok(())
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }
}

/// Bounds applied to one child process
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Duration,
    pub max_output: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_output: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Stdout exceeded the cap and was cut
    pub truncated: bool,
}

/// Run `command` through a bash login shell, or `sh -c` where bash is missing
pub fn run_shell(command: &str, limits: &Limits, cancel: Option<&CancelFlag>) -> Result<CommandOutput> {
    let mut cmd = match which::which("bash") {
        Ok(bash) => {
            let mut cmd = Command::new(bash);
            cmd.arg("-lc");
            cmd
        }
        Err(_) => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c");
            cmd
        }
    };
    cmd.arg(command);
    run(cmd, command, limits, cancel)
}

/// Run a prepared command, killing it on timeout or cancellation
pub fn run(mut cmd: Command, display: &str, limits: &Limits, cancel: Option<&CancelFlag>) -> Result<CommandOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::CommandFailed {
            command: display.to_string(),
            code: -1,
            stderr: e.to_string(),
        })?;

    let stdout = child.stdout.take().map(|s| spawn_reader(s, limits.max_output));
    let stderr = child.stderr.take().map(|s| spawn_reader(s, STDERR_CAP));

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().map_err(|e| Error::CommandFailed {
            command: display.to_string(),
            code: -1,
            stderr: e.to_string(),
        })? {
            break status;
        }

        let cancelled = cancel.is_some_and(CancelFlag::is_cancelled);
        if cancelled || start.elapsed() > limits.timeout {
            let _ = child.kill();
            let _ = child.wait();
            // Grandchildren may still hold the pipes; the readers are left to finish alone
            if cancelled {
                return Err(Error::Cancelled(display.to_string()));
            }
            return Err(Error::Timeout {
                operation: display.to_string(),
                elapsed: start.elapsed(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let (stdout, truncated) = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let (stderr, _) = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

    if !status.success() {
        return Err(Error::CommandFailed {
            command: display.to_string(),
            code: status.code().unwrap_or(-1),
            stderr,
        });
    }

    if truncated {
        log::warn!("Output of '{}' exceeded {} bytes; truncated", display, limits.max_output);
    }
    Ok(CommandOutput {
        stdout,
        stderr,
        truncated,
    })
}

/// Read up to `cap` bytes, then keep draining so the child never blocks on a full pipe
fn spawn_reader<R: Read + Send + 'static>(mut source: R, cap: usize) -> thread::JoinHandle<(String, bool)> {
    thread::spawn(move || {
        let mut kept = Vec::new();
        let mut truncated = false;
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = cap.saturating_sub(kept.len());
                    if n > room {
                        truncated = true;
                    }
                    kept.extend_from_slice(&buf[..n.min(room)]);
                }
            }
        }
        (String::from_utf8_lossy(&kept).into_owned(), truncated)
    })
}
