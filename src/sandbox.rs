//! Isolated, time-bounded execution of one unit of work.
//!
//! A unit of work returns a [`WorkOutput`] (its own pass/fail verdict) or a
//! [`WorkFault`] (it trapped). Sandboxes turn that, plus whatever happened
//! around it, into an [`ExecutionResult`]:
//!
//! | observed                         | status     |
//! |----------------------------------|------------|
//! | returned, verdict pass           | `Passed`   |
//! | returned, verdict fail           | `Failed`   |
//! | trapped, panicked, killed by sig | `Crashed`  |
//! | still running at the deadline    | `TimedOut` |
//! | sandbox itself failed            | `Error`    |
//!
//! [`ForkProcessSandbox`] gives real process isolation. [`WatchdogSandbox`]
//! runs the work on a watched thread and relies on the interpreter honouring
//! the [`Interrupt`] flag; it contains traps and panics but not memory
//! corruption.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::SandboxKind;
use crate::instrumentation::Coverage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Passed,
    Failed,
    Crashed,
    TimedOut,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Passed => "passed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Crashed => "crashed",
            ExecutionStatus::TimedOut => "timed out",
            ExecutionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub duration: Duration,
    pub output: String,
    #[serde(skip)]
    pub coverage: Option<Coverage>,
}

impl ExecutionResult {
    fn new(status: ExecutionStatus, started: Instant, output: String) -> Self {
        Self {
            status,
            duration: started.elapsed(),
            output,
            coverage: None,
        }
    }

    fn finished(started: Instant, work: WorkOutput) -> Self {
        let status = if work.passed {
            ExecutionStatus::Passed
        } else {
            ExecutionStatus::Failed
        };
        Self {
            status,
            duration: started.elapsed(),
            output: work.output,
            coverage: work.coverage,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkOutput {
    pub passed: bool,
    pub output: String,
    pub coverage: Option<Coverage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkFault {
    Trap(String),
    /// The work observed a raised [`Interrupt`] and stopped.
    Interrupted,
}

/// Cooperative stop request shared between a sandbox and the work it runs.
#[derive(Debug, Default)]
pub struct Interrupt(AtomicBool);

impl Interrupt {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub type Work<'a> = dyn Fn(&Interrupt) -> Result<WorkOutput, WorkFault> + Sync + 'a;

pub trait ProcessSandbox: Send + Sync {
    fn run(&self, work: &Work<'_>, timeout: Duration) -> ExecutionResult;
}

pub fn make_sandbox(kind: SandboxKind) -> Box<dyn ProcessSandbox> {
    match kind {
        #[cfg(unix)]
        SandboxKind::Fork => Box::new(ForkProcessSandbox),
        #[cfg(not(unix))]
        SandboxKind::Fork => {
            tracing::warn!("fork sandbox unavailable on this platform, using watchdog");
            Box::new(WatchdogSandbox)
        }
        SandboxKind::Watchdog => Box::new(WatchdogSandbox),
        SandboxKind::None => Box::new(NullSandbox),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Runs the work inline. No timeout enforcement and no crash containment
/// beyond catching panics.
pub struct NullSandbox;

impl ProcessSandbox for NullSandbox {
    fn run(&self, work: &Work<'_>, _timeout: Duration) -> ExecutionResult {
        let started = Instant::now();
        let interrupt = Interrupt::new();
        match panic::catch_unwind(AssertUnwindSafe(|| work(&interrupt))) {
            Ok(Ok(output)) => ExecutionResult::finished(started, output),
            Ok(Err(WorkFault::Trap(message))) => ExecutionResult::new(ExecutionStatus::Crashed, started, message),
            Ok(Err(WorkFault::Interrupted)) => {
                ExecutionResult::new(ExecutionStatus::TimedOut, started, String::new())
            }
            Err(payload) => ExecutionResult::new(ExecutionStatus::Crashed, started, panic_message(&*payload)),
        }
    }
}

pub struct WatchdogSandbox;

impl ProcessSandbox for WatchdogSandbox {
    fn run(&self, work: &Work<'_>, timeout: Duration) -> ExecutionResult {
        let started = Instant::now();
        let interrupt = Interrupt::new();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        thread::scope(|scope| {
            let interrupt = &interrupt;
            let spawned = thread::Builder::new()
                .name("irmut-sandbox".to_string())
                .spawn_scoped(scope, move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(interrupt)));
                    let _ = done_tx.send(());
                    outcome
                });
            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    return ExecutionResult::new(
                        ExecutionStatus::Error,
                        started,
                        format!("failed to spawn sandbox thread: {e}"),
                    );
                }
            };

            let timed_out = match done_rx.recv_timeout(timeout) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => false,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    interrupt.raise();
                    true
                }
            };

            let joined = handle.join();
            if timed_out {
                return ExecutionResult::new(ExecutionStatus::TimedOut, started, String::new());
            }
            match joined {
                Ok(Ok(Ok(output))) => ExecutionResult::finished(started, output),
                Ok(Ok(Err(WorkFault::Trap(message)))) => {
                    ExecutionResult::new(ExecutionStatus::Crashed, started, message)
                }
                Ok(Ok(Err(WorkFault::Interrupted))) => {
                    ExecutionResult::new(ExecutionStatus::TimedOut, started, String::new())
                }
                Ok(Err(payload)) | Err(payload) => {
                    ExecutionResult::new(ExecutionStatus::Crashed, started, panic_message(&*payload))
                }
            }
        })
    }
}

#[cfg(unix)]
pub use self::fork::ForkProcessSandbox;

#[cfg(unix)]
mod fork {
    use std::io::{ErrorKind, Read, Write};
    use std::os::unix::net::UnixStream;
    use std::panic::{self, AssertUnwindSafe};
    use std::thread;
    use std::time::{Duration, Instant};

    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
    use nix::unistd::{self, ForkResult, Pid};
    use serde::{Deserialize, Serialize};

    use super::{
        ExecutionResult, ExecutionStatus, Interrupt, ProcessSandbox, Work, WorkFault, WorkOutput,
        panic_message,
    };

    const MIN_POLL: Duration = Duration::from_micros(100);
    const MAX_POLL: Duration = Duration::from_millis(10);
    const TRAP_EXIT_CODE: i32 = 101;

    /// What the child reports back before exiting.
    #[derive(Serialize, Deserialize)]
    enum ChildReport {
        Finished(WorkOutput),
        Trapped(String),
    }

    enum ChildExit {
        Exited(i32),
        Signaled(Signal),
        TimedOut,
    }

    /// Forks once per run. The parent's address space (loaded program,
    /// compiled code) is never touched by the work.
    pub struct ForkProcessSandbox;

    impl ProcessSandbox for ForkProcessSandbox {
        fn run(&self, work: &Work<'_>, timeout: Duration) -> ExecutionResult {
            let started = Instant::now();
            let (mut parent_end, child_end) = match UnixStream::pair() {
                Ok(pair) => pair,
                Err(e) => {
                    return ExecutionResult::new(
                        ExecutionStatus::Error,
                        started,
                        format!("failed to create result channel: {e}"),
                    );
                }
            };

            // SAFETY: the child only runs the work, writes to its socket and
            // leaves through `_exit`; it never returns into the caller's stack.
            match unsafe { unistd::fork() } {
                Err(e) => ExecutionResult::new(ExecutionStatus::Error, started, format!("fork failed: {e}")),
                Ok(ForkResult::Child) => {
                    drop(parent_end);
                    run_child(work, child_end)
                }
                Ok(ForkResult::Parent { child }) => {
                    drop(child_end);
                    let mut report = Vec::new();
                    let exit = supervise(child, &mut parent_end, &mut report, started, timeout);
                    interpret(exit, &report, started)
                }
            }
        }
    }

    fn run_child(work: &Work<'_>, mut channel: UnixStream) -> ! {
        let interrupt = Interrupt::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&interrupt)));
        let (report, code) = match outcome {
            Ok(Ok(output)) => {
                let code = if output.passed { 0 } else { 1 };
                (ChildReport::Finished(output), code)
            }
            Ok(Err(WorkFault::Trap(message))) => (ChildReport::Trapped(message), TRAP_EXIT_CODE),
            Ok(Err(WorkFault::Interrupted)) => (ChildReport::Trapped("interrupted".to_string()), TRAP_EXIT_CODE),
            Err(payload) => (ChildReport::Trapped(panic_message(&*payload)), TRAP_EXIT_CODE),
        };
        if let Ok(bytes) = serde_json::to_vec(&report) {
            let _ = channel.write_all(&bytes);
        }
        drop(channel);
        // SAFETY: `_exit` skips atexit handlers and unwinding, so nothing the
        // child inherited from the parent is flushed or dropped twice.
        unsafe { nix::libc::_exit(code) }
    }

    fn drain(channel: &mut UnixStream, report: &mut Vec<u8>) {
        let mut chunk = [0u8; 8192];
        loop {
            match channel.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => report.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    fn supervise(
        child: Pid,
        channel: &mut UnixStream,
        report: &mut Vec<u8>,
        started: Instant,
        timeout: Duration,
    ) -> Result<ChildExit, String> {
        // The child may write more than the socket buffer holds; keep reading
        // while it runs so it never blocks on us.
        let nonblocking = channel.set_nonblocking(true).is_ok();
        let mut poll = MIN_POLL;
        let exit = loop {
            if nonblocking {
                drain(channel, report);
            }
            match wait::waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {
                    if started.elapsed() >= timeout {
                        let _ = signal::kill(child, Signal::SIGKILL);
                        let _ = wait::waitpid(child, None);
                        break Ok(ChildExit::TimedOut);
                    }
                    thread::sleep(poll);
                    poll = (poll * 2).min(MAX_POLL);
                }
                Ok(WaitStatus::Exited(_, code)) => break Ok(ChildExit::Exited(code)),
                Ok(WaitStatus::Signaled(_, sig, _)) => break Ok(ChildExit::Signaled(sig)),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => break Err(format!("waitpid failed: {e}")),
            }
        };
        // Children forked concurrently by other workers inherit this socket,
        // so waiting for EOF could stall; whatever our child wrote is already
        // buffered.
        drain(channel, report);
        exit
    }

    fn interpret(exit: Result<ChildExit, String>, report: &[u8], started: Instant) -> ExecutionResult {
        let decoded: Option<ChildReport> = serde_json::from_slice(report).ok();
        match exit {
            Err(message) => ExecutionResult::new(ExecutionStatus::Error, started, message),
            Ok(ChildExit::TimedOut) => ExecutionResult::new(ExecutionStatus::TimedOut, started, String::new()),
            Ok(ChildExit::Exited(_)) => match decoded {
                Some(ChildReport::Finished(output)) => ExecutionResult::finished(started, output),
                Some(ChildReport::Trapped(message)) => {
                    ExecutionResult::new(ExecutionStatus::Crashed, started, message)
                }
                None => ExecutionResult::new(
                    ExecutionStatus::Crashed,
                    started,
                    "child exited without reporting a result".to_string(),
                ),
            },
            Ok(ChildExit::Signaled(sig)) => {
                let message = match decoded {
                    Some(ChildReport::Trapped(message)) => message,
                    _ => format!("terminated by {sig:?}"),
                };
                ExecutionResult::new(ExecutionStatus::Crashed, started, message)
            }
        }
    }
}
