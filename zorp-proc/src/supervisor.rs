//! fork-supervise-daemon loop.
//!
//! The supervisor forks a child that runs the proxy; if the child dies
//! (signal or non-zero exit) the supervisor restarts it, unless more than
//! `restart_max` deaths have happened within the trailing `restart_interval`
//! window, in which case it gives up for good. `ProcessMode::Foreground`
//! skips all of this and just runs `child_main` in the current process.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use zorp_errors::{ZorpError, ZorpResult};

use crate::cli::ProcessMode;

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub max: u32,
    pub interval: Duration,
}

impl RestartPolicy {
    pub fn none() -> Self {
        Self { max: 0, interval: Duration::ZERO }
    }
}

/// Exit status the process should use, per the specification's "0 on clean
/// termination; 1 on startup failure or initialization failure reported by
/// a child back to the supervisor."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    StartupFailure,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::StartupFailure => 1,
        }
    }
}

/// Runs `child_main` under the given process mode and restart policy.
/// `child_main` returning `Err` or the child process dying abnormally both
/// count as a crash for restart-counting purposes; `Ok(())` is a clean
/// exit and stops the supervisor without restarting.
pub fn run_supervised(
    mode: ProcessMode,
    policy: RestartPolicy,
    child_main: impl Fn() -> ZorpResult<()>,
) -> ZorpResult<ExitStatus> {
    if mode == ProcessMode::Foreground {
        return match child_main() {
            Ok(()) => Ok(ExitStatus::Clean),
            Err(_) => Ok(ExitStatus::StartupFailure),
        };
    }

    let mut deaths: VecDeque<Instant> = VecDeque::new();

    loop {
        match unsafe { fork() }.map_err(|e| ZorpError::config(format!("fork failed: {e}")))? {
            ForkResult::Child => {
                // SAFETY boundary ends here: from this point the child
                // runs ordinary single-threaded logic, no more fork-unsafe
                // library calls before `child_main` takes over.
                let result = child_main();
                std::process::exit(if result.is_ok() { 0 } else { 1 });
            }
            ForkResult::Parent { child } => {
                let status = wait_for(child)?;
                if status.clean {
                    return Ok(ExitStatus::Clean);
                }

                let now = Instant::now();
                deaths.push_back(now);
                while let Some(&front) = deaths.front() {
                    if now.duration_since(front) > policy.interval {
                        deaths.pop_front();
                    } else {
                        break;
                    }
                }
                if deaths.len() as u32 > policy.max {
                    return Ok(ExitStatus::StartupFailure);
                }
                // loop around and fork again
            }
        }
    }
}

struct ChildStatus {
    clean: bool,
}

fn wait_for(child: Pid) -> ZorpResult<ChildStatus> {
    match waitpid(child, None).map_err(|e| ZorpError::config(format!("waitpid failed: {e}")))? {
        WaitStatus::Exited(_, 0) => Ok(ChildStatus { clean: true }),
        WaitStatus::Exited(_, _) => Ok(ChildStatus { clean: false }),
        WaitStatus::Signaled(_, Signal::SIGKILL, _) => {
            // A user-initiated SIGKILL is treated as clean per the
            // specification: every other signal-caused exit restarts.
            Ok(ChildStatus { clean: true })
        }
        WaitStatus::Signaled(..) => Ok(ChildStatus { clean: false }),
        _ => Ok(ChildStatus { clean: false }),
    }
}

/// Sends `SIGTERM` to a supervised child, used by a signal handler in the
/// parent to propagate an operator's shutdown request.
pub fn terminate(child: Pid) -> ZorpResult<()> {
    signal::kill(child, Signal::SIGTERM).map_err(|e| ZorpError::config(format!("kill failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreground_mode_runs_inline_and_reports_clean() {
        let status = run_supervised(ProcessMode::Foreground, RestartPolicy::none(), || Ok(())).unwrap();
        assert_eq!(status, ExitStatus::Clean);
        assert_eq!(status.code(), 0);
    }

    #[test]
    fn foreground_mode_maps_error_to_startup_failure() {
        let status =
            run_supervised(ProcessMode::Foreground, RestartPolicy::none(), || Err(ZorpError::config("boom")))
                .unwrap();
        assert_eq!(status, ExitStatus::StartupFailure);
        assert_eq!(status.code(), 1);
    }
}
