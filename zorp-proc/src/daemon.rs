//! Turns the current process into a background daemon: detach from the
//! controlling terminal, start a new session, and redirect standard I/O
//! to `/dev/null`. `ProcessMode::SafeBackground` additionally blocks the
//! original invoking process until the daemonized child reports it
//! finished initializing, via a pipe inherited across the fork — so a
//! script that runs `zorpd --process-mode safe-background` only gets its
//! shell prompt back once startup has actually succeeded or failed.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::unistd::{dup2, fork, pipe, setsid, ForkResult};

use zorp_errors::{ZorpError, ZorpResult};

use crate::cli::ProcessMode;

/// The write end of the readiness pipe a daemonized child uses to tell
/// its original parent that initialization finished. `None` outside
/// `SafeBackground` mode, where there's no parent left waiting.
pub struct ReadinessSignal {
    write_fd: Option<OwnedFd>,
}

impl ReadinessSignal {
    fn none() -> Self {
        Self { write_fd: None }
    }

    /// Reports success (`Ok`) or failure (`Err`) to the waiting parent, if
    /// any, as a single byte: `1` or `0`.
    pub fn report(self, result: ZorpResult<()>) {
        if let Some(fd) = self.write_fd {
            let byte = if result.is_ok() { [1u8] } else { [0u8] };
            let mut file = std::fs::File::from(fd);
            let _ = file.write_all(&byte);
        }
    }
}

/// Daemonizes per `mode`. Returns the [`ReadinessSignal`] the caller must
/// eventually `report` through once startup either succeeds or fails.
/// `Foreground` is a no-op returning a signal with nothing to report to.
pub fn daemonize(mode: ProcessMode) -> ZorpResult<ReadinessSignal> {
    if mode == ProcessMode::Foreground {
        return Ok(ReadinessSignal::none());
    }

    let (read_fd, write_fd) = if mode == ProcessMode::SafeBackground {
        let (r, w) = pipe().map_err(|e| ZorpError::config(format!("pipe failed: {e}")))?;
        (Some(r), Some(w))
    } else {
        (None, None)
    };

    match unsafe { fork() }.map_err(|e| ZorpError::config(format!("fork failed: {e}")))? {
        ForkResult::Parent { .. } => {
            if let Some(read_fd) = read_fd {
                drop(write_fd);
                let mut file = std::fs::File::from(read_fd);
                let mut byte = [0u8; 1];
                let ok = file.read_exact(&mut byte).is_ok() && byte[0] == 1;
                std::process::exit(if ok { 0 } else { 1 });
            }
            std::process::exit(0);
        }
        ForkResult::Child => {
            drop(read_fd);
            setsid().map_err(|e| ZorpError::config(format!("setsid failed: {e}")))?;
            redirect_stdio_to_null()?;
            Ok(ReadinessSignal { write_fd })
        }
    }
}

fn redirect_stdio_to_null() -> ZorpResult<()> {
    let null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(ZorpError::Io)?;
    let null_fd = null.as_raw_fd();
    for target in [0, 1, 2] {
        dup2(null_fd, target).map_err(|e| ZorpError::config(format!("redirecting fd {target} failed: {e}")))?;
    }
    // `null` (and the fd it owns) is dropped here once every standard
    // stream points at a `dup2`'d copy.
    Ok(())
}
