//! Process-model plumbing surrounding the stream/blob runtime: CLI flag
//! groups for logging/threads/process control, pidfile read/write,
//! privilege drop (user/group/chroot/capabilities/resource limits), and
//! the fork-supervise-daemon loop with its restart policy.
//!
//! None of this is specified in depth by the core runtime design — it is
//! the "thin collaborator" layer the core assumes exists around it.

pub mod cli;
pub mod daemon;
pub mod pidfile;
pub mod privilege;
pub mod supervisor;

pub use cli::{LoggingArgs, ProcessArgs, ProcessMode, ThreadArgs};
pub use daemon::{daemonize, ReadinessSignal};
pub use privilege::PrivilegeDrop;
pub use supervisor::{run_supervised, ExitStatus, RestartPolicy};

impl From<&ProcessArgs> for PrivilegeDrop {
    fn from(args: &ProcessArgs) -> Self {
        Self {
            user: args.user.clone(),
            group: args.group.clone(),
            chroot_dir: args.chroot.clone(),
            caps: args.caps.clone(),
            no_caps: args.no_caps,
            fd_limit_min: args.fd_limit_min,
            enable_core: args.enable_core,
        }
    }
}

impl From<&ProcessArgs> for RestartPolicy {
    fn from(args: &ProcessArgs) -> Self {
        Self {
            max: args.restart_max,
            interval: std::time::Duration::from_secs(args.restart_interval),
        }
    }
}
