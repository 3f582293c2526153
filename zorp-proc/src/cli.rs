//! The three flag groups the host CLI forwards into this crate: logging,
//! thread pool sizing, and the process model (privilege drop, daemonizing,
//! restart policy). Grouped as separate `clap::Args` structs so a host
//! binary can flatten them into its own `Parser` without this crate
//! needing to own the whole CLI surface.

use std::path::PathBuf;

use clap::{Args, ValueEnum};

use zorp_pool::MAX_STACK_SIZE_KB;

#[derive(Debug, Clone, Args)]
pub struct LoggingArgs {
    /// Global verbosity; per-tag overrides come from `--log-spec`.
    #[arg(long, default_value_t = 1)]
    pub verbose: u32,

    #[arg(long)]
    pub no_syslog: bool,

    /// `GLOB:LEVEL[,GLOB:LEVEL]*`, e.g. `core.*:5,http.req:7`.
    #[arg(long)]
    pub log_spec: Option<String>,

    /// Prefix each line with its tag instead of just the message.
    #[arg(long)]
    pub log_tags: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ThreadArgs {
    /// Use multiple thread pools instead of one shared pool.
    #[arg(long)]
    pub threadpools: bool,

    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    #[arg(long, default_value_t = 0)]
    pub idle_threads: usize,

    /// Clamped to `MAX_STACK_SIZE_KB` regardless of what's requested.
    #[arg(long, default_value_t = MAX_STACK_SIZE_KB)]
    pub stack_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ProcessMode {
    Foreground,
    Background,
    SafeBackground,
}

#[derive(Debug, Clone, Args)]
pub struct ProcessArgs {
    /// Shorthand for `--process-mode foreground`.
    #[arg(long)]
    pub foreground: bool,

    #[arg(long, value_enum, default_value_t = ProcessMode::Foreground)]
    pub process_mode: ProcessMode,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub group: Option<String>,

    #[arg(long)]
    pub chroot: Option<PathBuf>,

    /// Capability spec, e.g. `cap_net_bind_service=ep`. Parsing is
    /// platform-specific; see [`crate::privilege`].
    #[arg(long)]
    pub caps: Option<String>,

    #[arg(long)]
    pub no_caps: bool,

    #[arg(long)]
    pub pidfile: Option<PathBuf>,

    #[arg(long)]
    pub enable_core: bool,

    #[arg(long, default_value_t = 0)]
    pub fd_limit_min: u64,

    #[arg(long, default_value_t = 3)]
    pub restart_max: u32,

    #[arg(long, default_value_t = 60)]
    pub restart_interval: u64,

    #[arg(long, default_value_t = 0)]
    pub notify_interval: u64,
}

impl ProcessArgs {
    /// Resolves `--foreground`/`--process-mode` to one effective mode;
    /// the flag wins if both are given since it exists precisely to
    /// override a configured default.
    pub fn effective_mode(&self) -> ProcessMode {
        if self.foreground {
            ProcessMode::Foreground
        } else {
            self.process_mode
        }
    }
}
