//! A fixed-size worker pool for blocking transfers, CPU-bound codec work,
//! and deadlock-checker callbacks — anything the cooperative event loop
//! must not be allowed to block on.
//!
//! Workers run arbitrary start/stop hooks registered before the pool is
//! built, so collaborators like the logger (per-thread verbosity cache)
//! and a TLS library's per-thread error state can hook into the worker
//! lifecycle without the pool knowing anything about them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

/// The CLI-level cap on `--stack-size KB`: worker stacks never exceed
/// this regardless of what is requested.
pub const MAX_STACK_SIZE_KB: usize = 256;

pub type Job = Box<dyn FnOnce() + Send + 'static>;
type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct ThreadPoolConfig {
    pub worker_count: usize,
    pub stack_size_kb: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            stack_size_kb: MAX_STACK_SIZE_KB,
        }
    }
}

impl ThreadPoolConfig {
    pub fn clamped_stack_size_bytes(&self) -> usize {
        self.stack_size_kb.min(MAX_STACK_SIZE_KB) * 1024
    }
}

enum Message {
    Run(Job),
    Shutdown,
}

pub struct ThreadPool {
    sender: Sender<Message>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
}

pub struct ThreadPoolBuilder {
    config: ThreadPoolConfig,
    on_start: Vec<Hook>,
    on_stop: Vec<Hook>,
}

impl ThreadPoolBuilder {
    pub fn new(config: ThreadPoolConfig) -> Self {
        Self {
            config,
            on_start: Vec::new(),
            on_stop: Vec::new(),
        }
    }

    /// Registers a hook run once when a worker thread starts, before it
    /// begins pulling jobs off the queue.
    pub fn on_thread_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start.push(Arc::new(hook));
        self
    }

    /// Registers a hook run once when a worker thread is about to exit.
    pub fn on_thread_stop(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop.push(Arc::new(hook));
        self
    }

    pub fn build(self) -> std::io::Result<ThreadPool> {
        let (sender, receiver) = bounded::<Message>(self.config.worker_count * 4 + 16);
        let active = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(self.config.worker_count);

        for idx in 0..self.config.worker_count {
            let receiver: Receiver<Message> = receiver.clone();
            let on_start = self.on_start.clone();
            let on_stop = self.on_stop.clone();
            let active = active.clone();
            let handle = std::thread::Builder::new()
                .name(format!("zorp-worker-{idx}"))
                .stack_size(self.config.clamped_stack_size_bytes())
                .spawn(move || {
                    for hook in &on_start {
                        hook();
                    }
                    while let Ok(msg) = receiver.recv() {
                        match msg {
                            Message::Run(job) => {
                                active.fetch_add(1, Ordering::SeqCst);
                                job();
                                active.fetch_sub(1, Ordering::SeqCst);
                            }
                            Message::Shutdown => break,
                        }
                    }
                    for hook in &on_stop {
                        hook();
                    }
                })?;
            handles.push(handle);
        }

        Ok(ThreadPool {
            sender,
            handles: Mutex::new(handles),
            active,
        })
    }
}

impl ThreadPool {
    pub fn builder(config: ThreadPoolConfig) -> ThreadPoolBuilder {
        ThreadPoolBuilder::new(config)
    }

    /// Queues `job` for execution on the next free worker. Errors only if
    /// the pool has already been shut down.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<(), &'static str> {
        self.sender
            .send(Message::Run(Box::new(job)))
            .map_err(|_| "thread pool is shut down")
    }

    /// Number of jobs currently executing (not queued).
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Sends a shutdown signal to every worker and joins them all. Jobs
    /// already queued but not yet picked up are dropped without running.
    pub fn shutdown(&self) {
        let worker_count = self.handles.lock().len();
        for _ in 0..worker_count {
            let _ = self.sender.send(Message::Shutdown);
        }
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_queued_jobs() {
        let pool = ThreadPool::builder(ThreadPoolConfig {
            worker_count: 2,
            stack_size_kb: 64,
        })
        .build()
        .unwrap();

        let (tx, rx) = mpsc::channel();
        for i in 0..8 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap()).unwrap();
        }
        drop(tx);
        let mut results: Vec<i32> = rx.iter().collect();
        results.sort();
        assert_eq!(results, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn start_and_stop_hooks_fire_once_per_worker() {
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let s1 = started.clone();
        let s2 = stopped.clone();
        let pool = ThreadPool::builder(ThreadPoolConfig {
            worker_count: 3,
            stack_size_kb: 64,
        })
        .on_thread_start(move || {
            s1.fetch_add(1, Ordering::SeqCst);
        })
        .on_thread_stop(move || {
            s2.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
        pool.shutdown();
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(stopped.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stack_size_is_clamped() {
        let cfg = ThreadPoolConfig {
            worker_count: 1,
            stack_size_kb: 10_000,
        };
        assert_eq!(cfg.clamped_stack_size_bytes(), MAX_STACK_SIZE_KB * 1024);
    }
}
