use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::blob::{Blob, BlobInner, BlobState, Storage};
use crate::error::{BlobError, BlobResult};
use crate::timeout::Timeout;
use zorp_util::time::unix_seconds_now;

/// Tunables for one blob system, mirroring the watermarks the manager
/// thread arbitrates allocation against.
#[derive(Debug, Clone)]
pub struct BlobSystemConfig {
    pub tmp_dir: PathBuf,
    pub mem_max: u64,
    pub disk_max: u64,
    pub lowat: u64,
    pub hiwat: u64,
    /// Blobs whose `alloc_size` is at or below this are never swapped out,
    /// even under memory pressure — too small to be worth the disk round
    /// trip.
    pub noswap_max: u64,
}

impl BlobSystemConfig {
    pub fn validate(&self) -> BlobResult<()> {
        if self.lowat > self.hiwat || self.hiwat >= self.mem_max {
            return Err(BlobError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid watermark ordering: lowat <= hiwat < mem_max must hold",
            )));
        }
        Ok(())
    }
}

enum ManagerMsg {
    Request(Arc<BlobInner>),
    MemFreed,
    Kill,
}

pub(crate) struct SystemState {
    pub mem_used: u64,
    pub disk_used: u64,
    /// Weak so a blob's last `Arc<BlobInner>` drop actually runs its
    /// destructor instead of being kept alive by this list for the
    /// system's whole lifetime; dead entries are pruned opportunistically
    /// whenever the list is scanned.
    pub blobs: Vec<Weak<BlobInner>>,
    pub waiting: VecDeque<Arc<BlobInner>>,
}

/// The state shared between the manager thread and every blob handle.
/// Blobs hold only a [`Weak`] reference to this so the manager thread's
/// retained `Arc<BlobInner>` list (in `state.blobs`) does not keep the
/// system itself alive past the last [`BlobSystem`] handle.
pub(crate) struct SystemCore {
    pub config: BlobSystemConfig,
    pub state: Mutex<SystemState>,
    sender: Sender<ManagerMsg>,
    next_id: AtomicU64,
}

impl SystemCore {
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn request(&self, blob: Arc<BlobInner>) {
        let _ = self.sender.send(ManagerMsg::Request(blob));
    }

    pub(crate) fn notify_mem_freed(&self) {
        let _ = self.sender.send(ManagerMsg::MemFreed);
    }
}

/// A handle to a blob system. Cloning is cheap (reference-counted); the
/// manager thread is spawned on [`BlobSystem::new`] and joined when the
/// last handle is dropped.
#[derive(Clone)]
pub struct BlobSystem {
    inner: Arc<SystemInner>,
}

struct SystemInner {
    core: Arc<SystemCore>,
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl BlobSystem {
    pub fn new(config: BlobSystemConfig) -> BlobResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.tmp_dir).map_err(BlobError::Io)?;

        let (sender, receiver) = bounded(256);
        let core = Arc::new(SystemCore {
            config,
            state: Mutex::new(SystemState {
                mem_used: 0,
                disk_used: 0,
                blobs: Vec::new(),
                waiting: VecDeque::new(),
            }),
            sender,
            next_id: AtomicU64::new(1),
        });

        let (ready_tx, ready_rx) = bounded(1);
        let manager_core = core.clone();
        let handle = std::thread::Builder::new()
            .name("zorp-blob-manager".to_string())
            .spawn(move || run_manager(manager_core, receiver, ready_tx))
            .map_err(BlobError::Io)?;
        let _ = ready_rx.recv();

        Ok(Self {
            inner: Arc::new(SystemInner {
                core,
                manager: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Registers a new blob and, if `initial_size > 0`, blocks until the
    /// manager has granted it room (memory or disk).
    pub fn create_blob(&self, initial_size: u64, timeout: Timeout) -> BlobResult<Blob> {
        let id = self.inner.core.next_id();
        let alloc_size = grow_alloc_size(0, initial_size.max(1));
        let inner = Arc::new(BlobInner {
            id,
            system: Arc::downgrade(&self.inner.core),
            tmp_dir: self.inner.core.config.tmp_dir.clone(),
            state: Mutex::new(BlobState {
                size: 0,
                alloc_size: 0,
                storage: Storage::Memory(Vec::new()),
                storage_locked: false,
                alloc_req: 0,
                approved: false,
                replied: true,
                dying: false,
                stats: crate::blob::BlobStats::new(unix_seconds_now()),
            }),
            reply: parking_lot::Condvar::new(),
        });

        self.inner.core.state.lock().blobs.push(Arc::downgrade(&inner));

        let blob = Blob::from_inner(inner);
        if initial_size > 0 {
            blob.alloc(alloc_size as i64, timeout)?;
            blob.set_initial_size(initial_size);
        }
        Ok(blob)
    }
}

impl Drop for SystemInner {
    fn drop(&mut self) {
        let _ = self.core.sender.send(ManagerMsg::Kill);
        if let Some(handle) = self.manager.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run_manager(core: Arc<SystemCore>, receiver: Receiver<ManagerMsg>, ready: Sender<()>) {
    let _ = ready.send(());
    loop {
        match receiver.recv() {
            Err(_) | Ok(ManagerMsg::Kill) => break,
            Ok(ManagerMsg::Request(blob)) => {
                let approved = check_alloc(&core, &blob);
                if approved {
                    reply_to(&blob, true);
                    if blob.state.lock().alloc_req < 0 {
                        core.notify_mem_freed();
                    }
                } else {
                    // left unreplied: the client keeps waiting on its
                    // condvar until a later MEM_FREED rescan approves it
                    // or system teardown denies every waiter.
                    core.state.lock().waiting.push_back(blob);
                }
            }
            Ok(ManagerMsg::MemFreed) => {
                process_waiting_list(&core);
                swap_in(&core);
            }
        }
    }
    deny_all_waiters(&core);
}

fn reply_to(blob: &Arc<BlobInner>, approved: bool) {
    let mut state = blob.state.lock();
    state.approved = approved;
    state.replied = true;
    blob.reply.notify_all();
}

fn deny_all_waiters(core: &Arc<SystemCore>) {
    let waiting: Vec<_> = core.state.lock().waiting.drain(..).collect();
    for blob in waiting {
        reply_to(&blob, false);
    }
}

/// Implements the `check_alloc` decision table from the allocation
/// protocol: approves or leaves the blob queued, mutating `mem_used` /
/// `disk_used` and the blob's storage on approval.
fn check_alloc(core: &Arc<SystemCore>, blob: &Arc<BlobInner>) -> bool {
    let mut sys = core.state.lock();
    let mut bstate = blob.state.lock();
    let delta = bstate.alloc_req;
    let req = (bstate.alloc_size as i64 + delta).max(0) as u64;
    let mem_free = core.config.mem_max.saturating_sub(sys.mem_used);
    let disk_free = core.config.disk_max.saturating_sub(sys.disk_used);
    let in_file = bstate.storage.is_disk();

    if in_file {
        if disk_free as i64 >= delta.max(0) || delta <= 0 {
            apply_delta(&mut sys.disk_used, delta);
            bstate.alloc_size = req;
            bstate.stats.alloc_count += 1;
            return true;
        }
        return false;
    }

    if delta <= 0 {
        apply_delta(&mut sys.mem_used, delta);
        bstate.alloc_size = req;
        bstate.stats.alloc_count += 1;
        return true;
    }

    if (delta as u64) <= mem_free {
        sys.mem_used += delta as u64;
        bstate.alloc_size = req;
        bstate.stats.alloc_count += 1;
        return true;
    }

    if req <= disk_free && !bstate.storage_locked && req > core.config.noswap_max {
        let old_alloc_size = bstate.alloc_size;
        drop(bstate);
        drop(sys);
        swap_out_blob(blob);
        let mut sys = core.state.lock();
        let mut bstate = blob.state.lock();
        sys.mem_used = sys.mem_used.saturating_sub(old_alloc_size);
        sys.disk_used += req;
        bstate.alloc_size = req;
        bstate.stats.alloc_count += 1;
        return true;
    }

    if (delta as u64) > mem_free + disk_free {
        return false;
    }

    // Ambiguous branch the original left imprecise: neither a clean
    // approval nor a clear denial path applies here. Preserve the
    // observable behavior (deny, leave queued) but call it out distinctly.
    tracing::debug!(blob = blob.id, "check_alloc: no approval path matched, denying");
    false
}

fn apply_delta(counter: &mut u64, delta: i64) {
    if delta >= 0 {
        *counter += delta as u64;
    } else {
        *counter = counter.saturating_sub((-delta) as u64);
    }
}

/// Moves a blob's bytes to its spill file. The caller is responsible for
/// updating `mem_used`/`disk_used` on the system once this returns; any
/// I/O failure here aborts the process, since the blob's contents would
/// otherwise be silently lost mid-flight.
fn swap_out_blob(blob: &Arc<BlobInner>) {
    use std::io::{Seek, SeekFrom, Write};

    let mut state = blob.state.lock();
    let bytes = match &state.storage {
        Storage::Memory(buf) => buf.clone(),
        Storage::Disk { .. } => return,
    };

    let mut file = tempfile::Builder::new()
        .prefix("blob_")
        .tempfile_in(&blob.tmp_dir)
        .unwrap_or_else(|e| panic!("zorp-blob: cannot create spill file: {e}"));
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.write_all(&bytes))
        .unwrap_or_else(|e| panic!("zorp-blob: swap-out write failed, aborting: {e}"));
    let (std_file, path) = file
        .keep()
        .unwrap_or_else(|e| panic!("zorp-blob: cannot persist spill file: {e}"));

    state.storage = Storage::Disk {
        file: std_file,
        path,
    };
    state.stats.swap_count += 1;
}

/// Moves a blob to disk unconditionally, regardless of `check_alloc`'s
/// usual thresholds — used by [`crate::blob::Blob::get_file`], which must
/// always hand back a real path.
pub(crate) fn force_swap_out(core: &Arc<SystemCore>, blob: &Arc<BlobInner>) {
    let old_alloc_size = blob.state.lock().alloc_size;
    swap_out_blob(blob);
    let mut sys = core.state.lock();
    sys.mem_used = sys.mem_used.saturating_sub(old_alloc_size);
    sys.disk_used += old_alloc_size;
}

/// Moves a blob from disk back into memory unconditionally, regardless of
/// the manager's usual watermarks — used by [`crate::blob::Blob::get_ptr`],
/// which must always hand back an in-memory view. A no-op if the blob is
/// already resident.
pub(crate) fn force_swap_in(core: &Arc<SystemCore>, blob: &Arc<BlobInner>) {
    if !blob.state.lock().storage.is_disk() {
        return;
    }
    swap_in_blob(core, blob);
}

/// Runs only when `mem_used < lowat` and `disk_used >= hiwat`: reads the
/// best-scoring on-disk, unlocked blob back into memory, repeating until
/// none remains.
fn swap_in(core: &Arc<SystemCore>) {
    loop {
        let mut sys = core.state.lock();
        if sys.mem_used >= core.config.lowat || sys.disk_used < core.config.hiwat {
            return;
        }
        let budget = core.config.hiwat - sys.mem_used;
        let now = unix_seconds_now();

        let mut best: Option<(Arc<BlobInner>, f64)> = None;
        sys.blobs.retain(|weak| weak.strong_count() > 0);
        for weak in &sys.blobs {
            let Some(blob) = weak.upgrade() else {
                continue;
            };
            let Some(state) = blob.state.try_lock() else {
                continue;
            };
            if !state.storage.is_disk() || state.storage_locked || state.dying {
                continue;
            }
            if state.alloc_size > budget {
                continue;
            }
            let age = now.saturating_sub(state.stats.last_accessed).max(1);
            let score = (state.stats.req_rd + state.stats.req_wr) as f64 / age as f64;
            let better = best.as_ref().map(|(_, best_score)| score > *best_score).unwrap_or(true);
            if better {
                drop(state);
                best = Some((blob, score));
            }
        }

        let Some((blob, _)) = best else {
            return;
        };
        drop(sys);
        swap_in_blob(core, &blob);
    }
}

fn swap_in_blob(core: &Arc<SystemCore>, blob: &Arc<BlobInner>) {
    use std::io::{Read, Seek, SeekFrom};

    let mut sys = core.state.lock();
    let mut state = blob.state.lock();
    let size = state.size as usize;
    let alloc_size = state.alloc_size;
    let buf = {
        let Storage::Disk { file, .. } = &mut state.storage else {
            return;
        };
        let mut buf = vec![0u8; size];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut buf))
            .unwrap_or_else(|e| panic!("zorp-blob: swap-in read failed, aborting: {e}"));
        buf
    };

    sys.disk_used = sys.disk_used.saturating_sub(alloc_size);
    sys.mem_used += alloc_size;
    state.storage = Storage::Memory(buf);
    state.stats.swap_count += 1;
}

fn process_waiting_list(core: &Arc<SystemCore>) {
    let waiting: Vec<_> = {
        let mut sys = core.state.lock();
        std::mem::take(&mut sys.waiting).into_iter().collect()
    };
    let mut still_waiting = VecDeque::new();
    for blob in waiting {
        if check_alloc(core, &blob) {
            reply_to(&blob, true);
        } else {
            still_waiting.push_back(blob);
        }
    }
    core.state.lock().waiting.extend(still_waiting);
}

/// Allocation-size growth: a brand-new blob (`current == 0`) is sized
/// exactly to what was asked for; afterwards, growth doubles from the
/// established `current` size and shrinkage halves back down, yielding
/// power-of-two bucketing that minimizes reallocation churn under
/// monotonically growing writes while still permitting shrinking.
pub(crate) fn grow_alloc_size(current: u64, requested: u64) -> u64 {
    if current == 0 {
        return requested.max(1);
    }
    let mut size = current;
    while size < requested {
        size *= 2;
    }
    while size / 2 >= requested.max(1) {
        size /= 2;
    }
    size
}
