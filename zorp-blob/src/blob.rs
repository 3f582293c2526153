use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::error::{BlobError, BlobResult};
use crate::system::{grow_alloc_size, SystemCore};
use crate::timeout::Timeout;
use zorp_util::time::unix_seconds_now;

pub(crate) enum Storage {
    Memory(Vec<u8>),
    Disk {
        file: std::fs::File,
        path: PathBuf,
    },
}

impl Storage {
    pub(crate) fn is_disk(&self) -> bool {
        matches!(self, Storage::Disk { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BlobStats {
    pub req_rd: u64,
    pub req_wr: u64,
    pub bytes_rd: u64,
    pub bytes_wr: u64,
    pub swap_count: u64,
    pub alloc_count: u64,
    pub created_at: u64,
    pub last_accessed: u64,
}

impl BlobStats {
    pub(crate) fn new(now: u64) -> Self {
        Self {
            req_rd: 0,
            req_wr: 0,
            bytes_rd: 0,
            bytes_wr: 0,
            swap_count: 0,
            alloc_count: 0,
            created_at: now,
            last_accessed: now,
        }
    }
}

pub(crate) struct BlobState {
    pub size: u64,
    pub alloc_size: u64,
    pub storage: Storage,
    pub storage_locked: bool,
    pub alloc_req: i64,
    pub approved: bool,
    pub replied: bool,
    pub dying: bool,
    pub stats: BlobStats,
}

pub(crate) struct BlobInner {
    pub id: u64,
    pub system: Weak<SystemCore>,
    pub tmp_dir: PathBuf,
    pub state: Mutex<BlobState>,
    pub reply: Condvar,
}

impl BlobInner {
    fn system(&self) -> BlobResult<Arc<SystemCore>> {
        self.system.upgrade().ok_or(BlobError::SystemGone)
    }

    /// Runs the allocate-or-wait protocol for a signed size delta,
    /// blocking on `self.reply` until the manager replies or `timeout`
    /// elapses.
    pub(crate) fn request(self: &Arc<Self>, delta: i64, timeout: Timeout) -> BlobResult<()> {
        let system = self.system()?;
        {
            let mut state = self.state.lock();
            state.alloc_req = delta;
            state.replied = false;
            state.approved = false;
        }
        system.request(self.clone());

        let mut state = self.state.lock();
        let deadline = timeout.deadline();
        while !state.replied {
            match deadline {
                None => self.reply.wait(&mut state),
                Some(d) => {
                    let now = std::time::Instant::now();
                    if now >= d {
                        break;
                    }
                    let timed_out = self.reply.wait_for(&mut state, d - now).timed_out();
                    if timed_out {
                        break;
                    }
                }
            }
        }
        if !state.replied {
            return Err(BlobError::Timeout);
        }
        if state.approved {
            Ok(())
        } else {
            Err(BlobError::ResourceDenied {
                requested: delta.max(0) as u64,
            })
        }
    }
}

impl Drop for BlobInner {
    /// The `Dying` transition: runs once, when the last [`Blob`] handle
    /// sharing this `Arc` drops. Unlinks the spill file if one was ever
    /// created and releases whatever `mem_used`/`disk_used` share this
    /// blob was still charged for. The system's own `blobs` list holds
    /// only [`Weak`] references, so it does not keep this alive — a later
    /// scan (swap-in, or the next blob's allocation request) prunes the
    /// now-dead entry.
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.dying = true;
        if let Storage::Disk { path, .. } = &state.storage {
            let _ = std::fs::remove_file(path);
        }
        let Some(system) = self.system.upgrade() else {
            return;
        };
        {
            let mut sys = system.state.lock();
            match &state.storage {
                Storage::Memory(_) => sys.mem_used = sys.mem_used.saturating_sub(state.alloc_size),
                Storage::Disk { .. } => sys.disk_used = sys.disk_used.saturating_sub(state.alloc_size),
            }
        }
        system.notify_mem_freed();
    }
}

/// A handle to one stored payload. Cloning shares the same underlying
/// blob (reference-counted); the payload is freed from its system when
/// the last clone drops.
#[derive(Clone)]
pub struct Blob {
    inner: Arc<BlobInner>,
}

impl Blob {
    pub(crate) fn from_inner(inner: Arc<BlobInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn size(&self) -> u64 {
        self.inner.state.lock().size
    }

    pub fn is_in_file(&self) -> bool {
        self.inner.state.lock().storage.is_disk()
    }

    pub fn alloc_size(&self) -> u64 {
        self.inner.state.lock().alloc_size
    }

    /// Establishes the logical size right after the initial allocation
    /// grant; growth past this point goes through [`Blob::truncate`] or
    /// the implicit growth in [`Blob::add_copy`].
    pub(crate) fn set_initial_size(&self, size: u64) {
        let mut state = self.inner.state.lock();
        state.size = size;
        match &mut state.storage {
            Storage::Memory(buf) => buf.resize(size as usize, 0),
            Storage::Disk { file, .. } => {
                let _ = file.set_len(size);
            }
        }
    }

    /// Pins (or unpins) the blob against swap-out/swap-in while held.
    pub fn storage_lock(&self, locked: bool) {
        self.inner.state.lock().storage_locked = locked;
    }

    pub(crate) fn alloc(&self, delta: i64, timeout: Timeout) -> BlobResult<()> {
        self.inner.request(delta, timeout)
    }

    /// Grows (or shrinks, via a smaller `pos`) the blob so that `pos` is a
    /// valid size, requesting more room from the system if needed.
    pub fn truncate(&self, pos: u64, timeout: Timeout) -> BlobResult<()> {
        let current_bucket = {
            let state = self.inner.state.lock();
            state.alloc_size
        };
        let wanted_bucket = grow_alloc_size(current_bucket, pos.max(1));
        if wanted_bucket != current_bucket {
            self.inner
                .request(wanted_bucket as i64 - current_bucket as i64, timeout)?;
        }
        let mut state = self.inner.state.lock();
        state.size = pos;
        match &mut state.storage {
            Storage::Memory(buf) => buf.resize(pos as usize, 0),
            Storage::Disk { file, .. } => {
                let _ = file.set_len(pos);
            }
        }
        Ok(())
    }

    fn ensure_room(&self, end: u64, timeout: Timeout) -> BlobResult<()> {
        let (current_bucket, current_size) = {
            let state = self.inner.state.lock();
            (state.alloc_size, state.size)
        };
        if end <= current_size {
            return Ok(());
        }
        let wanted_bucket = grow_alloc_size(current_bucket, end);
        if wanted_bucket != current_bucket {
            self.inner
                .request(wanted_bucket as i64 - current_bucket as i64, timeout)?;
        }
        let mut state = self.inner.state.lock();
        state.size = state.size.max(end);
        let new_size = state.size;
        match &mut state.storage {
            Storage::Memory(buf) => buf.resize(new_size as usize, 0),
            Storage::Disk { file, .. } => {
                let _ = file.set_len(new_size);
            }
        }
        Ok(())
    }

    pub fn get_copy(&self, pos: u64, len: usize, timeout: Timeout) -> BlobResult<Vec<u8>> {
        let _ = timeout;
        let mut state = self.inner.state.lock();
        let size = state.size;
        if pos > size {
            return Err(BlobError::OutOfRange { pos, size });
        }
        let end = (pos as usize + len).min(size as usize);
        let out = match &mut state.storage {
            Storage::Memory(buf) => buf[pos as usize..end].to_vec(),
            Storage::Disk { file, .. } => read_disk_range(file, pos, end - pos as usize)?,
        };
        state.stats.req_rd += 1;
        state.stats.bytes_rd += out.len() as u64;
        state.stats.last_accessed = unix_seconds_now();
        Ok(out)
    }

    pub fn add_copy(&self, pos: u64, data: &[u8], timeout: Timeout) -> BlobResult<()> {
        self.ensure_room(pos + data.len() as u64, timeout)?;
        let mut state = self.inner.state.lock();
        match &mut state.storage {
            Storage::Memory(buf) => {
                buf[pos as usize..pos as usize + data.len()].copy_from_slice(data);
            }
            Storage::Disk { file, .. } => write_disk_range(file, pos, data)?,
        }
        state.stats.req_wr += 1;
        state.stats.bytes_wr += data.len() as u64;
        state.stats.last_accessed = unix_seconds_now();
        Ok(())
    }

    /// Forces the blob onto disk and returns its spill-file path. The blob
    /// remains storage-locked until [`Blob::release_file`] is called.
    pub fn get_file(&self, timeout: Timeout) -> BlobResult<PathBuf> {
        let system = self.inner.system()?;
        {
            let mut state = self.inner.state.lock();
            if !state.storage.is_disk() {
                state.storage_locked = true;
                drop(state);
                self.inner.request(0, timeout)?;
                crate::system::force_swap_out(&system, &self.inner);
            } else {
                state.storage_locked = true;
            }
        }
        let state = self.inner.state.lock();
        match &state.storage {
            Storage::Disk { path, .. } => Ok(path.clone()),
            Storage::Memory(_) => unreachable!("forced swap-out did not move storage to disk"),
        }
    }

    /// Restats the backing file (picking up any out-of-band size change)
    /// and releases the storage lock taken by `get_file`.
    pub fn release_file(&self) {
        let mut state = self.inner.state.lock();
        if let Storage::Disk { file, .. } = &state.storage {
            if let Ok(metadata) = file.metadata() {
                state.size = metadata.len();
            }
        }
        state.storage_locked = false;
    }

    /// Pins the blob in memory and returns a guard over its full payload.
    /// A true zero-copy pointer into process memory is not meaningful
    /// across a safe Rust API boundary the way it is in the original's C
    /// pointer contract, but the on-disk case still has to land the bytes
    /// back in memory before handing out a view — an on-disk blob is
    /// swapped in unconditionally (bypassing the manager's usual
    /// watermarks) before the guard is returned.
    pub fn get_ptr(&self, timeout: Timeout) -> BlobResult<BlobPtrGuard> {
        let system = self.inner.system()?;
        self.inner.request(0, timeout)?;
        let needs_swap_in = {
            let mut state = self.inner.state.lock();
            state.storage_locked = true;
            state.storage.is_disk()
        };
        if needs_swap_in {
            crate::system::force_swap_in(&system, &self.inner);
        }
        Ok(BlobPtrGuard {
            blob: self.inner.clone(),
        })
    }

    pub fn read_from_stream<R: std::io::Read>(
        &self,
        pos: u64,
        reader: &mut R,
        n: usize,
        timeout: Timeout,
    ) -> BlobResult<usize> {
        let mut remaining = n;
        let mut offset = pos;
        let mut chunk = [0u8; 8192];
        let mut total = 0usize;
        while remaining > 0 {
            let want = remaining.min(chunk.len());
            let got = reader.read(&mut chunk[..want]).map_err(BlobError::Io)?;
            if got == 0 {
                break;
            }
            self.add_copy(offset, &chunk[..got], timeout)?;
            offset += got as u64;
            remaining -= got;
            total += got;
        }
        Ok(total)
    }

    pub fn write_to_stream<W: std::io::Write>(
        &self,
        pos: u64,
        writer: &mut W,
        n: usize,
        timeout: Timeout,
    ) -> BlobResult<usize> {
        let mut remaining = n;
        let mut offset = pos;
        let mut total = 0usize;
        while remaining > 0 {
            let want = remaining.min(8192);
            let chunk = self.get_copy(offset, want, timeout)?;
            if chunk.is_empty() {
                break;
            }
            writer.write_all(&chunk).map_err(BlobError::Io)?;
            offset += chunk.len() as u64;
            remaining -= chunk.len();
            total += chunk.len();
        }
        Ok(total)
    }
}

/// Held while a caller wants a pinned view of a blob's contents; dropping
/// it unlocks the blob for swap-out/swap-in again.
pub struct BlobPtrGuard {
    blob: Arc<BlobInner>,
}

impl BlobPtrGuard {
    pub fn as_bytes(&self) -> Vec<u8> {
        let state = self.blob.state.lock();
        match &state.storage {
            Storage::Memory(buf) => buf.clone(),
            // `get_ptr` forces a swap-in and holds `storage_locked` for
            // the guard's whole lifetime, so swap-out can't move this
            // blob back to disk while a guard is outstanding.
            Storage::Disk { .. } => unreachable!("get_ptr always swaps the blob into memory first"),
        }
    }
}

impl Drop for BlobPtrGuard {
    fn drop(&mut self) {
        self.blob.state.lock().storage_locked = false;
    }
}

fn read_disk_range(file: &mut std::fs::File, pos: u64, len: usize) -> BlobResult<Vec<u8>> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(pos)).map_err(BlobError::Io)?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).map_err(BlobError::Io)?;
    Ok(buf)
}

fn write_disk_range(file: &mut std::fs::File, pos: u64, data: &[u8]) -> BlobResult<()> {
    use std::io::{Seek, SeekFrom, Write};
    file.seek(SeekFrom::Start(pos)).map_err(BlobError::Io)?;
    file.write_all(data).map_err(BlobError::Io)
}
