//! A memory-plus-disk hybrid store for arbitrary-sized payloads.
//!
//! A [`BlobSystem`] owns a background manager thread that arbitrates
//! allocation across every [`Blob`] created from it: small or
//! frequently-used payloads stay resident in memory; larger ones spill to
//! a temp file under pressure and are transparently fetched back once
//! room frees up. Allocation blocks the calling thread (bounded by a
//! [`Timeout`]) rather than failing outright, and unblocks waiters in
//! FIFO order.

mod blob;
mod error;
mod system;
mod timeout;

pub use blob::{Blob, BlobPtrGuard};
pub use error::{BlobError, BlobResult};
pub use system::{BlobSystem, BlobSystemConfig};
pub use timeout::Timeout;

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn config(dir: &std::path::Path, mem_max: u64, disk_max: u64, lowat: u64, hiwat: u64) -> BlobSystemConfig {
        BlobSystemConfig {
            tmp_dir: dir.to_path_buf(),
            mem_max,
            disk_max,
            lowat,
            hiwat,
            noswap_max: 0,
        }
    }

    fn free(blob: &Blob) {
        blob.alloc(-(blob.alloc_size() as i64), Timeout::Millis(2000)).unwrap();
    }

    #[test]
    fn alloc_and_copy_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let system = BlobSystem::new(config(dir.path(), 100_000, 100_000, 1000, 2000)).unwrap();
        let blob = system.create_blob(64, Timeout::Millis(1000)).unwrap();
        blob.add_copy(0, b"hello world", Timeout::Millis(1000)).unwrap();
        let out = blob.get_copy(0, 11, Timeout::Millis(1000)).unwrap();
        assert_eq!(out, b"hello world");
    }

    // The spec's literal scenario 3/4 numbers (mem_max=10000) leave enough
    // headroom under `check_alloc`'s `delta <= mem_free` rule that three
    // 2000-byte blobs all fit in memory, never forcing the third to disk.
    // Reproducing the described spill needs a mem_max tight enough to
    // actually bind; see the grounding ledger for why this departs from
    // the literal figure.
    #[test]
    fn scenario_swap_in_on_low_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let system = BlobSystem::new(config(dir.path(), 4000, 100_000, 1000, 2000)).unwrap();

        let b0 = system.create_blob(2000, Timeout::Millis(2000)).unwrap();
        let b1 = system.create_blob(2000, Timeout::Millis(2000)).unwrap();
        let b2 = system.create_blob(2000, Timeout::Millis(2000)).unwrap();
        assert!(!b0.is_in_file());
        assert!(!b1.is_in_file());
        assert!(b2.is_in_file());

        free(&b0);
        thread::sleep(Duration::from_millis(50));
        assert!(b2.is_in_file(), "still above lowat, no swap-in expected yet");

        free(&b1);
        thread::sleep(Duration::from_millis(200));
        assert!(!b2.is_in_file(), "below lowat and at/above hiwat should trigger swap-in");
    }

    #[test]
    fn scenario_fetch_in_blocked_by_storage_lock() {
        let dir = tempfile::tempdir().unwrap();
        let system = BlobSystem::new(config(dir.path(), 4000, 100_000, 1000, 2000)).unwrap();

        let b0 = system.create_blob(2000, Timeout::Millis(2000)).unwrap();
        let b1 = system.create_blob(2000, Timeout::Millis(2000)).unwrap();
        let b2 = system.create_blob(2000, Timeout::Millis(2000)).unwrap();
        assert!(b2.is_in_file());

        let path = b2.get_file(Timeout::Millis(2000)).unwrap();
        assert!(path.exists());
        b2.storage_lock(true);

        free(&b0);
        free(&b1);
        thread::sleep(Duration::from_millis(200));
        assert!(b2.is_in_file(), "storage-locked blob must not be swapped in");
    }

    // Same departure as above: binding mem_max/disk_max tightly enough
    // that both 4000-byte requests genuinely queue, rather than the first
    // fitting into comfortable headroom under the literal mem_max=10000.
    #[test]
    fn scenario_deferred_allocation_is_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let system = BlobSystem::new(config(dir.path(), 7000, 10_000, 1000, 2000)).unwrap();

        let b0 = system.create_blob(4500, Timeout::Millis(2000)).unwrap();
        let b1 = system.create_blob(9500, Timeout::Millis(2000)).unwrap();
        assert!(!b0.is_in_file());
        assert!(b1.is_in_file());

        let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sys_a = system.clone();
        let sys_b = system.clone();
        let order_a = order.clone();
        let order_b = order.clone();

        let ta = thread::spawn(move || {
            let blob = sys_a.create_blob(4000, Timeout::Millis(5000)).unwrap();
            order_a.lock().push(1);
            blob
        });
        thread::sleep(Duration::from_millis(100));
        let tb = thread::spawn(move || {
            let blob = sys_b.create_blob(4000, Timeout::Millis(5000)).unwrap();
            order_b.lock().push(2);
            blob
        });
        thread::sleep(Duration::from_millis(100));
        assert!(order.lock().is_empty(), "both requests should still be queued");

        free(&b0);
        let _blob_a = ta.join().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*order.lock(), vec![1], "only the earlier enqueued request unblocks");

        free(&b1);
        let _blob_b = tb.join().unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
    }
}
