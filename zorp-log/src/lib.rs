//! Tag-prefixed, level-filtered logging.
//!
//! Each call site names a dotted tag (`core.error`, `http.request`) and a
//! numeric verbosity level. A log-spec string of `glob:level[,glob:level]*`
//! overrides the global verbosity per tag glob (see [`spec::LogSpec`]).
//! Because resolving a tag against the spec means walking a list of globs,
//! every lookup is cached: if the caller supplies a `tag -> index` mapping
//! function, the cache is a flat array indexed by that integer and shared
//! across threads; otherwise each thread keeps its own hashmap, refreshed
//! whenever the spec generation changes. [`Logger::on_thread_start`] and
//! [`Logger::on_thread_stop`] are meant to be wired into the thread pool's
//! lifecycle hooks so a thread's cache is freed when the thread exits.
//!
//! Every record is also emitted through `tracing`, so anything already
//! subscribed to this process's tracing output (test harnesses, `journald`
//! bridges) sees these log lines too, tagged as a `target`.

pub mod glob;
pub mod sink;
pub mod spec;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sink::{LogRecord, Sink, StderrSink};
use spec::LogSpec;

type TagMapFn = dyn Fn(&str) -> usize + Send + Sync;

pub struct Logger {
    spec: RwLock<LogSpec>,
    generation: AtomicU64,
    tag_map: RwLock<Option<Arc<TagMapFn>>>,
    array_cache: RwLock<Vec<AtomicU32>>,
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
}

thread_local! {
    static THREAD_CACHE: RefCell<(u64, HashMap<String, u32>)> = RefCell::new((0, HashMap::new()));
}

impl Logger {
    pub fn new(default_level: u32) -> Arc<Self> {
        Arc::new(Self {
            spec: RwLock::new(LogSpec::new(default_level)),
            generation: AtomicU64::new(1),
            tag_map: RwLock::new(None),
            array_cache: RwLock::new(Vec::new()),
            sinks: RwLock::new(vec![Arc::new(StderrSink) as Arc<dyn Sink>]),
        })
    }

    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        self.sinks.write().push(sink);
    }

    pub fn clear_sinks(&self) {
        self.sinks.write().clear();
    }

    /// Installs a `tag -> dense index` mapping function, switching the
    /// cache from the per-thread hashmap to a single shared array. The
    /// caller is responsible for choosing a mapping with a bounded range;
    /// `capacity` sizes the array accordingly.
    pub fn set_tag_map(&self, capacity: usize, map: impl Fn(&str) -> usize + Send + Sync + 'static) {
        *self.tag_map.write() = Some(Arc::new(map));
        let mut cache = self.array_cache.write();
        cache.clear();
        cache.resize_with(capacity, || AtomicU32::new(u32::MAX));
        self.bump_generation();
    }

    /// Replaces the active log spec, invalidating every cache (array and
    /// per-thread) so the next lookup re-resolves against the new rules.
    pub fn set_spec(&self, spec_str: &str) -> Result<(), String> {
        let default_level = self.spec.read().default_level();
        let spec = LogSpec::parse(spec_str, default_level)?;
        *self.spec.write() = spec;
        self.bump_generation();
        Ok(())
    }

    pub fn set_default_level(&self, level: u32) {
        self.spec.write().set_default_level(level);
        self.bump_generation();
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let cache = self.array_cache.read();
        for slot in cache.iter() {
            slot.store(u32::MAX, Ordering::Relaxed);
        }
    }

    fn effective_level(&self, tag: &str) -> u32 {
        if let Some(map) = self.tag_map.read().as_ref() {
            let idx = map(tag);
            let cache = self.array_cache.read();
            if let Some(slot) = cache.get(idx) {
                let cached = slot.load(Ordering::Relaxed);
                if cached != u32::MAX {
                    return cached;
                }
                let level = self.spec.read().resolve(tag);
                slot.store(level, Ordering::Relaxed);
                return level;
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        THREAD_CACHE.with(|cell| {
            let mut cache = cell.borrow_mut();
            if cache.0 != generation {
                cache.1.clear();
                cache.0 = generation;
            }
            if let Some(level) = cache.1.get(tag) {
                return *level;
            }
            let level = self.spec.read().resolve(tag);
            cache.1.insert(tag.to_string(), level);
            level
        })
    }

    /// True if `level` is enabled for `tag` under the current spec; check
    /// this before doing expensive formatting work for a log line that
    /// will be filtered out anyway.
    pub fn enabled(&self, tag: &str, level: u32) -> bool {
        level <= self.effective_level(tag)
    }

    pub fn log(&self, tag: &str, level: u32, message: std::fmt::Arguments<'_>) {
        if !self.enabled(tag, level) {
            return;
        }
        let message = message.to_string();
        tracing::event!(target: "zorp", tracing::Level::INFO, tag, level, "{message}");
        let record = LogRecord {
            tag,
            level,
            message: &message,
        };
        for sink in self.sinks.read().iter() {
            sink.emit(&record);
        }
    }

    /// Called when a worker thread starts, so its per-thread cache begins
    /// from the current generation rather than a stale default of `0`.
    pub fn on_thread_start(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        THREAD_CACHE.with(|cell| {
            let mut cache = cell.borrow_mut();
            cache.0 = generation;
            cache.1.clear();
        });
    }

    /// Called when a worker thread is about to exit, releasing its cache.
    pub fn on_thread_stop(&self) {
        THREAD_CACHE.with(|cell| cell.borrow_mut().1.clear());
    }
}

/// Logs through `$logger` at `$level` under `$tag`, formatting lazily so
/// disabled lines cost only the `enabled` check.
#[macro_export]
macro_rules! zlog {
    ($logger:expr, $tag:expr, $level:expr, $($arg:tt)*) => {
        if $logger.enabled($tag, $level) {
            $logger.log($tag, $level, format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_gates_messages() {
        let logger = Logger::new(2);
        assert!(logger.enabled("core.x", 2));
        assert!(!logger.enabled("core.x", 3));
    }

    #[test]
    fn spec_change_invalidates_cache() {
        let logger = Logger::new(0);
        assert!(!logger.enabled("core.error", 5));
        logger.set_spec("core.*:5").unwrap();
        assert!(logger.enabled("core.error", 5));
    }

    #[test]
    fn array_cache_via_tag_map_matches_hashmap_cache() {
        let logger = Logger::new(1);
        logger.set_spec("http.*:9").unwrap();
        logger.set_tag_map(4, |tag| if tag.starts_with("http") { 0 } else { 1 });
        assert!(logger.enabled("http.req", 9));
        assert!(!logger.enabled("core.x", 9));
    }

    #[test]
    fn thread_lifecycle_hooks_do_not_panic() {
        let logger = Logger::new(1);
        logger.on_thread_start();
        logger.on_thread_stop();
    }
}
