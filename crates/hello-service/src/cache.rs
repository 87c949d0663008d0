//! Key-value lookup caches.
//!
//! Every backend is prefilled with keys `"1"..="<size>"` mapping to
//! `"value-<key>"`. [`build`] returns the cache together with an optional
//! teardown, so callers never need to inspect a backend to know whether it
//! must be closed.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;

/// Cache construction errors.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The configured capacity was zero or too large to allocate.
    #[error("invalid cache size {0} (must be > 0 and addressable)")]
    InvalidSize(usize),

    /// The backend name is not recognised.
    #[error("unknown CACHE_IMPL {0:?} (supported: slice, map, lru)")]
    UnknownBackend(String),
}

/// Lookup contract consumed by the handlers.
pub trait Cache: Send + Sync + 'static {
    /// The value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Arc<str>>;

    /// Configured capacity, not live occupancy.
    fn size(&self) -> usize;
}

/// Releases resources held by a cache backend.
pub type Teardown = Box<dyn FnOnce() + Send>;

/// A constructed cache and its teardown, if the backend needs one.
pub struct CacheHandle {
    /// The cache, shared with request handlers.
    pub cache: Arc<dyn Cache>,
    /// Run once during shutdown, after the server stopped.
    pub teardown: Option<Teardown>,
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("size", &self.cache.size())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

impl CacheHandle {
    /// Runs the teardown, if any.
    pub fn close(self) {
        if let Some(teardown) = self.teardown {
            teardown();
        }
    }
}

/// Builds and prefills the backend named by `implementation`.
///
/// Supported backends:
/// - `slice` (or empty): a vector indexed by the numeric key
/// - `map`: a hash map
/// - `lru`: a bounded LRU behind a mutex; cleared on teardown
pub fn build(implementation: &str, size: usize) -> Result<CacheHandle, CacheError> {
    if size == 0 {
        return Err(CacheError::InvalidSize(size));
    }

    let handle = match implementation.trim().to_ascii_lowercase().as_str() {
        "" | "slice" => CacheHandle {
            cache: Arc::new(SliceCache::new(size).ok_or(CacheError::InvalidSize(size))?),
            teardown: None,
        },
        "map" => CacheHandle {
            cache: Arc::new(MapCache::new(size)),
            teardown: None,
        },
        "lru" => {
            let cache = Arc::new(LruBackedCache::new(size));
            let teardown = {
                let cache = Arc::clone(&cache);
                Box::new(move || cache.clear()) as Teardown
            };
            CacheHandle {
                cache,
                teardown: Some(teardown),
            }
        }
        other => return Err(CacheError::UnknownBackend(other.to_string())),
    };

    Ok(handle)
}

fn prefill(size: usize) -> impl Iterator<Item = (String, Arc<str>)> {
    (1..=size).rev().map(|i| {
        let key = i.to_string();
        let value: Arc<str> = Arc::from(format!("value-{key}"));
        (key, value)
    })
}

/// Values indexed by the numeric key. Index 0 is unused.
struct SliceCache {
    values: Vec<Option<Arc<str>>>,
}

impl SliceCache {
    /// `None` when `size + 1` slots cannot be addressed.
    fn new(size: usize) -> Option<Self> {
        let mut values = vec![None; size.checked_add(1)?];
        for (key, value) in prefill(size) {
            if let Some(slot) = key.parse::<usize>().ok().and_then(|i| values.get_mut(i)) {
                *slot = Some(value);
            }
        }
        Some(Self { values })
    }
}

impl Cache for SliceCache {
    fn get(&self, key: &str) -> Option<Arc<str>> {
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index: usize = key.parse().ok()?;
        self.values.get(index)?.clone()
    }

    fn size(&self) -> usize {
        self.values.len() - 1
    }
}

struct MapCache {
    size: usize,
    entries: HashMap<String, Arc<str>>,
}

impl MapCache {
    fn new(size: usize) -> Self {
        Self {
            size,
            entries: prefill(size).collect(),
        }
    }
}

impl Cache for MapCache {
    fn get(&self, key: &str) -> Option<Arc<str>> {
        self.entries.get(key).cloned()
    }

    fn size(&self) -> usize {
        self.size
    }
}

struct LruBackedCache {
    size: usize,
    entries: Mutex<LruCache<String, Arc<str>>>,
}

impl LruBackedCache {
    fn new(size: usize) -> Self {
        let capacity = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        let mut entries = LruCache::new(capacity);
        for (key, value) in prefill(size) {
            entries.put(key, value);
        }
        Self {
            size,
            entries: Mutex::new(entries),
        }
    }

    fn clear(&self) {
        let mut entries = self.entries.lock();
        tracing::debug!(entries = entries.len(), "Clearing LRU cache");
        entries.clear();
    }
}

impl Cache for LruBackedCache {
    fn get(&self, key: &str) -> Option<Arc<str>> {
        self.entries.lock().get(key).cloned()
    }

    fn size(&self) -> usize {
        self.size
    }
}
