//! Bounded, weighted, persistent caches.
//!
//! A [`PersistentCache`] keeps entries in memory up to a maximum total
//! weight, evicting the least recently used first. Misses are computed
//! exactly once per key: concurrent callers for a key that is already being
//! loaded wait for that load instead of repeating it. Entries can be flushed
//! to `<dir>/<name>-v<version>.bin` and are reloaded on open when the version
//! matches; files of other versions are deleted.

pub mod codec;

use std::collections::HashSet;
use std::fs;
use std::hash::Hash;
use std::io::Write;
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{Error, Result};
pub use codec::{CacheCodec, Reader};

const MAGIC: &[u8; 8] = b"REVUCAC1";

/// Static description of a cache.
pub struct CacheDef<K, V> {
    pub name: &'static str,
    /// Bump to invalidate every persisted entry.
    pub version: u32,
    pub max_weight: u64,
    pub weigher: fn(&K, &V) -> u64,
}

impl<K, V> CacheDef<K, V> {
    /// Same definition with a different weight bound.
    #[must_use]
    pub const fn with_max_weight(mut self, max_weight: u64) -> Self {
        self.max_weight = max_weight;
        self
    }

    fn file_name(&self) -> String {
        format!("{}-v{}.bin", self.name, self.version)
    }
}

impl<K, V> Clone for CacheDef<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for CacheDef<K, V> {}

impl<K, V> std::fmt::Debug for CacheDef<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDef")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("max_weight", &self.max_weight)
            .finish_non_exhaustive()
    }
}

struct Slot<V> {
    value: V,
    weight: u64,
}

struct State<K, V> {
    /// Unbounded by count; [`State::insert`] bounds it by weight.
    entries: LruCache<K, Slot<V>>,
    loading: HashSet<K>,
    weight: u64,
    dirty: bool,
}

impl<K: Eq + Hash + Clone, V> State<K, V> {
    fn insert(&mut self, key: K, value: V, weight: u64, max_weight: u64) {
        if let Some(old) = self.entries.put(key, Slot { value, weight }) {
            self.weight -= old.weight;
        }
        self.weight += weight;
        self.dirty = true;

        while self.weight > max_weight {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.weight -= evicted.weight;
        }
    }
}

/// Weighted LRU cache with single-flight loading and optional persistence.
pub struct PersistentCache<K, V> {
    def: CacheDef<K, V>,
    path: Option<PathBuf>,
    state: Mutex<State<K, V>>,
    loaded: Condvar,
}

impl<K, V> PersistentCache<K, V>
where
    K: CacheCodec + Eq + Hash + Clone,
    V: CacheCodec + Clone,
{
    /// A cache that is never written to disk.
    #[must_use]
    pub fn in_memory(def: CacheDef<K, V>) -> Self {
        Self {
            def,
            path: None,
            state: Mutex::new(State {
                entries: LruCache::unbounded(),
                loading: HashSet::new(),
                weight: 0,
                dirty: false,
            }),
            loaded: Condvar::new(),
        }
    }

    /// Open a cache backed by `dir`, loading entries of the current version.
    ///
    /// A missing or unreadable file yields an empty cache.
    #[must_use]
    pub fn open(def: CacheDef<K, V>, dir: &Path) -> Self {
        let mut cache = Self::in_memory(def);
        let path = dir.join(def.file_name());
        prune_stale_versions(dir, def.name, &def.file_name());

        match fs::read(&path) {
            Ok(bytes) => match cache.decode_file(&bytes) {
                Ok(count) => debug!(cache = def.name, entries = count, "loaded persistent cache"),
                Err(e) => warn!(cache = def.name, error = %e, "discarding unreadable cache file"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(cache = def.name, error = %e, "failed to read cache file"),
        }
        cache.lock().dirty = false;
        cache.path = Some(path);
        cache
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock()
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.def.name
    }

    /// Return the cached value for `key`, computing it with `loader` on a
    /// miss. Concurrent misses on one key run `loader` once.
    ///
    /// A failed load stores nothing; the next caller loads again.
    ///
    /// # Errors
    /// Returns the loader's error.
    pub fn get_or_load<F>(&self, key: &K, loader: F) -> Result<V>
    where
        F: FnOnce(&K) -> Result<V>,
    {
        let mut state = self.lock();
        loop {
            if let Some(slot) = state.entries.get(key) {
                return Ok(slot.value.clone());
            }
            if !state.loading.contains(key) {
                break;
            }
            self.loaded.wait(&mut state);
        }
        state.loading.insert(key.clone());
        drop(state);

        let guard = LoadingGuard {
            cache: self,
            key: Some(key.clone()),
        };
        let value = loader(key)?;
        let weight = (self.def.weigher)(key, &value);
        self.lock()
            .insert(key.clone(), value.clone(), weight, self.def.max_weight);
        drop(guard);
        Ok(value)
    }

    /// Cached value without computing on a miss.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<V> {
        self.lock().entries.get(key).map(|slot| slot.value.clone())
    }

    /// Store a value directly.
    pub fn put(&self, key: K, value: V) {
        let weight = (self.def.weigher)(&key, &value);
        self.lock().insert(key, value, weight, self.def.max_weight);
    }

    /// Drop one entry.
    pub fn invalidate(&self, key: &K) {
        let mut state = self.lock();
        if let Some(slot) = state.entries.pop(key) {
            state.weight -= slot.weight;
            state.dirty = true;
        }
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.weight = 0;
        state.dirty = true;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total weight of resident entries.
    #[must_use]
    pub fn weight(&self) -> u64 {
        self.lock().weight
    }

    /// Write resident entries to disk if anything changed since the last
    /// load or flush. A no-op for in-memory caches.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            self.encode_file(&state)
        };

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        debug!(cache = self.def.name, bytes = bytes.len(), "flushed persistent cache");
        Ok(())
    }

    fn encode_file(&self, state: &State<K, V>) -> Vec<u8> {
        let count = state.entries.len();
        let mut out = Vec::with_capacity(16 + count * 64);
        out.extend_from_slice(MAGIC);
        codec::put_u32(&mut out, self.def.version);
        codec::put_u32(&mut out, u32::try_from(count).unwrap_or(u32::MAX));
        // Oldest first so that reloading preserves recency order.
        for (key, slot) in state.entries.iter().rev() {
            key.encode(&mut out);
            slot.value.encode(&mut out);
        }
        out
    }

    fn decode_file(&self, bytes: &[u8]) -> Result<usize> {
        let mut reader = Reader::new(bytes);
        let mut magic = [0u8; 8];
        for b in &mut magic {
            *b = reader.u8()?;
        }
        if &magic != MAGIC {
            return Err(Error::CacheCodec("bad magic".into()));
        }
        let version = reader.u32()?;
        if version != self.def.version {
            return Err(Error::CacheCodec(format!(
                "version {version} does not match {}",
                self.def.version
            )));
        }
        let count = reader.u32()? as usize;
        let mut decoded = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let key = K::decode(&mut reader)?;
            let value = V::decode(&mut reader)?;
            decoded.push((key, value));
        }
        reader.finish()?;

        let mut state = self.lock();
        for (key, value) in decoded {
            let weight = (self.def.weigher)(&key, &value);
            state.insert(key, value, weight, self.def.max_weight);
        }
        Ok(state.entries.len())
    }
}

impl<K, V> std::fmt::Debug for PersistentCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("def", &self.def)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight marker when the loader returns, fails or panics.
struct LoadingGuard<'a, K, V>
where
    K: CacheCodec + Eq + Hash + Clone,
    V: CacheCodec + Clone,
{
    cache: &'a PersistentCache<K, V>,
    key: Option<K>,
}

impl<K, V> Drop for LoadingGuard<'_, K, V>
where
    K: CacheCodec + Eq + Hash + Clone,
    V: CacheCodec + Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.lock().loading.remove(&key);
            self.cache.loaded.notify_all();
        }
    }
}

fn prune_stale_versions(dir: &Path, name: &str, current: &str) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let prefix = format!("{name}-v");
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with(&prefix)
            && file_name.ends_with(".bin")
            && file_name != current
        {
            match fs::remove_file(entry.path()) {
                Ok(()) => debug!(file = file_name, "removed stale cache file"),
                Err(e) => warn!(file = file_name, error = %e, "failed to remove stale cache file"),
            }
        }
    }
}
