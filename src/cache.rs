// Copyright 2026 The kvikk authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Thread-safe LRU cache of loaded content modules.
//!
//! Two-level locking: an outer reader/writer lock guards the list topology
//! (head, links, aggregate size) while each entry carries its own
//! reader/writer lock around the access timestamp. Lookups share the outer
//! lock; insertion and eviction take it exclusively. Entry locks are only
//! ever taken while at least a read hold on the outer lock is in place, so
//! an exclusive hold on the outer lock implies no entry lock is held. That
//! exclusivity is what lets eviction unlink a victim without racing an
//! in-flight reader.
//!
//! Recency is approximated with wall-clock timestamps at microsecond
//! resolution: refreshed on every hit, smallest `(secs, usecs)` evicted
//! first. Under concurrent access two hits may land in the same microsecond,
//! so this is an approximation of LRU rather than a strict one.
//!
//! Entries live in a slab arena; `prev`/`next` are slot indices rather than
//! pointers, with the most recently inserted entry at the head.

use std::io;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use slab::Slab;

/// Called with the evicted value after the entry is unlinked.
pub type EvictCallback<V> = Box<dyn FnOnce(V) + Send + Sync>;

/// Wall-clock instant at microsecond resolution.
///
/// Field order gives the derived ordering the eviction rule wants: compare
/// whole seconds first, microseconds break the tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    secs: u64,
    usecs: u32,
}

impl Timestamp {
    fn now() -> io::Result<Self> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Self {
            secs: elapsed.as_secs(),
            usecs: elapsed.subsec_micros(),
        })
    }
}

struct Entry<V> {
    key: String,
    value: V,
    size: u64,
    stamp: RwLock<Timestamp>,
    on_evict: Option<EvictCallback<V>>,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<V> {
    slots: Slab<Entry<V>>,
    head: Option<usize>,
    total_size: u64,
}

impl<V> Inner<V> {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let entry = &self.slots[idx];
            (entry.prev, entry.next)
        };
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.slots[n].prev = prev;
        }
    }

    /// Evicts the entry with the oldest timestamp. Returns `false` when
    /// there is nothing to evict.
    fn evict_lru(&mut self) -> bool {
        let mut victim: Option<(usize, Timestamp)> = None;
        let mut cur = self.head;
        while let Some(idx) = cur {
            let entry = &self.slots[idx];
            let stamp = *entry.stamp.read().expect("cache entry lock poisoned");
            // On an exact tie the entry further from the head loses: it is
            // the older insertion.
            match victim {
                Some((_, oldest)) if stamp > oldest => {}
                _ => victim = Some((idx, stamp)),
            }
            cur = entry.next;
        }
        let Some((idx, _)) = victim else {
            return false;
        };
        self.unlink(idx);
        let entry = self.slots.remove(idx);
        self.total_size -= entry.size;
        debug!("evicted {}", entry.key);
        if let Some(callback) = entry.on_evict {
            callback(entry.value);
        }
        true
    }
}

/// Bounded LRU cache keyed by module path, capacity counted in bytes of
/// backing file size.
pub struct ModuleCache<V> {
    inner: RwLock<Inner<V>>,
    capacity: u64,
}

impl<V> std::fmt::Debug for ModuleCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<V> ModuleCache<V> {
    /// Creates an empty cache holding at most `capacity` aggregate bytes.
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                slots: Slab::new(),
                head: None,
                total_size: 0,
            }),
            capacity,
        }
    }

    /// Returns the cached value for `key` and refreshes its timestamp.
    ///
    /// Multiple lookups proceed in parallel under the shared outer hold;
    /// the timestamp update takes the entry's own write lock. The value is
    /// returned by clone, so no eviction can release it out from under the
    /// caller. A failed clock read aborts the timestamp update but still
    /// returns the hit.
    pub fn lookup(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let inner = self.inner.read().expect("cache lock poisoned");
        let mut cur = inner.head;
        while let Some(idx) = cur {
            let entry = &inner.slots[idx];
            if entry.key == key {
                match Timestamp::now() {
                    Ok(now) => *entry.stamp.write().expect("cache entry lock poisoned") = now,
                    Err(e) => warn!("clock read failed, keeping stale timestamp: {e}"),
                }
                return Some(entry.value.clone());
            }
            cur = entry.next;
        }
        None
    }

    /// Inserts `value` at the head, evicting least-recently-used entries
    /// until it fits.
    ///
    /// An item larger than the whole capacity is rejected up front, with the
    /// cache left untouched; the value is handed back so the caller can
    /// still serve (and then release) it.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: V,
        size: u64,
        on_evict: Option<EvictCallback<V>>,
    ) -> Result<(), V> {
        if size > self.capacity {
            return Err(value);
        }
        let mut inner = self.inner.write().expect("cache lock poisoned");
        while inner.total_size + size > self.capacity {
            if inner.total_size == 0 || !inner.evict_lru() {
                return Err(value);
            }
        }
        let stamp = match Timestamp::now() {
            Ok(stamp) => stamp,
            Err(e) => {
                warn!("clock read failed, not caching entry: {e}");
                return Err(value);
            }
        };
        let old_head = inner.head;
        let idx = inner.slots.insert(Entry {
            key: key.into(),
            value,
            size,
            stamp: RwLock::new(stamp),
            on_evict,
            prev: None,
            next: old_head,
        });
        if let Some(old) = old_head {
            inner.slots[old].prev = Some(idx);
        }
        inner.head = Some(idx);
        inner.total_size += size;
        Ok(())
    }

    /// Walks every entry under the exclusive outer hold, giving `f` mutable
    /// access to the value and its recorded size. No other operation can
    /// observe the cache while the walk runs.
    ///
    /// The aggregate size is re-derived afterwards; if resized entries push
    /// it past capacity, least-recently-used entries are evicted until it
    /// fits again.
    pub fn for_each_locked<F>(&self, mut f: F)
    where
        F: FnMut(&str, &mut V, &mut u64),
    {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        let mut cur = inner.head;
        while let Some(idx) = cur {
            let entry = &mut inner.slots[idx];
            cur = entry.next;
            f(&entry.key, &mut entry.value, &mut entry.size);
        }
        let total: u64 = inner.slots.iter().map(|(_, e)| e.size).sum();
        inner.total_size = total;
        while inner.total_size > self.capacity {
            if !inner.evict_lru() {
                break;
            }
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.read().expect("cache lock poisoned").slots.len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate recorded size of all entries.
    pub fn total_size(&self) -> u64 {
        self.inner.read().expect("cache lock poisoned").total_size
    }

    /// Configured capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let inner = self.inner.read().expect("cache lock poisoned");
        let mut visited = 0usize;
        let mut sum = 0u64;
        let mut prev = None;
        let mut cur = inner.head;
        while let Some(idx) = cur {
            let entry = &inner.slots[idx];
            assert_eq!(entry.prev, prev, "backward link disagrees with forward walk");
            visited += 1;
            sum += entry.size;
            prev = Some(idx);
            cur = entry.next;
        }
        assert_eq!(visited, inner.slots.len(), "list does not cover the arena");
        assert_eq!(sum, inner.total_size, "aggregate size out of sync");
    }
}
