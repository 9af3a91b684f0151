//! Bounded object pools for hot-path scratch structures.
//!
//! Items are cleared before they go back into a pool, and items whose
//! retained capacity exceeds the configured cap are dropped instead, so a
//! single oversized request cannot pin memory for the life of the process.

use crate::config::PoolConfig;
use crate::dataset::SeriesLookupKey;
use crossbeam::queue::ArrayQueue;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

/// Something that can be cleared and reused.
pub trait Poolable: Default + Send {
    fn reset(&mut self);
    /// Capacity kept alive by the item, in the item's natural unit.
    fn retained_size(&self) -> usize;
}

impl Poolable for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }

    fn retained_size(&self) -> usize {
        self.capacity()
    }
}

impl<K: Eq + Hash + Send, V: Send> Poolable for HashMap<K, V> {
    fn reset(&mut self) {
        self.clear();
    }

    fn retained_size(&self) -> usize {
        self.capacity()
    }
}

impl<K: Eq + Hash + Send> Poolable for HashSet<K> {
    fn reset(&mut self) {
        self.clear();
    }

    fn retained_size(&self) -> usize {
        self.capacity()
    }
}

/// A lock-free, fixed-capacity pool.
#[derive(Debug)]
pub struct Pool<T: Poolable> {
    idle: ArrayQueue<T>,
    max_retained: usize,
}

impl<T: Poolable> Pool<T> {
    pub fn new(capacity: usize, max_retained: usize) -> Self {
        Self {
            idle: ArrayQueue::new(capacity.max(1)),
            max_retained,
        }
    }

    /// Borrows an item; it returns to the pool when the guard drops.
    pub fn get(&self) -> Pooled<'_, T> {
        let item = self.idle.pop().unwrap_or_default();
        Pooled {
            item: Some(item),
            pool: self,
        }
    }

    /// Returns an item. Oversized items, or any item when the pool is full,
    /// are dropped.
    pub fn put(&self, mut item: T) {
        if item.retained_size() > self.max_retained {
            return;
        }
        item.reset();
        let _ = self.idle.push(item);
    }

    pub fn idle(&self) -> usize {
        self.idle.len()
    }
}

/// Guard handing out a pooled item.
pub struct Pooled<'a, T: Poolable> {
    item: Option<T>,
    pool: &'a Pool<T>,
}

impl<T: Poolable> Pooled<'_, T> {
    /// Detaches the item from the pool.
    pub fn take(mut self) -> T {
        self.item.take().unwrap_or_default()
    }
}

impl<T: Poolable> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `take` and `drop` empty the slot, and both consume the guard.
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T: Poolable> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item accessed after release"),
        }
    }
}

impl<T: Poolable> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put(item);
        }
    }
}

/// The process-wide pools used by marshal and merge.
#[derive(Debug)]
pub struct Pools {
    buffers: Pool<Vec<u8>>,
    lookup_maps: Pool<HashMap<SeriesLookupKey, usize>>,
    hash_sets: Pool<HashSet<SeriesLookupKey>>,
}

impl Pools {
    pub fn new(cfg: &PoolConfig) -> Self {
        Self {
            buffers: Pool::new(cfg.max_pooled, cfg.max_buffer_bytes),
            lookup_maps: Pool::new(cfg.max_pooled, cfg.max_map_entries),
            hash_sets: Pool::new(cfg.max_pooled, cfg.max_set_entries),
        }
    }

    pub fn buffer(&self) -> Pooled<'_, Vec<u8>> {
        self.buffers.get()
    }

    pub fn lookup_map(&self) -> Pooled<'_, HashMap<SeriesLookupKey, usize>> {
        self.lookup_maps.get()
    }

    pub fn hash_set(&self) -> Pooled<'_, HashSet<SeriesLookupKey>> {
        self.hash_sets.get()
    }
}

static POOLS: OnceLock<Pools> = OnceLock::new();

/// Installs the global pools. Returns `false` if they were already
/// initialized (explicitly or by first use), in which case `cfg` is ignored.
pub fn install(cfg: PoolConfig) -> bool {
    POOLS.set(Pools::new(&cfg)).is_ok()
}

/// The global pools, created with defaults on first use.
pub fn pools() -> &'static Pools {
    POOLS.get_or_init(|| Pools::new(&PoolConfig::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_are_cleared_before_reuse() {
        let pool: Pool<Vec<u8>> = Pool::new(4, 1024);
        {
            let mut buf = pool.get();
            buf.extend_from_slice(b"hello");
        }
        assert_eq!(pool.idle(), 1);
        let buf = pool.get();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 5);
    }

    #[test]
    fn oversized_items_are_discarded() {
        let pool: Pool<Vec<u8>> = Pool::new(4, 16);
        {
            let mut buf = pool.get();
            buf.resize(1024, 0);
        }
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn full_pool_drops_extras() {
        let pool: Pool<HashSet<SeriesLookupKey>> = Pool::new(1, 100);
        let a = pool.get();
        let b = pool.get();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn take_detaches_from_pool() {
        let pool: Pool<Vec<u8>> = Pool::new(2, 1024);
        let mut buf = pool.get();
        buf.push(1);
        let owned = buf.take();
        assert_eq!(owned, vec![1]);
        assert_eq!(pool.idle(), 0);
    }
}
