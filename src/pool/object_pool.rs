//! Generic bounded object pool
//!
//! Values are handed out inside a [`Pooled`] guard. Dropping the guard (or
//! passing it to [`ObjectPool::release`]) clears the value and returns it to
//! the free list, unless the free list is already at the pool's ceiling, in
//! which case the value is simply dropped.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A type whose instances can be cleared and handed out again
///
/// `reset` must leave the value indistinguishable from `Default::default()`
/// apart from retained capacity.
pub trait Reusable: Default + Send {
    fn reset(&mut self);
}

impl Reusable for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Reusable for String {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Counters for one pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Values created fresh, including warm-up
    pub allocations: u64,
    /// Acquisitions served from the free list
    pub reuses: u64,
    /// Released values dropped because the free list was full
    pub discards: u64,
    /// Values currently on the free list
    pub available: usize,
    /// Guards currently held by callers
    pub checked_out: u64,
}

struct Slot<T> {
    value: T,
    generation: u64,
}

struct PoolInner<T> {
    free: Mutex<Vec<Slot<T>>>,
    max_size: usize,
    allocations: AtomicU64,
    reuses: AtomicU64,
    discards: AtomicU64,
    checked_out: AtomicU64,
}

impl<T: Reusable> PoolInner<T> {
    fn put_back(&self, mut slot: Slot<T>) {
        slot.value.reset();

        let rejected = {
            let mut free = self.free.lock();
            if free.len() < self.max_size {
                free.push(slot);
                None
            } else {
                Some(slot)
            }
        };

        if rejected.is_some() {
            self.discards.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Bounded pool of reusable values
///
/// Cloning the pool yields another handle to the same free list.
///
/// # Example
///
/// ```
/// use log_pipeline::pool::ObjectPool;
///
/// let pool: ObjectPool<Vec<u8>> = ObjectPool::new(4, 1);
///
/// let mut buf = pool.acquire();
/// buf.extend_from_slice(b"payload");
/// pool.release(buf);
///
/// let buf = pool.acquire();
/// assert!(buf.is_empty());
/// assert_eq!(buf.generation(), 2);
/// assert_eq!(pool.stats().reuses, 2);
/// ```
pub struct ObjectPool<T: Reusable> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Reusable> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Reusable> ObjectPool<T> {
    /// Create a pool holding at most `max_size` idle values, prefilled with
    /// `initial_size` of them (capped at `max_size`)
    pub fn new(max_size: usize, initial_size: usize) -> Self {
        let warm = initial_size.min(max_size);
        let free: Vec<Slot<T>> = (0..warm)
            .map(|_| Slot {
                value: T::default(),
                generation: 0,
            })
            .collect();

        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                max_size,
                allocations: AtomicU64::new(warm as u64),
                reuses: AtomicU64::new(0),
                discards: AtomicU64::new(0),
                checked_out: AtomicU64::new(0),
            }),
        }
    }

    /// Take a cleared value, reusing an idle one when available
    pub fn acquire(&self) -> Pooled<T> {
        let reused = self.inner.free.lock().pop();

        let slot = match reused {
            Some(mut slot) => {
                slot.generation += 1;
                self.inner.reuses.fetch_add(1, Ordering::Relaxed);
                slot
            }
            None => {
                self.inner.allocations.fetch_add(1, Ordering::Relaxed);
                Slot {
                    value: T::default(),
                    generation: 0,
                }
            }
        };

        self.inner.checked_out.fetch_add(1, Ordering::Relaxed);
        Pooled {
            slot: Some(slot),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Return a value to its pool
    ///
    /// Equivalent to dropping the guard; spelled out for call sites that
    /// want the hand-back to be visible.
    pub fn release(&self, pooled: Pooled<T>) {
        drop(pooled);
    }

    /// Offer a detached value to the pool under the same ceiling rule
    pub fn recycle(&self, value: T) {
        self.inner.put_back(Slot {
            value,
            generation: 0,
        });
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.inner.allocations.load(Ordering::Relaxed),
            reuses: self.inner.reuses.load(Ordering::Relaxed),
            discards: self.inner.discards.load(Ordering::Relaxed),
            available: self.available(),
            checked_out: self.inner.checked_out.load(Ordering::Relaxed),
        }
    }
}

impl<T: Reusable> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("max_size", &self.inner.max_size)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A value checked out of an [`ObjectPool`]
///
/// While the guard lives, the value belongs to its holder alone; the pool
/// gets it back only when the guard is dropped.
pub struct Pooled<T: Reusable> {
    slot: Option<Slot<T>>,
    pool: Arc<PoolInner<T>>,
}

impl<T: Reusable> Pooled<T> {
    /// How many times this slot has been handed out before
    pub fn generation(&self) -> u64 {
        self.slot.as_ref().map_or(0, |slot| slot.generation)
    }

    /// Keep the value and cut it loose from the pool
    pub fn into_inner(mut self) -> T {
        self.pool.checked_out.fetch_sub(1, Ordering::Relaxed);
        match self.slot.take() {
            Some(slot) => slot.value,
            None => T::default(),
        }
    }
}

impl<T: Reusable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.slot {
            Some(ref slot) => &slot.value,
            None => unreachable!("slot is present until the guard is consumed"),
        }
    }
}

impl<T: Reusable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.slot {
            Some(ref mut slot) => &mut slot.value,
            None => unreachable!("slot is present until the guard is consumed"),
        }
    }
}

impl<T: Reusable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("generation", &self.generation())
            .field("value", &**self)
            .finish()
    }
}

impl<T: Reusable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.checked_out.fetch_sub(1, Ordering::Relaxed);
            self.pool.put_back(slot);
        }
    }
}
