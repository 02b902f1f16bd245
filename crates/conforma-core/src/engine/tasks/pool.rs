use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

/// A checkout/release pool for expensive per-task mutable scratch (e.g. a
/// molecule copy handed to a refinement task).
///
/// Each item is exclusively owned by one in-flight task at a time. The lock
/// guards only checkout and release, never the work done with the item; size
/// the pool to the worker count so checkout rarely blocks.
pub struct ObjectPool<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> ObjectPool<T> {
    pub fn new(size: usize, mut factory: impl FnMut(usize) -> T) -> Self {
        let items = (0..size).map(&mut factory).collect();
        Self {
            items: Mutex::new(items),
            available: Condvar::new(),
        }
    }

    /// Takes an item, blocking until one is released if the pool is empty.
    pub fn checkout(&self) -> PoolGuard<'_, T> {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return PoolGuard {
                    pool: self,
                    item: Some(item),
                };
            }
            items = self.available.wait(items).unwrap();
        }
    }

    /// Takes an item only if one is immediately available.
    pub fn try_checkout(&self) -> Option<PoolGuard<'_, T>> {
        self.items.lock().unwrap().pop_front().map(|item| PoolGuard {
            pool: self,
            item: Some(item),
        })
    }

    fn release(&self, item: T) {
        self.items.lock().unwrap().push_back(item);
        self.available.notify_one();
    }
}

/// RAII handle to a checked-out item; dropping it returns the item to the
/// pool.
pub struct PoolGuard<'a, T> {
    pool: &'a ObjectPool<T>,
    item: Option<T>,
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pool item present until drop")
    }
}

impl<T> DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pool item present until drop")
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
