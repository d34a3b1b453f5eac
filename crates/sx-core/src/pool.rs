//! Slot pool for reusable trading objects.
//!
//! Orders, positions and trades are created and released at a high rate. A
//! [`Pool`] keeps released objects for reuse and hands them out again after a
//! [`Poolable::reset`], so the steady state performs no allocation.
//!
//! Every object carries the small integer handle of the slot it belongs to.
//! The pool tracks which handles are checked out, so releasing an object twice
//! (or releasing an object the pool never issued) is reported as a
//! [`SxError::Pool`] instead of corrupting the free list.
//!
//! ```text
//!   acquire()                                release(obj)
//!   ┌─────────┐  pop   ┌──────────────┐  push  ┌─────────┐
//!   │ caller  │ <───── │  free list   │ <───── │ caller  │
//!   └─────────┘        └──────────────┘        └─────────┘
//!                      grows by `bucket` slots when empty
//! ```

use crate::error::{SxError, SxResult};

/// Default number of slots allocated at once when a pool runs dry.
pub const BUCKET_SIZE: usize = 100;

/// Objects that can live in a [`Pool`].
pub trait Poolable {
    /// Slot handle assigned by the pool, `None` for objects built outside it.
    fn slot(&self) -> Option<u32>;

    fn set_slot(&mut self, slot: Option<u32>);

    /// Return the object to its freshly-built state. The slot is preserved.
    fn reset(&mut self);
}

/// A growable pool of `T` addressed by slot handles.
pub struct Pool<T: Poolable> {
    label: &'static str,
    bucket: usize,
    free: Vec<T>,
    checked_out: Vec<bool>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: Poolable> Pool<T> {
    /// Create a pool and pre-allocate one bucket of objects.
    pub fn new(label: &'static str, bucket: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let mut pool = Self {
            label,
            bucket: bucket.max(1),
            free: Vec::new(),
            checked_out: Vec::new(),
            factory: Box::new(factory),
        };
        pool.grow();
        pool
    }

    fn grow(&mut self) {
        let base = self.checked_out.len();
        self.free.reserve(self.bucket);
        for i in 0..self.bucket {
            let mut obj = (self.factory)();
            obj.set_slot(Some((base + i) as u32));
            self.free.push(obj);
            self.checked_out.push(false);
        }
    }

    /// Take a zeroed object out of the pool, allocating a new bucket if needed.
    pub fn acquire(&mut self) -> T {
        if self.free.is_empty() {
            self.grow();
        }
        // grow() always leaves at least one free object
        let obj = self.free.pop().unwrap_or_else(|| (self.factory)());
        if let Some(slot) = obj.slot() {
            self.checked_out[slot as usize] = true;
        }
        obj
    }

    /// Give an object back. Fails on a double release or a foreign object.
    pub fn release(&mut self, mut obj: T) -> SxResult<()> {
        let Some(slot) = obj.slot() else {
            return Err(SxError::Pool(format!("{}: object was not issued by this pool", self.label)));
        };
        let Some(flag) = self.checked_out.get_mut(slot as usize) else {
            return Err(SxError::Pool(format!("{}: unknown slot {slot}", self.label)));
        };
        if !*flag {
            return Err(SxError::Pool(format!("{}: slot {slot} released twice", self.label)));
        }
        *flag = false;
        obj.reset();
        self.free.push(obj);
        Ok(())
    }

    /// Total number of slots ever allocated.
    pub fn capacity(&self) -> usize {
        self.checked_out.len()
    }

    /// Number of objects ready to be handed out.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of objects currently checked out.
    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone)]
    struct Dummy {
        slot: Option<u32>,
        value: i32,
    }

    impl Poolable for Dummy {
        fn slot(&self) -> Option<u32> {
            self.slot
        }
        fn set_slot(&mut self, slot: Option<u32>) {
            self.slot = slot;
        }
        fn reset(&mut self) {
            self.value = 0;
        }
    }

    #[test]
    fn pool_acquire_release_reuse() {
        let mut pool = Pool::new("dummy", 2, Dummy::default);
        assert_eq!(pool.capacity(), 2);
        let mut a = pool.acquire();
        a.value = 7;
        let slot = a.slot();
        pool.release(a).unwrap();
        let b = pool.acquire();
        assert_eq!(b.slot(), slot);
        assert_eq!(b.value, 0);
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn pool_grows_by_bucket() {
        let mut pool = Pool::new("dummy", 2, Dummy::default);
        let _a = pool.acquire();
        let _b = pool.acquire();
        let _c = pool.acquire();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn pool_double_free_detected() {
        let mut pool = Pool::new("dummy", 4, Dummy::default);
        let a = pool.acquire();
        let copy = a.clone();
        pool.release(a).unwrap();
        assert!(matches!(pool.release(copy), Err(SxError::Pool(_))));
    }

    #[test]
    fn pool_rejects_foreign_object() {
        let mut pool = Pool::new("dummy", 1, Dummy::default);
        assert!(pool.release(Dummy::default()).is_err());
        let stray = Dummy { slot: Some(99), value: 0 };
        assert!(pool.release(stray).is_err());
    }
}
