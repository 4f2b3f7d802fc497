//! Indirection over `core`/`std` synchronization primitives so the whole
//! crate can be exercised under [`loom`]'s concurrency model checker.
//!
//! [`loom`]: https://docs.rs/loom

#[cfg(not(loom))]
pub(crate) mod atomic {
  pub(crate) use ::core::sync::atomic::AtomicU32;
  pub(crate) use ::core::sync::atomic::AtomicU64;
  pub(crate) use ::core::sync::atomic::AtomicPtr;
  pub(crate) use ::core::sync::atomic::Ordering;
}

#[cfg(loom)]
pub(crate) mod atomic {
  pub(crate) use ::loom::sync::atomic::AtomicU32;
  pub(crate) use ::loom::sync::atomic::AtomicU64;
  pub(crate) use ::loom::sync::atomic::AtomicPtr;
  pub(crate) use ::loom::sync::atomic::Ordering;
}

#[cfg(not(loom))]
pub(crate) use ::std::sync::Arc;
#[cfg(not(loom))]
pub(crate) use ::std::sync::Mutex;
#[cfg(not(loom))]
pub(crate) use ::std::sync::MutexGuard;

#[cfg(loom)]
pub(crate) use ::loom::sync::Arc;
#[cfg(loom)]
pub(crate) use ::loom::sync::Mutex;
#[cfg(loom)]
pub(crate) use ::loom::sync::MutexGuard;

/// Locks `mutex`, clearing poison under `std` (a poisoned lock here only
/// means some earlier holder panicked mid-resize; the array pointer itself
/// is always left in a consistent state by a single atomic store, so
/// continuing is safe). `loom`'s `Mutex` has no poisoning and returns the
/// guard directly.
#[cfg(not(loom))]
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(::std::sync::PoisonError::into_inner)
}

#[cfg(loom)]
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock()
}
