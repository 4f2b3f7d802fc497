//! Type-erased, resizable array of object slots with volatile
//! acquire/release semantics (§4.1).

use core::any::Any;
use core::any::TypeId;
use core::ptr;

use crate::sync::atomic::AtomicPtr;
use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::Release;

/// Erasure of a stored value that additionally knows how to clone itself
/// without the caller naming its concrete type.
///
/// `derive`/`sibling` with `copy_values = true` need to snapshot a
/// heterogeneous array of values without knowing any of their types; a
/// vtable that carries a clone entry point (the same trick as the
/// `dyn-clone` crate) is the only way to do that without requiring callers
/// to pass a type registry. Public so [`Container::get_erased`]/
/// [`Container::set_erased`] can name it, but sealed: only `T: Any + Clone +
/// Send + Sync` may ever implement it, the same way [`Params`] is sealed.
///
/// [`Container::get_erased`]: crate::container::Container::get_erased
/// [`Container::set_erased`]: crate::container::Container::set_erased
/// [`Params`]: crate::params::Params
pub trait StoredValue: Any + Send + Sync + sealed::Sealed {
  /// Clones the value behind this trait object.
  fn clone_boxed(&self) -> Box<dyn StoredValue>;
}

impl<T> StoredValue for T
where
  T: Any + Clone + Send + Sync,
{
  fn clone_boxed(&self) -> Box<dyn StoredValue> {
    Box::new(self.clone())
  }
}

mod sealed {
  pub trait Sealed {}
  impl<T> Sealed for T where T: super::Any + Clone + Send + Sync {}
}

pub(crate) type Boxed = dyn StoredValue;

/// Reconstructs a boxed value from a raw pointer produced by
/// `swap_in`/`cas_in`/`put_raw`/`swap_raw`/`Slot::clone_value`, without
/// needing to know the concrete type it was boxed as.
#[inline]
pub(crate) fn boxed_from_raw(raw: *mut Box<Boxed>) -> Option<Box<Boxed>> {
  if raw.is_null() {
    return None;
  }

  // SAFETY: `raw` was produced by `Box::into_raw` and this is the only call
  // that reconstructs it.
  Some(*unsafe { Box::from_raw(raw) })
}

/// One cell in a [`SlotArray`]. Holds a `*mut Box<dyn StoredValue>` behind
/// an `AtomicPtr`; the double indirection keeps the atomic pointer thin even
/// though the pointee (`Box<dyn StoredValue>`) is a fat-pointer value.
pub(crate) struct Slot {
  ptr: AtomicPtr<Box<Boxed>>,
}

impl Slot {
  #[inline]
  const fn empty() -> Self {
    Self {
      ptr: AtomicPtr::new(ptr::null_mut()),
    }
  }

  /// Volatile-acquire load, downcast, and clone. Returns `None` for an
  /// empty slot or a stored value whose type doesn't match `T`.
  pub(crate) fn load_clone<T>(&self) -> Option<T>
  where
    T: Any + Clone,
  {
    let raw = self.ptr.load(Acquire);
    if raw.is_null() {
      return None;
    }

    // SAFETY: a non-null slot pointer always targets a live `Box<dyn
    // StoredValue>` published by `swap_in`/`cas_in`/`put_raw` and never
    // freed while reachable from a live array (see `SlotArray`'s module
    // docs on array retirement).
    let stored: &Boxed = unsafe { &**raw };

    (stored as &dyn Any).downcast_ref::<T>().cloned()
  }

  /// Boxes `value` and atomically swaps it into this slot, returning the
  /// raw pointer that now occupies the slot (for resize repair) and the
  /// previously-stored value, if any and if it matches `T`.
  pub(crate) fn swap_in<T>(&self, value: T) -> (*mut Box<Boxed>, Option<T>)
  where
    T: Any + Clone + Send + Sync,
  {
    let new_raw: *mut Box<Boxed> = Box::into_raw(Box::new(Box::new(value) as Box<Boxed>));
    let old_raw = self.ptr.swap(new_raw, Release);
    (new_raw, Self::reclaim::<T>(old_raw))
  }

  /// Boxes `value` and attempts to install it only if the slot is
  /// currently empty. On failure the boxed value is dropped and the
  /// original `value` is handed back to the caller.
  pub(crate) fn cas_in<T>(&self, value: T) -> Result<*mut Box<Boxed>, T>
  where
    T: Any + Clone + Send + Sync,
  {
    let new_raw: *mut Box<Boxed> = Box::into_raw(Box::new(Box::new(value) as Box<Boxed>));

    match self
      .ptr
      .compare_exchange(ptr::null_mut(), new_raw, Release, Acquire)
    {
      Ok(_) => Ok(new_raw),
      Err(_) => {
        // SAFETY: `new_raw` was produced just above and never published.
        let stored = *unsafe { Box::from_raw(new_raw) };
        let value = (stored as Box<dyn Any>)
          .downcast::<T>()
          .unwrap_or_else(|_| unreachable!("value was boxed as T above"));

        Err(*value)
      }
    }
  }

  /// Atomically takes whatever this slot holds, leaving it empty.
  #[inline]
  pub(crate) fn take_raw(&self) -> *mut Box<Boxed> {
    self.ptr.swap(ptr::null_mut(), Acquire)
  }

  /// Atomically swaps `raw` into this slot, returning whatever was
  /// previously there.
  #[inline]
  pub(crate) fn swap_raw(&self, raw: *mut Box<Boxed>) -> *mut Box<Boxed> {
    self.ptr.swap(raw, Release)
  }

  /// Publishes `raw` into a slot known to be reachable by no other thread
  /// yet (array construction, growth, and snapshot copies).
  #[inline]
  pub(crate) fn put_raw(&self, raw: *mut Box<Boxed>) {
    self.ptr.store(raw, Release);
  }

  /// Installs `raw` only if this slot is currently empty.
  pub(crate) fn cas_raw_null(&self, raw: *mut Box<Boxed>) -> Result<(), ()> {
    self
      .ptr
      .compare_exchange(ptr::null_mut(), raw, Release, Acquire)
      .map(|_| ())
      .map_err(|_| ())
  }

  /// Produces an independent clone of whatever this slot holds, already
  /// boxed the way `swap_in`/`cas_in` box new values and ready for
  /// `Slot::put_raw`.
  pub(crate) fn clone_value(&self) -> Option<*mut Box<Boxed>> {
    let raw = self.ptr.load(Acquire);
    if raw.is_null() {
      return None;
    }

    // SAFETY: see `load_clone`.
    let stored: &Boxed = unsafe { &**raw };
    Some(Box::into_raw(Box::new(stored.clone_boxed())))
  }

  fn reclaim<T>(raw: *mut Box<Boxed>) -> Option<T>
  where
    T: Any,
  {
    if raw.is_null() {
      return None;
    }

    // SAFETY: `raw` was produced by `Box::into_raw` in `swap_in`/`cas_in`
    // and this is the only call that reconstructs it, exactly once.
    let stored = *unsafe { Box::from_raw(raw) };
    (stored as Box<dyn Any>).downcast::<T>().ok().map(|b| *b)
  }

  #[cfg(test)]
  fn type_id_of(&self) -> Option<TypeId> {
    let raw = self.ptr.load(Acquire);
    if raw.is_null() {
      return None;
    }

    // SAFETY: see `load_clone`.
    let stored: &Boxed = unsafe { &**raw };
    Some((stored as &dyn Any).type_id())
  }
}

impl Drop for Slot {
  fn drop(&mut self) {
    let raw = *self.ptr.get_mut();
    if !raw.is_null() {
      // SAFETY: unique access via `&mut self`; `raw` was produced by
      // `Box::into_raw` and is reachable from nowhere else.
      drop(unsafe { Box::from_raw(raw) });
    }
  }
}

/// A fixed-length, type-erased array of [`Slot`]s.
///
/// Arrays only ever grow (or get reallocated at the same or smaller length
/// by `trim_to_size`); a superseded array is never freed while any reader
/// might still hold a stale pointer to it (there is no epoch tracking in
/// this crate), so growth always *moves* slot contents into the new array
/// and leaves the old array's slots empty before abandoning it. The old,
/// now-empty array allocation itself is intentionally leaked rather than
/// freed, trading bounded memory growth for lock-free reads with no guard
/// API.
pub(crate) struct SlotArray {
  slots: Box<[Slot]>,
}

impl SlotArray {
  pub(crate) fn new(len: usize) -> Self {
    let slots = core::iter::repeat_with(Slot::empty)
      .take(len)
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self { slots }
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.slots.len()
  }

  #[inline]
  pub(crate) fn slots(&self) -> &[Slot] {
    &self.slots
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn swap_in_then_load_round_trips() {
    let slot = Slot::empty();

    let (_, previous) = slot.swap_in(String::from("a"));
    assert_eq!(previous, None);
    assert_eq!(slot.load_clone::<String>(), Some(String::from("a")));

    let (_, previous) = slot.swap_in(String::from("b"));
    assert_eq!(previous, Some(String::from("a")));
    assert_eq!(slot.load_clone::<String>(), Some(String::from("b")));
  }

  #[test]
  fn cas_in_only_succeeds_once() {
    let slot = Slot::empty();

    assert!(slot.cas_in(1_i32).is_ok());
    assert_eq!(slot.cas_in(2_i32), Err(2));
    assert_eq!(slot.load_clone::<i32>(), Some(1));
  }

  #[test]
  fn take_raw_empties_the_slot() {
    let slot = Slot::empty();
    slot.swap_in(42_i32);

    let raw = slot.take_raw();
    assert!(!raw.is_null());
    assert_eq!(slot.load_clone::<i32>(), None);

    // SAFETY: reclaim the value we just took, to avoid leaking it in the test.
    drop(unsafe { Box::from_raw(raw) });
  }

  #[test]
  fn clone_value_is_independent() {
    let slot = Slot::empty();
    slot.swap_in(String::from("shared"));

    let cloned_raw = slot.clone_value().expect("populated slot");
    let other = Slot::empty();
    other.put_raw(cloned_raw);

    slot.swap_in(String::from("changed"));

    assert_eq!(other.load_clone::<String>(), Some(String::from("shared")));
    assert_eq!(slot.load_clone::<String>(), Some(String::from("changed")));
  }

  #[test]
  fn slot_array_starts_empty() {
    let array = SlotArray::new(4);
    assert_eq!(array.len(), 4);

    for slot in array.slots() {
      assert!(slot.type_id_of().is_none());
    }
  }
}
