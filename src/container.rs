//! The public [`Container`] entity (§4.4, §4.5, §4.6).

use core::any::Any;
use core::any::TypeId;
use core::fmt::Debug;
use core::fmt::Formatter;
use core::fmt::Result as FmtResult;
use core::marker::PhantomData;
use core::ptr;

use crate::error::ContainerError;
use crate::family::Family;
use crate::family::next_id;
use crate::key::AnyKey;
use crate::key::Key;
use crate::params::DefaultParams;
use crate::params::MAX_LEVEL;
use crate::params::MINIMUM_ARRAY_SIZE;
use crate::params::Params;
use crate::params::ParamsExt;
use crate::params::compute_required_size;
use crate::slot::Boxed;
use crate::slot::SlotArray;
use crate::slot::StoredValue;
use crate::slot::boxed_from_raw;
use crate::sync::Arc;
use crate::sync::Mutex;
use crate::sync::atomic::AtomicPtr;
use crate::sync::atomic::AtomicU64;
use crate::sync::atomic::Ordering::AcqRel;
use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::Release;

/// A thread-safe, typed heterogeneous value container (§3).
///
/// `Container` is the entry point of this crate. A fresh lineage starts
/// from [`Container::new_root`]; [`Container::derive`] and
/// [`Container::sibling`] grow the lineage, and [`Container::request_key`]
/// mints the [`Key`]s used to address values.
///
/// # Examples
///
/// ```
/// use extholder::Container;
///
/// let root: Container = Container::new_root();
/// let key = root.request_key::<String>()?;
///
/// assert_eq!(root.set(&key, String::from("vegetals"))?, None);
/// assert_eq!(root.get(&key)?, Some(String::from("vegetals")));
/// # Ok::<(), extholder::ContainerError>(())
/// ```
pub struct Container<P = DefaultParams>
where
  P: Params,
{
  id: u64,
  family: Arc<Family>,
  level: u8,
  array: AtomicPtr<SlotArray>,
  resize_gen: AtomicU64,
  resize_lock: Mutex<()>,
  marker: PhantomData<fn() -> P>,
}

impl<P> Container<P>
where
  P: Params,
{
  /// Creates a fresh family root at level 0.
  #[must_use]
  pub fn new_root() -> Self {
    let id = next_id();
    let family = Arc::new(Family::new(id, P::EFFECTIVE_BUDGET));

    tracing::debug!(container_id = id, family_id = id, "new family root");

    Self {
      id,
      family,
      level: 0,
      array: AtomicPtr::new(ptr::null_mut()),
      resize_gen: AtomicU64::new(0),
      resize_lock: Mutex::new(()),
      marker: PhantomData,
    }
  }

  /// The id minted for this container (process-wide, monotonic).
  #[inline]
  #[must_use]
  pub const fn id(&self) -> u64 {
    self.id
  }

  /// The id of this container's family (the id of its family root).
  #[inline]
  #[must_use]
  pub fn family_id(&self) -> u64 {
    self.family.id
  }

  /// This container's derivation depth (0 = family root, max 7).
  #[inline]
  #[must_use]
  pub const fn level(&self) -> u8 {
    self.level
  }

  /// Checks that `key` may be used against this container (§4.3).
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::InvalidKey`] if the key was minted by a
  /// container that is not this container and is not one of its ancestors.
  pub fn validate_key<T>(&self, key: &Key<T>) -> Result<(), ContainerError>
  where
    T: Any,
  {
    // Guaranteed by construction for this generic entry point; kept as a
    // defensive runtime check since `Key` is a plain, inspectable value.
    // `set_erased` is where a real mismatch can actually occur, since it
    // takes a value whose type the compiler cannot check against the key.
    if key.type_id != TypeId::of::<T>() {
      return Err(ContainerError::TypeMismatch);
    }

    if key.minted_by == self.id || key.plausible_for(self.family.id, self.level) {
      Ok(())
    } else {
      Err(ContainerError::InvalidKey)
    }
  }

  /// Mints a fresh, family-scoped key for values of type `T` (§4.6).
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::KeyBudgetExceeded`] once the family has
  /// requested its 65,536th key.
  pub fn request_key<T>(&self) -> Result<Key<T>, ContainerError>
  where
    T: Any,
  {
    self.family.budget.try_reserve()?;
    let index = self.family.allocator.next(self.level);

    Ok(Key::new(self.family.id, self.level, index, self.id))
  }

  /// Reads the value addressed by `key`, if any (§4.4). Never blocks.
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::InvalidKey`] if `key` is not valid for this
  /// container.
  pub fn get<T>(&self, key: &Key<T>) -> Result<Option<T>, ContainerError>
  where
    T: Any + Clone,
  {
    self.validate_key(key)?;

    let array = self.array.load(Acquire);
    if array.is_null() {
      return Ok(None);
    }

    // SAFETY: a non-null array pointer is published via `Release` in
    // `ensure_capacity_locked`/`trim_to_size` and never freed while
    // reachable (see `SlotArray`'s docs on retirement-by-leak).
    let array: &SlotArray = unsafe { &*array };
    let index = usize::from(key.index());

    if index >= array.len() {
      return Ok(None);
    }

    Ok(array.slots()[index].load_clone::<T>())
  }

  /// Like [`Container::get`], but invokes `default_fn` on the calling
  /// thread (without memoizing it) when no value is present.
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::InvalidKey`] if `key` is not valid for this
  /// container.
  pub fn get_or_default<T>(
    &self,
    key: &Key<T>,
    default_fn: impl FnOnce() -> T,
  ) -> Result<T, ContainerError>
  where
    T: Any + Clone,
  {
    Ok(match self.get(key)? {
      Some(value) => value,
      None => default_fn(),
    })
  }

  /// Stores `value` at `key`, returning whatever was previously there
  /// (§4.5).
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::InvalidKey`] if `key` is not valid for this
  /// container.
  pub fn set<T>(&self, key: &Key<T>, value: T) -> Result<Option<T>, ContainerError>
  where
    T: Any + Clone + Send + Sync,
  {
    self.validate_key(key)?;
    let index = usize::from(key.index());

    let original = self.array.load(Acquire);
    if !original.is_null() {
      // SAFETY: see `get`.
      let array: &SlotArray = unsafe { &*original };

      if index < array.len() {
        let before = self.resize_gen.load(Acquire);

        if before & 1 == 0 {
          let (new_raw, old_value) = array.slots()[index].swap_in(value);
          let after = self.resize_gen.load(Acquire);

          if before == after {
            return Ok(old_value);
          }

          // A resize straddled this swap; repair under the mutex (§4.5).
          self.repair_slot(original, index, new_raw);
          return Ok(old_value);
        }
      }
    }

    let _guard = self.lock_for_resize();
    let array = self.ensure_capacity_locked(index);
    let (_, old_value) = array.slots()[index].swap_in(value);
    Ok(old_value)
  }

  /// Stores `value` at `key` only if no value is currently present,
  /// returning whether the store took effect (§4.5).
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::InvalidKey`] if `key` is not valid for this
  /// container.
  pub fn set_if_absent<T>(&self, key: &Key<T>, value: T) -> Result<bool, ContainerError>
  where
    T: Any + Clone + Send + Sync,
  {
    self.validate_key(key)?;
    let index = usize::from(key.index());

    let original = self.array.load(Acquire);
    if !original.is_null() {
      // SAFETY: see `get`.
      let array: &SlotArray = unsafe { &*original };

      if index < array.len() {
        let before = self.resize_gen.load(Acquire);

        if before & 1 == 0 {
          return match array.slots()[index].cas_in(value) {
            Err(_rejected) => Ok(false),
            Ok(new_raw) => {
              let after = self.resize_gen.load(Acquire);

              if before == after {
                Ok(true)
              } else {
                Ok(self.repair_cas(original, index, new_raw))
              }
            }
          };
        }
      }
    }

    let _guard = self.lock_for_resize();
    let array = self.ensure_capacity_locked(index);
    Ok(array.slots()[index].cas_in(value).is_ok())
  }

  /// Checks that `key` may be used against this container, without
  /// requiring the caller to name the value's type at the call site (§4.3).
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::InvalidKey`] if the key was minted by a
  /// container that is not this container and is not one of its ancestors.
  pub fn validate_any_key(&self, key: &AnyKey) -> Result<(), ContainerError> {
    if key.minted_by() == self.id || key.plausible_for(self.family.id, self.level) {
      Ok(())
    } else {
      Err(ContainerError::InvalidKey)
    }
  }

  /// Type-erased counterpart of [`Container::get`] (§4.4): the value's type
  /// is not named at the call site.
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::InvalidKey`] if `key` is not valid for this
  /// container.
  pub fn get_erased(
    &self,
    key: &AnyKey,
  ) -> Result<Option<Box<dyn StoredValue>>, ContainerError> {
    self.validate_any_key(key)?;

    let array = self.array.load(Acquire);
    if array.is_null() {
      return Ok(None);
    }

    // SAFETY: see `get`.
    let array: &SlotArray = unsafe { &*array };
    let index = usize::from(key.index());

    if index >= array.len() {
      return Ok(None);
    }

    Ok(array.slots()[index].clone_value().and_then(boxed_from_raw))
  }

  /// Type-erased counterpart of [`Container::set`] (§4.5): the value's
  /// runtime type is checked against `key`'s type witness at runtime,
  /// since the compiler cannot do it for a non-generic call (§4.3).
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::InvalidKey`] if `key` is not valid for this
  /// container, or [`ContainerError::TypeMismatch`] if `value`'s runtime
  /// type does not match `key`'s type witness.
  pub fn set_erased(
    &self,
    key: &AnyKey,
    value: Box<dyn StoredValue>,
  ) -> Result<Option<Box<dyn StoredValue>>, ContainerError> {
    self.validate_any_key(key)?;

    if (value.as_ref() as &dyn Any).type_id() != key.type_id() {
      return Err(ContainerError::TypeMismatch);
    }

    let index = usize::from(key.index());
    let raw: *mut Box<Boxed> = Box::into_raw(Box::new(value));

    let original = self.array.load(Acquire);
    if !original.is_null() {
      // SAFETY: see `get`.
      let array: &SlotArray = unsafe { &*original };

      if index < array.len() {
        let before = self.resize_gen.load(Acquire);

        if before & 1 == 0 {
          let old_raw = array.slots()[index].swap_raw(raw);
          let after = self.resize_gen.load(Acquire);
          let old_value = boxed_from_raw(old_raw);

          if before == after {
            return Ok(old_value);
          }

          self.repair_slot(original, index, raw);
          return Ok(old_value);
        }
      }
    }

    let _guard = self.lock_for_resize();
    let array = self.ensure_capacity_locked(index);
    let old_raw = array.slots()[index].swap_raw(raw);
    Ok(boxed_from_raw(old_raw))
  }

  /// Creates a child container one level deeper, sharing this container's
  /// family (§4.6).
  ///
  /// # Errors
  ///
  /// Returns [`ContainerError::DerivationDepthExceeded`] if this container
  /// is already at level 7.
  pub fn derive(&self, copy_values: bool) -> Result<Self, ContainerError> {
    if self.level >= MAX_LEVEL {
      return Err(ContainerError::DerivationDepthExceeded);
    }

    let id = next_id();
    let child = Self {
      id,
      family: Arc::clone(&self.family),
      level: self.level + 1,
      array: AtomicPtr::new(ptr::null_mut()),
      resize_gen: AtomicU64::new(0),
      resize_lock: Mutex::new(()),
      marker: PhantomData,
    };

    if copy_values {
      child.clone_slots_from(self);
    }

    tracing::debug!(
      parent = self.id,
      child = child.id,
      family_id = child.family.id,
      level = child.level,
      "derived container"
    );

    Ok(child)
  }

  /// Creates a sibling container at the same level (§4.6). A sibling of a
  /// family root starts a fresh family; any other sibling shares its
  /// originator's family.
  #[must_use]
  pub fn sibling(&self, copy_values: bool) -> Self {
    let (family, id) = if self.level == 0 {
      let id = next_id();
      (Arc::new(Family::new(id, P::EFFECTIVE_BUDGET)), id)
    } else {
      (Arc::clone(&self.family), next_id())
    };

    let sibling = Self {
      id,
      family,
      level: self.level,
      array: AtomicPtr::new(ptr::null_mut()),
      resize_gen: AtomicU64::new(0),
      resize_lock: Mutex::new(()),
      marker: PhantomData,
    };

    if copy_values {
      sibling.clone_slots_from(self);
    }

    tracing::debug!(
      origin = self.id,
      sibling = sibling.id,
      family_id = sibling.family.id,
      level = sibling.level,
      "created sibling container"
    );

    sibling
  }

  /// Reallocates this container's slot array to exactly the family's
  /// current high-water mark at this level (§4.6). Callers must not mint
  /// new keys concurrently; doing so is safe but may waste a later resize.
  ///
  /// # Errors
  ///
  /// Never fails; the `Result` is kept for symmetry with the other
  /// lifecycle operations and to leave room for future validation.
  pub fn trim_to_size(&self) -> Result<(), ContainerError> {
    let _guard = self.lock_for_resize();

    self.resize_gen.fetch_add(1, AcqRel);

    let new_len = usize::from(self.family.allocator.read(self.level));
    let new_array = SlotArray::new(new_len);
    let current = self.array.load(Acquire);

    if !current.is_null() {
      // SAFETY: see `get`.
      let current_ref: &SlotArray = unsafe { &*current };
      let limit = current_ref.len().min(new_len);

      for i in 0..limit {
        let raw = current_ref.slots()[i].take_raw();
        if !raw.is_null() {
          new_array.slots()[i].put_raw(raw);
        }
      }
    }

    let new_ptr = Box::into_raw(Box::new(new_array));
    self.array.store(new_ptr, Release);
    self.resize_gen.fetch_add(1, AcqRel);

    tracing::debug!(container_id = self.id, new_len, "trimmed slot array");

    Ok(())
  }

  fn lock_for_resize(&self) -> crate::sync::MutexGuard<'_, ()> {
    crate::sync::lock(&self.resize_lock)
  }

  /// Grows the slot array (under `resize_lock`) so that `required_index`
  /// is in bounds, moving existing contents rather than cloning them.
  fn ensure_capacity_locked(&self, required_index: usize) -> &SlotArray {
    let current = self.array.load(Acquire);

    if !current.is_null() {
      // SAFETY: see `get`.
      let current_ref: &SlotArray = unsafe { &*current };
      if required_index < current_ref.len() {
        return current_ref;
      }
    }

    let minimum = compute_required_size(required_index).max(MINIMUM_ARRAY_SIZE);
    let old_len = if current.is_null() {
      0
    } else {
      // SAFETY: see `get`.
      unsafe { &*current }.len()
    };
    let new_len = minimum.max(old_len);

    self.resize_gen.fetch_add(1, AcqRel);

    let new_array = SlotArray::new(new_len);

    if !current.is_null() {
      // SAFETY: see `get`.
      let current_ref: &SlotArray = unsafe { &*current };
      for i in 0..current_ref.len() {
        let raw = current_ref.slots()[i].take_raw();
        if !raw.is_null() {
          new_array.slots()[i].put_raw(raw);
        }
      }
    }

    let new_ptr = Box::into_raw(Box::new(new_array));
    // The superseded `current` array (now holding only empty slots) is
    // intentionally never freed: readers may still hold a stale copy of
    // the pointer we are about to replace, and this crate has no epoch
    // tracking to tell when the last of them is gone.
    self.array.store(new_ptr, Release);
    self.resize_gen.fetch_add(1, AcqRel);

    // SAFETY: just published above.
    unsafe { &*new_ptr }
  }

  /// Repairs a `set` fast-path write that raced a concurrent grow/trim.
  fn repair_slot(&self, original: *mut SlotArray, index: usize, new_raw: *mut Box<Boxed>) {
    let _guard = self.lock_for_resize();
    let current = self.array.load(Acquire);

    if ptr::eq(current, original) {
      return;
    }

    // SAFETY: `original` is never deallocated once published (see
    // `ensure_capacity_locked`), so it is always safe to dereference.
    let original_ref: &SlotArray = unsafe { &*original };
    let reclaimed = original_ref.slots()[index].take_raw();

    if reclaimed.is_null() {
      // The grower already relocated our write into the current array.
      return;
    }

    debug_assert!(
      ptr::eq(reclaimed, new_raw),
      "no other writer should occupy this slot in a retired array"
    );

    // SAFETY: `current` was published via `Release` and is never freed
    // while this container is alive.
    let current_ref: &SlotArray = unsafe { &*current };
    let displaced = current_ref.slots()[index].swap_raw(reclaimed);

    if !displaced.is_null() {
      // The grower's snapshot should already carry our write once we
      // observe `current != original`; a non-null displaced value here
      // means a second writer raced the same repair and lost.
      drop(unsafe { Box::from_raw(displaced) });
    }
  }

  /// Repairs a `set_if_absent` fast-path CAS that raced a concurrent
  /// grow/trim, returning the final, corrected outcome.
  fn repair_cas(&self, original: *mut SlotArray, index: usize, new_raw: *mut Box<Boxed>) -> bool {
    let _guard = self.lock_for_resize();
    let current = self.array.load(Acquire);

    if ptr::eq(current, original) {
      return true;
    }

    // SAFETY: see `repair_slot`.
    let original_ref: &SlotArray = unsafe { &*original };
    let reclaimed = original_ref.slots()[index].take_raw();

    if reclaimed.is_null() {
      // Already relocated by the grower, so our conditional write is
      // already visible (or was never truly first) in `current`.
      return true;
    }

    debug_assert!(ptr::eq(reclaimed, new_raw));

    // SAFETY: see `repair_slot`.
    let current_ref: &SlotArray = unsafe { &*current };

    match current_ref.slots()[index].cas_raw_null(reclaimed) {
      Ok(()) => true,
      Err(()) => {
        // Something else now occupies the slot; our conditional write loses.
        drop(unsafe { Box::from_raw(reclaimed) });
        false
      }
    }
  }

  fn clone_slots_from(&self, source: &Self) {
    let source_ptr = source.array.load(Acquire);
    if source_ptr.is_null() {
      return;
    }

    // SAFETY: see `get`.
    let source_array: &SlotArray = unsafe { &*source_ptr };
    let new_array = SlotArray::new(source_array.len());

    for i in 0..source_array.len() {
      if let Some(raw) = source_array.slots()[i].clone_value() {
        new_array.slots()[i].put_raw(raw);
      }
    }

    let new_ptr = Box::into_raw(Box::new(new_array));
    self.array.store(new_ptr, Release);
  }
}

impl<P> Debug for Container<P>
where
  P: Params,
{
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    let array = self.array.load(Acquire);
    let len = if array.is_null() {
      0
    } else {
      // SAFETY: see `get`.
      unsafe { &*array }.len()
    };

    f.debug_struct("Container")
      .field("id", &self.id)
      .field("family_id", &self.family.id)
      .field("level", &self.level)
      .field("capacity", &len)
      .finish()
  }
}

impl Default for Container<DefaultParams> {
  fn default() -> Self {
    Self::new_root()
  }
}

impl<P> Drop for Container<P>
where
  P: Params,
{
  fn drop(&mut self) {
    let ptr = *self.array.get_mut();
    if !ptr.is_null() {
      // SAFETY: unique access via `&mut self`; `ptr` was published only by
      // this container and is not shared with any other container's
      // `array` field (siblings/derivations always snapshot-clone, never
      // alias a pointer).
      drop(unsafe { Box::from_raw(ptr) });
    }
  }
}
