//! Family-shared slot index allocation.
//!
//! An [`IndexAllocator`] hands out dense, monotonically increasing slot
//! indices. Because a Key minted at level `L` must remain valid (and
//! unique) at every descendant level, requesting an index at level `L`
//! advances the counters for level `L` *and every deeper level* in one
//! atomic step. See §4.2 for the packed-counter rationale.

use crate::error::ContainerError;
use crate::params::MAX_LEVEL;
use crate::sync::atomic::AtomicU32;
use crate::sync::atomic::AtomicU64;
use crate::sync::atomic::Ordering::AcqRel;
use crate::sync::atomic::Ordering::Acquire;
use crate::sync::atomic::Ordering::Relaxed;

const LANES_PER_WORD: u8 = 4;
const LANE_BITS: u32 = 16;
const LANE_MASK: u64 = 0xFFFF;

/// One 64-bit word holding four packed 16-bit counters, one per level.
#[inline]
const fn mask_from(first_lane: u8) -> u64 {
  let mut mask: u64 = 0;
  let mut lane: u8 = 0;

  while lane < LANES_PER_WORD {
    if lane >= first_lane {
      mask |= LANE_MASK << (lane as u32 * LANE_BITS);
    }

    lane += 1;
  }

  mask
}

const FULL_WORD_MASK: u64 = mask_from(0);

#[inline]
const fn extract_lane(word: u64, lane: u8) -> u16 {
  ((word >> (lane as u32 * LANE_BITS)) & LANE_MASK) as u16
}

/// Family-shared source of dense slot indices, parameterized by level.
///
/// Two 64-bit words are used instead of per-level atomics so that minting a
/// Key at level `L` can reserve that index at every deeper level with a
/// single atomic `fetch_add` per word, rather than `8 - L` separate
/// read-modify-write operations.
#[derive(Debug)]
pub(crate) struct IndexAllocator {
  /// Packed counters for levels 0..=3.
  low: AtomicU64,
  /// Packed counters for levels 4..=7.
  high: AtomicU64,
}

impl IndexAllocator {
  #[inline]
  pub(crate) const fn new() -> Self {
    Self {
      low: AtomicU64::new(0),
      high: AtomicU64::new(0),
    }
  }

  /// Returns the current value of the level-`L` counter, then increments
  /// every counter at level `L..=7`.
  #[inline]
  pub(crate) fn next(&self, level: u8) -> u16 {
    debug_assert!(level <= MAX_LEVEL, "level out of range");

    if level < LANES_PER_WORD {
      let delta: u64 = mask_from(level);
      let previous: u64 = self.low.fetch_add(delta, AcqRel);

      // Every high-lane level is deeper than any low-lane level, so it is
      // always reserved too.
      self.high.fetch_add(FULL_WORD_MASK, AcqRel);

      extract_lane(previous, level)
    } else {
      let lane: u8 = level - LANES_PER_WORD;
      let delta: u64 = mask_from(lane);
      let previous: u64 = self.high.fetch_add(delta, AcqRel);

      extract_lane(previous, lane)
    }
  }

  /// Snapshots the counter at level `L`, for [`Container::trim_to_size`].
  ///
  /// [`Container::trim_to_size`]: crate::container::Container::trim_to_size
  #[inline]
  pub(crate) fn read(&self, level: u8) -> u16 {
    debug_assert!(level <= MAX_LEVEL, "level out of range");

    if level < LANES_PER_WORD {
      extract_lane(self.low.load(Acquire), level)
    } else {
      extract_lane(self.high.load(Acquire), level - LANES_PER_WORD)
    }
  }
}

/// Family-wide cap on the number of keys ever requested, enforced before the
/// [`IndexAllocator`] is advanced.
#[derive(Debug)]
pub(crate) struct KeyBudget {
  requested: AtomicU32,
  cap: u32,
}

impl KeyBudget {
  #[inline]
  pub(crate) const fn new(cap: u32) -> Self {
    Self {
      requested: AtomicU32::new(0),
      cap,
    }
  }

  /// Atomically reserves one key against the budget.
  ///
  /// With a cap of `N`, the `N`-th request (1-indexed) is the one rejected:
  /// `N - 1` requests succeed first. A cap of 65,536 therefore allows
  /// 65,535 successful mints and rejects the 65,536th, per the reference
  /// behavior.
  #[inline]
  pub(crate) fn try_reserve(&self) -> Result<(), ContainerError> {
    let mut current: u32 = self.requested.load(Relaxed);

    loop {
      if current >= self.cap.saturating_sub(1) {
        return Err(ContainerError::KeyBudgetExceeded);
      }

      match self
        .requested
        .compare_exchange_weak(current, current + 1, AcqRel, Relaxed)
      {
        Ok(_) => return Ok(()),
        Err(actual) => current = actual,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn next_is_dense_per_level() {
    let allocator: IndexAllocator = IndexAllocator::new();

    for expected in 0..10 {
      assert_eq!(allocator.next(0), expected);
    }
  }

  #[test]
  fn deeper_levels_reserve_shallow_indices() {
    let allocator: IndexAllocator = IndexAllocator::new();

    // Mint at level 0 a few times, then check that level 3 (a deeper,
    // same-word level) starts past what level 0 already consumed.
    for _ in 0..5 {
      allocator.next(0);
    }

    assert_eq!(allocator.next(3), 5);
  }

  #[test]
  fn cross_word_reservation() {
    let allocator: IndexAllocator = IndexAllocator::new();

    for _ in 0..3 {
      allocator.next(1);
    }

    // Level 4 lives in the high word but must still observe the low-word
    // mints as reserved.
    assert_eq!(allocator.next(4), 3);
  }

  #[test]
  fn read_does_not_advance() {
    let allocator: IndexAllocator = IndexAllocator::new();

    allocator.next(2);
    allocator.next(2);

    assert_eq!(allocator.read(2), 2);
    assert_eq!(allocator.read(2), 2);
  }

  #[test]
  fn key_budget_rejects_nth_request() {
    let budget: KeyBudget = KeyBudget::new(3);

    assert!(budget.try_reserve().is_ok());
    assert!(budget.try_reserve().is_ok());
    assert_eq!(budget.try_reserve(), Err(ContainerError::KeyBudgetExceeded));
  }
}
