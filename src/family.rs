//! Family-shared state: the allocator and key budget common to every
//! [`Container`](crate::container::Container) in a derivation/sibling
//! lineage (§3, §9).

use crate::alloc::IndexAllocator;
use crate::alloc::KeyBudget;
use crate::sync::atomic::AtomicU64;
use crate::sync::atomic::Ordering::Relaxed;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next process-wide container/family id.
///
/// This crate picks global, auto-incrementing ids rather than, say,
/// per-family counters, per the design notes' recorded choice (§9).
#[inline]
pub(crate) fn next_id() -> u64 {
  NEXT_ID.fetch_add(1, Relaxed)
}

/// State shared by every [`Container`](crate::container::Container)
/// descended from one family root, held behind an `Arc` rather than a
/// parent-pointer graph.
#[derive(Debug)]
pub(crate) struct Family {
  pub(crate) id: u64,
  pub(crate) allocator: IndexAllocator,
  pub(crate) budget: KeyBudget,
}

impl Family {
  pub(crate) fn new(id: u64, key_budget: u32) -> Self {
    Self {
      id,
      allocator: IndexAllocator::new(),
      budget: KeyBudget::new(key_budget),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_are_monotonic_and_unique() {
    let a = next_id();
    let b = next_id();
    assert!(b > a);
  }
}
