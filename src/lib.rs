//! A thread-safe, typed heterogeneous extension container.
//!
//! [`Container`] lets unrelated subsystems attach arbitrarily-typed values
//! to a shared entity without knowing about each other's types up front.
//! Each attachment point is addressed by a [`Key<T>`], a typed, opaque
//! handle minted by [`Container::request_key`].
//!
//! # Overview
//!
//! A [`Container`] starts as a family root via [`Container::new_root`].
//! [`Container::derive`] creates a child one level deeper that shares the
//! root's key-index space; [`Container::sibling`] creates a parallel
//! container at the same level. Keys minted by an ancestor are valid on any
//! descendant; keys minted by a descendant are not valid on its ancestors.
//!
//! ```
//! use extholder::Container;
//!
//! let root: Container = Container::new_root();
//! let key = root.request_key::<String>()?;
//!
//! assert_eq!(root.set(&key, String::from("vegetals"))?, None);
//! assert_eq!(root.get(&key)?, Some(String::from("vegetals")));
//!
//! let child = root.derive(false)?;
//! assert_eq!(child.get(&key)?, Some(String::from("vegetals")));
//! # Ok::<(), extholder::ContainerError>(())
//! ```
//!
//! [`Key::erase`] produces an [`AnyKey`], the non-generic counterpart used
//! by [`Container::get_erased`]/[`Container::set_erased`] for callers that
//! cannot name the value's type at the call site; those entry points check
//! the value's runtime type against the key's type witness and return
//! [`ContainerError::TypeMismatch`] on a mismatch. `Key<T>` and `AnyKey`
//! deliberately do not implement `Hash`: keys are not meant to be used as
//! map keys by callers.
//!
//! # Configuration
//!
//! Each family has a per-family budget on how many keys it may ever
//! request, configured at compile time through the [`Params`] trait. The
//! default configuration ([`DefaultParams`]) allows the full 65,535-key
//! budget:
//!
//! ```
//! use extholder::{Container, DefaultParams};
//!
//! // These are equivalent:
//! let root1: Container = Container::new_root();
//! let root2: Container<DefaultParams> = Container::new_root();
//! ```
//!
//! For a tighter budget, use [`ConstParams`]:
//!
//! ```
//! use extholder::{Container, ConstParams};
//!
//! let root: Container<ConstParams<256>> = Container::new_root();
//! ```
//!
//! # Concurrency
//!
//! [`Container::get`] never blocks. [`Container::set`] and
//! [`Container::set_if_absent`] may briefly block on an internal mutex, but
//! only while the slot array is being created or grown; in steady state
//! they complete lock-free.
//!
//! ```no_run
//! use extholder::Container;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let root: Arc<Container> = Arc::new(Container::new_root());
//! let key = root.request_key::<u64>().unwrap();
//!
//! let handles: Vec<_> = (0..4)
//!   .map(|thread_id| {
//!     let root = Arc::clone(&root);
//!     thread::spawn(move || {
//!       for i in 0..100 {
//!         root.set(&key, thread_id * 1000 + i).unwrap();
//!       }
//!     })
//!   })
//!   .collect();
//!
//! for handle in handles {
//!   handle.join().unwrap();
//! }
//! ```
//!
//! ## Memory Reclamation
//!
//! There is no remove operation, so values are always returned directly to
//! the caller on [`Container::set`] rather than deferred to a reclaimer.
//! Growing a container's slot array does retire an older array, but that
//! array is intentionally leaked rather than freed (its contents are always
//! moved into the new array first) — this avoids requiring an epoch/guard
//! API on every read, at the cost of not reclaiming a handful of small,
//! empty array shells over a container's lifetime.
//!
//! # Key Budget
//!
//! Each family may request at most 65,535 keys; derivation is capped at 8
//! levels (0 through 7). When exhausted, [`Container::request_key`] and
//! [`Container::derive`] return a [`ContainerError`].

mod alloc;
mod container;
mod error;
mod family;
mod key;
mod params;
mod slot;
mod sync;

pub use self::container::Container;
pub use self::error::ContainerError;
pub use self::key::AnyKey;
pub use self::key::Key;
pub use self::params::ConstParams;
pub use self::params::DebugParams;
pub use self::params::DefaultParams;
pub use self::params::MAX_KEY_BUDGET;
pub use self::params::MAX_LEVEL;
pub use self::params::Params;
pub use self::params::ParamsExt;
pub use self::slot::StoredValue;
