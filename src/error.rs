//! Failure modes of the container.
//!
//! Every variant here is a programmer error: wrong provenance, a type that
//! does not match a key's witness, or a budget that has been exhausted.
//! None of them are retried or recovered from internally; they are surfaced
//! to the caller via [`Result`].

use core::fmt::Debug;

/// The error type returned by fallible [`Container`] operations.
///
/// [`Container`]: crate::container::Container
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContainerError {
  /// A [`Key`] was used against a [`Container`] it is not valid for: the
  /// key's minting container differs, and the key's family or level does
  /// not place it among the container's ancestors.
  ///
  /// [`Key`]: crate::key::Key
  /// [`Container`]: crate::container::Container
  #[error("key is not valid for this container (wrong family, level, or container id)")]
  InvalidKey,

  /// A required value was absent where one was needed.
  #[error("a non-null value was required but none was provided")]
  NullValue,

  /// The runtime type of a value did not match the key's type witness.
  #[error("value type does not match the key's type witness")]
  TypeMismatch,

  /// [`Container::derive`] was called on a container already at the maximum
  /// level (7).
  ///
  /// [`Container::derive`]: crate::container::Container::derive
  #[error("cannot derive past the maximum level (7)")]
  DerivationDepthExceeded,

  /// The family's keys-requested counter would exceed 65,536.
  #[error("family key budget (65536) exceeded")]
  KeyBudgetExceeded,
}
