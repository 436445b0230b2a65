//! Predicates deciding which cache entries a sweep removes.

use std::fmt;

/// Decides whether an entry should be removed.
///
/// Implementations must be free of side effects; a predicate may be
/// evaluated several times for the same entry.
pub trait ConditionalRemover<V>: Send + Sync {
    /// Returns `true` if the entry stored under `key` should be removed.
    fn should_remove(&self, key: &str, value: &V) -> bool;
}

/// Remover that never removes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyConditionalRemover;

impl<V> ConditionalRemover<V> for EmptyConditionalRemover {
    fn should_remove(&self, _key: &str, _value: &V) -> bool {
        false
    }
}

/// Remover backed by a closure.
pub struct FnConditionalRemover<F> {
    predicate: F,
}

impl<F> FnConditionalRemover<F> {
    /// Wraps `predicate`.
    pub const fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> fmt::Debug for FnConditionalRemover<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnConditionalRemover").finish_non_exhaustive()
    }
}

impl<V, F> ConditionalRemover<V> for FnConditionalRemover<F>
where
    F: Fn(&str, &V) -> bool + Send + Sync,
{
    fn should_remove(&self, key: &str, value: &V) -> bool {
        (self.predicate)(key, value)
    }
}
