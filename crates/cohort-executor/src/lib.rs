//! Executor capability contract and value-handle ownership.
//!
//! An [`Executor`] evaluates graph-construction requests for one fixed
//! population shape. The registry and the service depend only on this trait,
//! never on a concrete backend. [`OwnedValueId`] is the ownership guard for
//! backend-local value identifiers: dropping it disposes the value against
//! its owning executor, consuming it with [`OwnedValueId::release`] hands
//! the identifier to the wire layer instead.

use std::sync::Arc;

use cohort_contracts::Status;

pub mod cardinalities;
pub mod value_store;

pub use cardinalities::{cardinalities_to_string, CardinalityMap, ExecutorRequirements};
pub use value_store::ValueStoreExecutor;

/// Backend-local value identifier. Only meaningful relative to the executor
/// that produced it.
pub type ValueId = u64;

/// A backend capable of creating, combining, and materializing values for
/// one fixed population shape.
///
/// Concurrent calls against one executor are expected; implementations must
/// be internally synchronized. Every method returning a [`ValueId`] hands
/// ownership of that identifier to the caller, who is responsible for
/// wrapping it in an [`OwnedValueId`] or disposing it.
pub trait Executor: Send + Sync {
    fn create_value(&self, value: &[u8]) -> Result<ValueId, Status>;

    fn create_call(&self, function: ValueId, argument: Option<ValueId>) -> Result<ValueId, Status>;

    fn create_struct(&self, elements: &[ValueId]) -> Result<ValueId, Status>;

    fn create_selection(&self, source: ValueId, index: u32) -> Result<ValueId, Status>;

    /// Writes the concrete payload referenced by `id` into `out`.
    fn materialize(&self, id: ValueId, out: &mut Vec<u8>) -> Result<(), Status>;

    fn dispose(&self, id: ValueId) -> Result<(), Status>;
}

/// Constructs an executor for the given shape. May fail; on failure nothing
/// is registered by the caller.
pub type ExecutorFactory =
    Box<dyn Fn(&CardinalityMap) -> Result<Arc<dyn Executor>, Status> + Send + Sync>;

/// Ownership guard over a freshly produced value identifier.
///
/// Exactly one of two things happens to a guard: it is consumed by
/// [`release`](Self::release) on the success path (ownership moves to
/// whoever receives the encoded reference), or it is dropped on an early
/// return, which issues a best-effort dispose against the owning executor.
/// The consuming signature makes "released twice" and "released then
/// dropped" unrepresentable.
pub struct OwnedValueId {
    id: ValueId,
    owner: Option<Arc<dyn Executor>>,
}

impl OwnedValueId {
    pub fn new(id: ValueId, owner: Arc<dyn Executor>) -> Self {
        Self {
            id,
            owner: Some(owner),
        }
    }

    pub fn id(&self) -> ValueId {
        self.id
    }

    /// Transfers ownership out of the guard; no dispose will be issued.
    pub fn release(mut self) -> ValueId {
        self.owner = None;
        self.id
    }
}

impl Drop for OwnedValueId {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            // The owning executor may already be gone; nothing to report to.
            let _ = owner.dispose(self.id);
        }
    }
}

impl std::fmt::Debug for OwnedValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedValueId")
            .field("id", &self.id)
            .field("released", &self.owner.is_none())
            .finish()
    }
}
