//! Reconcilers.
//!
//! A reconciler compares the desired state of an object with the live state
//! of the backend and takes actions to converge. Failures are classified into
//! [`ReconcileError`]s before they reach the control loop.

pub mod create;
pub mod update;
pub mod vm;

use async_trait::async_trait;

use crate::error::ReconcileError;

pub use create::{CreateContext, CreateOutcome, Orchestrator};
pub use update::UpdateSession;
pub use vm::VirtualMachineReconciler;

/// What a successful reconcile did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A backend instance was created in this pass.
    Created,
    /// An existing instance was brought toward the desired state.
    Updated,
    /// Creation was postponed because too many creates are in flight.
    Deferred,
}

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The declarative object being reconciled. Its status is updated in place.
    type Object;
    /// Reported back on success.
    type Outcome;

    /// Reconcile the object - compare desired vs actual state and take action.
    async fn reconcile(&self, obj: &mut Self::Object) -> Result<Self::Outcome, ReconcileError>;

    /// Handle object deletion (finalization).
    async fn finalize(&self, obj: &mut Self::Object) -> Result<(), ReconcileError>;
}
