//! VM provider core.
//!
//! Reconciles declarative VirtualMachine objects against an infrastructure
//! backend: creates instances, keeps their configuration and power state in
//! line with the declaration, and projects live state back onto the status.

pub mod clients;
pub mod conditions;
pub mod config;
pub mod configspec;
pub mod devices;
pub mod diff;
pub mod error;
pub mod gate;
pub mod model;
pub mod reconciler;
pub mod status;

pub use clients::Clients;
pub use config::ProviderConfig;
pub use diff::diff;
pub use error::{Classifier, ClientError, ProviderError, ReconcileError};
pub use gate::{CreateGate, CreatePermit};
pub use reconciler::{ReconcileOutcome, Reconciler, VirtualMachineReconciler};
pub use status::project;
