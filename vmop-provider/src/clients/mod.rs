//! Collaborator interfaces.
//!
//! The provider never talks to the object store, the secret store, the image
//! catalog, the network service, the placement service or the backend
//! directly. Each is consumed through one of the traits below.

pub mod backend;
pub mod catalog;
pub mod network;
pub mod placement;
pub mod store;

use std::sync::Arc;

pub use backend::{Backend, CreateRequest, PropertyMask};
pub use catalog::ImageCatalog;
pub use network::{InterfaceResult, IpConfig, NetworkResolver};
pub use placement::{PlacementResult, PlacementService};
pub use store::{NamespacePlacement, ObjectStore, SecretStore};

/// The collaborators a reconciler is wired with.
#[derive(Clone)]
pub struct Clients {
    pub store: Arc<dyn ObjectStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub catalog: Arc<dyn ImageCatalog>,
    pub network: Arc<dyn NetworkResolver>,
    pub placement: Arc<dyn PlacementService>,
    pub backend: Arc<dyn Backend>,
}
