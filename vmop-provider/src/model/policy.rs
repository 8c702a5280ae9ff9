use serde::{Deserialize, Serialize};

/// Resource policy shared by a set of VMs.
///
/// The folder and resource pool names are children of the namespace's
/// folder and pool. Cluster modules group VMs for anti-affinity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePolicy {
    pub name: String,
    pub namespace: String,
    pub folder: Option<String>,
    pub resource_pool: Option<String>,
    pub cluster_modules: Vec<String>,
    pub deleting: bool,
}
