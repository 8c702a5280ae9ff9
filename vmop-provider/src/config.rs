//! Provider configuration.
//!
//! `ProviderConfig` can be flattened into a manager's clap arguments or
//! loaded from a JSON document.

use std::collections::BTreeMap;
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use crate::error::{Classifier, ProviderError, Result};

#[derive(Debug, Clone, Args, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Maximum number of VM creates in flight at once
    #[arg(long, default_value = "16")]
    pub max_concurrent_creates: usize,

    /// Requeue delay in seconds when a referenced object is missing
    #[arg(long, default_value = "10")]
    pub not_found_requeue_secs: u64,

    /// Requeue delay in seconds when a prerequisite is not ready
    #[arg(long, default_value = "10")]
    pub not_ready_requeue_secs: u64,

    /// Requeue delay in seconds for transient backend failures
    #[arg(long, default_value = "30")]
    pub default_requeue_secs: u64,

    /// Reject VMs that do not name a storage class
    #[arg(long)]
    pub storage_class_required: bool,

    /// Add instance storage volumes declared by the VM class
    #[arg(long)]
    pub instance_storage_enabled: bool,

    /// Default 64-bit MMIO window for PCI passthrough, in GB
    #[arg(long, default_value = "512")]
    pub pci_passthru_mmio_size_gb: u64,

    /// Extension key recorded as the managed-by marker on created VMs
    #[arg(long, default_value = "com.vmware.vcenter.wcp")]
    pub managed_by_extension_key: String,

    /// Extra config applied to every VM unless the VM already sets the key
    #[arg(skip)]
    pub global_extra_config: BTreeMap<String, String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_creates: 16,
            not_found_requeue_secs: 10,
            not_ready_requeue_secs: 10,
            default_requeue_secs: 30,
            storage_class_required: false,
            instance_storage_enabled: false,
            pci_passthru_mmio_size_gb: 512,
            managed_by_extension_key: "com.vmware.vcenter.wcp".to_string(),
            global_extra_config: BTreeMap::new(),
        }
    }
}

impl ProviderConfig {
    /// Load a configuration document. Missing fields take their defaults.
    pub fn from_json(doc: &str) -> Result<Self> {
        serde_json::from_str(doc)
            .map_err(|e| ProviderError::Validation(format!("invalid provider config: {}", e)))
    }

    pub fn not_found_requeue(&self) -> Duration {
        Duration::from_secs(self.not_found_requeue_secs)
    }

    pub fn not_ready_requeue(&self) -> Duration {
        Duration::from_secs(self.not_ready_requeue_secs)
    }

    pub fn default_requeue(&self) -> Duration {
        Duration::from_secs(self.default_requeue_secs)
    }

    pub fn classifier(&self) -> Classifier {
        Classifier {
            not_found_delay: self.not_found_requeue(),
            not_ready_delay: self.not_ready_requeue(),
            default_backoff: self.default_requeue(),
        }
    }
}
