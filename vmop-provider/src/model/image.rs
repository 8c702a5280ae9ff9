//! Image descriptors.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::vmconfig::Firmware;

/// Where an image object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageScope {
    Namespace,
    Cluster,
}

impl ImageScope {
    /// The object kind that names this scope in an image reference.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageScope::Namespace => "VirtualMachineImage",
            ImageScope::Cluster => "ClusterVirtualMachineImage",
        }
    }
}

impl FromStr for ImageScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VirtualMachineImage" => Ok(ImageScope::Namespace),
            "ClusterVirtualMachineImage" => Ok(ImageScope::Cluster),
            _ => Err(format!("unsupported image kind: {:?}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    #[serde(rename = "OVF")]
    Ovf,
    #[serde(rename = "ISO")]
    Iso,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Ovf => "OVF",
            MediaKind::Iso => "ISO",
        }
    }
}

/// Content-catalog item an image is published from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderRef {
    pub kind: String,
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    pub scope: ImageScope,
    pub media_kind: MediaKind,
    pub provider: Option<ProviderRef>,
    pub firmware: Option<Firmware>,
    pub hardware_version: Option<i32>,
    pub ready: bool,
}
