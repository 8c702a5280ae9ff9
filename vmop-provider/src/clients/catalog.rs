//! Image / content-catalog service.

use async_trait::async_trait;

use crate::error::ClientResult;
use crate::model::{Image, ImageScope};

#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Look up an image. Cluster-scoped images ignore `namespace`.
    async fn resolve_image(
        &self,
        namespace: &str,
        scope: ImageScope,
        name: &str,
    ) -> ClientResult<Option<Image>>;

    /// Synchronize a catalog item to storage and return its storage locator.
    async fn sync_item(&self, item_id: &str) -> ClientResult<String>;
}
