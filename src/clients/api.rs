//! The protocol seam every client family implements.

use async_trait::async_trait;

use super::{ClientError, DownloadFile, DownloadItem};
use crate::config::DownloadClientKind;

/// Wire-level primitives of one download client.
///
/// Implementations translate calls to their protocol and nothing more: no
/// dry-run checks, no policy. Mutating methods are only ever invoked by
/// [`DownloadService`](super::DownloadService), which owns the dry-run gate.
#[async_trait]
pub trait DownloadClientApi: Send + Sync {
    fn kind(&self) -> DownloadClientKind;

    /// Establishes or refreshes the session. Safe to call repeatedly.
    async fn login(&self) -> Result<(), ClientError>;

    /// Looks up one item by hash, files included. `Ok(None)` when unknown.
    async fn find_item(&self, hash: &str) -> Result<Option<DownloadItem>, ClientError>;

    /// Items currently seeding. File lists may be empty; see
    /// [`DownloadClientApi::load_files`].
    async fn list_seeding_items(&self) -> Result<Vec<DownloadItem>, ClientError>;

    /// File list of an item returned by `list_seeding_items`.
    async fn load_files(&self, item: &DownloadItem) -> Result<Vec<DownloadFile>, ClientError>;

    /// Sets priority 0 on the given file indexes in a single call.
    async fn set_unwanted_files(
        &self,
        item: &DownloadItem,
        indexes: &[usize],
    ) -> Result<(), ClientError>;

    /// Removes the item and its data. Unknown hashes are not an error.
    async fn delete_item(&self, hash: &str) -> Result<(), ClientError>;

    /// Creates `name` if missing.
    async fn create_category(&self, name: &str) -> Result<(), ClientError>;

    async fn set_category(&self, item: &DownloadItem, category: &str) -> Result<(), ClientError>;

    /// Whether [`DownloadClientApi::add_tag`] is available.
    fn supports_tags(&self) -> bool {
        false
    }

    async fn add_tag(&self, item: &DownloadItem, tag: &str) -> Result<(), ClientError> {
        let _ = (item, tag);
        Err(ClientError::unsupported(self.kind().to_string(), "tagging"))
    }
}
