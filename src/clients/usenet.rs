//! Placeholder for Usenet clients.
//!
//! Usenet downloads carry no info hash and have no file-level control, so
//! every lookup misses and every mutation is a no-op. Queue records with the
//! usenet protocol never reach an adapter; this exists so a configured usenet
//! client does not fail startup.

use async_trait::async_trait;

use super::{ClientError, DownloadClientApi, DownloadFile, DownloadItem};
use crate::config::DownloadClientKind;

#[derive(Debug, Default, Clone, Copy)]
pub struct UsenetClient;

#[async_trait]
impl DownloadClientApi for UsenetClient {
    fn kind(&self) -> DownloadClientKind {
        DownloadClientKind::Usenet
    }

    async fn login(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn find_item(&self, _hash: &str) -> Result<Option<DownloadItem>, ClientError> {
        Ok(None)
    }

    async fn list_seeding_items(&self) -> Result<Vec<DownloadItem>, ClientError> {
        Ok(Vec::new())
    }

    async fn load_files(&self, _item: &DownloadItem) -> Result<Vec<DownloadFile>, ClientError> {
        Ok(Vec::new())
    }

    async fn set_unwanted_files(
        &self,
        _item: &DownloadItem,
        _indexes: &[usize],
    ) -> Result<(), ClientError> {
        Ok(())
    }

    async fn delete_item(&self, _hash: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn create_category(&self, _name: &str) -> Result<(), ClientError> {
        Ok(())
    }

    async fn set_category(&self, _item: &DownloadItem, _category: &str) -> Result<(), ClientError> {
        Ok(())
    }
}
