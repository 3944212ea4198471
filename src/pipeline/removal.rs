//! Removal requests and their single consumer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::{Topic, TopicHandler};
use crate::arr::{ArrClient, SearchCommand};
use crate::clients::{DeleteReason, DownloadService};
use crate::notifications::{NotificationEvent, Notifier, notify};

/// Topic carrying removal requests.
pub type RemovalTopic = Topic<RemovalRequest>;

/// Everything needed to remove one download from an Arr queue.
#[derive(Clone)]
pub struct RemovalRequest {
    pub arr: Arc<ArrClient>,
    /// Queue records sharing the download id.
    pub record_ids: Vec<i64>,
    pub hash: String,
    pub title: String,
    pub search: Option<SearchCommand>,
    pub reason: DeleteReason,
    /// Adapter that owns the download, if one was found.
    pub client: Option<Arc<DownloadService>>,
    pub delete_from_client: bool,
}

impl fmt::Debug for RemovalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemovalRequest")
            .field("arr", &self.arr.arr_type())
            .field("instance", &self.arr.name())
            .field("record_ids", &self.record_ids)
            .field("hash", &self.hash)
            .field("reason", &self.reason)
            .field("client", &self.client.as_ref().map(|c| c.name().to_string()))
            .field("delete_from_client", &self.delete_from_client)
            .finish_non_exhaustive()
    }
}

/// Executes removal requests one at a time:
///
/// 1. delete from the download client (when requested and an adapter owns it)
/// 2. remove every queue record, blocklisting the release
/// 3. trigger the search, unless step 2 failed
/// 4. publish [`NotificationEvent::QueueItemRemoved`]
///
/// Failures are logged and do not stop later steps except where noted.
#[derive(Debug, Default)]
pub struct RemovalExecutor {
    notifier: Option<Notifier>,
}

impl RemovalExecutor {
    #[must_use]
    pub fn new(notifier: Option<Notifier>) -> Self {
        Self { notifier }
    }

    #[instrument(skip_all, fields(hash = %request.hash, reason = %request.reason))]
    async fn execute(&self, request: RemovalRequest) {
        let mut deleted_from_client = false;
        if request.delete_from_client {
            match &request.client {
                Some(client) => match client.delete_item(&request.hash).await {
                    Ok(()) => deleted_from_client = true,
                    Err(error) => warn!(error = %error, "failed to delete from download client"),
                },
                None => warn!("no download client owns this item, nothing to delete"),
            }
        }

        let mut arr_removed = true;
        for record_id in &request.record_ids {
            if let Err(error) = request.arr.remove_queue_item(*record_id, true).await {
                warn!(record_id, error = %error, "failed to remove queue item");
                arr_removed = false;
            }
        }

        match (&request.search, arr_removed) {
            (Some(command), true) => {
                if let Err(error) = request.arr.search(command).await {
                    warn!(error = %error, "failed to trigger search");
                }
            }
            (Some(_), false) => warn!("queue removal failed, search skipped"),
            (None, _) => {}
        }

        info!(title = %request.title, deleted_from_client, "removal processed");
        notify(
            self.notifier.as_ref(),
            NotificationEvent::QueueItemRemoved {
                arr: request.arr.arr_type(),
                instance: request.arr.name().to_string(),
                hash: request.hash,
                title: request.title,
                reason: request.reason,
                deleted_from_client,
            },
        )
        .await;
    }
}

#[async_trait]
impl TopicHandler<RemovalRequest> for RemovalExecutor {
    async fn handle(&self, message: RemovalRequest) {
        self.execute(message).await;
    }
}
