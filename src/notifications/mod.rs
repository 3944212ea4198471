//! Notification events and the publisher seam.
//!
//! Jobs publish [`NotificationEvent`]s onto a [`Notifier`] topic; a single
//! consumer hands each event to every configured [`NotificationPublisher`].
//! Delivery failures are logged and never affect the job that raised them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::arr::ArrType;
use crate::clients::{CleanReason, DeleteReason};
use crate::pipeline::{Topic, TopicHandler};
use crate::strikes::StrikeType;

/// Topic carrying notification events.
pub type Notifier = Topic<NotificationEvent>;

/// Who handed out a strike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrikeSource {
    /// Download client, by display name.
    Client(String),
    /// Arr instance reporting a failed import.
    Arr { arr: ArrType, instance: String },
}

impl fmt::Display for StrikeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(name) => f.write_str(name),
            Self::Arr { arr, instance } => write!(f, "{arr}/{instance}"),
        }
    }
}

/// Something worth telling a human about.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Strike {
        source: StrikeSource,
        hash: String,
        name: String,
        strike_type: StrikeType,
        count: u16,
        max_strikes: u16,
    },
    QueueItemRemoved {
        arr: ArrType,
        instance: String,
        hash: String,
        title: String,
        reason: DeleteReason,
        deleted_from_client: bool,
    },
    CategoryChanged {
        client: String,
        hash: String,
        name: String,
        from: Option<String>,
        to: String,
        /// The target was applied as a tag instead of a category.
        tagged: bool,
    },
    DownloadCleaned {
        client: String,
        hash: String,
        name: String,
        category: String,
        reason: CleanReason,
        ratio: f64,
        seeding_time: Duration,
    },
}

impl NotificationEvent {
    #[must_use]
    pub fn hash(&self) -> &str {
        match self {
            Self::Strike { hash, .. }
            | Self::QueueItemRemoved { hash, .. }
            | Self::CategoryChanged { hash, .. }
            | Self::DownloadCleaned { hash, .. } => hash,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("{publisher} failed to deliver notification: {message}")]
    Delivery {
        publisher: &'static str,
        message: String,
    },
}

/// Delivery transport (webhook, chat, ...).
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, event: &NotificationEvent) -> Result<(), NotificationError>;
}

/// Writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPublisher;

#[async_trait]
impl NotificationPublisher for LoggingPublisher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        match event {
            NotificationEvent::Strike {
                source,
                hash,
                name,
                strike_type,
                count,
                max_strikes,
            } => info!(
                target: "cleanarr::notify",
                source = %source, hash = %hash, name = %name, strike_type = %strike_type, count, max_strikes,
                "strike"
            ),
            NotificationEvent::QueueItemRemoved {
                arr,
                instance,
                hash,
                title,
                reason,
                deleted_from_client,
            } => info!(
                target: "cleanarr::notify",
                arr = %arr, instance = %instance, hash = %hash, title = %title, reason = %reason, deleted_from_client,
                "queue item removed"
            ),
            NotificationEvent::CategoryChanged {
                client,
                hash,
                name,
                from,
                to,
                tagged,
            } => info!(
                target: "cleanarr::notify",
                client = %client, hash = %hash, name = %name, from = from.as_deref().unwrap_or(""), to = %to, tagged,
                "category changed"
            ),
            NotificationEvent::DownloadCleaned {
                client,
                hash,
                name,
                category,
                reason,
                ratio,
                seeding_time,
            } => info!(
                target: "cleanarr::notify",
                client = %client, hash = %hash, name = %name, category = %category, reason = %reason, ratio,
                seeding_hours = seeding_time.as_secs() / 3600,
                "download cleaned"
            ),
        }
        Ok(())
    }
}

/// Topic consumer fanning events out to publishers.
pub struct NotificationDispatcher {
    publishers: Vec<Arc<dyn NotificationPublisher>>,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(publishers: Vec<Arc<dyn NotificationPublisher>>) -> Self {
        Self { publishers }
    }
}

#[async_trait]
impl TopicHandler<NotificationEvent> for NotificationDispatcher {
    async fn handle(&self, event: NotificationEvent) {
        for publisher in &self.publishers {
            if let Err(error) = publisher.publish(&event).await {
                warn!(publisher = publisher.name(), hash = event.hash(), error = %error, "notification dropped");
            }
        }
    }
}

/// Publishes on `notifier` if there is one; failures are logged.
pub async fn notify(notifier: Option<&Notifier>, event: NotificationEvent) {
    let Some(notifier) = notifier else {
        return;
    };
    if let Err(error) = notifier.publish(event).await {
        warn!(error = %error, "notification not queued");
    }
}
