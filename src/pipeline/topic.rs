//! Ordered single-consumer topics over `tokio::sync::mpsc`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Messages buffered per topic. Publishers wait once one is queued.
pub const TOPIC_DEPTH: usize = 1;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("topic {topic} is closed")]
    Closed { topic: &'static str },
}

/// Consumer of one topic. Messages arrive one at a time, in publish order.
#[async_trait]
pub trait TopicHandler<T: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, message: T);
}

/// Publishing side. Cheap to clone.
pub struct Topic<T> {
    name: &'static str,
    sender: mpsc::Sender<T>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            sender: self.sender.clone(),
        }
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Topic<T> {
    /// Spawns the consumer task and returns the publishing handle.
    pub fn spawn(name: &'static str, handler: Arc<dyn TopicHandler<T>>) -> (Self, TopicWorker) {
        let (sender, mut receiver) = mpsc::channel::<T>(TOPIC_DEPTH);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    message = receiver.recv() => match message {
                        Some(message) => handler.handle(message).await,
                        None => break,
                    },
                    () = token.cancelled() => {
                        receiver.close();
                        while let Some(message) = receiver.recv().await {
                            handler.handle(message).await;
                        }
                        break;
                    }
                }
            }
            debug!(topic = name, "topic worker stopped");
        });

        (
            Self { name, sender },
            TopicWorker {
                name,
                shutdown,
                handle,
            },
        )
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queues `message`, waiting while the topic is full.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Closed`] once the worker has shut down.
    pub async fn publish(&self, message: T) -> Result<(), PipelineError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| PipelineError::Closed { topic: self.name })
    }
}

/// Consumer task of a topic.
#[derive(Debug)]
pub struct TopicWorker {
    name: &'static str,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TopicWorker {
    /// Stops accepting messages, drains what is queued, and waits for the
    /// consumer to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(error) = self.handle.await {
            warn!(topic = self.name, error = %error, "topic worker panicked");
        }
    }
}
