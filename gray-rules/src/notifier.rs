//! Release change notifications.
//!
//! Every release publishes a message on [`RELEASE_TOPIC`] whose payload is the
//! `appId+cluster+namespace` of the changed target. [`ReleaseMessagePoller`] delivers
//! new messages from a [`ReleaseMessageSource`] to registered listeners.

use crate::source::{PAGE_SIZE, SourceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const RELEASE_TOPIC: &str = "gray-rules.release";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMessage {
    pub id: i64,
    pub message: String,
}

#[async_trait]
pub trait ReleaseMessageListener: Send + Sync {
    /// Must not fail: a listener deals with bad messages itself so later messages are
    /// still delivered.
    async fn handle_message(&self, message: &ReleaseMessage, channel: &str);
}

#[async_trait]
pub trait ReleaseMessageSource: Send + Sync {
    async fn find_latest_id(&self) -> Result<Option<i64>, SourceError>;

    /// Up to `limit` messages with an id greater than `after_id`, ordered by id.
    async fn find_after(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ReleaseMessage>, SourceError>;
}

pub struct ReleaseMessagePoller {
    source: Arc<dyn ReleaseMessageSource>,
    listeners: Vec<Arc<dyn ReleaseMessageListener>>,
    poll_interval: Duration,
}

impl ReleaseMessagePoller {
    pub fn new(source: Arc<dyn ReleaseMessageSource>, poll_interval: Duration) -> Self {
        ReleaseMessagePoller {
            source,
            listeners: Vec::new(),
            poll_interval,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ReleaseMessageListener>) {
        self.listeners.push(listener);
    }

    /// Polls until shutdown. Only messages published after the poller started are
    /// delivered; the full scan covers everything older.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut cursor = loop {
            match self.source.find_latest_id().await {
                Ok(latest) => break latest.unwrap_or(0),
                Err(err) => {
                    tracing::error!(error = %err, "failed to load latest release message id");
                }
            }
            if !self.wait(&mut shutdown).await {
                return;
            }
        };
        tracing::info!(cursor, "release message poller started");

        while self.wait(&mut shutdown).await {
            if let Err(err) = self.poll_once(&mut cursor).await {
                tracing::error!(error = %err, cursor, "failed to poll release messages");
            }
        }
        tracing::info!("release message poller stopped");
    }

    /// Delivers every message after `cursor`, advancing it past each delivered message.
    pub async fn poll_once(&self, cursor: &mut i64) -> Result<usize, SourceError> {
        let mut delivered = 0;
        loop {
            let batch = self.source.find_after(*cursor, PAGE_SIZE).await?;
            for message in &batch {
                for listener in &self.listeners {
                    listener.handle_message(message, RELEASE_TOPIC).await;
                }
                *cursor = message.id;
                delivered += 1;
            }
            if batch.len() < PAGE_SIZE {
                return Ok(delivered);
            }
        }
    }

    // Sleeps for one poll interval. Returns false once shutdown was requested.
    async fn wait(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let slept = tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => true,
            _ = shutdown.wait_for(|stopped| *stopped) => false,
        };
        let stopped = *shutdown.borrow();
        slept && !stopped
    }
}
