//! Notification sinks.

use crate::core::{now, Error, Result, Timestamp};
use crate::services::sinks::NotificationSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Notification sink that writes to the tracing log.
///
/// Used when no notification topic is configured.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier {
    topic: Option<String>,
}

impl LogNotifier {
    /// Create a notifier, optionally tagged with the configured topic.
    pub fn new(topic: Option<String>) -> Self {
        Self { topic }
    }
}

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        tracing::info!(topic = self.topic.as_deref().unwrap_or("-"), subject, body, "notification");
        Ok(())
    }
}

/// A sent notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Subject line
    pub subject: String,
    /// Message body
    pub body: String,
    /// Send time
    pub sent_at: Timestamp,
}

/// Notification sink that keeps every notification in memory.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: RwLock<Vec<Notification>>,
}

impl InMemoryNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications sent so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.read().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Subjects of notifications sent so far.
    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.subject).collect()
    }

    /// Check if any subject contains `needle`.
    pub fn contains_subject(&self, needle: &str) -> bool {
        self.subjects().iter().any(|s| s.contains(needle))
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .write()
            .map_err(|_| Error::Internal("notifier lock poisoned".to_string()))?
            .push(Notification {
                subject: subject.to_string(),
                body: body.to_string(),
                sent_at: now(),
            });
        Ok(())
    }
}
