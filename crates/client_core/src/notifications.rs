//! Transient user-facing messages, shared by everything that reports outcomes.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    #[default]
    Success,
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub level: NotificationLevel,
}

/// Every clone publishes to the same listeners and shares the visible message.
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    tx: broadcast::Sender<Notification>,
    latest: Arc<watch::Sender<Option<Notification>>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        let (latest, _) = watch::channel(None);
        Self {
            tx,
            latest: Arc::new(latest),
        }
    }

    pub fn show(&self, message: impl Into<String>, level: NotificationLevel) {
        let notification = Notification {
            message: message.into(),
            level,
        };
        debug!(level = %notification.level, message = %notification.message, "notifications: show");
        self.latest.send_replace(Some(notification.clone()));
        let _ = self.tx.send(notification);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.show(message, NotificationLevel::Success);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.show(message, NotificationLevel::Error);
    }

    pub fn dismiss(&self) {
        self.latest.send_replace(None);
    }

    /// The message currently on screen, if any.
    pub fn latest(&self) -> Option<Notification> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn watch_latest(&self) -> watch::Receiver<Option<Notification>> {
        self.latest.subscribe()
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}
