//! Notification service port (driven/secondary port)
//!
//! User-facing, non-blocking status messages (the "toast" of a UI):
//! connectivity transitions, sync failures, degraded local persistence.
//!
//! Notifications are fire-and-forget; implementations must not fail the
//! caller when no one is listening.

use serde::{Deserialize, Serialize};

/// Priority level for a notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    /// Informational, may be shown briefly
    Low,
    /// Normal status message
    #[default]
    Normal,
    /// Needs the user's attention
    High,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// A notification to show to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Short title
    pub title: String,
    /// Body text with details
    pub body: String,
    /// Display priority
    pub priority: NotificationPriority,
    /// Category for grouping (`connectivity`, `sync`, `storage`)
    pub category: String,
}

impl Notification {
    /// Creates a normal-priority notification without category
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: NotificationPriority::Normal,
            category: String::new(),
        }
    }

    /// Sets the priority level
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Connection came back
    pub fn connectivity_restored() -> Self {
        Self::new("Back online", "Connection restored, pending changes will be synchronized")
            .with_priority(NotificationPriority::Low)
            .with_category("connectivity")
    }

    /// Connection was lost
    pub fn connectivity_lost() -> Self {
        Self::new("Offline", "Changes are kept locally until the connection returns")
            .with_category("connectivity")
    }

    /// A synchronization failed
    pub fn sync_failed(table: &str, reason: impl Into<String>) -> Self {
        Self::new(format!("Synchronization of {table} failed"), reason)
            .with_priority(NotificationPriority::High)
            .with_category("sync")
    }

    /// Local persistence rejected a write
    pub fn storage_degraded(reason: impl Into<String>) -> Self {
        Self::new("Local storage degraded", reason)
            .with_priority(NotificationPriority::High)
            .with_category("storage")
    }
}

/// Port trait for user-facing notifications
#[async_trait::async_trait]
pub trait INotificationService: Send + Sync {
    /// Sends a notification to the user
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}
