use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Result};
use worktrack_core::NotificationMessage;

/// The outbound notification sink.
///
/// `send` hands one message to the delivery channel. An error means this
/// message was not accepted; the caller records it and moves on to the next.
pub trait NotificationDispatcher {
    fn channel_name(&self) -> &'static str;

    #[allow(clippy::missing_errors_doc)]
    fn send(&self, message: &NotificationMessage) -> Result<()>;
}

/// Writes every notification to the `tracing` log instead of a real channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

impl LogDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl NotificationDispatcher for LogDispatcher {
    fn channel_name(&self) -> &'static str {
        "log"
    }

    fn send(&self, message: &NotificationMessage) -> Result<()> {
        tracing::info!(
            notification_id = %message.id,
            user_id = %message.user_id,
            notification_type = message.notification_type.as_str(),
            title = %message.title,
            "notification sent"
        );
        Ok(())
    }
}

/// Keeps every accepted message in memory. Sends addressed to a user in the
/// failing set are rejected.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<NotificationMessage>>,
    failing_users: BTreeSet<String>,
}

impl RecordingDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_for<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sent: Mutex::new(Vec::new()),
            failing_users: users.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn sent(&self) -> Vec<NotificationMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn sent_to(&self, user_id: &str) -> Vec<NotificationMessage> {
        self.sent()
            .into_iter()
            .filter(|message| message.user_id == user_id)
            .collect()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Lets deliveries to `user_id` succeed from now on.
    pub fn recover(&mut self, user_id: &str) {
        self.failing_users.remove(user_id);
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn channel_name(&self) -> &'static str {
        "recording"
    }

    fn send(&self, message: &NotificationMessage) -> Result<()> {
        if self.failing_users.contains(&message.user_id) {
            return Err(anyhow!("delivery to {} refused", message.user_id));
        }
        self.sent
            .lock()
            .map_err(|_| anyhow!("recording dispatcher lock poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

