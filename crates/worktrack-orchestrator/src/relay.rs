use anyhow::Result;
use serde::Serialize;
use worktrack_core::{now_utc, NotificationId, NotificationMessage};
use worktrack_store_sqlite::SqliteEntityStore;

use crate::NotificationDispatcher;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub notification_id: NotificationId,
    pub user_id: String,
    pub error: String,
}

/// Moves committed outbox rows to the dispatcher, one message at a time.
pub struct OutboxRelay<'a, D> {
    store: &'a SqliteEntityStore,
    dispatcher: &'a D,
}

impl<'a, D: NotificationDispatcher> OutboxRelay<'a, D> {
    pub fn new(store: &'a SqliteEntityStore, dispatcher: &'a D) -> Self {
        Self { store, dispatcher }
    }

    /// Sends each message in order. A failed send is recorded against its
    /// outbox row and never stops the remaining sends.
    pub fn deliver(&self, messages: &[NotificationMessage]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for message in messages {
            report.attempted += 1;
            match self.dispatcher.send(message) {
                Ok(()) => {
                    report.delivered += 1;
                    tracing::debug!(
                        notification_id = %message.id,
                        user_id = %message.user_id,
                        channel = self.dispatcher.channel_name(),
                        "notification delivered"
                    );
                    if let Err(err) = self.store.mark_delivered(message.id, now_utc()) {
                        tracing::warn!(
                            notification_id = %message.id,
                            error = %err,
                            "delivered notification could not be marked in the outbox"
                        );
                    }
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    tracing::warn!(
                        notification_id = %message.id,
                        user_id = %message.user_id,
                        channel = self.dispatcher.channel_name(),
                        error = %error,
                        "notification delivery failed"
                    );
                    if let Err(record_err) =
                        self.store.record_delivery_failure(message.id, &error)
                    {
                        tracing::warn!(
                            notification_id = %message.id,
                            error = %record_err,
                            "delivery failure could not be recorded in the outbox"
                        );
                    }
                    report.failures.push(DeliveryFailure {
                        notification_id: message.id,
                        user_id: message.user_id.clone(),
                        error,
                    });
                }
            }
        }

        report
    }

    /// Retries up to `limit` pending outbox rows, oldest first.
    pub fn drain_pending(&self, limit: u32) -> Result<DeliveryReport> {
        let pending = self.store.outbox_pending(limit)?;
        let messages: Vec<NotificationMessage> =
            pending.into_iter().map(|entry| entry.message).collect();

        let report = self.deliver(&messages);

        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed(),
            "outbox drained"
        );
        Ok(report)
    }
}
