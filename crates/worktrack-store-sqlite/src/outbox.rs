//! Notification outbox: messages written in the same transaction as the
//! mutation that produced them, delivered after commit.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use time::OffsetDateTime;
use worktrack_core::{now_utc, parse_rfc3339_utc, NotificationId, NotificationMessage};

use crate::rows::{collect_rows, invalid_data};
use crate::{bool_to_sql, timestamp, SqliteEntityStore, UnitOfWork};

const OUTBOX_COLUMNS: &str = "seq, id, user_id, notification_type, payload_json, enqueued_at, \
     state, attempts, last_error, delivered_at";

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Delivered,
}

impl DeliveryState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboxEntry {
    pub seq: i64,
    pub id: NotificationId,
    pub user_id: String,
    pub notification_type: String,
    pub message: NotificationMessage,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    pub state: DeliveryState,
    pub attempts: u32,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub delivered_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Eq, PartialEq)]
pub struct OutboxStatus {
    pub pending: u64,
    pub delivered: u64,
    /// Pending rows with at least one failed send.
    pub failing: u64,
}

impl UnitOfWork<'_> {
    pub fn enqueue_notification(&self, message: &NotificationMessage) -> Result<()> {
        let payload = serde_json::to_string(message)
            .with_context(|| format!("failed to encode notification {}", message.id))?;

        self.tx
            .execute(
                "INSERT INTO notification_outbox(
                    id, user_id, notification_type, payload_json, enqueued_at, state, attempts
                 ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0)",
                params![
                    message.id.to_string(),
                    message.user_id,
                    message.notification_type.as_str(),
                    payload,
                    timestamp(now_utc())?,
                ],
            )
            .with_context(|| format!("failed to enqueue notification {}", message.id))?;
        Ok(())
    }

    pub fn enqueue_notifications(&self, messages: &[NotificationMessage]) -> Result<()> {
        for message in messages {
            self.enqueue_notification(message)?;
        }
        Ok(())
    }
}

impl SqliteEntityStore {
    /// Oldest pending rows first.
    pub fn outbox_pending(&self, limit: u32) -> Result<Vec<OutboxEntry>> {
        self.outbox_entries(true, limit)
    }

    pub fn outbox_entries(&self, pending_only: bool, limit: u32) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM notification_outbox
             WHERE (?1 = 0 OR state = 'pending')
             ORDER BY seq ASC
             LIMIT ?2"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare outbox query")?;
        let rows = stmt
            .query_map(
                params![bool_to_sql(pending_only), i64::from(limit)],
                parse_outbox_row,
            )
            .context("failed to query notification outbox")?;
        collect_rows(rows)
    }

    pub fn outbox_entry(&self, id: NotificationId) -> Result<Option<OutboxEntry>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM notification_outbox WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id.to_string()], parse_outbox_row)
            .optional()
            .with_context(|| format!("failed to load outbox entry {id}"))
    }

    pub fn mark_delivered(&self, id: NotificationId, at: OffsetDateTime) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE notification_outbox
                 SET state = 'delivered', attempts = attempts + 1, last_error = NULL,
                     delivered_at = ?2
                 WHERE id = ?1 AND state = 'pending'",
                params![id.to_string(), timestamp(at)?],
            )
            .with_context(|| format!("failed to mark notification {id} delivered"))?;
        if changed == 0 {
            return Err(anyhow!("notification {id} is not pending in the outbox"));
        }
        Ok(())
    }

    pub fn record_delivery_failure(&self, id: NotificationId, error: &str) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE notification_outbox
                 SET attempts = attempts + 1, last_error = ?2
                 WHERE id = ?1 AND state = 'pending'",
                params![id.to_string(), error],
            )
            .with_context(|| format!("failed to record delivery failure for {id}"))?;
        if changed == 0 {
            return Err(anyhow!("notification {id} is not pending in the outbox"));
        }
        Ok(())
    }

    /// Deletes delivered rows whose `delivered_at` is strictly before
    /// `before`. Pending rows are never pruned, however old.
    pub fn prune_delivered(&self, before: OffsetDateTime) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM notification_outbox
                 WHERE state = 'delivered' AND delivered_at IS NOT NULL AND delivered_at < ?1",
                params![timestamp(before)?],
            )
            .context("failed to prune delivered notifications")
    }

    pub fn outbox_status(&self) -> Result<OutboxStatus> {
        self.conn
            .query_row(
                "SELECT
                    COALESCE(SUM(CASE WHEN state = 'pending' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN state = 'delivered' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN state = 'pending' AND attempts > 0 THEN 1 ELSE 0 END), 0)
                 FROM notification_outbox",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .context("failed to summarize notification outbox")
            .and_then(|(pending, delivered, failing)| {
                Ok(OutboxStatus {
                    pending: u64::try_from(pending).context("negative pending count")?,
                    delivered: u64::try_from(delivered).context("negative delivered count")?,
                    failing: u64::try_from(failing).context("negative failing count")?,
                })
            })
    }
}

fn parse_outbox_row(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let raw_id: String = row.get(1)?;
    let id = raw_id
        .parse::<NotificationId>()
        .map_err(|err| invalid_data(1, err.to_string()))?;

    let payload: String = row.get(4)?;
    let message: NotificationMessage =
        serde_json::from_str(&payload).map_err(|err| invalid_data(4, err.to_string()))?;

    let raw_enqueued: String = row.get(5)?;
    let enqueued_at =
        parse_rfc3339_utc(&raw_enqueued).map_err(|err| invalid_data(5, err.to_string()))?;

    let raw_state: String = row.get(6)?;
    let state = DeliveryState::parse(&raw_state)
        .ok_or_else(|| invalid_data(6, format!("unknown delivery state `{raw_state}`")))?;

    let delivered_at = row
        .get::<_, Option<String>>(9)?
        .map(|raw| parse_rfc3339_utc(&raw).map_err(|err| invalid_data(9, err.to_string())))
        .transpose()?;

    Ok(OutboxEntry {
        seq: row.get(0)?,
        id,
        user_id: row.get(2)?,
        notification_type: row.get(3)?,
        message,
        enqueued_at,
        state,
        attempts: row.get(7)?,
        last_error: row.get(8)?,
        delivered_at,
    })
}

