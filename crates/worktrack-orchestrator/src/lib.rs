#![allow(clippy::missing_errors_doc)]

//! Mutation and notification orchestration for the work hierarchy.
//!
//! Every operation follows the same shape: validate the request, open one
//! unit of work, apply the mutation (and its cascade and audit entries),
//! compute the notification messages and queue them in the outbox, commit,
//! then hand exactly that batch to the [`NotificationDispatcher`]. A failed
//! send is recorded on its outbox row and never undoes the commit.

use serde::Serialize;
use time::OffsetDateTime;
use worktrack_core::{
    EntityKind, NotificationDraft, NotificationMessage, OrchestratorConfig, WorkAreaId, WorkError,
    WorkTask, WorkTaskId,
};
use worktrack_store_sqlite::{OutboxEntry, OutboxStatus, Reads, SqliteEntityStore};

mod comments;
mod dispatch;
mod members;
mod objectives;
mod relay;
mod work_areas;
mod work_tasks;

pub use dispatch::{LogDispatcher, NotificationDispatcher, RecordingDispatcher};
pub use relay::{DeliveryFailure, DeliveryReport, OutboxRelay};
pub use worktrack_store_sqlite::{WorkAreaQuery, WorkTaskGraph, WorkTaskQuery};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Work(#[from] WorkError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ServiceError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Work(err) => err.kind(),
            Self::Store(_) => "store",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result of a committed operation.
#[derive(Debug, Clone, Serialize)]
pub struct Applied<T> {
    pub value: T,
    /// Messages queued in the outbox by this operation, in send order.
    pub notifications: Vec<NotificationMessage>,
    /// `None` when delivery is deferred to an outbox drain.
    pub delivery: Option<DeliveryReport>,
}

impl<T> Applied<T> {
    #[must_use]
    pub fn notified_users(&self) -> Vec<&str> {
        self.notifications
            .iter()
            .map(|message| message.user_id.as_str())
            .collect()
    }
}

pub struct Orchestrator<D> {
    store: SqliteEntityStore,
    dispatcher: D,
    config: OrchestratorConfig,
}

impl<D: NotificationDispatcher> Orchestrator<D> {
    pub fn new(
        store: SqliteEntityStore,
        dispatcher: D,
        config: OrchestratorConfig,
    ) -> ServiceResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            dispatcher,
            config,
        })
    }

    #[must_use]
    pub fn store(&self) -> &SqliteEntityStore {
        &self.store
    }

    #[must_use]
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub fn relay(&self) -> OutboxRelay<'_, D> {
        OutboxRelay::new(&self.store, &self.dispatcher)
    }

    pub fn drain_outbox(&self, limit: u32) -> ServiceResult<DeliveryReport> {
        Ok(self.relay().drain_pending(limit)?)
    }

    pub fn outbox_status(&self) -> ServiceResult<OutboxStatus> {
        Ok(self.store.outbox_status()?)
    }

    pub fn outbox_entries(&self, pending_only: bool, limit: u32) -> ServiceResult<Vec<OutboxEntry>> {
        Ok(self.store.outbox_entries(pending_only, limit)?)
    }

    /// Removes outbox rows delivered before `before`. Pending rows stay.
    pub fn prune_outbox(&self, before: OffsetDateTime) -> ServiceResult<usize> {
        let pruned = self.store.prune_delivered(before)?;
        tracing::info!(pruned, before = %before, "delivered outbox rows pruned");
        Ok(pruned)
    }

    fn settle<T>(&self, value: T, notifications: Vec<NotificationMessage>) -> Applied<T> {
        let delivery = self
            .config
            .deliver_after_commit
            .then(|| self.relay().deliver(&notifications));
        Applied {
            value,
            notifications,
            delivery,
        }
    }
}

/// Live task or `NotFound`.
fn require_task(reads: &Reads<'_>, id: WorkTaskId) -> ServiceResult<WorkTask> {
    reads
        .work_task(id)?
        .ok_or_else(|| WorkError::not_found(EntityKind::WorkTask, id).into())
}

/// Live task referenced by a child being created; a dangling reference is a
/// validation failure rather than a lookup miss.
fn require_parent_task(reads: &Reads<'_>, id: WorkTaskId) -> ServiceResult<WorkTask> {
    reads.work_task(id)?.ok_or_else(|| {
        WorkError::Validation(format!("work task {id} does not exist or is deleted")).into()
    })
}

fn require_parent_area(
    reads: &Reads<'_>,
    id: WorkAreaId,
) -> ServiceResult<worktrack_core::WorkArea> {
    reads.work_area(id)?.ok_or_else(|| {
        WorkError::Validation(format!("work area {id} does not exist or is deleted")).into()
    })
}

/// Tags a task-scoped draft with the project of the task's area, when the
/// area is still present.
fn with_task_project(
    reads: &Reads<'_>,
    task: &WorkTask,
    draft: NotificationDraft,
) -> anyhow::Result<NotificationDraft> {
    Ok(match reads.work_area(task.work_area_id)? {
        Some(area) => draft.with_project(area.project_id),
        None => draft,
    })
}
