use std::collections::BTreeSet;

use time::OffsetDateTime;
use worktrack_core::{
    now_utc, Actor, EntityKind, NotificationChannel, NotificationDraft, NotificationMessage,
    ObjectiveInput, Recipient, TaskMember, TaskObjective, TaskObjectiveId, WorkError, WorkTaskId,
};
use worktrack_store_sqlite::Reads;

use crate::{
    require_parent_task, require_task, with_task_project, Applied, NotificationDispatcher,
    Orchestrator, ServiceResult,
};

/// Creator notice first, then the broadcast to every active member. A
/// creator who is also a member gets both.
fn creator_and_members(
    draft: &NotificationDraft,
    creator_id: &str,
    members: &[TaskMember],
    actor: &Actor,
    channels: &BTreeSet<NotificationChannel>,
    now: OffsetDateTime,
) -> Vec<NotificationMessage> {
    let mut messages = match Recipient::member_named(members, creator_id) {
        Some(creator) => draft.fan_out(&[creator], actor, channels, now),
        None => Vec::new(),
    };
    messages.extend(draft.fan_out(
        &Recipient::active_members(members),
        actor,
        channels,
        now,
    ));
    messages
}

fn require_objective(reads: &Reads<'_>, id: TaskObjectiveId) -> ServiceResult<TaskObjective> {
    reads
        .objective(id)?
        .ok_or_else(|| WorkError::not_found(EntityKind::TaskObjective, id).into())
}

impl<D: NotificationDispatcher> Orchestrator<D> {
    pub fn create_objective(
        &mut self,
        actor: &Actor,
        task_id: WorkTaskId,
        input: &ObjectiveInput,
    ) -> ServiceResult<Applied<TaskObjective>> {
        actor.validate()?;
        input.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let task = require_parent_task(&reads, task_id)?;
        let members = reads.active_task_members(task_id)?;

        let objective = TaskObjective {
            id: TaskObjectiveId::new(),
            work_task_id: task_id,
            title: input.title.clone(),
            display_order: input.display_order,
            created_by_user_id: actor.user_id.clone(),
            created_date: now,
            is_completed: false,
            completed_date: None,
            completed_by_user_id: None,
            is_deleted: false,
        };
        uow.insert_objective(&objective)?;

        let draft = with_task_project(
            &reads,
            &task,
            NotificationDraft::objective_created(&task, &objective, actor),
        )?;
        let notifications =
            creator_and_members(&draft, &actor.user_id, &members, actor, &channels, now);
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            objective_id = %objective.id,
            work_task_id = %task_id,
            queued = notifications.len(),
            "objective created"
        );
        Ok(self.settle(objective, notifications))
    }

    pub fn update_objective(
        &mut self,
        actor: &Actor,
        id: TaskObjectiveId,
        input: &ObjectiveInput,
    ) -> ServiceResult<Applied<TaskObjective>> {
        actor.validate()?;
        input.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let mut objective = require_objective(&reads, id)?;
        let task = require_parent_task(&reads, objective.work_task_id)?;
        let members = reads.active_task_members(task.id)?;

        objective.title.clone_from(&input.title);
        objective.display_order = input.display_order;
        uow.update_objective(&objective)?;

        let draft = with_task_project(
            &reads,
            &task,
            NotificationDraft::objective_updated(&task, &objective, actor),
        )?;
        let notifications = creator_and_members(
            &draft,
            &objective.created_by_user_id,
            &members,
            actor,
            &channels,
            now,
        );
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            objective_id = %id,
            queued = notifications.len(),
            "objective updated"
        );
        Ok(self.settle(objective, notifications))
    }

    /// Marks the objective complete (stamping when and by whom) or clears
    /// the completion.
    pub fn complete_objective(
        &mut self,
        actor: &Actor,
        id: TaskObjectiveId,
        is_completed: bool,
    ) -> ServiceResult<Applied<TaskObjective>> {
        actor.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let mut objective = require_objective(&reads, id)?;
        let task = require_parent_task(&reads, objective.work_task_id)?;
        let members = reads.active_task_members(task.id)?;

        objective.is_completed = is_completed;
        if is_completed {
            objective.completed_date = Some(now);
            objective.completed_by_user_id = Some(actor.user_id.clone());
        } else {
            objective.completed_date = None;
            objective.completed_by_user_id = None;
        }
        uow.update_objective(&objective)?;

        let draft = with_task_project(
            &reads,
            &task,
            NotificationDraft::objective_completion(&task, &objective, actor),
        )?;
        let notifications = creator_and_members(
            &draft,
            &objective.created_by_user_id,
            &members,
            actor,
            &channels,
            now,
        );
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            objective_id = %id,
            is_completed,
            queued = notifications.len(),
            "objective completion changed"
        );
        Ok(self.settle(objective, notifications))
    }

    /// Soft-deletes the objective with a single broadcast to active members.
    pub fn delete_objective(
        &mut self,
        actor: &Actor,
        id: TaskObjectiveId,
    ) -> ServiceResult<Applied<TaskObjective>> {
        actor.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let mut objective = require_objective(&reads, id)?;
        objective.is_deleted = true;
        uow.update_objective(&objective)?;

        let notifications = match reads.work_task(objective.work_task_id)? {
            Some(task) => {
                let members = reads.active_task_members(task.id)?;
                with_task_project(
                    &reads,
                    &task,
                    NotificationDraft::objective_deleted(&task, &objective, actor),
                )?
                .fan_out(&Recipient::active_members(&members), actor, &channels, now)
            }
            None => Vec::new(),
        };
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            objective_id = %id,
            queued = notifications.len(),
            "objective deleted"
        );
        Ok(self.settle(objective, notifications))
    }

    /// Live objectives of a live task, by display order.
    pub fn list_objectives(&self, task_id: WorkTaskId) -> ServiceResult<Vec<TaskObjective>> {
        let reads = self.store.reads();
        require_task(&reads, task_id)?;
        Ok(reads.task_objectives(task_id)?)
    }

    pub fn get_objective(&self, id: TaskObjectiveId) -> ServiceResult<TaskObjective> {
        require_objective(&self.store.reads(), id)
    }
}
