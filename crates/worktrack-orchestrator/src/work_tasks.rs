use std::collections::{BTreeSet, HashSet};

use time::OffsetDateTime;
use worktrack_core::{
    diff_tracked, now_utc, Actor, AssigneeInput, EntityKind, MemberLifecycle, NewTaskAction,
    NotificationChannel, NotificationDraft, NotificationMessage, Page, PageRequest, Recipient,
    TaskMember, TaskMemberId, WorkAreaId, WorkError, WorkTask, WorkTaskId, WorkTaskInput,
};
use worktrack_store_sqlite::{UnitOfWork, WorkTaskGraph, WorkTaskQuery};

use crate::{
    require_parent_area, require_task, with_task_project, Applied, NotificationDispatcher,
    Orchestrator, ServiceResult,
};

/// What a task cascade removed, captured before the rows went away.
pub(crate) struct TaskCascade {
    pub(crate) task: WorkTask,
    pub(crate) former_active_members: Vec<TaskMember>,
    pub(crate) notifications: Vec<NotificationMessage>,
}

/// Removes a task and everything it owns inside `uow`, and builds the
/// deletion notices for the members who were active beforehand.
pub(crate) fn cascade_delete_task(
    uow: &UnitOfWork<'_>,
    graph: WorkTaskGraph,
    project_id: Option<&str>,
    actor: &Actor,
    channels: &BTreeSet<NotificationChannel>,
    now: OffsetDateTime,
) -> anyhow::Result<TaskCascade> {
    let former_active_members = graph.active_members();
    let task = graph.task;
    let id = task.id;

    uow.flag_work_task_deleted(id)?;
    let members = uow.delete_task_members_for_task(id)?;
    let objectives = uow.delete_objectives_for_task(id)?;
    let actions = uow.delete_actions_for_task(id)?;
    let comments = uow.delete_comments_for_task(id)?;
    uow.delete_work_task(id)?;

    tracing::debug!(
        work_task_id = %id,
        members,
        objectives,
        actions,
        comments,
        "work task cascade removed children"
    );

    let mut draft = NotificationDraft::task_deleted(&task, actor);
    if let Some(project_id) = project_id {
        draft = draft.with_project(project_id);
    }
    let notifications = draft.fan_out(
        &Recipient::active_members(&former_active_members),
        actor,
        channels,
        now,
    );

    Ok(TaskCascade {
        task,
        former_active_members,
        notifications,
    })
}

impl<D: NotificationDispatcher> Orchestrator<D> {
    /// Creates a task in a live work area, optionally with its first members.
    ///
    /// Progress always starts at 0. When the creator is among the initial
    /// members they receive one creation notice at their membership address.
    pub fn create_work_task(
        &mut self,
        actor: &Actor,
        input: &WorkTaskInput,
        assignees: &[AssigneeInput],
    ) -> ServiceResult<Applied<WorkTask>> {
        actor.validate()?;
        input.validate()?;
        let mut seen = HashSet::new();
        for assignee in assignees {
            assignee.validate()?;
            if !seen.insert(assignee.user_id.as_str()) {
                return Err(WorkError::Validation(format!(
                    "user {} is listed more than once as an assignee",
                    assignee.user_id
                ))
                .into());
            }
        }

        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let area = require_parent_area(&uow.reads(), input.work_area_id)?;

        let task = WorkTask {
            id: WorkTaskId::new(),
            title: input.title.clone(),
            description: input.description.clone(),
            status: input.status.clone(),
            priority: input.priority.clone(),
            start_date: input.start_date,
            end_date: input.end_date,
            due_date: input.due_date,
            progress: 0,
            display_order: input.display_order,
            work_area_id: area.id,
            created_by_user_id: actor.user_id.clone(),
            created_by_user_name: actor.user_name.clone(),
            created_date: now,
            is_deleted: false,
        };
        uow.insert_work_task(&task)?;

        let members: Vec<TaskMember> = assignees
            .iter()
            .map(|assignee| TaskMember {
                id: TaskMemberId::new(),
                work_task_id: task.id,
                user_id: assignee.user_id.clone(),
                user_name: assignee.user_name.clone(),
                user_email: assignee.user_email.clone(),
                role: assignee.role.clone(),
                assigned_by_user_id: actor.user_id.clone(),
                assigned_date: now,
                lifecycle: MemberLifecycle::Active,
            })
            .collect();
        for member in &members {
            uow.insert_task_member(member)?;
        }

        uow.audit()
            .append(&NewTaskAction::created(&task, actor, now))?;

        let notifications = match Recipient::member_named(&members, &actor.user_id) {
            Some(creator) => NotificationDraft::task_created(&task, actor)
                .with_project(area.project_id.clone())
                .fan_out(&[creator], actor, &channels, now),
            None => Vec::new(),
        };
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            work_task_id = %task.id,
            work_area_id = %task.work_area_id,
            members = members.len(),
            queued = notifications.len(),
            "work task created"
        );
        Ok(self.settle(task, notifications))
    }

    pub fn get_work_task(&self, id: WorkTaskId) -> ServiceResult<WorkTask> {
        require_task(&self.store.reads(), id)
    }

    /// The task with its members, objectives, action log and comments.
    pub fn get_work_task_details(&self, id: WorkTaskId) -> ServiceResult<WorkTaskGraph> {
        self.store
            .reads()
            .work_task_graph(id)?
            .filter(|graph| !graph.task.is_deleted)
            .ok_or_else(|| WorkError::not_found(EntityKind::WorkTask, id).into())
    }

    pub fn list_work_tasks(
        &self,
        query: &WorkTaskQuery,
        page: PageRequest,
    ) -> ServiceResult<Page<WorkTask>> {
        page.validate()?;
        Ok(self.store.reads().list_work_tasks(query, page)?)
    }

    pub fn list_work_tasks_in_area(
        &self,
        area_id: WorkAreaId,
        page: PageRequest,
    ) -> ServiceResult<Page<WorkTask>> {
        page.validate()?;
        let reads = self.store.reads();
        if reads.work_area(area_id)?.is_none() {
            return Err(WorkError::not_found(EntityKind::WorkArea, area_id).into());
        }
        let query = WorkTaskQuery {
            work_area_id: Some(area_id),
            search: None,
        };
        Ok(reads.list_work_tasks(&query, page)?)
    }

    /// Tasks the user created or is actively assigned to, newest first.
    pub fn get_mine(&self, user_id: &str, page: PageRequest) -> ServiceResult<Page<WorkTask>> {
        page.validate()?;
        if user_id.trim().is_empty() {
            return Err(WorkError::Validation("user_id MUST be provided".to_string()).into());
        }
        Ok(self.store.reads().list_tasks_for_user(user_id, page)?)
    }

    /// Replaces the editable fields of a task.
    ///
    /// One `Updated` action is appended per changed tracked field, and active
    /// members get one notice for the whole update. An update that changes
    /// nothing records nothing and notifies nobody.
    pub fn update_work_task(
        &mut self,
        actor: &Actor,
        id: WorkTaskId,
        input: &WorkTaskInput,
    ) -> ServiceResult<Applied<WorkTask>> {
        actor.validate()?;
        input.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let graph = reads
            .work_task_graph(id)?
            .filter(|graph| !graph.task.is_deleted)
            .ok_or_else(|| WorkError::not_found(EntityKind::WorkTask, id))?;

        let before = &graph.task;
        if input.work_area_id != before.work_area_id {
            require_parent_area(&reads, input.work_area_id)?;
        }

        let after = before.patched(input);
        let changes = diff_tracked(before, &after);
        uow.update_work_task(&after)?;

        let audit = uow.audit();
        for change in &changes.changes {
            tracing::debug!(
                work_task_id = %id,
                field = change.field,
                old_value = %change.old_value,
                new_value = %change.new_value,
                "work task field changed"
            );
            audit.append(&NewTaskAction::field_updated(id, change, actor, now))?;
        }

        let notifications = if changes.is_empty() {
            Vec::new()
        } else {
            let draft = with_task_project(
                &reads,
                &after,
                NotificationDraft::task_updated(&after, &changes, actor),
            )?;
            draft.fan_out(
                &Recipient::active_members(&graph.members),
                actor,
                &channels,
                now,
            )
        };
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            work_task_id = %id,
            changed_fields = changes.len(),
            queued = notifications.len(),
            "work task updated"
        );
        Ok(self.settle(after, notifications))
    }

    /// Deletes the task with its members, objectives, action log and
    /// comments. Members active before the delete are notified.
    pub fn delete_work_task(
        &mut self,
        actor: &Actor,
        id: WorkTaskId,
    ) -> ServiceResult<Applied<WorkTask>> {
        actor.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let graph = reads
            .work_task_graph(id)?
            .filter(|graph| !graph.task.is_deleted)
            .ok_or_else(|| WorkError::not_found(EntityKind::WorkTask, id))?;
        let project_id = reads
            .work_area(graph.task.work_area_id)?
            .map(|area| area.project_id);

        let cascade = cascade_delete_task(
            &uow,
            graph,
            project_id.as_deref(),
            actor,
            &channels,
            now,
        )?;
        uow.enqueue_notifications(&cascade.notifications)?;
        uow.commit()?;

        tracing::info!(
            work_task_id = %id,
            former_members = cascade.former_active_members.len(),
            queued = cascade.notifications.len(),
            "work task deleted"
        );
        Ok(self.settle(cascade.task, cascade.notifications))
    }
}
