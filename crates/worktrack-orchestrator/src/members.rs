use std::collections::BTreeSet;

use time::OffsetDateTime;
use worktrack_core::{
    distinct_recipients, now_utc, Actor, AssigneeInput, EntityKind, MemberLifecycle,
    NotificationChannel, NotificationDraft, NotificationMessage, Recipient, TaskMember,
    TaskMemberId, TaskMemberUpdate, WorkError, WorkTaskId,
};
use worktrack_store_sqlite::{Reads, UnitOfWork};

use crate::{
    require_parent_task, require_task, with_task_project, Applied, NotificationDispatcher,
    Orchestrator, ServiceResult,
};

fn ensure_not_assigned(reads: &Reads<'_>, task_id: WorkTaskId, user_id: &str) -> ServiceResult<()> {
    if reads.active_membership(task_id, user_id)?.is_some() {
        return Err(WorkError::Conflict(format!(
            "user {user_id} is already assigned to work task {task_id}"
        ))
        .into());
    }
    Ok(())
}

fn require_member(reads: &Reads<'_>, id: TaskMemberId) -> ServiceResult<TaskMember> {
    reads
        .task_member(id)?
        .ok_or_else(|| WorkError::not_found(EntityKind::TaskMember, id).into())
}

/// Flags an active membership inactive inside `uow` and builds the notice
/// for the removed user. No notice is built when the task is gone.
fn soft_remove(
    uow: &UnitOfWork<'_>,
    reads: &Reads<'_>,
    member: &mut TaskMember,
    actor: &Actor,
    channels: &BTreeSet<NotificationChannel>,
    now: OffsetDateTime,
) -> ServiceResult<Vec<NotificationMessage>> {
    member.lifecycle = MemberLifecycle::Inactive;
    uow.update_task_member(member)?;

    Ok(match reads.work_task(member.work_task_id)? {
        Some(task) => with_task_project(
            reads,
            &task,
            NotificationDraft::task_unassigned(&task, member, actor),
        )?
        .fan_out(&[Recipient::from_member(member)], actor, channels, now),
        None => Vec::new(),
    })
}

impl<D: NotificationDispatcher> Orchestrator<D> {
    /// Adds an active membership and notifies every active member of the
    /// task, the new one included.
    ///
    /// The one-active-membership-per-user rule is checked here, not by the
    /// store, so two concurrent identical requests can both pass the check.
    pub fn assign_work_task_to_user(
        &mut self,
        actor: &Actor,
        task_id: WorkTaskId,
        assignee: &AssigneeInput,
    ) -> ServiceResult<Applied<TaskMember>> {
        actor.validate()?;
        assignee.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let task = require_parent_task(&reads, task_id)?;
        ensure_not_assigned(&reads, task_id, &assignee.user_id)?;

        let member = TaskMember {
            id: TaskMemberId::new(),
            work_task_id: task_id,
            user_id: assignee.user_id.clone(),
            user_name: assignee.user_name.clone(),
            user_email: assignee.user_email.clone(),
            role: assignee.role.clone(),
            assigned_by_user_id: actor.user_id.clone(),
            assigned_date: now,
            lifecycle: MemberLifecycle::Active,
        };
        uow.insert_task_member(&member)?;

        let members = reads.active_task_members(task_id)?;
        let draft = with_task_project(
            &reads,
            &task,
            NotificationDraft::task_assigned(&task, &member, actor),
        )?;
        let notifications = draft.fan_out(
            &Recipient::active_members(&members),
            actor,
            &channels,
            now,
        );
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            work_task_id = %task_id,
            member_id = %member.id,
            user_id = %member.user_id,
            queued = notifications.len(),
            "task member assigned"
        );
        Ok(self.settle(member, notifications))
    }

    /// Same rules and notices as [`Self::assign_work_task_to_user`].
    pub fn create_task_member(
        &mut self,
        actor: &Actor,
        task_id: WorkTaskId,
        assignee: &AssigneeInput,
    ) -> ServiceResult<Applied<TaskMember>> {
        self.assign_work_task_to_user(actor, task_id, assignee)
    }

    /// Soft-removes the user's active membership, if there is one. A user
    /// with no active membership is not an error; nothing changes.
    pub fn remove_work_task_from_user(
        &mut self,
        actor: &Actor,
        task_id: WorkTaskId,
        user_id: &str,
    ) -> ServiceResult<Applied<Option<TaskMember>>> {
        actor.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let Some(mut member) = reads.active_membership(task_id, user_id)? else {
            drop(uow);
            tracing::debug!(work_task_id = %task_id, user_id, "no active membership to remove");
            return Ok(self.settle(None, Vec::new()));
        };

        let notifications = soft_remove(&uow, &reads, &mut member, actor, &channels, now)?;
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            work_task_id = %task_id,
            member_id = %member.id,
            queued = notifications.len(),
            "task member removed"
        );
        Ok(self.settle(Some(member), notifications))
    }

    /// Soft-removes one membership by id and notifies the removed user.
    /// Removing an already inactive membership changes nothing.
    pub fn remove_task_member(
        &mut self,
        actor: &Actor,
        id: TaskMemberId,
    ) -> ServiceResult<Applied<TaskMember>> {
        actor.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let mut member = require_member(&reads, id)?;
        if !member.is_active() {
            drop(uow);
            return Ok(self.settle(member, Vec::new()));
        }

        let notifications = soft_remove(&uow, &reads, &mut member, actor, &channels, now)?;
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            work_task_id = %member.work_task_id,
            member_id = %id,
            queued = notifications.len(),
            "task member removed"
        );
        Ok(self.settle(member, notifications))
    }

    /// Changes role, active flag and assigner. Identity fields never change.
    /// Reactivating re-checks the one-active-membership rule.
    pub fn update_task_member(
        &mut self,
        actor: &Actor,
        id: TaskMemberId,
        update: &TaskMemberUpdate,
    ) -> ServiceResult<Applied<TaskMember>> {
        actor.validate()?;
        if update.role.trim().is_empty() {
            return Err(WorkError::Validation("member role MUST be provided".to_string()).into());
        }
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let mut member = require_member(&reads, id)?;
        let task = require_task(&reads, member.work_task_id)?;

        if update.is_active && !member.is_active() {
            ensure_not_assigned(&reads, member.work_task_id, &member.user_id)?;
        }

        member.role.clone_from(&update.role);
        if !update.assigned_by_user_id.trim().is_empty() {
            member
                .assigned_by_user_id
                .clone_from(&update.assigned_by_user_id);
        }
        member.lifecycle = if update.is_active {
            MemberLifecycle::Active
        } else {
            MemberLifecycle::Inactive
        };
        uow.update_task_member(&member)?;

        let notifications = with_task_project(
            &reads,
            &task,
            NotificationDraft::task_member_updated(&task, &member, actor),
        )?
        .fan_out(&[Recipient::from_member(&member)], actor, &channels, now);
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            work_task_id = %member.work_task_id,
            member_id = %id,
            lifecycle = member.lifecycle.as_str(),
            queued = notifications.len(),
            "task member updated"
        );
        Ok(self.settle(member, notifications))
    }

    /// Physically deletes the membership and returns its last state tagged
    /// `Purged`. The remaining active members and the purged user are told.
    pub fn delete_task_member(
        &mut self,
        actor: &Actor,
        id: TaskMemberId,
    ) -> ServiceResult<Applied<TaskMember>> {
        actor.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let mut member = require_member(&reads, id)?;
        let task_id = member.work_task_id;

        uow.delete_task_member(id)?;
        member.lifecycle = MemberLifecycle::Purged;

        let notifications = match reads.work_task(task_id)? {
            Some(task) => {
                let remaining = reads.active_task_members(task_id)?;
                let recipients = distinct_recipients(
                    Recipient::active_members(&remaining)
                        .into_iter()
                        .chain(std::iter::once(Recipient::from_member(&member))),
                );
                with_task_project(
                    &reads,
                    &task,
                    NotificationDraft::task_unassigned(&task, &member, actor),
                )?
                .fan_out(&recipients, actor, &channels, now)
            }
            None => Vec::new(),
        };
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            work_task_id = %task_id,
            member_id = %id,
            queued = notifications.len(),
            "task member deleted"
        );
        Ok(self.settle(member, notifications))
    }

    /// Active members of a live task.
    pub fn list_task_members(&self, task_id: WorkTaskId) -> ServiceResult<Vec<TaskMember>> {
        let reads = self.store.reads();
        require_task(&reads, task_id)?;
        Ok(reads.active_task_members(task_id)?)
    }

    pub fn get_task_member(&self, id: TaskMemberId) -> ServiceResult<TaskMember> {
        require_member(&self.store.reads(), id)
    }
}
