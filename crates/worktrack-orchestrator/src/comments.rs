use worktrack_core::{
    now_utc, validate_comment_content, Actor, Comment, CommentId, EntityKind, NotificationDraft,
    Page, PageRequest, Recipient, TaskAction, WorkError, WorkTaskId,
};
use worktrack_store_sqlite::Reads;

use crate::{
    require_task, with_task_project, Applied, NotificationDispatcher, Orchestrator, ServiceResult,
};

/// Live comment written by `actor`. Anyone else gets `Unauthorized`.
fn require_own_comment(reads: &Reads<'_>, id: CommentId, actor: &Actor) -> ServiceResult<Comment> {
    let comment = reads
        .comment(id)?
        .ok_or_else(|| WorkError::not_found(EntityKind::Comment, id))?;
    if comment.user_id != actor.user_id {
        return Err(WorkError::Unauthorized(format!(
            "comment {id} belongs to another user"
        ))
        .into());
    }
    Ok(comment)
}

impl<D: NotificationDispatcher> Orchestrator<D> {
    pub fn add_comment(
        &mut self,
        actor: &Actor,
        task_id: WorkTaskId,
        content: &str,
    ) -> ServiceResult<Applied<Comment>> {
        actor.validate()?;
        validate_comment_content(content)?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let task = require_task(&reads, task_id)?;

        let comment = Comment {
            id: CommentId::new(),
            task_id,
            user_id: actor.user_id.clone(),
            user_name: actor.user_name.clone(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
        };
        uow.insert_comment(&comment)?;

        let members = reads.active_task_members(task_id)?;
        let notifications = with_task_project(
            &reads,
            &task,
            NotificationDraft::comment_added(&task, &comment),
        )?
        .fan_out(&Recipient::active_members(&members), actor, &channels, now);
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            comment_id = %comment.id,
            work_task_id = %task_id,
            queued = notifications.len(),
            "comment added"
        );
        Ok(self.settle(comment, notifications))
    }

    pub fn update_comment(
        &mut self,
        actor: &Actor,
        id: CommentId,
        content: &str,
    ) -> ServiceResult<Applied<Comment>> {
        actor.validate()?;
        validate_comment_content(content)?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let mut comment = require_own_comment(&reads, id, actor)?;
        let task = require_task(&reads, comment.task_id)?;

        content.clone_into(&mut comment.content);
        comment.updated_at = now;
        uow.update_comment(&comment)?;

        let members = reads.active_task_members(task.id)?;
        let notifications = with_task_project(
            &reads,
            &task,
            NotificationDraft::comment_updated(&task, &comment),
        )?
        .fan_out(&Recipient::active_members(&members), actor, &channels, now);
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(comment_id = %id, queued = notifications.len(), "comment updated");
        Ok(self.settle(comment, notifications))
    }

    /// Soft-deletes the actor's own comment.
    pub fn delete_comment(
        &mut self,
        actor: &Actor,
        id: CommentId,
    ) -> ServiceResult<Applied<Comment>> {
        actor.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let mut comment = require_own_comment(&reads, id, actor)?;
        let task = require_task(&reads, comment.task_id)?;

        comment.is_deleted = true;
        comment.updated_at = now;
        uow.update_comment(&comment)?;

        let members = reads.active_task_members(task.id)?;
        let notifications = with_task_project(
            &reads,
            &task,
            NotificationDraft::comment_deleted(&task, &comment),
        )?
        .fan_out(&Recipient::active_members(&members), actor, &channels, now);
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(comment_id = %id, queued = notifications.len(), "comment deleted");
        Ok(self.settle(comment, notifications))
    }

    /// Newest first.
    pub fn list_comments(
        &self,
        task_id: WorkTaskId,
        page: PageRequest,
    ) -> ServiceResult<Page<Comment>> {
        page.validate()?;
        let reads = self.store.reads();
        require_task(&reads, task_id)?;
        Ok(reads.list_comments(task_id, page)?)
    }

    /// The task's action log, newest first.
    pub fn list_task_actions(
        &self,
        task_id: WorkTaskId,
        page: PageRequest,
    ) -> ServiceResult<Page<TaskAction>> {
        page.validate()?;
        let reads = self.store.reads();
        require_task(&reads, task_id)?;
        Ok(reads.list_task_actions(task_id, page)?)
    }
}
