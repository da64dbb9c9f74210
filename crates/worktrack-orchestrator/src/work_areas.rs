use worktrack_core::{
    diff_tracked, distinct_recipients, now_utc, Actor, EntityKind, NotificationDraft, Page,
    PageRequest, Recipient, WorkArea, WorkAreaId, WorkAreaInput, WorkError,
};
use worktrack_store_sqlite::WorkAreaQuery;

use crate::work_tasks::cascade_delete_task;
use crate::{Applied, NotificationDispatcher, Orchestrator, ServiceResult};

impl<D: NotificationDispatcher> Orchestrator<D> {
    /// Creates an active work area. Nobody is notified: an area has no member
    /// list of its own.
    pub fn create_work_area(
        &mut self,
        actor: &Actor,
        input: &WorkAreaInput,
    ) -> ServiceResult<Applied<WorkArea>> {
        actor.validate()?;
        input.validate()?;

        let created_by_user_id = input
            .created_by_user_id
            .clone()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| actor.user_id.clone());

        let area = WorkArea {
            id: WorkAreaId::new(),
            name: input.name.clone(),
            description: input.description.clone(),
            display_order: input.display_order,
            project_id: input.project_id.clone(),
            created_by_user_id,
            created_date: now_utc(),
            is_active: true,
            is_deleted: false,
        };

        let uow = self.store.begin()?;
        uow.insert_work_area(&area)?;
        uow.commit()?;

        tracing::info!(work_area_id = %area.id, project_id = %area.project_id, "work area created");
        Ok(self.settle(area, Vec::new()))
    }

    pub fn get_work_area(&self, id: WorkAreaId) -> ServiceResult<WorkArea> {
        self.store
            .reads()
            .work_area(id)?
            .ok_or_else(|| WorkError::not_found(EntityKind::WorkArea, id).into())
    }

    pub fn list_work_areas(
        &self,
        query: &WorkAreaQuery,
        page: PageRequest,
    ) -> ServiceResult<Page<WorkArea>> {
        page.validate()?;
        Ok(self.store.reads().list_work_areas(query, page)?)
    }

    /// Copies name, description, display order and project onto the area.
    /// The creator is only replaced by a non-blank value. Every committed
    /// update notifies the distinct active members across the area's tasks,
    /// even when no tracked field changed.
    pub fn update_work_area(
        &mut self,
        actor: &Actor,
        id: WorkAreaId,
        input: &WorkAreaInput,
    ) -> ServiceResult<Applied<WorkArea>> {
        actor.validate()?;
        input.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let before = reads
            .work_area(id)?
            .ok_or_else(|| WorkError::not_found(EntityKind::WorkArea, id))?;

        let mut after = before.clone();
        after.name.clone_from(&input.name);
        after.description.clone_from(&input.description);
        after.display_order = input.display_order;
        after.project_id.clone_from(&input.project_id);
        if let Some(created_by) = input
            .created_by_user_id
            .as_ref()
            .filter(|value| !value.trim().is_empty())
        {
            after.created_by_user_id.clone_from(created_by);
        }

        let changes = diff_tracked(&before, &after);
        uow.update_work_area(&after)?;

        let recipients = distinct_recipients(
            reads
                .active_members_for_area(id)?
                .iter()
                .map(Recipient::from_member),
        );
        let notifications = NotificationDraft::work_area_updated(&after, &changes, actor)
            .fan_out(&recipients, actor, &channels, now);
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            work_area_id = %id,
            changed_fields = changes.len(),
            queued = notifications.len(),
            "work area updated"
        );
        Ok(self.settle(after, notifications))
    }

    /// Deletes the area after running the full task delete for each of its
    /// tasks, all in one unit of work.
    ///
    /// Each task's former members get that task's deletion notice, and every
    /// distinct user across all of them gets one more area deletion notice.
    pub fn delete_work_area(
        &mut self,
        actor: &Actor,
        id: WorkAreaId,
    ) -> ServiceResult<Applied<WorkArea>> {
        actor.validate()?;
        let channels = self.config.default_channels.clone();
        let now = now_utc();

        let uow = self.store.begin()?;
        let reads = uow.reads();
        let area = reads
            .work_area(id)?
            .ok_or_else(|| WorkError::not_found(EntityKind::WorkArea, id))?;

        let mut notifications = Vec::new();
        let mut former_members = Vec::new();
        let tasks = reads.work_tasks_in_area(id)?;
        let task_count = tasks.len();
        for task in tasks {
            let Some(graph) = reads.work_task_graph(task.id)? else {
                continue;
            };
            let cascade = cascade_delete_task(
                &uow,
                graph,
                Some(area.project_id.as_str()),
                actor,
                &channels,
                now,
            )?;
            notifications.extend(cascade.notifications);
            former_members.extend(cascade.former_active_members);
        }

        uow.delete_work_area(id)?;

        let union = distinct_recipients(former_members.iter().map(Recipient::from_member));
        notifications.extend(
            NotificationDraft::work_area_deleted(&area, task_count, actor).fan_out(
                &union,
                actor,
                &channels,
                now,
            ),
        );
        uow.enqueue_notifications(&notifications)?;
        uow.commit()?;

        tracing::info!(
            work_area_id = %id,
            tasks = task_count,
            distinct_members = union.len(),
            queued = notifications.len(),
            "work area deleted"
        );
        Ok(self.settle(area, notifications))
    }
}
