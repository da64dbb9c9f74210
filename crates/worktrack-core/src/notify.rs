//! Notification messages and the per-event content that goes into them.
//!
//! A [`NotificationDraft`] describes one event; [`NotificationDraft::fan_out`]
//! turns it into one [`NotificationMessage`] per recipient.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::{
    Actor, ChangeSet, Comment, NotificationId, TaskMember, TaskObjective, WorkArea, WorkTask,
    WorkTaskId,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TaskCreated,
    TaskUpdated,
    TaskStatusChanged,
    TaskDeleted,
    TaskAssigned,
    TaskUnassigned,
    TaskMemberUpdated,
    WorkAreaUpdated,
    WorkAreaDeleted,
    ObjectiveCreated,
    ObjectiveUpdated,
    ObjectiveCompleted,
    ObjectiveReopened,
    ObjectiveDeleted,
    TaskCommentAdded,
    TaskCommentUpdated,
    TaskCommentDeleted,
}

impl NotificationType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskStatusChanged => "task_status_changed",
            Self::TaskDeleted => "task_deleted",
            Self::TaskAssigned => "task_assigned",
            Self::TaskUnassigned => "task_unassigned",
            Self::TaskMemberUpdated => "task_member_updated",
            Self::WorkAreaUpdated => "work_area_updated",
            Self::WorkAreaDeleted => "work_area_deleted",
            Self::ObjectiveCreated => "objective_created",
            Self::ObjectiveUpdated => "objective_updated",
            Self::ObjectiveCompleted => "objective_completed",
            Self::ObjectiveReopened => "objective_reopened",
            Self::ObjectiveDeleted => "objective_deleted",
            Self::TaskCommentAdded => "task_comment_added",
            Self::TaskCommentUpdated => "task_comment_updated",
            Self::TaskCommentDeleted => "task_comment_deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    InApp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationMessage {
    pub id: NotificationId,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub task_id: Option<WorkTaskId>,
    pub project_id: Option<String>,
    pub priority: NotificationPriority,
    pub channels: BTreeSet<NotificationChannel>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub metadata: BTreeMap<String, Value>,
}

/// Someone who receives a notification, with the address it is sent to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: String,
    pub address: String,
}

impl Recipient {
    #[must_use]
    pub fn from_member(member: &TaskMember) -> Self {
        Self {
            user_id: member.user_id.clone(),
            address: member.recipient_address().to_string(),
        }
    }

    /// Every active member, in the order given.
    #[must_use]
    pub fn active_members(members: &[TaskMember]) -> Vec<Self> {
        members
            .iter()
            .filter(|member| member.is_active())
            .map(Self::from_member)
            .collect()
    }

    /// The active membership of `user_id`, if any.
    #[must_use]
    pub fn member_named(members: &[TaskMember], user_id: &str) -> Option<Self> {
        members
            .iter()
            .find(|member| member.is_active() && member.user_id == user_id)
            .map(Self::from_member)
    }
}

/// Keeps the first occurrence of every user id.
pub fn distinct_recipients(recipients: impl IntoIterator<Item = Recipient>) -> Vec<Recipient> {
    let mut seen = BTreeSet::new();
    recipients
        .into_iter()
        .filter(|recipient| seen.insert(recipient.user_id.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub task_id: Option<WorkTaskId>,
    pub project_id: Option<String>,
    pub priority: NotificationPriority,
    pub metadata: BTreeMap<String, Value>,
}

impl NotificationDraft {
    fn new(notification_type: NotificationType, title: String, message: String) -> Self {
        Self {
            notification_type,
            title,
            message,
            task_id: None,
            project_id: None,
            priority: NotificationPriority::Normal,
            metadata: BTreeMap::new(),
        }
    }

    fn for_task(
        notification_type: NotificationType,
        task: &WorkTask,
        title: String,
        message: String,
    ) -> Self {
        let mut draft = Self::new(notification_type, title, message);
        draft.task_id = Some(task.id);
        draft
            .metadata
            .insert("work_area_id".to_string(), json!(task.work_area_id));
        draft
    }

    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// One message per recipient, in recipient order.
    #[must_use]
    pub fn fan_out(
        &self,
        recipients: &[Recipient],
        actor: &Actor,
        channels: &BTreeSet<NotificationChannel>,
        created_at: OffsetDateTime,
    ) -> Vec<NotificationMessage> {
        recipients
            .iter()
            .map(|recipient| {
                let mut metadata = self.metadata.clone();
                metadata.insert("recipient_address".to_string(), json!(recipient.address));
                metadata.insert("actor_id".to_string(), json!(actor.user_id));

                NotificationMessage {
                    id: NotificationId::new(),
                    user_id: recipient.user_id.clone(),
                    title: self.title.clone(),
                    message: self.message.clone(),
                    notification_type: self.notification_type,
                    task_id: self.task_id,
                    project_id: self.project_id.clone(),
                    priority: self.priority,
                    channels: channels.clone(),
                    created_at,
                    metadata,
                }
            })
            .collect()
    }

    #[must_use]
    pub fn task_created(task: &WorkTask, actor: &Actor) -> Self {
        Self::for_task(
            NotificationType::TaskCreated,
            task,
            "Task created".to_string(),
            format!("{} created task '{}'", actor.user_name, task.title),
        )
    }

    /// Status moves get their own type; any other edit is a plain update.
    #[must_use]
    pub fn task_updated(task: &WorkTask, changes: &ChangeSet, actor: &Actor) -> Self {
        let notification_type = if changes.touches("Status") {
            NotificationType::TaskStatusChanged
        } else {
            NotificationType::TaskUpdated
        };
        let message = if changes.touches("Status") {
            format!(
                "{} moved '{}' to {}",
                actor.user_name, task.title, task.status
            )
        } else {
            format!(
                "{} updated '{}': {}",
                actor.user_name,
                task.title,
                changes.field_names().join(", ")
            )
        };

        Self::for_task(notification_type, task, "Task updated".to_string(), message)
            .with_metadata("changed_fields", json!(changes.field_names()))
    }

    #[must_use]
    pub fn task_deleted(task: &WorkTask, actor: &Actor) -> Self {
        Self::for_task(
            NotificationType::TaskDeleted,
            task,
            "Task deleted".to_string(),
            format!("{} deleted task '{}'", actor.user_name, task.title),
        )
        .with_priority(NotificationPriority::High)
    }

    #[must_use]
    pub fn task_assigned(task: &WorkTask, member: &TaskMember, actor: &Actor) -> Self {
        Self::for_task(
            NotificationType::TaskAssigned,
            task,
            "Task assigned".to_string(),
            format!(
                "{} assigned {} to '{}'",
                actor.user_name, member.user_name, task.title
            ),
        )
        .with_metadata("member_id", json!(member.id))
    }

    #[must_use]
    pub fn task_unassigned(task: &WorkTask, member: &TaskMember, actor: &Actor) -> Self {
        Self::for_task(
            NotificationType::TaskUnassigned,
            task,
            "Task unassigned".to_string(),
            format!(
                "{} removed {} from '{}'",
                actor.user_name, member.user_name, task.title
            ),
        )
        .with_metadata("member_id", json!(member.id))
    }

    #[must_use]
    pub fn task_member_updated(task: &WorkTask, member: &TaskMember, actor: &Actor) -> Self {
        Self::for_task(
            NotificationType::TaskMemberUpdated,
            task,
            "Task membership updated".to_string(),
            format!(
                "{} changed your role on '{}' to {}",
                actor.user_name, task.title, member.role
            ),
        )
        .with_metadata("member_id", json!(member.id))
    }

    #[must_use]
    pub fn work_area_updated(area: &WorkArea, changes: &ChangeSet, actor: &Actor) -> Self {
        let mut body = format!("{} updated work area '{}'", actor.user_name, area.name);
        if !changes.is_empty() {
            body.push_str(": ");
            body.push_str(&changes.field_names().join(", "));
        }
        Self::new(
            NotificationType::WorkAreaUpdated,
            "Work area updated".to_string(),
            body,
        )
        .with_project(area.project_id.clone())
        .with_metadata("work_area_id", json!(area.id))
        .with_metadata("changed_fields", json!(changes.field_names()))
    }

    #[must_use]
    pub fn work_area_deleted(area: &WorkArea, deleted_tasks: usize, actor: &Actor) -> Self {
        Self::new(
            NotificationType::WorkAreaDeleted,
            "Work area deleted".to_string(),
            format!(
                "{} deleted work area '{}' and its {deleted_tasks} task(s)",
                actor.user_name, area.name
            ),
        )
        .with_project(area.project_id.clone())
        .with_priority(NotificationPriority::High)
        .with_metadata("work_area_id", json!(area.id))
        .with_metadata("deleted_tasks", json!(deleted_tasks))
    }

    #[must_use]
    pub fn objective_created(task: &WorkTask, objective: &TaskObjective, actor: &Actor) -> Self {
        Self::for_task(
            NotificationType::ObjectiveCreated,
            task,
            "Objective added".to_string(),
            format!(
                "{} added objective '{}' to '{}'",
                actor.user_name, objective.title, task.title
            ),
        )
        .with_metadata("objective_id", json!(objective.id))
    }

    #[must_use]
    pub fn objective_updated(task: &WorkTask, objective: &TaskObjective, actor: &Actor) -> Self {
        Self::for_task(
            NotificationType::ObjectiveUpdated,
            task,
            "Objective updated".to_string(),
            format!(
                "{} updated objective '{}' on '{}'",
                actor.user_name, objective.title, task.title
            ),
        )
        .with_metadata("objective_id", json!(objective.id))
    }

    /// `objective_completed` or `objective_reopened` depending on the new state.
    #[must_use]
    pub fn objective_completion(
        task: &WorkTask,
        objective: &TaskObjective,
        actor: &Actor,
    ) -> Self {
        let (notification_type, title, verb) = if objective.is_completed {
            (
                NotificationType::ObjectiveCompleted,
                "Objective completed",
                "completed",
            )
        } else {
            (
                NotificationType::ObjectiveReopened,
                "Objective marked incomplete",
                "marked incomplete",
            )
        };

        Self::for_task(
            notification_type,
            task,
            title.to_string(),
            format!(
                "{} {verb} objective '{}' on '{}'",
                actor.user_name, objective.title, task.title
            ),
        )
        .with_metadata("objective_id", json!(objective.id))
    }

    #[must_use]
    pub fn objective_deleted(task: &WorkTask, objective: &TaskObjective, actor: &Actor) -> Self {
        Self::for_task(
            NotificationType::ObjectiveDeleted,
            task,
            "Objective removed".to_string(),
            format!(
                "{} removed objective '{}' from '{}'",
                actor.user_name, objective.title, task.title
            ),
        )
        .with_priority(NotificationPriority::High)
        .with_metadata("objective_id", json!(objective.id))
    }

    #[must_use]
    pub fn comment_added(task: &WorkTask, comment: &Comment) -> Self {
        Self::for_task(
            NotificationType::TaskCommentAdded,
            task,
            "New comment".to_string(),
            format!("{} commented on '{}'", comment.user_name, task.title),
        )
        .with_metadata("comment_id", json!(comment.id))
    }

    #[must_use]
    pub fn comment_updated(task: &WorkTask, comment: &Comment) -> Self {
        Self::for_task(
            NotificationType::TaskCommentUpdated,
            task,
            "Comment edited".to_string(),
            format!("{} edited a comment on '{}'", comment.user_name, task.title),
        )
        .with_metadata("comment_id", json!(comment.id))
    }

    #[must_use]
    pub fn comment_deleted(task: &WorkTask, comment: &Comment) -> Self {
        Self::for_task(
            NotificationType::TaskCommentDeleted,
            task,
            "Comment deleted".to_string(),
            format!("{} deleted a comment on '{}'", comment.user_name, task.title),
        )
        .with_priority(NotificationPriority::High)
        .with_metadata("comment_id", json!(comment.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diff_tracked, now_utc, MemberLifecycle, TaskMemberId, WorkAreaId, DEFAULT_MEMBER_ROLE,
    };

    fn fixture_task() -> WorkTask {
        WorkTask {
            id: WorkTaskId::new(),
            title: "Ship onboarding".to_string(),
            description: None,
            status: "Todo".to_string(),
            priority: "High".to_string(),
            start_date: None,
            end_date: None,
            due_date: None,
            progress: 10,
            display_order: 0,
            work_area_id: WorkAreaId::new(),
            created_by_user_id: "u1".to_string(),
            created_by_user_name: "Ana".to_string(),
            created_date: now_utc(),
            is_deleted: false,
        }
    }

    fn fixture_member(user_id: &str, lifecycle: MemberLifecycle) -> TaskMember {
        TaskMember {
            id: TaskMemberId::new(),
            work_task_id: WorkTaskId::new(),
            user_id: user_id.to_string(),
            user_name: format!("{user_id}-name"),
            user_email: Some(format!("{user_id}@example.com")),
            role: DEFAULT_MEMBER_ROLE.to_string(),
            assigned_by_user_id: "u1".to_string(),
            assigned_date: now_utc(),
            lifecycle,
        }
    }

    fn actor() -> Actor {
        Actor::new("u1", "Ana")
    }

    #[test]
    fn fan_out_addresses_every_recipient_once() {
        let draft = NotificationDraft::task_created(&fixture_task(), &actor());
        let recipients = vec![
            Recipient {
                user_id: "u2".to_string(),
                address: "u2@example.com".to_string(),
            },
            Recipient {
                user_id: "u3".to_string(),
                address: "u3-name".to_string(),
            },
        ];
        let channels = BTreeSet::from([NotificationChannel::Email]);

        let messages = draft.fan_out(&recipients, &actor(), &channels, now_utc());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].user_id, "u2");
        assert_eq!(messages[1].metadata["recipient_address"], json!("u3-name"));
        assert_eq!(messages[0].metadata["actor_id"], json!("u1"));
        assert_ne!(messages[0].id, messages[1].id);
    }

    #[test]
    fn fan_out_to_nobody_is_empty() {
        let draft = NotificationDraft::task_deleted(&fixture_task(), &actor());
        let messages = draft.fan_out(&[], &actor(), &BTreeSet::new(), now_utc());
        assert!(messages.is_empty());
    }

    #[test]
    fn active_member_filter_skips_inactive_rows() {
        let members = vec![
            fixture_member("u2", MemberLifecycle::Active),
            fixture_member("u3", MemberLifecycle::Inactive),
            fixture_member("u4", MemberLifecycle::Active),
        ];
        let recipients = Recipient::active_members(&members);
        let ids: Vec<_> = recipients.iter().map(|item| item.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u2", "u4"]);

        assert!(Recipient::member_named(&members, "u3").is_none());
        assert!(Recipient::member_named(&members, "u4").is_some());
    }

    #[test]
    fn distinct_recipients_keep_first_occurrence() {
        let first = Recipient {
            user_id: "u2".to_string(),
            address: "first".to_string(),
        };
        let dup = Recipient {
            user_id: "u2".to_string(),
            address: "second".to_string(),
        };
        let other = Recipient {
            user_id: "u3".to_string(),
            address: "third".to_string(),
        };

        let distinct = distinct_recipients(vec![first.clone(), dup, other.clone()]);
        assert_eq!(distinct, vec![first, other]);
    }

    #[test]
    fn status_edits_use_status_changed_type() {
        let before = fixture_task();
        let mut after = before.clone();
        after.status = "Done".to_string();

        let draft = NotificationDraft::task_updated(&after, &diff_tracked(&before, &after), &actor());
        assert_eq!(draft.notification_type, NotificationType::TaskStatusChanged);
        assert_eq!(draft.metadata["changed_fields"], json!(["Status"]));

        let mut retitled = before.clone();
        retitled.title = "Ship onboarding v2".to_string();
        let draft =
            NotificationDraft::task_updated(&retitled, &diff_tracked(&before, &retitled), &actor());
        assert_eq!(draft.notification_type, NotificationType::TaskUpdated);
    }

    #[test]
    fn completion_variant_follows_objective_state() {
        let task = fixture_task();
        let mut objective = TaskObjective {
            id: crate::TaskObjectiveId::new(),
            work_task_id: task.id,
            title: "Write docs".to_string(),
            display_order: 0,
            created_by_user_id: "u1".to_string(),
            created_date: now_utc(),
            is_completed: true,
            completed_date: Some(now_utc()),
            completed_by_user_id: Some("u1".to_string()),
            is_deleted: false,
        };

        let draft = NotificationDraft::objective_completion(&task, &objective, &actor());
        assert_eq!(draft.notification_type, NotificationType::ObjectiveCompleted);

        objective.is_completed = false;
        let draft = NotificationDraft::objective_completion(&task, &objective, &actor());
        assert_eq!(draft.notification_type, NotificationType::ObjectiveReopened);
    }

    #[test]
    fn type_codes_match_wire_names() {
        for notification_type in [
            NotificationType::TaskStatusChanged,
            NotificationType::WorkAreaDeleted,
            NotificationType::ObjectiveReopened,
            NotificationType::TaskCommentAdded,
        ] {
            let value = match serde_json::to_value(notification_type) {
                Ok(value) => value,
                Err(err) => panic!("failed to serialize type: {err}"),
            };
            assert_eq!(value, json!(notification_type.as_str()));
        }
    }

    #[test]
    fn message_wire_shape_uses_type_key() {
        let draft = NotificationDraft::task_deleted(&fixture_task(), &actor()).with_project("p-1");
        let recipients = vec![Recipient {
            user_id: "u2".to_string(),
            address: "u2@example.com".to_string(),
        }];
        let channels = BTreeSet::from([NotificationChannel::Email]);
        let messages = draft.fan_out(&recipients, &actor(), &channels, now_utc());

        let value = match serde_json::to_value(&messages[0]) {
            Ok(value) => value,
            Err(err) => panic!("failed to serialize message: {err}"),
        };
        assert_eq!(value["type"], json!("task_deleted"));
        assert_eq!(value["priority"], json!("high"));
        assert_eq!(value["channels"], json!(["email"]));
        assert_eq!(value["project_id"], json!("p-1"));
    }
}
