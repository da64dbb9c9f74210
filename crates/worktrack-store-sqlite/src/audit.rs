use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use worktrack_core::{NewTaskAction, TaskAction, TaskActionId};

use crate::timestamp;

/// Appends entries to a task's action log.
///
/// Entries are never updated. The table triggers reject UPDATE always and
/// DELETE outside of a task cascade.
pub struct AuditRecorder<'c> {
    conn: &'c Connection,
}

impl<'c> AuditRecorder<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn append(&self, action: &NewTaskAction) -> Result<TaskAction> {
        let recorded = TaskAction {
            id: TaskActionId::new(),
            work_task_id: action.work_task_id,
            action_type: action.action_type,
            description: action.description.clone(),
            old_value: action.old_value.clone(),
            new_value: action.new_value.clone(),
            action_date: action.action_date,
            user_id: action.actor.user_id.clone(),
            user_name: action.actor.user_name.clone(),
        };

        self.conn
            .execute(
                "INSERT INTO task_actions(
                    id, work_task_id, action_type, description, old_value, new_value,
                    action_date, user_id, user_name
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    recorded.id.to_string(),
                    recorded.work_task_id.to_string(),
                    recorded.action_type.as_str(),
                    recorded.description,
                    recorded.old_value,
                    recorded.new_value,
                    timestamp(recorded.action_date)?,
                    recorded.user_id,
                    recorded.user_name,
                ],
            )
            .with_context(|| {
                format!(
                    "failed to append {} action for work task {}",
                    recorded.action_type.as_str(),
                    recorded.work_task_id
                )
            })?;

        Ok(recorded)
    }
}
