use std::io;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use rusqlite::types::Type;
use rusqlite::Row;
use time::OffsetDateTime;
use worktrack_core::{
    parse_date, parse_rfc3339_utc, Comment, MemberLifecycle, TaskAction, TaskActionType,
    TaskMember, TaskObjective, WorkArea, WorkTask,
};

pub(crate) const WORK_AREA_COLUMNS: &str = "id, name, description, display_order, project_id, \
     created_by_user_id, created_date, is_active, is_deleted";

pub(crate) const WORK_TASK_COLUMNS: &str = "id, title, description, status, priority, \
     start_date, end_date, due_date, progress, display_order, work_area_id, \
     created_by_user_id, created_by_user_name, created_date, is_deleted";

pub(crate) const TASK_MEMBER_COLUMNS: &str = "id, work_task_id, user_id, user_name, user_email, \
     role, assigned_by_user_id, assigned_date, lifecycle";

pub(crate) const OBJECTIVE_COLUMNS: &str = "id, work_task_id, title, display_order, \
     created_by_user_id, created_date, is_completed, completed_date, completed_by_user_id, \
     is_deleted";

pub(crate) const TASK_ACTION_COLUMNS: &str = "id, work_task_id, action_type, description, \
     old_value, new_value, action_date, user_id, user_name";

pub(crate) const COMMENT_COLUMNS: &str =
    "id, task_id, user_id, user_name, content, created_at, updated_at, is_deleted";

pub(crate) fn parse_work_area_row(row: &Row<'_>) -> rusqlite::Result<WorkArea> {
    Ok(WorkArea {
        id: parse_id(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        display_order: row.get(3)?,
        project_id: row.get(4)?,
        created_by_user_id: row.get(5)?,
        created_date: parse_timestamp(row, 6)?,
        is_active: row.get::<_, i64>(7)? == 1,
        is_deleted: row.get::<_, i64>(8)? == 1,
    })
}

pub(crate) fn parse_work_task_row(row: &Row<'_>) -> rusqlite::Result<WorkTask> {
    Ok(WorkTask {
        id: parse_id(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        priority: row.get(4)?,
        start_date: parse_optional_date(row, 5)?,
        end_date: parse_optional_date(row, 6)?,
        due_date: parse_optional_date(row, 7)?,
        progress: row.get(8)?,
        display_order: row.get(9)?,
        work_area_id: parse_id(row, 10)?,
        created_by_user_id: row.get(11)?,
        created_by_user_name: row.get(12)?,
        created_date: parse_timestamp(row, 13)?,
        is_deleted: row.get::<_, i64>(14)? == 1,
    })
}

pub(crate) fn parse_task_member_row(row: &Row<'_>) -> rusqlite::Result<TaskMember> {
    let raw_lifecycle: String = row.get(8)?;
    let lifecycle = MemberLifecycle::parse(&raw_lifecycle)
        .ok_or_else(|| invalid_data(8, format!("unknown member lifecycle `{raw_lifecycle}`")))?;

    Ok(TaskMember {
        id: parse_id(row, 0)?,
        work_task_id: parse_id(row, 1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        user_email: row.get(4)?,
        role: row.get(5)?,
        assigned_by_user_id: row.get(6)?,
        assigned_date: parse_timestamp(row, 7)?,
        lifecycle,
    })
}

pub(crate) fn parse_objective_row(row: &Row<'_>) -> rusqlite::Result<TaskObjective> {
    Ok(TaskObjective {
        id: parse_id(row, 0)?,
        work_task_id: parse_id(row, 1)?,
        title: row.get(2)?,
        display_order: row.get(3)?,
        created_by_user_id: row.get(4)?,
        created_date: parse_timestamp(row, 5)?,
        is_completed: row.get::<_, i64>(6)? == 1,
        completed_date: parse_optional_timestamp(row, 7)?,
        completed_by_user_id: row.get(8)?,
        is_deleted: row.get::<_, i64>(9)? == 1,
    })
}

pub(crate) fn parse_task_action_row(row: &Row<'_>) -> rusqlite::Result<TaskAction> {
    let raw_type: String = row.get(2)?;
    let action_type = TaskActionType::parse(&raw_type)
        .ok_or_else(|| invalid_data(2, format!("unknown action type `{raw_type}`")))?;

    Ok(TaskAction {
        id: parse_id(row, 0)?,
        work_task_id: parse_id(row, 1)?,
        action_type,
        description: row.get(3)?,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        action_date: parse_timestamp(row, 6)?,
        user_id: row.get(7)?,
        user_name: row.get(8)?,
    })
}

pub(crate) fn parse_comment_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: parse_id(row, 0)?,
        task_id: parse_id(row, 1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        content: row.get(4)?,
        created_at: parse_timestamp(row, 5)?,
        updated_at: parse_timestamp(row, 6)?,
        is_deleted: row.get::<_, i64>(7)? == 1,
    })
}

/// Storage spelling of a lifecycle; purged members have no row.
pub(crate) fn stored_lifecycle(lifecycle: MemberLifecycle) -> Result<&'static str> {
    match lifecycle {
        MemberLifecycle::Active | MemberLifecycle::Inactive => Ok(lifecycle.as_str()),
        MemberLifecycle::Purged => Err(anyhow!("purged task members cannot be stored")),
    }
}

pub(crate) fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

fn parse_id<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(idx)?;
    T::from_str(&raw).map_err(|err| invalid_data(idx, err.to_string()))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let raw: String = row.get(idx)?;
    parse_rfc3339_utc(&raw).map_err(|err| invalid_data(idx, err.to_string()))
}

fn parse_optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| parse_rfc3339_utc(&value).map_err(|err| invalid_data(idx, err.to_string())))
        .transpose()
}

fn parse_optional_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<time::Date>> {
    let raw: Option<String> = row.get(idx)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_date(value)
            .map(Some)
            .map_err(|err| invalid_data(idx, err.to_string())),
    }
}

pub(crate) fn invalid_data(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(io::Error::new(io::ErrorKind::InvalidData, message)),
    )
}
