#![allow(clippy::missing_errors_doc)]

//! SQLite entity store for the work hierarchy.
//!
//! Reads go through [`Reads`], available on the store itself and inside a
//! [`UnitOfWork`]. Every mutation happens inside a unit of work, which wraps a
//! single immediate transaction and is persisted by [`UnitOfWork::commit`].
//! Dropping a unit of work without committing rolls it back.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use time::OffsetDateTime;
use worktrack_core::{
    format_date, format_timestamp, now_utc, Comment, TaskMember, TaskMemberId, TaskObjective,
    WorkArea, WorkAreaId, WorkTask, WorkTaskId,
};

mod audit;
mod outbox;
mod reads;
mod rows;

pub use audit::AuditRecorder;
pub use outbox::{DeliveryState, OutboxEntry, OutboxStatus};
pub use reads::{Reads, WorkAreaQuery, WorkTaskGraph, WorkTaskQuery};

const SCHEMA_MIGRATION_VERSION: i64 = 1;

const SCHEMA_V1: &str = r"
CREATE TABLE IF NOT EXISTS work_areas (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  description TEXT,
  display_order INTEGER NOT NULL DEFAULT 0,
  project_id TEXT NOT NULL,
  created_by_user_id TEXT NOT NULL,
  created_date TEXT NOT NULL,
  is_active INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1)),
  is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_work_areas_project
  ON work_areas(project_id, is_deleted, display_order);

CREATE TABLE IF NOT EXISTS work_tasks (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  description TEXT,
  status TEXT NOT NULL,
  priority TEXT NOT NULL,
  start_date TEXT,
  end_date TEXT,
  due_date TEXT,
  progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
  display_order INTEGER NOT NULL DEFAULT 0,
  work_area_id TEXT NOT NULL,
  created_by_user_id TEXT NOT NULL,
  created_by_user_name TEXT NOT NULL,
  created_date TEXT NOT NULL,
  is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
  FOREIGN KEY (work_area_id) REFERENCES work_areas(id)
);

CREATE INDEX IF NOT EXISTS idx_work_tasks_area
  ON work_tasks(work_area_id, is_deleted, display_order);
CREATE INDEX IF NOT EXISTS idx_work_tasks_creator
  ON work_tasks(created_by_user_id, is_deleted);

CREATE TABLE IF NOT EXISTS task_members (
  id TEXT PRIMARY KEY,
  work_task_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  user_name TEXT NOT NULL,
  user_email TEXT,
  role TEXT NOT NULL,
  assigned_by_user_id TEXT NOT NULL,
  assigned_date TEXT NOT NULL,
  lifecycle TEXT NOT NULL CHECK (lifecycle IN ('active', 'inactive')),
  FOREIGN KEY (work_task_id) REFERENCES work_tasks(id)
);

CREATE INDEX IF NOT EXISTS idx_task_members_task_user
  ON task_members(work_task_id, user_id, lifecycle);
CREATE INDEX IF NOT EXISTS idx_task_members_user
  ON task_members(user_id, lifecycle);

CREATE TABLE IF NOT EXISTS task_objectives (
  id TEXT PRIMARY KEY,
  work_task_id TEXT NOT NULL,
  title TEXT NOT NULL,
  display_order INTEGER NOT NULL DEFAULT 0,
  created_by_user_id TEXT NOT NULL,
  created_date TEXT NOT NULL,
  is_completed INTEGER NOT NULL DEFAULT 0 CHECK (is_completed IN (0, 1)),
  completed_date TEXT,
  completed_by_user_id TEXT,
  is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
  FOREIGN KEY (work_task_id) REFERENCES work_tasks(id)
);

CREATE INDEX IF NOT EXISTS idx_task_objectives_task
  ON task_objectives(work_task_id, is_deleted, display_order);

CREATE TABLE IF NOT EXISTS task_actions (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  work_task_id TEXT NOT NULL,
  action_type TEXT NOT NULL CHECK (action_type IN ('Created', 'Updated')),
  description TEXT NOT NULL,
  old_value TEXT,
  new_value TEXT,
  action_date TEXT NOT NULL,
  user_id TEXT NOT NULL,
  user_name TEXT NOT NULL,
  FOREIGN KEY (work_task_id) REFERENCES work_tasks(id)
);

CREATE TRIGGER IF NOT EXISTS trg_task_actions_no_update
BEFORE UPDATE ON task_actions
BEGIN
  SELECT RAISE(FAIL, 'task_actions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_task_actions_delete_only_with_task
BEFORE DELETE ON task_actions
WHEN COALESCE((SELECT is_deleted FROM work_tasks WHERE id = OLD.work_task_id), 0) = 0
BEGIN
  SELECT RAISE(FAIL, 'task_actions is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_task_actions_task_date
  ON task_actions(work_task_id, action_date, seq);

CREATE TABLE IF NOT EXISTS comments (
  id TEXT PRIMARY KEY,
  task_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  user_name TEXT NOT NULL,
  content TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1)),
  FOREIGN KEY (task_id) REFERENCES work_tasks(id)
);

CREATE INDEX IF NOT EXISTS idx_comments_task_created
  ON comments(task_id, is_deleted, created_at);

CREATE TABLE IF NOT EXISTS notification_outbox (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  user_id TEXT NOT NULL,
  notification_type TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  enqueued_at TEXT NOT NULL,
  state TEXT NOT NULL DEFAULT 'pending' CHECK (state IN ('pending', 'delivered')),
  attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
  last_error TEXT,
  delivered_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_notification_outbox_state_seq
  ON notification_outbox(state, seq);
";

pub struct SqliteEntityStore {
    conn: Connection,
}

impl SqliteEntityStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_V1)
            .context("failed to apply work hierarchy schema")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_MIGRATION_VERSION, timestamp(now_utc())?],
            )
            .context("failed to register schema migration")?;

        tracing::debug!(version = SCHEMA_MIGRATION_VERSION, "schema migrations applied");
        Ok(())
    }

    pub fn schema_version(&self) -> Result<Option<i64>> {
        self.conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .context("failed to read schema version")
    }

    #[must_use]
    pub fn reads(&self) -> Reads<'_> {
        Reads::new(&self.conn)
    }

    /// Opens the unit of work for one operation.
    pub fn begin(&mut self) -> Result<UnitOfWork<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start unit of work")?;
        Ok(UnitOfWork { tx })
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// One operation's pending changes.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl UnitOfWork<'_> {
    #[must_use]
    pub fn reads(&self) -> Reads<'_> {
        Reads::new(&self.tx)
    }

    #[must_use]
    pub fn audit(&self) -> AuditRecorder<'_> {
        AuditRecorder::new(&self.tx)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit().context("failed to commit unit of work")
    }

    pub fn insert_work_area(&self, area: &WorkArea) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO work_areas(
                    id, name, description, display_order, project_id,
                    created_by_user_id, created_date, is_active, is_deleted
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    area.id.to_string(),
                    area.name,
                    area.description,
                    area.display_order,
                    area.project_id,
                    area.created_by_user_id,
                    timestamp(area.created_date)?,
                    bool_to_sql(area.is_active),
                    bool_to_sql(area.is_deleted),
                ],
            )
            .with_context(|| format!("failed to insert work area {}", area.id))?;
        Ok(())
    }

    pub fn update_work_area(&self, area: &WorkArea) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE work_areas SET
                    name = ?2, description = ?3, display_order = ?4, project_id = ?5,
                    created_by_user_id = ?6, is_active = ?7, is_deleted = ?8
                 WHERE id = ?1",
                params![
                    area.id.to_string(),
                    area.name,
                    area.description,
                    area.display_order,
                    area.project_id,
                    area.created_by_user_id,
                    bool_to_sql(area.is_active),
                    bool_to_sql(area.is_deleted),
                ],
            )
            .with_context(|| format!("failed to update work area {}", area.id))?;
        expect_one_row(changed, "work area", area.id)
    }

    pub fn delete_work_area(&self, id: WorkAreaId) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "DELETE FROM work_areas WHERE id = ?1",
                params![id.to_string()],
            )
            .with_context(|| format!("failed to delete work area {id}"))?;
        expect_one_row(changed, "work area", id)
    }

    pub fn insert_work_task(&self, task: &WorkTask) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO work_tasks(
                    id, title, description, status, priority,
                    start_date, end_date, due_date, progress, display_order,
                    work_area_id, created_by_user_id, created_by_user_name,
                    created_date, is_deleted
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5,
                    ?6, ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13,
                    ?14, ?15
                 )",
                params![
                    task.id.to_string(),
                    task.title,
                    task.description,
                    task.status,
                    task.priority,
                    optional_date(task.start_date),
                    optional_date(task.end_date),
                    optional_date(task.due_date),
                    task.progress,
                    task.display_order,
                    task.work_area_id.to_string(),
                    task.created_by_user_id,
                    task.created_by_user_name,
                    timestamp(task.created_date)?,
                    bool_to_sql(task.is_deleted),
                ],
            )
            .with_context(|| format!("failed to insert work task {}", task.id))?;
        Ok(())
    }

    /// Rewrites the mutable columns. Creation stamps are never touched here.
    pub fn update_work_task(&self, task: &WorkTask) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE work_tasks SET
                    title = ?2, description = ?3, status = ?4, priority = ?5,
                    start_date = ?6, end_date = ?7, due_date = ?8,
                    progress = ?9, display_order = ?10, work_area_id = ?11
                 WHERE id = ?1",
                params![
                    task.id.to_string(),
                    task.title,
                    task.description,
                    task.status,
                    task.priority,
                    optional_date(task.start_date),
                    optional_date(task.end_date),
                    optional_date(task.due_date),
                    task.progress,
                    task.display_order,
                    task.work_area_id.to_string(),
                ],
            )
            .with_context(|| format!("failed to update work task {}", task.id))?;
        expect_one_row(changed, "work task", task.id)
    }

    /// Marks the task as going away; required before its action log may be purged.
    pub fn flag_work_task_deleted(&self, id: WorkTaskId) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE work_tasks SET is_deleted = 1 WHERE id = ?1",
                params![id.to_string()],
            )
            .with_context(|| format!("failed to flag work task {id} as deleted"))?;
        expect_one_row(changed, "work task", id)
    }

    pub fn delete_task_members_for_task(&self, id: WorkTaskId) -> Result<usize> {
        self.tx
            .execute(
                "DELETE FROM task_members WHERE work_task_id = ?1",
                params![id.to_string()],
            )
            .with_context(|| format!("failed to delete members of work task {id}"))
    }

    pub fn delete_objectives_for_task(&self, id: WorkTaskId) -> Result<usize> {
        self.tx
            .execute(
                "DELETE FROM task_objectives WHERE work_task_id = ?1",
                params![id.to_string()],
            )
            .with_context(|| format!("failed to delete objectives of work task {id}"))
    }

    pub fn delete_actions_for_task(&self, id: WorkTaskId) -> Result<usize> {
        self.tx
            .execute(
                "DELETE FROM task_actions WHERE work_task_id = ?1",
                params![id.to_string()],
            )
            .with_context(|| format!("failed to delete actions of work task {id}"))
    }

    pub fn delete_comments_for_task(&self, id: WorkTaskId) -> Result<usize> {
        self.tx
            .execute(
                "DELETE FROM comments WHERE task_id = ?1",
                params![id.to_string()],
            )
            .with_context(|| format!("failed to delete comments of work task {id}"))
    }

    pub fn delete_work_task(&self, id: WorkTaskId) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "DELETE FROM work_tasks WHERE id = ?1",
                params![id.to_string()],
            )
            .with_context(|| format!("failed to delete work task {id}"))?;
        expect_one_row(changed, "work task", id)
    }

    pub fn insert_task_member(&self, member: &TaskMember) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO task_members(
                    id, work_task_id, user_id, user_name, user_email,
                    role, assigned_by_user_id, assigned_date, lifecycle
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    member.id.to_string(),
                    member.work_task_id.to_string(),
                    member.user_id,
                    member.user_name,
                    member.user_email,
                    member.role,
                    member.assigned_by_user_id,
                    timestamp(member.assigned_date)?,
                    rows::stored_lifecycle(member.lifecycle)?,
                ],
            )
            .with_context(|| format!("failed to insert task member {}", member.id))?;
        Ok(())
    }

    /// Identity columns (task, user, name, email) are immutable after insert.
    pub fn update_task_member(&self, member: &TaskMember) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE task_members SET role = ?2, assigned_by_user_id = ?3, lifecycle = ?4
                 WHERE id = ?1",
                params![
                    member.id.to_string(),
                    member.role,
                    member.assigned_by_user_id,
                    rows::stored_lifecycle(member.lifecycle)?,
                ],
            )
            .with_context(|| format!("failed to update task member {}", member.id))?;
        expect_one_row(changed, "task member", member.id)
    }

    pub fn delete_task_member(&self, id: TaskMemberId) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "DELETE FROM task_members WHERE id = ?1",
                params![id.to_string()],
            )
            .with_context(|| format!("failed to delete task member {id}"))?;
        expect_one_row(changed, "task member", id)
    }

    pub fn insert_objective(&self, objective: &TaskObjective) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO task_objectives(
                    id, work_task_id, title, display_order, created_by_user_id,
                    created_date, is_completed, completed_date, completed_by_user_id, is_deleted
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    objective.id.to_string(),
                    objective.work_task_id.to_string(),
                    objective.title,
                    objective.display_order,
                    objective.created_by_user_id,
                    timestamp(objective.created_date)?,
                    bool_to_sql(objective.is_completed),
                    optional_timestamp(objective.completed_date)?,
                    objective.completed_by_user_id,
                    bool_to_sql(objective.is_deleted),
                ],
            )
            .with_context(|| format!("failed to insert objective {}", objective.id))?;
        Ok(())
    }

    pub fn update_objective(&self, objective: &TaskObjective) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE task_objectives SET
                    title = ?2, display_order = ?3, is_completed = ?4,
                    completed_date = ?5, completed_by_user_id = ?6, is_deleted = ?7
                 WHERE id = ?1",
                params![
                    objective.id.to_string(),
                    objective.title,
                    objective.display_order,
                    bool_to_sql(objective.is_completed),
                    optional_timestamp(objective.completed_date)?,
                    objective.completed_by_user_id,
                    bool_to_sql(objective.is_deleted),
                ],
            )
            .with_context(|| format!("failed to update objective {}", objective.id))?;
        expect_one_row(changed, "objective", objective.id)
    }

    pub fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO comments(
                    id, task_id, user_id, user_name, content, created_at, updated_at, is_deleted
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    comment.id.to_string(),
                    comment.task_id.to_string(),
                    comment.user_id,
                    comment.user_name,
                    comment.content,
                    timestamp(comment.created_at)?,
                    timestamp(comment.updated_at)?,
                    bool_to_sql(comment.is_deleted),
                ],
            )
            .with_context(|| format!("failed to insert comment {}", comment.id))?;
        Ok(())
    }

    pub fn update_comment(&self, comment: &Comment) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE comments SET content = ?2, updated_at = ?3, is_deleted = ?4 WHERE id = ?1",
                params![
                    comment.id.to_string(),
                    comment.content,
                    timestamp(comment.updated_at)?,
                    bool_to_sql(comment.is_deleted),
                ],
            )
            .with_context(|| format!("failed to update comment {}", comment.id))?;
        expect_one_row(changed, "comment", comment.id)
    }
}

fn expect_one_row(changed: usize, entity: &str, id: impl std::fmt::Display) -> Result<()> {
    if changed == 1 {
        Ok(())
    } else {
        Err(anyhow!("expected to change one {entity} row for {id}, changed {changed}"))
    }
}

fn timestamp(value: OffsetDateTime) -> Result<String> {
    format_timestamp(value).map_err(|err| anyhow!(err.to_string()))
}

fn optional_timestamp(value: Option<OffsetDateTime>) -> Result<Option<String>> {
    value.map(timestamp).transpose()
}

fn optional_date(value: Option<time::Date>) -> Option<String> {
    value.map(|date| format_date(Some(date)))
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}
