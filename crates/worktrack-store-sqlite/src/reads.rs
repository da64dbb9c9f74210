use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use worktrack_core::{
    Comment, CommentId, Page, PageRequest, TaskAction, TaskMember, TaskMemberId, TaskObjective,
    TaskObjectiveId, TextSearch, WorkArea, WorkAreaId, WorkTask, WorkTaskId,
};

use crate::rows::{
    collect_rows, parse_comment_row, parse_objective_row, parse_task_action_row,
    parse_task_member_row, parse_work_area_row, parse_work_task_row, COMMENT_COLUMNS,
    OBJECTIVE_COLUMNS, TASK_ACTION_COLUMNS, TASK_MEMBER_COLUMNS, WORK_AREA_COLUMNS,
    WORK_TASK_COLUMNS,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkAreaQuery {
    pub project_id: Option<String>,
    pub search: Option<TextSearch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkTaskQuery {
    pub work_area_id: Option<WorkAreaId>,
    pub search: Option<TextSearch>,
}

/// A task with every child collection it owns.
#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct WorkTaskGraph {
    pub task: WorkTask,
    /// All stored memberships, inactive ones included.
    pub members: Vec<TaskMember>,
    pub objectives: Vec<TaskObjective>,
    pub actions: Vec<TaskAction>,
    pub comments: Vec<Comment>,
}

impl WorkTaskGraph {
    #[must_use]
    pub fn active_members(&self) -> Vec<TaskMember> {
        self.members
            .iter()
            .filter(|member| member.is_active())
            .cloned()
            .collect()
    }
}

/// Query side of the entity store. Only non-deleted rows are returned unless
/// a method says otherwise.
pub struct Reads<'c> {
    conn: &'c Connection,
}

impl<'c> Reads<'c> {
    pub(crate) fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn work_area(&self, id: WorkAreaId) -> Result<Option<WorkArea>> {
        let sql = format!(
            "SELECT {WORK_AREA_COLUMNS} FROM work_areas WHERE id = ?1 AND is_deleted = 0"
        );
        self.conn
            .query_row(&sql, params![id.to_string()], parse_work_area_row)
            .optional()
            .with_context(|| format!("failed to load work area {id}"))
    }

    pub fn list_work_areas(&self, query: &WorkAreaQuery, page: PageRequest) -> Result<Page<WorkArea>> {
        let mut filter = Filter::new("is_deleted = 0");
        if let Some(project_id) = &query.project_id {
            filter.push("project_id = ?", [Value::Text(project_id.clone())]);
        }
        if let Some(search) = query.search.as_ref().filter(|search| !search.is_empty()) {
            filter.push_search(search, &["name", "description"]);
        }

        self.paged(
            "work_areas",
            WORK_AREA_COLUMNS,
            &filter,
            "display_order ASC, created_date ASC, id ASC",
            page,
            parse_work_area_row,
        )
    }

    pub fn work_task(&self, id: WorkTaskId) -> Result<Option<WorkTask>> {
        let sql = format!(
            "SELECT {WORK_TASK_COLUMNS} FROM work_tasks WHERE id = ?1 AND is_deleted = 0"
        );
        self.conn
            .query_row(&sql, params![id.to_string()], parse_work_task_row)
            .optional()
            .with_context(|| format!("failed to load work task {id}"))
    }

    /// Every task row owned by the area, including rows already flagged for deletion.
    pub fn work_tasks_in_area(&self, area_id: WorkAreaId) -> Result<Vec<WorkTask>> {
        let sql = format!(
            "SELECT {WORK_TASK_COLUMNS} FROM work_tasks
             WHERE work_area_id = ?1
             ORDER BY display_order ASC, created_date ASC, id ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare work task by area query")?;
        let rows = stmt
            .query_map(params![area_id.to_string()], parse_work_task_row)
            .with_context(|| format!("failed to query work tasks of area {area_id}"))?;
        collect_rows(rows)
    }

    pub fn list_work_tasks(&self, query: &WorkTaskQuery, page: PageRequest) -> Result<Page<WorkTask>> {
        let mut filter = Filter::new("is_deleted = 0");
        if let Some(area_id) = query.work_area_id {
            filter.push("work_area_id = ?", [Value::Text(area_id.to_string())]);
        }
        if let Some(search) = query.search.as_ref().filter(|search| !search.is_empty()) {
            filter.push_search(search, &["title", "description"]);
        }

        self.paged(
            "work_tasks",
            WORK_TASK_COLUMNS,
            &filter,
            "display_order ASC, created_date ASC, id ASC",
            page,
            parse_work_task_row,
        )
    }

    /// Tasks the user created or is an active member of.
    pub fn list_tasks_for_user(&self, user_id: &str, page: PageRequest) -> Result<Page<WorkTask>> {
        let mut filter = Filter::new("is_deleted = 0");
        filter.push(
            "(created_by_user_id = ? OR EXISTS (
                SELECT 1 FROM task_members m
                WHERE m.work_task_id = work_tasks.id AND m.user_id = ? AND m.lifecycle = 'active'
             ))",
            [
                Value::Text(user_id.to_string()),
                Value::Text(user_id.to_string()),
            ],
        );

        self.paged(
            "work_tasks",
            WORK_TASK_COLUMNS,
            &filter,
            "created_date DESC, id DESC",
            page,
            parse_work_task_row,
        )
    }

    pub fn task_members(&self, task_id: WorkTaskId) -> Result<Vec<TaskMember>> {
        self.members_where("work_task_id = ?1", &task_id.to_string())
    }

    pub fn active_task_members(&self, task_id: WorkTaskId) -> Result<Vec<TaskMember>> {
        self.members_where(
            "work_task_id = ?1 AND lifecycle = 'active'",
            &task_id.to_string(),
        )
    }

    pub fn active_membership(&self, task_id: WorkTaskId, user_id: &str) -> Result<Option<TaskMember>> {
        let sql = format!(
            "SELECT {TASK_MEMBER_COLUMNS} FROM task_members
             WHERE work_task_id = ?1 AND user_id = ?2 AND lifecycle = 'active'
             ORDER BY assigned_date ASC, id ASC
             LIMIT 1"
        );
        self.conn
            .query_row(
                &sql,
                params![task_id.to_string(), user_id],
                parse_task_member_row,
            )
            .optional()
            .with_context(|| format!("failed to look up membership of {user_id} on {task_id}"))
    }

    pub fn task_member(&self, id: TaskMemberId) -> Result<Option<TaskMember>> {
        let sql = format!("SELECT {TASK_MEMBER_COLUMNS} FROM task_members WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id.to_string()], parse_task_member_row)
            .optional()
            .with_context(|| format!("failed to load task member {id}"))
    }

    /// Active memberships across the area's live tasks, in task order.
    pub fn active_members_for_area(&self, area_id: WorkAreaId) -> Result<Vec<TaskMember>> {
        let sql = "SELECT m.id, m.work_task_id, m.user_id, m.user_name, m.user_email,
                          m.role, m.assigned_by_user_id, m.assigned_date, m.lifecycle
                   FROM task_members m
                   JOIN work_tasks t ON t.id = m.work_task_id
                   WHERE t.work_area_id = ?1 AND t.is_deleted = 0 AND m.lifecycle = 'active'
                   ORDER BY t.display_order ASC, t.created_date ASC, m.assigned_date ASC, m.id ASC";
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("failed to prepare area member query")?;
        let rows = stmt
            .query_map(params![area_id.to_string()], parse_task_member_row)
            .with_context(|| format!("failed to query members of area {area_id}"))?;
        collect_rows(rows)
    }

    /// Loads the task with all four child collections. Flagged tasks are
    /// included so a cascade can resume over them.
    pub fn work_task_graph(&self, id: WorkTaskId) -> Result<Option<WorkTaskGraph>> {
        let sql = format!("SELECT {WORK_TASK_COLUMNS} FROM work_tasks WHERE id = ?1");
        let Some(task) = self
            .conn
            .query_row(&sql, params![id.to_string()], parse_work_task_row)
            .optional()
            .with_context(|| format!("failed to load work task {id}"))?
        else {
            return Ok(None);
        };

        let members = self.task_members(id)?;
        let objectives = self.task_objectives(id)?;
        let actions = self.task_actions(id)?;
        let comments = self.comments_for_task(id)?;

        Ok(Some(WorkTaskGraph {
            task,
            members,
            objectives,
            actions,
            comments,
        }))
    }

    pub fn task_objectives(&self, task_id: WorkTaskId) -> Result<Vec<TaskObjective>> {
        let sql = format!(
            "SELECT {OBJECTIVE_COLUMNS} FROM task_objectives
             WHERE work_task_id = ?1 AND is_deleted = 0
             ORDER BY display_order ASC, created_date ASC, id ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare objective query")?;
        let rows = stmt
            .query_map(params![task_id.to_string()], parse_objective_row)
            .with_context(|| format!("failed to query objectives of {task_id}"))?;
        collect_rows(rows)
    }

    pub fn objective(&self, id: TaskObjectiveId) -> Result<Option<TaskObjective>> {
        let sql = format!(
            "SELECT {OBJECTIVE_COLUMNS} FROM task_objectives WHERE id = ?1 AND is_deleted = 0"
        );
        self.conn
            .query_row(&sql, params![id.to_string()], parse_objective_row)
            .optional()
            .with_context(|| format!("failed to load objective {id}"))
    }

    pub fn comment(&self, id: CommentId) -> Result<Option<Comment>> {
        let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1 AND is_deleted = 0");
        self.conn
            .query_row(&sql, params![id.to_string()], parse_comment_row)
            .optional()
            .with_context(|| format!("failed to load comment {id}"))
    }

    pub fn list_comments(&self, task_id: WorkTaskId, page: PageRequest) -> Result<Page<Comment>> {
        let mut filter = Filter::new("is_deleted = 0");
        filter.push("task_id = ?", [Value::Text(task_id.to_string())]);
        self.paged(
            "comments",
            COMMENT_COLUMNS,
            &filter,
            "created_at DESC, id DESC",
            page,
            parse_comment_row,
        )
    }

    /// Audit trail of a task, newest first.
    pub fn list_task_actions(&self, task_id: WorkTaskId, page: PageRequest) -> Result<Page<TaskAction>> {
        let mut filter = Filter::new("1 = 1");
        filter.push("work_task_id = ?", [Value::Text(task_id.to_string())]);
        self.paged(
            "task_actions",
            TASK_ACTION_COLUMNS,
            &filter,
            "action_date DESC, seq DESC",
            page,
            parse_task_action_row,
        )
    }

    fn task_actions(&self, task_id: WorkTaskId) -> Result<Vec<TaskAction>> {
        let sql = format!(
            "SELECT {TASK_ACTION_COLUMNS} FROM task_actions
             WHERE work_task_id = ?1
             ORDER BY seq ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare task action query")?;
        let rows = stmt
            .query_map(params![task_id.to_string()], parse_task_action_row)
            .with_context(|| format!("failed to query actions of {task_id}"))?;
        collect_rows(rows)
    }

    fn comments_for_task(&self, task_id: WorkTaskId) -> Result<Vec<Comment>> {
        let sql = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments
             WHERE task_id = ?1 AND is_deleted = 0
             ORDER BY created_at ASC, id ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare comment query")?;
        let rows = stmt
            .query_map(params![task_id.to_string()], parse_comment_row)
            .with_context(|| format!("failed to query comments of {task_id}"))?;
        collect_rows(rows)
    }

    fn members_where(&self, predicate: &str, task_id: &str) -> Result<Vec<TaskMember>> {
        let sql = format!(
            "SELECT {TASK_MEMBER_COLUMNS} FROM task_members
             WHERE {predicate}
             ORDER BY assigned_date ASC, id ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("failed to prepare task member query")?;
        let rows = stmt
            .query_map(params![task_id], parse_task_member_row)
            .with_context(|| format!("failed to query members of {task_id}"))?;
        collect_rows(rows)
    }

    fn paged<T>(
        &self,
        table: &str,
        columns: &str,
        filter: &Filter,
        order_by: &str,
        page: PageRequest,
        parse: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Page<T>> {
        let where_clause = filter.clauses.join(" AND ");

        let count_sql = format!("SELECT COUNT(*) FROM {table} WHERE {where_clause}");
        let total: i64 = self
            .conn
            .query_row(&count_sql, params_from_iter(filter.values.iter()), |row| {
                row.get(0)
            })
            .with_context(|| format!("failed to count {table}"))?;

        let mut values = filter.values.clone();
        values.push(Value::Integer(i64::from(page.size)));
        values.push(Value::Integer(
            i64::try_from(page.offset()).context("page offset out of range")?,
        ));

        let select_sql = format!(
            "SELECT {columns} FROM {table} WHERE {where_clause} ORDER BY {order_by} LIMIT ? OFFSET ?"
        );
        let mut stmt = self
            .conn
            .prepare(&select_sql)
            .with_context(|| format!("failed to prepare {table} page query"))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), parse)
            .with_context(|| format!("failed to query {table} page"))?;
        let items = collect_rows(rows)?;

        Ok(Page {
            items,
            total_count: u64::try_from(total).context("negative row count")?,
            page_index: page.index,
            page_size: page.size,
        })
    }
}

/// WHERE clauses with positional `?` parameters, in bind order.
struct Filter {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl Filter {
    fn new(base: &str) -> Self {
        Self {
            clauses: vec![base.to_string()],
            values: Vec::new(),
        }
    }

    fn push(&mut self, clause: &str, values: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.to_string());
        self.values.extend(values);
    }

    fn push_search(&mut self, search: &TextSearch, columns: &[&str]) {
        let parts: Vec<String> = columns
            .iter()
            .map(|column| {
                if search.case_sensitive {
                    format!("instr(COALESCE({column}, ''), ?) > 0")
                } else {
                    format!("instr(lower(COALESCE({column}, '')), lower(?)) > 0")
                }
            })
            .collect();
        self.clauses.push(format!("({})", parts.join(" OR ")));
        self.values
            .extend(columns.iter().map(|_| Value::Text(search.needle.clone())));
    }
}
