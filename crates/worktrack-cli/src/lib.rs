//! `wt`: every orchestrator operation as a JSON-printing subcommand.
//!
//! Hosts can embed the same surface through [`run_cli`] (parse, execute,
//! print) or [`execute`] (parse and execute, returning the JSON value).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use time::{Date, OffsetDateTime};
use worktrack_core::{
    parse_date, parse_rfc3339_utc, Actor, AssigneeInput, CommentId, ObjectiveInput,
    OrchestratorConfig, PageRequest, TaskMemberId, TaskMemberUpdate, TaskObjectiveId, TextSearch,
    WorkAreaId, WorkAreaInput, WorkError, WorkTaskId, WorkTaskInput, DEFAULT_MEMBER_ROLE,
};
use worktrack_orchestrator::{
    LogDispatcher, Orchestrator, ServiceError, WorkAreaQuery, WorkTaskQuery,
};
use worktrack_store_sqlite::SqliteEntityStore;

#[derive(Debug, Parser)]
#[command(name = "wt")]
#[command(about = "WorkTrack work area / task hierarchy CLI")]
pub struct Cli {
    #[arg(long, default_value = "./worktrack.sqlite3")]
    db: PathBuf,

    /// Caller identity recorded on every mutation.
    #[arg(long, global = true)]
    actor_id: Option<String>,

    /// Display name for the caller; defaults to the actor id.
    #[arg(long, global = true)]
    actor_name: Option<String>,

    /// Leave queued notifications in the outbox instead of sending them
    /// after commit.
    #[arg(long, global = true)]
    defer_delivery: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Area {
        #[command(subcommand)]
        command: Box<AreaCommand>,
    },
    Task {
        #[command(subcommand)]
        command: Box<TaskCommand>,
    },
    Member {
        #[command(subcommand)]
        command: Box<MemberCommand>,
    },
    Objective {
        #[command(subcommand)]
        command: Box<ObjectiveCommand>,
    },
    Comment {
        #[command(subcommand)]
        command: Box<CommentCommand>,
    },
    /// Audit log of a task, newest first.
    Actions(ActionsArgs),
    Outbox {
        #[command(subcommand)]
        command: OutboxCommand,
    },
}

#[derive(Debug, Args)]
pub struct PageArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    page_size: u32,
}

impl PageArgs {
    fn request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    case_sensitive: bool,
}

impl SearchArgs {
    fn text_search(&self) -> Option<TextSearch> {
        self.search
            .as_deref()
            .map(|needle| TextSearch::new(needle, self.case_sensitive))
            .filter(|search| !search.is_empty())
    }
}

#[derive(Debug, Subcommand)]
pub enum AreaCommand {
    Create(AreaCreateArgs),
    Get(AreaIdArgs),
    List(AreaListArgs),
    Update(AreaUpdateArgs),
    Delete(AreaIdArgs),
}

#[derive(Debug, Args)]
pub struct AreaIdArgs {
    #[arg(long)]
    id: WorkAreaId,
}

#[derive(Debug, Args)]
pub struct AreaCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    project_id: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, default_value_t = 0)]
    display_order: i32,
    /// Recorded creator; defaults to the actor.
    #[arg(long)]
    created_by: Option<String>,
}

#[derive(Debug, Args)]
pub struct AreaListArgs {
    #[arg(long)]
    project_id: Option<String>,
    #[command(flatten)]
    search: SearchArgs,
    #[command(flatten)]
    page: PageArgs,
}

/// Unset flags keep the area's current value.
#[derive(Debug, Args)]
pub struct AreaUpdateArgs {
    #[arg(long)]
    id: WorkAreaId,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    project_id: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, conflicts_with = "description")]
    clear_description: bool,
    #[arg(long)]
    display_order: Option<i32>,
    #[arg(long)]
    created_by: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    Create(TaskCreateArgs),
    Get(TaskGetArgs),
    List(TaskListArgs),
    /// Tasks the user created or is an active member of.
    Mine(TaskMineArgs),
    Update(TaskUpdateArgs),
    Delete(TaskIdArgs),
}

#[derive(Debug, Args)]
pub struct TaskIdArgs {
    #[arg(long)]
    id: WorkTaskId,
}

#[derive(Debug, Args)]
pub struct TaskCreateArgs {
    #[arg(long)]
    area_id: WorkAreaId,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, default_value = "Todo")]
    status: String,
    #[arg(long, default_value = "Normal")]
    priority: String,
    #[arg(long, value_parser = parse_date)]
    start_date: Option<Date>,
    #[arg(long, value_parser = parse_date)]
    end_date: Option<Date>,
    #[arg(long, value_parser = parse_date)]
    due_date: Option<Date>,
    #[arg(long, default_value_t = 0)]
    display_order: i32,
    /// Initial member as `user_id:user_name[:email]`. Repeatable.
    #[arg(long = "assignee", value_parser = parse_assignee)]
    assignees: Vec<AssigneeInput>,
}

#[derive(Debug, Args)]
pub struct TaskGetArgs {
    #[arg(long)]
    id: WorkTaskId,
    /// Include members, objectives, actions and comments.
    #[arg(long)]
    details: bool,
}

#[derive(Debug, Args)]
pub struct TaskListArgs {
    #[arg(long)]
    area_id: Option<WorkAreaId>,
    #[command(flatten)]
    search: SearchArgs,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Debug, Args)]
pub struct TaskMineArgs {
    /// Defaults to the actor.
    #[arg(long)]
    user_id: Option<String>,
    #[command(flatten)]
    page: PageArgs,
}

/// Unset flags keep the task's current value.
#[derive(Debug, Args)]
pub struct TaskUpdateArgs {
    #[arg(long)]
    id: WorkTaskId,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long, value_parser = parse_date)]
    start_date: Option<Date>,
    #[arg(long, value_parser = parse_date)]
    end_date: Option<Date>,
    #[arg(long, value_parser = parse_date)]
    due_date: Option<Date>,
    #[arg(long)]
    progress: Option<u8>,
    #[arg(long)]
    display_order: Option<i32>,
    #[arg(long)]
    area_id: Option<WorkAreaId>,
}

#[derive(Debug, Subcommand)]
pub enum MemberCommand {
    Assign(MemberAssignArgs),
    Create(MemberAssignArgs),
    /// Soft-removes the user's active membership on the task, if any.
    Unassign(MemberUnassignArgs),
    /// Soft-removes one membership by id.
    Remove(MemberIdArgs),
    Update(MemberUpdateArgs),
    /// Physically deletes one membership.
    Delete(MemberIdArgs),
    List(MemberListArgs),
    Get(MemberIdArgs),
}

#[derive(Debug, Args)]
pub struct MemberIdArgs {
    #[arg(long)]
    id: TaskMemberId,
}

#[derive(Debug, Args)]
pub struct MemberAssignArgs {
    #[arg(long)]
    task_id: WorkTaskId,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    user_name: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long, default_value = DEFAULT_MEMBER_ROLE)]
    role: String,
}

#[derive(Debug, Args)]
pub struct MemberUnassignArgs {
    #[arg(long)]
    task_id: WorkTaskId,
    #[arg(long)]
    user_id: String,
}

#[derive(Debug, Args)]
pub struct MemberUpdateArgs {
    #[arg(long)]
    id: TaskMemberId,
    #[arg(long)]
    role: Option<String>,
    #[arg(long)]
    active: Option<bool>,
    #[arg(long)]
    assigned_by: Option<String>,
}

#[derive(Debug, Args)]
pub struct MemberListArgs {
    #[arg(long)]
    task_id: WorkTaskId,
}

#[derive(Debug, Subcommand)]
pub enum ObjectiveCommand {
    Create(ObjectiveCreateArgs),
    Update(ObjectiveUpdateArgs),
    Complete(ObjectiveCompleteArgs),
    Delete(ObjectiveIdArgs),
    List(ObjectiveListArgs),
    Get(ObjectiveIdArgs),
}

#[derive(Debug, Args)]
pub struct ObjectiveIdArgs {
    #[arg(long)]
    id: TaskObjectiveId,
}

#[derive(Debug, Args)]
pub struct ObjectiveCreateArgs {
    #[arg(long)]
    task_id: WorkTaskId,
    #[arg(long)]
    title: String,
    #[arg(long, default_value_t = 0)]
    display_order: i32,
}

#[derive(Debug, Args)]
pub struct ObjectiveUpdateArgs {
    #[arg(long)]
    id: TaskObjectiveId,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    display_order: Option<i32>,
}

#[derive(Debug, Args)]
pub struct ObjectiveCompleteArgs {
    #[arg(long)]
    id: TaskObjectiveId,
    /// Clear the completion instead of setting it.
    #[arg(long)]
    reopen: bool,
}

#[derive(Debug, Args)]
pub struct ObjectiveListArgs {
    #[arg(long)]
    task_id: WorkTaskId,
}

#[derive(Debug, Subcommand)]
pub enum CommentCommand {
    Add(CommentAddArgs),
    Update(CommentUpdateArgs),
    Delete(CommentIdArgs),
    List(CommentListArgs),
}

#[derive(Debug, Args)]
pub struct CommentIdArgs {
    #[arg(long)]
    id: CommentId,
}

#[derive(Debug, Args)]
pub struct CommentAddArgs {
    #[arg(long)]
    task_id: WorkTaskId,
    #[arg(long)]
    content: String,
}

#[derive(Debug, Args)]
pub struct CommentUpdateArgs {
    #[arg(long)]
    id: CommentId,
    #[arg(long)]
    content: String,
}

#[derive(Debug, Args)]
pub struct CommentListArgs {
    #[arg(long)]
    task_id: WorkTaskId,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Debug, Args)]
pub struct ActionsArgs {
    #[arg(long)]
    task_id: WorkTaskId,
    #[command(flatten)]
    page: PageArgs,
}

#[derive(Debug, Subcommand)]
pub enum OutboxCommand {
    Status,
    /// Retries pending notifications, oldest first.
    Drain {
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    List {
        #[arg(long)]
        pending: bool,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// Deletes delivered rows older than the cutoff (RFC3339, UTC).
    Prune {
        #[arg(long, value_parser = parse_rfc3339_utc)]
        delivered_before: OffsetDateTime,
    },
}

/// Parses and executes the command, then prints its JSON result to stdout.
///
/// # Errors
/// Returns an error when the store cannot be opened or migrated, or when the
/// command itself fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let output = execute(cli)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Executes the command and returns its JSON result.
///
/// # Errors
/// Same as [`run_cli`].
pub fn execute(cli: Cli) -> Result<Value> {
    let store = SqliteEntityStore::open(&cli.db)?;
    store.migrate()?;

    let config = OrchestratorConfig {
        deliver_after_commit: !cli.defer_delivery,
        ..OrchestratorConfig::default()
    };
    let mut orchestrator = Orchestrator::new(store, LogDispatcher::new(), config)?;
    let session = Session {
        actor_id: cli.actor_id,
        actor_name: cli.actor_name,
    };

    match cli.command {
        Command::Area { command } => run_area(*command, &mut orchestrator, &session),
        Command::Task { command } => run_task(*command, &mut orchestrator, &session),
        Command::Member { command } => run_member(*command, &mut orchestrator, &session),
        Command::Objective { command } => run_objective(*command, &mut orchestrator, &session),
        Command::Comment { command } => run_comment(*command, &mut orchestrator, &session),
        Command::Actions(args) => {
            to_json(&orchestrator.list_task_actions(args.task_id, args.page.request())?)
        }
        Command::Outbox { command } => run_outbox(&command, &orchestrator),
    }
}

/// `{"error": {"code", "message"}}` for a failed command. Domain failures
/// keep their error kind as the code.
#[must_use]
pub fn error_envelope(err: &anyhow::Error) -> Value {
    json!({
        "error": {
            "code": error_code(err),
            "message": format!("{err:#}"),
        }
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    if let Some(service) = err.downcast_ref::<ServiceError>() {
        return service.code();
    }
    if let Some(work) = err.downcast_ref::<WorkError>() {
        return work.kind();
    }
    "internal"
}

struct Session {
    actor_id: Option<String>,
    actor_name: Option<String>,
}

impl Session {
    fn actor(&self) -> Result<Actor> {
        let user_id = self
            .actor_id
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                WorkError::Validation("--actor-id is required for this command".to_string())
            })?;
        let user_name = self
            .actor_name
            .clone()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| user_id.clone());
        Ok(Actor::new(user_id, user_name))
    }
}

type Wt = Orchestrator<LogDispatcher>;

fn run_area(command: AreaCommand, orchestrator: &mut Wt, session: &Session) -> Result<Value> {
    match command {
        AreaCommand::Create(args) => {
            let input = WorkAreaInput {
                name: args.name,
                description: args.description,
                display_order: args.display_order,
                project_id: args.project_id,
                created_by_user_id: args.created_by,
            };
            to_json(&orchestrator.create_work_area(&session.actor()?, &input)?)
        }
        AreaCommand::Get(args) => to_json(&orchestrator.get_work_area(args.id)?),
        AreaCommand::List(args) => {
            let query = WorkAreaQuery {
                project_id: args.project_id,
                search: args.search.text_search(),
            };
            to_json(&orchestrator.list_work_areas(&query, args.page.request())?)
        }
        AreaCommand::Update(args) => {
            let actor = session.actor()?;
            let current = orchestrator.get_work_area(args.id)?;
            let description = if args.clear_description {
                None
            } else {
                args.description.or(current.description)
            };
            let input = WorkAreaInput {
                name: args.name.unwrap_or(current.name),
                description,
                display_order: args.display_order.unwrap_or(current.display_order),
                project_id: args.project_id.unwrap_or(current.project_id),
                created_by_user_id: args.created_by,
            };
            to_json(&orchestrator.update_work_area(&actor, args.id, &input)?)
        }
        AreaCommand::Delete(args) => {
            to_json(&orchestrator.delete_work_area(&session.actor()?, args.id)?)
        }
    }
}

fn run_task(command: TaskCommand, orchestrator: &mut Wt, session: &Session) -> Result<Value> {
    match command {
        TaskCommand::Create(args) => {
            let input = WorkTaskInput {
                title: args.title,
                description: args.description,
                status: args.status,
                priority: args.priority,
                start_date: args.start_date,
                end_date: args.end_date,
                due_date: args.due_date,
                progress: 0,
                display_order: args.display_order,
                work_area_id: args.area_id,
            };
            to_json(&orchestrator.create_work_task(
                &session.actor()?,
                &input,
                &args.assignees,
            )?)
        }
        TaskCommand::Get(args) => {
            if args.details {
                to_json(&orchestrator.get_work_task_details(args.id)?)
            } else {
                to_json(&orchestrator.get_work_task(args.id)?)
            }
        }
        TaskCommand::List(args) => {
            let page = args.page.request();
            match (args.area_id, args.search.text_search()) {
                (Some(area_id), None) => {
                    to_json(&orchestrator.list_work_tasks_in_area(area_id, page)?)
                }
                (work_area_id, search) => {
                    let query = WorkTaskQuery {
                        work_area_id,
                        search,
                    };
                    to_json(&orchestrator.list_work_tasks(&query, page)?)
                }
            }
        }
        TaskCommand::Mine(args) => {
            let user_id = match args.user_id {
                Some(user_id) => user_id,
                None => session.actor()?.user_id,
            };
            to_json(&orchestrator.get_mine(&user_id, args.page.request())?)
        }
        TaskCommand::Update(args) => {
            let actor = session.actor()?;
            let current = orchestrator.get_work_task(args.id)?;
            let input = WorkTaskInput {
                title: args.title.unwrap_or(current.title),
                description: args.description.or(current.description),
                status: args.status.unwrap_or(current.status),
                priority: args.priority.unwrap_or(current.priority),
                start_date: args.start_date.or(current.start_date),
                end_date: args.end_date.or(current.end_date),
                due_date: args.due_date.or(current.due_date),
                progress: args.progress.unwrap_or(current.progress),
                display_order: args.display_order.unwrap_or(current.display_order),
                work_area_id: args.area_id.unwrap_or(current.work_area_id),
            };
            to_json(&orchestrator.update_work_task(&actor, args.id, &input)?)
        }
        TaskCommand::Delete(args) => {
            to_json(&orchestrator.delete_work_task(&session.actor()?, args.id)?)
        }
    }
}

fn run_member(command: MemberCommand, orchestrator: &mut Wt, session: &Session) -> Result<Value> {
    match command {
        MemberCommand::Assign(args) => {
            let (task_id, assignee) = args.into_assignee();
            to_json(&orchestrator.assign_work_task_to_user(&session.actor()?, task_id, &assignee)?)
        }
        MemberCommand::Create(args) => {
            let (task_id, assignee) = args.into_assignee();
            to_json(&orchestrator.create_task_member(&session.actor()?, task_id, &assignee)?)
        }
        MemberCommand::Unassign(args) => to_json(&orchestrator.remove_work_task_from_user(
            &session.actor()?,
            args.task_id,
            &args.user_id,
        )?),
        MemberCommand::Remove(args) => {
            to_json(&orchestrator.remove_task_member(&session.actor()?, args.id)?)
        }
        MemberCommand::Update(args) => {
            let actor = session.actor()?;
            let current = orchestrator.get_task_member(args.id)?;
            let update = TaskMemberUpdate {
                role: args.role.unwrap_or_else(|| current.role.clone()),
                is_active: args.active.unwrap_or_else(|| current.is_active()),
                assigned_by_user_id: args.assigned_by.unwrap_or_default(),
            };
            to_json(&orchestrator.update_task_member(&actor, args.id, &update)?)
        }
        MemberCommand::Delete(args) => {
            to_json(&orchestrator.delete_task_member(&session.actor()?, args.id)?)
        }
        MemberCommand::List(args) => to_json(&orchestrator.list_task_members(args.task_id)?),
        MemberCommand::Get(args) => to_json(&orchestrator.get_task_member(args.id)?),
    }
}

impl MemberAssignArgs {
    fn into_assignee(self) -> (WorkTaskId, AssigneeInput) {
        let mut assignee = AssigneeInput::new(self.user_id, self.user_name);
        assignee.user_email = self.email;
        assignee.role = self.role;
        (self.task_id, assignee)
    }
}

fn run_objective(
    command: ObjectiveCommand,
    orchestrator: &mut Wt,
    session: &Session,
) -> Result<Value> {
    match command {
        ObjectiveCommand::Create(args) => {
            let input = ObjectiveInput {
                title: args.title,
                display_order: args.display_order,
            };
            to_json(&orchestrator.create_objective(&session.actor()?, args.task_id, &input)?)
        }
        ObjectiveCommand::Update(args) => {
            let actor = session.actor()?;
            let current = orchestrator.get_objective(args.id)?;
            let input = ObjectiveInput {
                title: args.title.unwrap_or(current.title),
                display_order: args.display_order.unwrap_or(current.display_order),
            };
            to_json(&orchestrator.update_objective(&actor, args.id, &input)?)
        }
        ObjectiveCommand::Complete(args) => to_json(&orchestrator.complete_objective(
            &session.actor()?,
            args.id,
            !args.reopen,
        )?),
        ObjectiveCommand::Delete(args) => {
            to_json(&orchestrator.delete_objective(&session.actor()?, args.id)?)
        }
        ObjectiveCommand::List(args) => to_json(&orchestrator.list_objectives(args.task_id)?),
        ObjectiveCommand::Get(args) => to_json(&orchestrator.get_objective(args.id)?),
    }
}

fn run_comment(command: CommentCommand, orchestrator: &mut Wt, session: &Session) -> Result<Value> {
    match command {
        CommentCommand::Add(args) => {
            to_json(&orchestrator.add_comment(&session.actor()?, args.task_id, &args.content)?)
        }
        CommentCommand::Update(args) => {
            to_json(&orchestrator.update_comment(&session.actor()?, args.id, &args.content)?)
        }
        CommentCommand::Delete(args) => {
            to_json(&orchestrator.delete_comment(&session.actor()?, args.id)?)
        }
        CommentCommand::List(args) => {
            to_json(&orchestrator.list_comments(args.task_id, args.page.request())?)
        }
    }
}

fn run_outbox(command: &OutboxCommand, orchestrator: &Wt) -> Result<Value> {
    match *command {
        OutboxCommand::Status => to_json(&orchestrator.outbox_status()?),
        OutboxCommand::Drain { limit } => to_json(&orchestrator.drain_outbox(limit)?),
        OutboxCommand::List { pending, limit } => {
            to_json(&orchestrator.outbox_entries(pending, limit)?)
        }
        OutboxCommand::Prune { delivered_before } => {
            Ok(json!({ "pruned": orchestrator.prune_outbox(delivered_before)? }))
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// `user_id:user_name[:email]`
fn parse_assignee(raw: &str) -> Result<AssigneeInput, String> {
    let mut parts = raw.splitn(3, ':').map(str::trim);
    let user_id = parts.next().unwrap_or_default();
    let Some(user_name) = parts.next() else {
        return Err(format!("assignee `{raw}` must be user_id:user_name[:email]"));
    };
    let mut assignee = AssigneeInput::new(user_id, user_name);
    if let Some(email) = parts.next().filter(|email| !email.is_empty()) {
        assignee = assignee.with_email(email);
    }
    assignee.validate().map_err(|err| err.to_string())?;
    Ok(assignee)
}
