//! Domain model for hierarchical work tracking.
//!
//! Work areas own work tasks; a work task owns its members, objectives,
//! comments and the append-only action log. Everything here is plain data plus
//! validation: persistence lives in `worktrack-store-sqlite` and the
//! mutation/notification orchestration in `worktrack-orchestrator`.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub mod diff;
pub mod notify;

pub use diff::{diff_tracked, ChangeSet, FieldChange, TrackedFields};
pub use notify::{
    distinct_recipients, NotificationChannel, NotificationDraft, NotificationMessage,
    NotificationPriority, NotificationType, Recipient,
};

const DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");

pub const MAX_PROGRESS: u8 = 100;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum WorkError {
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl WorkError {
    pub fn not_found(entity: EntityKind, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    WorkArea,
    WorkTask,
    TaskMember,
    TaskObjective,
    Comment,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkArea => "work_area",
            Self::WorkTask => "work_task",
            Self::TaskMember => "task_member",
            Self::TaskObjective => "task_objective",
            Self::Comment => "comment",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = WorkError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(raw.trim()).map(Self).map_err(|err| {
                    WorkError::Validation(format!(
                        "invalid {} `{raw}`: {err}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

entity_id!(WorkAreaId);
entity_id!(WorkTaskId);
entity_id!(TaskMemberId);
entity_id!(TaskObjectiveId);
entity_id!(TaskActionId);
entity_id!(CommentId);
entity_id!(NotificationId);

/// Identity of the caller performing an operation.
///
/// Authentication happens outside this crate; callers pass the resolved
/// identity in verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Actor {
    pub user_id: String,
    pub user_name: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }

    /// # Errors
    /// Returns [`WorkError::Validation`] when the user id is blank.
    pub fn validate(&self) -> Result<(), WorkError> {
        if self.user_id.trim().is_empty() {
            return Err(WorkError::Validation(
                "actor user_id MUST be provided".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkArea {
    pub id: WorkAreaId,
    pub name: String,
    pub description: Option<String>,
    pub display_order: i32,
    pub project_id: String,
    pub created_by_user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_date: OffsetDateTime,
    pub is_active: bool,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkAreaInput {
    pub name: String,
    pub description: Option<String>,
    pub display_order: i32,
    pub project_id: String,
    /// Only applied on update when non-empty.
    pub created_by_user_id: Option<String>,
}

impl WorkAreaInput {
    /// # Errors
    /// Returns [`WorkError::Validation`] when the name or project reference is blank.
    pub fn validate(&self) -> Result<(), WorkError> {
        if self.name.trim().is_empty() {
            return Err(WorkError::Validation(
                "work area name MUST be provided".to_string(),
            ));
        }
        if self.project_id.trim().is_empty() {
            return Err(WorkError::Validation(
                "work area project_id MUST be provided".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkTask {
    pub id: WorkTaskId,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    #[serde(default, with = "optional_date")]
    pub start_date: Option<Date>,
    #[serde(default, with = "optional_date")]
    pub end_date: Option<Date>,
    #[serde(default, with = "optional_date")]
    pub due_date: Option<Date>,
    pub progress: u8,
    pub display_order: i32,
    pub work_area_id: WorkAreaId,
    pub created_by_user_id: String,
    pub created_by_user_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_date: OffsetDateTime,
    pub is_deleted: bool,
}

impl WorkTask {
    /// Builds the replacement row for an update. Creation stamps are carried
    /// over from `self` no matter what the input says.
    #[must_use]
    pub fn patched(&self, input: &WorkTaskInput) -> Self {
        Self {
            id: self.id,
            title: input.title.clone(),
            description: input.description.clone(),
            status: input.status.clone(),
            priority: input.priority.clone(),
            start_date: input.start_date,
            end_date: input.end_date,
            due_date: input.due_date,
            progress: input.progress,
            display_order: input.display_order,
            work_area_id: input.work_area_id,
            created_by_user_id: self.created_by_user_id.clone(),
            created_by_user_name: self.created_by_user_name.clone(),
            created_date: self.created_date,
            is_deleted: self.is_deleted,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkTaskInput {
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    #[serde(default, with = "optional_date")]
    pub start_date: Option<Date>,
    #[serde(default, with = "optional_date")]
    pub end_date: Option<Date>,
    #[serde(default, with = "optional_date")]
    pub due_date: Option<Date>,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub display_order: i32,
    pub work_area_id: WorkAreaId,
}

impl WorkTaskInput {
    /// # Errors
    /// Returns [`WorkError::Validation`] for blank titles or statuses, progress
    /// above 100, or a start date after the end date.
    pub fn validate(&self) -> Result<(), WorkError> {
        if self.title.trim().is_empty() {
            return Err(WorkError::Validation(
                "work task title MUST be provided".to_string(),
            ));
        }
        if self.status.trim().is_empty() {
            return Err(WorkError::Validation(
                "work task status MUST be provided".to_string(),
            ));
        }
        if self.progress > MAX_PROGRESS {
            return Err(WorkError::Validation(format!(
                "progress MUST be in [0, {MAX_PROGRESS}], got {}",
                self.progress
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(WorkError::Validation(
                    "start_date MUST NOT be after end_date".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Stored state of a task membership.
///
/// `Purged` never reaches the store: it tags the snapshot returned by a hard
/// delete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemberLifecycle {
    Active,
    Inactive,
    Purged,
}

impl MemberLifecycle {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Purged => "purged",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "purged" => Some(Self::Purged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskMember {
    pub id: TaskMemberId,
    pub work_task_id: WorkTaskId,
    pub user_id: String,
    pub user_name: String,
    pub user_email: Option<String>,
    pub role: String,
    pub assigned_by_user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub assigned_date: OffsetDateTime,
    pub lifecycle: MemberLifecycle,
}

impl TaskMember {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lifecycle == MemberLifecycle::Active
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.lifecycle != MemberLifecycle::Active
    }

    /// Address used for notification delivery: the membership email, or the
    /// user name when no email was recorded.
    #[must_use]
    pub fn recipient_address(&self) -> &str {
        match self.user_email.as_deref() {
            Some(email) if !email.trim().is_empty() => email,
            _ => &self.user_name,
        }
    }
}

pub const DEFAULT_MEMBER_ROLE: &str = "Member";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssigneeInput {
    pub user_id: String,
    pub user_name: String,
    pub user_email: Option<String>,
    pub role: String,
}

impl AssigneeInput {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_email: None,
            role: DEFAULT_MEMBER_ROLE.to_string(),
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    /// # Errors
    /// Returns [`WorkError::Validation`] when user id or user name is blank.
    pub fn validate(&self) -> Result<(), WorkError> {
        if self.user_id.trim().is_empty() {
            return Err(WorkError::Validation(
                "member user_id MUST be provided".to_string(),
            ));
        }
        if self.user_name.trim().is_empty() {
            return Err(WorkError::Validation(
                "member user_name MUST be provided".to_string(),
            ));
        }
        Ok(())
    }
}

/// The only member fields that may change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskMemberUpdate {
    pub role: String,
    pub is_active: bool,
    pub assigned_by_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskObjective {
    pub id: TaskObjectiveId,
    pub work_task_id: WorkTaskId,
    pub title: String,
    pub display_order: i32,
    pub created_by_user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_date: OffsetDateTime,
    pub is_completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_date: Option<OffsetDateTime>,
    pub completed_by_user_id: Option<String>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectiveInput {
    pub title: String,
    #[serde(default)]
    pub display_order: i32,
}

impl ObjectiveInput {
    /// # Errors
    /// Returns [`WorkError::Validation`] when the title is blank.
    pub fn validate(&self) -> Result<(), WorkError> {
        if self.title.trim().is_empty() {
            return Err(WorkError::Validation(
                "objective title MUST be provided".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TaskActionType {
    Created,
    Updated,
}

impl TaskActionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Created" => Some(Self::Created),
            "Updated" => Some(Self::Updated),
            _ => None,
        }
    }
}

/// One immutable entry of a task's action log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskAction {
    pub id: TaskActionId,
    pub work_task_id: WorkTaskId,
    pub action_type: TaskActionType,
    pub description: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub action_date: OffsetDateTime,
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTaskAction {
    pub work_task_id: WorkTaskId,
    pub action_type: TaskActionType,
    pub description: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: Actor,
    pub action_date: OffsetDateTime,
}

impl NewTaskAction {
    #[must_use]
    pub fn created(task: &WorkTask, actor: &Actor, at: OffsetDateTime) -> Self {
        Self {
            work_task_id: task.id,
            action_type: TaskActionType::Created,
            description: format!("Task '{}' created", task.title),
            old_value: None,
            new_value: None,
            actor: actor.clone(),
            action_date: at,
        }
    }

    #[must_use]
    pub fn field_updated(
        task_id: WorkTaskId,
        change: &FieldChange,
        actor: &Actor,
        at: OffsetDateTime,
    ) -> Self {
        Self {
            work_task_id: task_id,
            action_type: TaskActionType::Updated,
            description: format!("{} changed", change.field),
            old_value: Some(change.old_value.clone()),
            new_value: Some(change.new_value.clone()),
            actor: actor.clone(),
            action_date: at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub task_id: WorkTaskId,
    pub user_id: String,
    pub user_name: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub is_deleted: bool,
}

/// # Errors
/// Returns [`WorkError::Validation`] when the content is blank.
pub fn validate_comment_content(content: &str) -> Result<(), WorkError> {
    if content.trim().is_empty() {
        return Err(WorkError::Validation(
            "comment content MUST be provided".to_string(),
        ));
    }
    Ok(())
}

/// 1-based page selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct PageRequest {
    pub index: u32,
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { index: 1, size: 20 }
    }
}

impl PageRequest {
    #[must_use]
    pub fn new(index: u32, size: u32) -> Self {
        Self { index, size }
    }

    /// # Errors
    /// Returns [`WorkError::Validation`] when index or size is zero.
    pub fn validate(&self) -> Result<(), WorkError> {
        if self.index == 0 {
            return Err(WorkError::Validation(
                "page index is 1-based and MUST be >= 1".to_string(),
            ));
        }
        if self.size == 0 {
            return Err(WorkError::Validation("page size MUST be >= 1".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.index.saturating_sub(1)) * u64::from(self.size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page_index: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(u64::from(self.page_size))
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page_index: self.page_index,
            page_size: self.page_size,
        }
    }
}

/// Substring filter over title/description style text columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextSearch {
    pub needle: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl TextSearch {
    pub fn new(needle: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            needle: needle.into(),
            case_sensitive,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub default_channels: BTreeSet<NotificationChannel>,
    /// When false, queued notifications stay in the outbox until drained.
    pub deliver_after_commit: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_channels: BTreeSet::from([NotificationChannel::Email]),
            deliver_after_commit: true,
        }
    }
}

impl OrchestratorConfig {
    /// # Errors
    /// Returns [`WorkError::Validation`] when no delivery channel is configured.
    pub fn validate(&self) -> Result<(), WorkError> {
        if self.default_channels.is_empty() {
            return Err(WorkError::Validation(
                "at least one notification channel MUST be configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Current time in UTC, truncated to microseconds so that stored and
/// in-memory values compare equal.
#[must_use]
pub fn now_utc() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc().to_offset(UtcOffset::UTC);
    now.replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`WorkError::Validation`] when parsing fails or the timestamp is
/// not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, WorkError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| WorkError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(WorkError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as fixed-width RFC3339 (microsecond precision, `Z`),
/// so stored values sort chronologically as text.
///
/// # Errors
/// Returns [`WorkError::Validation`] when formatting fails.
pub fn format_timestamp(value: OffsetDateTime) -> Result<String, WorkError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .map_err(|err| WorkError::Validation(format!("failed to format timestamp: {err}")))
}

/// # Errors
/// Returns [`WorkError::Validation`] unless the value is `yyyy-MM-dd`.
pub fn parse_date(value: &str) -> Result<Date, WorkError> {
    Date::parse(value.trim(), DATE_FORMAT)
        .map_err(|err| WorkError::Validation(format!("invalid date `{value}`: {err}")))
}

/// `yyyy-MM-dd`, or an empty string when absent.
#[must_use]
pub fn format_date(value: Option<Date>) -> String {
    value
        .and_then(|date| date.format(DATE_FORMAT).ok())
        .unwrap_or_default()
}

/// `yyyy-MM-dd` on the wire for optional calendar dates.
mod optional_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Date>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => serializer.serialize_str(&super::format_date(Some(*date))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Date>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => super::parse_date(value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
