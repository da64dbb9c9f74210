//! Field-level change detection over an allowlist of tracked fields.

use serde::Serialize;

use crate::{format_date, WorkArea, WorkTask};

/// A record whose tracked fields can be compared by their rendered values.
///
/// Implementations return the same field names in the same order for every
/// value of the type.
pub trait TrackedFields {
    fn tracked_fields(&self) -> Vec<(&'static str, String)>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old_value: String,
    pub new_value: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ChangeSet {
    pub changes: Vec<FieldChange>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn touches(&self, field: &str) -> bool {
        self.changes.iter().any(|change| change.field == field)
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<&'static str> {
        self.changes.iter().map(|change| change.field).collect()
    }
}

pub fn diff_tracked<T: TrackedFields>(old: &T, new: &T) -> ChangeSet {
    let changes = old
        .tracked_fields()
        .into_iter()
        .zip(new.tracked_fields())
        .filter(|((_, before), (_, after))| before != after)
        .map(|((field, old_value), (_, new_value))| FieldChange {
            field,
            old_value,
            new_value,
        })
        .collect();

    ChangeSet { changes }
}

impl TrackedFields for WorkTask {
    fn tracked_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Title", self.title.clone()),
            ("Description", self.description.clone().unwrap_or_default()),
            ("Status", self.status.clone()),
            ("Priority", self.priority.clone()),
            ("StartDate", format_date(self.start_date)),
            ("EndDate", format_date(self.end_date)),
            ("DueDate", format_date(self.due_date)),
            ("Progress", self.progress.to_string()),
            ("DisplayOrder", self.display_order.to_string()),
            ("WorkAreaId", self.work_area_id.to_string()),
        ]
    }
}

impl TrackedFields for WorkArea {
    fn tracked_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Name", self.name.clone()),
            ("Description", self.description.clone().unwrap_or_default()),
            ("DisplayOrder", self.display_order.to_string()),
            ("ProjectId", self.project_id.clone()),
        ]
    }
}
