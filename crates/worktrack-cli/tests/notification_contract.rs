use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use serde_json::Value;
use worktrack_core::{
    diff_tracked, now_utc, Actor, MemberLifecycle, NotificationChannel, NotificationDraft,
    Recipient, TaskMember, TaskMemberId, WorkAreaId, WorkTask, WorkTaskId,
};

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn read_json(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse {}: {err}", path.display()))
}

fn assert_schema(schema_path: &Path, value: &Value) {
    let schema = read_json(schema_path);
    let compiled = JSONSchema::compile(&schema)
        .unwrap_or_else(|err| panic!("failed to compile {}: {err}", schema_path.display()));
    if let Some(errors) = compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!(
            "schema validation failed for {}:\n{}\nvalue={value}",
            schema_path.display(),
            errors.join("\n")
        );
    }
}

fn schema_path(name: &str) -> PathBuf {
    repo_root().join("contracts/v1/schemas").join(name)
}

fn fixture_task() -> WorkTask {
    WorkTask {
        id: WorkTaskId::new(),
        title: "Ship v2".to_string(),
        description: None,
        status: "Todo".to_string(),
        priority: "Normal".to_string(),
        start_date: None,
        end_date: None,
        due_date: None,
        progress: 0,
        display_order: 0,
        work_area_id: WorkAreaId::new(),
        created_by_user_id: "owner".to_string(),
        created_by_user_name: "Olga".to_string(),
        created_date: now_utc(),
        is_deleted: false,
    }
}

fn fixture_member(task: &WorkTask, user_id: &str, email: Option<&str>) -> TaskMember {
    TaskMember {
        id: TaskMemberId::new(),
        work_task_id: task.id,
        user_id: user_id.to_string(),
        user_name: format!("{user_id}-name"),
        user_email: email.map(ToString::to_string),
        role: "Member".to_string(),
        assigned_by_user_id: "owner".to_string(),
        assigned_date: now_utc(),
        lifecycle: MemberLifecycle::Active,
    }
}

#[test]
fn sample_notification_fixture_matches_schema() {
    let fixture = read_json(&repo_root().join("contracts/v1/fixtures/notification-message.sample.json"));
    assert_schema(&schema_path("notification-message.schema.json"), &fixture);
}

#[test]
fn built_notifications_match_schema() {
    let actor = Actor::new("owner", "Olga");
    let before = fixture_task();
    let mut after = before.clone();
    after.status = "Done".to_string();
    let changes = diff_tracked(&before, &after);

    let members = vec![
        fixture_member(&after, "u1", Some("u1@example.com")),
        fixture_member(&after, "u2", None),
    ];
    let channels = BTreeSet::from([NotificationChannel::Email, NotificationChannel::InApp]);

    let drafts = [
        NotificationDraft::task_updated(&after, &changes, &actor).with_project("proj-1"),
        NotificationDraft::task_deleted(&after, &actor),
        NotificationDraft::task_assigned(&after, &members[0], &actor),
    ];

    for draft in &drafts {
        let messages = draft.fan_out(
            &Recipient::active_members(&members),
            &actor,
            &channels,
            now_utc(),
        );
        assert_eq!(messages.len(), 2);
        for message in messages {
            let value = serde_json::to_value(&message)
                .unwrap_or_else(|err| panic!("failed to serialize notification: {err}"));
            assert_schema(&schema_path("notification-message.schema.json"), &value);
        }
    }
}

#[test]
fn error_envelope_matches_schema() {
    let err = anyhow::Error::new(worktrack_core::WorkError::Conflict(
        "user u1 is already assigned".to_string(),
    ));
    let envelope = worktrack_cli::error_envelope(&err);
    assert_eq!(envelope["error"]["code"], serde_json::json!("conflict"));
    assert_schema(&schema_path("error-envelope.schema.json"), &envelope);
}
