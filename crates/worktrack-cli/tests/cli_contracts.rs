#![allow(clippy::single_match_else)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jsonschema::JSONSchema;
use serde_json::{json, Value};
use worktrack_core::WorkAreaId;

fn wt_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_wt") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/wt");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "worktrack-cli", "--bin", "wt"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build wt binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn temp_db(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("wt-{label}-{}.sqlite3", WorkAreaId::new()))
}

fn wt_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(wt_binary_path());
    command.arg("--db").arg(db_path);
    command.env_remove("WORKTRACK_LOG");
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run wt command {args:?}: {err}"),
    }
}

fn parse_json(bytes: &[u8], output: &Output) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    parse_json(&output.stdout, output)
}

fn stderr_json(output: &Output) -> Value {
    assert!(!output.status.success(), "command unexpectedly succeeded");
    parse_json(&output.stderr, output)
}

fn string_at(value: &Value, pointer: &str) -> String {
    match value.pointer(pointer).and_then(Value::as_str) {
        Some(found) => found.to_string(),
        None => panic!("missing string at {pointer} in {value}"),
    }
}

fn assert_schema(schema_name: &str, value: &Value) {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../contracts/v1/schemas")
        .join(schema_name);
    let body = fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()));
    let schema: Value = serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse {}: {err}", path.display()));
    let compiled = JSONSchema::compile(&schema)
        .unwrap_or_else(|err| panic!("failed to compile {}: {err}", path.display()));
    if let Err(errors) = compiled.validate(value) {
        let errors: Vec<String> = errors.map(|err| err.to_string()).collect();
        panic!("{schema_name} rejected {value}:\n{}", errors.join("\n"));
    };
}

#[test]
fn help_lists_every_command_group() {
    let output = match Command::new(wt_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in [
        "area",
        "task",
        "member",
        "objective",
        "comment",
        "actions",
        "outbox",
    ] {
        assert!(
            stdout.contains(required),
            "missing `{required}` in help output:\n{stdout}"
        );
    }
}

#[test]
fn status_change_scenario_end_to_end() {
    let db = temp_db("scenario");

    let area = stdout_json(&wt_output(
        &db,
        &[
            "--actor-id",
            "owner",
            "--actor-name",
            "Olga",
            "area",
            "create",
            "--name",
            "A",
            "--project-id",
            "proj-1",
        ],
    ));
    let area_id = string_at(&area, "/value/id");

    let task = stdout_json(&wt_output(
        &db,
        &[
            "--actor-id", "owner", "task", "create", "--area-id", &area_id, "--title", "T",
        ],
    ));
    let task_id = string_at(&task, "/value/id");
    assert_eq!(task["value"]["status"], json!("Todo"));
    assert_eq!(task["notifications"], json!([]));

    for user in ["u1", "u2"] {
        stdout_json(&wt_output(
            &db,
            &[
                "--actor-id",
                "owner",
                "member",
                "assign",
                "--task-id",
                &task_id,
                "--user-id",
                user,
                "--user-name",
                user,
                "--email",
                &format!("{user}@example.com"),
            ],
        ));
    }

    let updated = stdout_json(&wt_output(
        &db,
        &[
            "--actor-id", "owner", "task", "update", "--id", &task_id, "--status", "Done",
        ],
    ));
    let notifications = match updated["notifications"].as_array() {
        Some(items) => items.clone(),
        None => panic!("notifications missing: {updated}"),
    };
    assert_eq!(notifications.len(), 2);
    for message in &notifications {
        assert_eq!(message["type"], json!("task_status_changed"));
        assert_eq!(message["project_id"], json!("proj-1"));
        assert_schema("notification-message.schema.json", message);
    }
    assert_eq!(updated["delivery"]["delivered"], json!(2));

    let actions = stdout_json(&wt_output(&db, &["actions", "--task-id", &task_id]));
    assert_eq!(actions["total_count"], json!(2));
    assert_eq!(actions["items"][0]["action_type"], json!("Updated"));
    assert_eq!(actions["items"][0]["old_value"], json!("Todo"));
    assert_eq!(actions["items"][0]["new_value"], json!("Done"));

    let deleted = stdout_json(&wt_output(
        &db,
        &["--actor-id", "owner", "task", "delete", "--id", &task_id],
    ));
    let recipients: Vec<&str> = deleted["notifications"]
        .as_array()
        .map(|items| items.iter().filter_map(|item| item["user_id"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(recipients, vec!["u1", "u2"]);
    assert!(deleted["notifications"]
        .as_array()
        .is_some_and(|items| items.iter().all(|item| item["priority"] == json!("high"))));

    let missing = stderr_json(&wt_output(&db, &["task", "get", "--id", &task_id]));
    assert_eq!(missing["error"]["code"], json!("not_found"));
    assert_schema("error-envelope.schema.json", &missing);

    let _ = fs::remove_file(db);
}

#[test]
fn comment_by_another_user_is_unauthorized() {
    let db = temp_db("comments");

    let area = stdout_json(&wt_output(
        &db,
        &["--actor-id", "owner", "area", "create", "--name", "A", "--project-id", "p"],
    ));
    let area_id = string_at(&area, "/value/id");
    let task = stdout_json(&wt_output(
        &db,
        &[
            "--actor-id",
            "owner",
            "task",
            "create",
            "--area-id",
            &area_id,
            "--title",
            "T",
            "--assignee",
            "u1:Uma",
        ],
    ));
    let task_id = string_at(&task, "/value/id");

    let comment = stdout_json(&wt_output(
        &db,
        &[
            "--actor-id", "u1", "comment", "add", "--task-id", &task_id, "--content", "hello",
        ],
    ));
    let comment_id = string_at(&comment, "/value/id");

    let denied = stderr_json(&wt_output(
        &db,
        &[
            "--actor-id", "u2", "comment", "update", "--id", &comment_id, "--content", "mine now",
        ],
    ));
    assert_eq!(denied["error"]["code"], json!("unauthorized"));
    assert_schema("error-envelope.schema.json", &denied);

    let listed = stdout_json(&wt_output(&db, &["comment", "list", "--task-id", &task_id]));
    assert_eq!(listed["items"][0]["content"], json!("hello"));

    let _ = fs::remove_file(db);
}

#[test]
fn invalid_page_is_a_validation_error() {
    let db = temp_db("paging");
    let output = wt_output(&db, &["area", "list", "--page", "0"]);
    let envelope = stderr_json(&output);
    assert_eq!(envelope["error"]["code"], json!("validation"));
    let _ = fs::remove_file(db);
}

#[test]
fn outbox_status_reports_counts() {
    let db = temp_db("outbox");
    let status = stdout_json(&wt_output(&db, &["outbox", "status"]));
    assert_eq!(status, json!({"pending": 0, "delivered": 0, "failing": 0}));
    let _ = fs::remove_file(db);
}
