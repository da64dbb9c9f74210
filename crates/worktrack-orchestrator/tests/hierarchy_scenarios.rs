use std::path::Path;

use worktrack_core::{
    Actor, AssigneeInput, MemberLifecycle, NotificationPriority, NotificationType,
    ObjectiveInput, PageRequest, TaskActionType, TaskMemberUpdate, WorkArea, WorkAreaId,
    WorkAreaInput, WorkTask, WorkTaskId, WorkTaskInput,
};
use worktrack_orchestrator::{
    Orchestrator, RecordingDispatcher, ServiceError, ServiceResult, WorkAreaQuery, WorkTaskQuery,
};
use worktrack_store_sqlite::SqliteEntityStore;

fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("unexpected error: {err}"),
    }
}

fn must_err<T: std::fmt::Debug>(result: ServiceResult<T>) -> ServiceError {
    match result {
        Ok(value) => panic!("expected an error, got {value:?}"),
        Err(err) => err,
    }
}

fn orchestrator() -> Orchestrator<RecordingDispatcher> {
    let store = must(SqliteEntityStore::open(Path::new(":memory:")));
    must(store.migrate());
    must(Orchestrator::new(
        store,
        RecordingDispatcher::new(),
        worktrack_core::OrchestratorConfig::default(),
    ))
}

fn owner() -> Actor {
    Actor::new("owner", "Olga")
}

fn area_input(name: &str) -> WorkAreaInput {
    WorkAreaInput {
        name: name.to_string(),
        description: Some("area".to_string()),
        display_order: 0,
        project_id: "proj-1".to_string(),
        created_by_user_id: None,
    }
}

fn task_input(area_id: WorkAreaId, title: &str) -> WorkTaskInput {
    WorkTaskInput {
        title: title.to_string(),
        description: None,
        status: "Todo".to_string(),
        priority: "Normal".to_string(),
        start_date: None,
        end_date: None,
        due_date: None,
        progress: 0,
        display_order: 0,
        work_area_id: area_id,
    }
}

fn user(id: &str) -> AssigneeInput {
    AssigneeInput::new(id, format!("{id}-name")).with_email(format!("{id}@example.com"))
}

fn create_area(orch: &mut Orchestrator<RecordingDispatcher>, name: &str) -> WorkArea {
    must(orch.create_work_area(&owner(), &area_input(name))).value
}

fn create_task(orch: &mut Orchestrator<RecordingDispatcher>, area: &WorkArea, title: &str) -> WorkTask {
    must(orch.create_work_task(&owner(), &task_input(area.id, title), &[])).value
}

fn assign(orch: &mut Orchestrator<RecordingDispatcher>, task: WorkTaskId, users: &[&str]) {
    for id in users {
        must(orch.assign_work_task_to_user(&owner(), task, &user(id)));
    }
}

#[test]
fn status_change_scenario_records_one_action_and_notifies_each_member() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");
    assign(&mut orch, task.id, &["u1", "u2"]);
    orch.dispatcher().clear();

    let mut input = task_input(area.id, "T");
    input.status = "Done".to_string();
    let applied = must(orch.update_work_task(&owner(), task.id, &input));

    let actions = must(orch.list_task_actions(task.id, PageRequest::default()));
    let updates: Vec<_> = actions
        .items
        .iter()
        .filter(|action| action.action_type == TaskActionType::Updated)
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].description, "Status changed");
    assert_eq!(updates[0].old_value.as_deref(), Some("Todo"));
    assert_eq!(updates[0].new_value.as_deref(), Some("Done"));

    let sent = orch.dispatcher().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(applied.notified_users(), vec!["u1", "u2"]);
    assert!(sent
        .iter()
        .all(|message| message.notification_type == NotificationType::TaskStatusChanged));
    assert_eq!(sent[0].project_id.as_deref(), Some("proj-1"));

    orch.dispatcher().clear();
    let objective = must(orch.create_objective(
        &owner(),
        task.id,
        &ObjectiveInput {
            title: "Docs".to_string(),
            display_order: 0,
        },
    ))
    .value;
    must(orch.add_comment(&Actor::new("u1", "u1-name"), task.id, "done?"));
    orch.dispatcher().clear();

    let deleted = must(orch.delete_work_task(&owner(), task.id));
    assert_eq!(deleted.value.id, task.id);

    let sent = orch.dispatcher().sent();
    let recipients: Vec<_> = sent.iter().map(|message| message.user_id.as_str()).collect();
    assert_eq!(recipients, vec!["u1", "u2"]);
    assert!(sent.iter().all(|message| {
        message.notification_type == NotificationType::TaskDeleted
            && message.priority == NotificationPriority::High
    }));

    let reads = orch.store().reads();
    assert!(must(reads.work_task(task.id)).is_none());
    assert!(must(reads.task_members(task.id)).is_empty());
    assert!(must(reads.task_objectives(task.id)).is_empty());
    assert!(must(reads.objective(objective.id)).is_none());
    assert_eq!(
        must(reads.list_task_actions(task.id, PageRequest::default())).total_count,
        0
    );
    assert_eq!(
        must(reads.list_comments(task.id, PageRequest::default())).total_count,
        0
    );
    assert_eq!(must_err(orch.get_work_task(task.id)).code(), "not_found");
}

#[test]
fn task_update_appends_one_action_per_changed_field() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");
    assign(&mut orch, task.id, &["u1"]);
    orch.dispatcher().clear();

    let mut input = task_input(area.id, "T renamed");
    input.progress = 40;
    input.due_date = Some(time::macros::date!(2026 - 06 - 30));
    must(orch.update_work_task(&owner(), task.id, &input));

    let page = must(orch.list_task_actions(task.id, PageRequest::default()));
    assert_eq!(page.total_count, 4);
    let mut fields: Vec<_> = page
        .items
        .iter()
        .filter(|action| action.action_type == TaskActionType::Updated)
        .map(|action| action.description.clone())
        .collect();
    fields.sort();
    assert_eq!(fields, vec!["DueDate changed", "Progress changed", "Title changed"]);
    assert_eq!(orch.dispatcher().sent().len(), 1);
    assert_eq!(
        orch.dispatcher().sent()[0].notification_type,
        NotificationType::TaskUpdated
    );
}

#[test]
fn unchanged_update_records_nothing_and_notifies_nobody() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");
    assign(&mut orch, task.id, &["u1", "u2"]);
    orch.dispatcher().clear();

    let applied = must(orch.update_work_task(&owner(), task.id, &task_input(area.id, "T")));
    assert!(applied.notifications.is_empty());
    assert!(orch.dispatcher().sent().is_empty());

    let page = must(orch.list_task_actions(task.id, PageRequest::default()));
    assert_eq!(page.total_count, 1);
    assert_eq!(page.items[0].action_type, TaskActionType::Created);
}

#[test]
fn memberless_task_updates_and_deletes_without_notifications() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");

    let mut input = task_input(area.id, "T");
    input.status = "Done".to_string();
    let updated = must(orch.update_work_task(&owner(), task.id, &input));
    assert_eq!(updated.value.status, "Done");
    assert!(updated.notifications.is_empty());
    assert_eq!(must(orch.get_work_task(task.id)).status, "Done");
    assert_eq!(
        must(orch.list_task_actions(task.id, PageRequest::default())).total_count,
        2
    );

    let deleted = must(orch.delete_work_task(&owner(), task.id));
    assert_eq!(deleted.value.id, task.id);
    assert!(deleted.notifications.is_empty());
    assert_eq!(must_err(orch.get_work_task(task.id)).code(), "not_found");

    assert!(orch.dispatcher().sent().is_empty());
    let status = must(orch.outbox_status());
    assert_eq!(status.pending + status.delivered, 0);
}

#[test]
fn update_preserves_creation_stamps_and_revalidates_area() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");

    let editor = Actor::new("editor", "Eve");
    let updated = must(orch.update_work_task(&editor, task.id, &task_input(area.id, "T2"))).value;
    assert_eq!(updated.created_by_user_id, "owner");
    assert_eq!(updated.created_by_user_name, "Olga");
    assert_eq!(updated.created_date, task.created_date);

    let err = must_err(orch.update_work_task(&editor, task.id, &task_input(WorkAreaId::new(), "T3")));
    assert_eq!(err.code(), "validation");
    assert_eq!(must(orch.get_work_task(task.id)).title, "T2");

    let err = must_err(orch.update_work_task(&editor, WorkTaskId::new(), &task_input(area.id, "x")));
    assert_eq!(err.code(), "not_found");
}

#[test]
fn create_requires_live_area_and_notifies_creator_member_only() {
    let mut orch = orchestrator();
    let err = must_err(orch.create_work_task(&owner(), &task_input(WorkAreaId::new(), "T"), &[]));
    assert_eq!(err.code(), "validation");

    let area = create_area(&mut orch, "A");
    let mut input = task_input(area.id, "T");
    input.progress = 70;
    let creator = AssigneeInput::new("owner", "Olga").with_email("olga@example.com");
    let applied = must(orch.create_work_task(&owner(), &input, &[creator, user("u1")]));

    assert_eq!(applied.value.progress, 0);
    assert_eq!(applied.notified_users(), vec!["owner"]);
    let sent = orch.dispatcher().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].notification_type, NotificationType::TaskCreated);
    assert_eq!(
        sent[0].metadata["recipient_address"],
        serde_json::json!("olga@example.com")
    );

    let members = must(orch.list_task_members(applied.value.id));
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|member| member.assigned_by_user_id == "owner"));

    orch.dispatcher().clear();
    must(orch.create_work_task(&owner(), &task_input(area.id, "no members"), &[]));
    assert!(orch.dispatcher().sent().is_empty());
}

#[test]
fn duplicate_assignment_conflicts_until_soft_removed() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");
    assign(&mut orch, task.id, &["u1"]);

    let err = must_err(orch.assign_work_task_to_user(&owner(), task.id, &user("u1")));
    assert_eq!(err.code(), "conflict");

    orch.dispatcher().clear();
    let removed = must(orch.remove_work_task_from_user(&owner(), task.id, "u1"));
    let removed_member = match removed.value {
        Some(ref member) => member,
        None => panic!("expected the membership to be removed"),
    };
    assert_eq!(removed_member.lifecycle, MemberLifecycle::Inactive);
    assert!(removed_member.is_deleted());
    assert_eq!(removed.notified_users(), vec!["u1"]);
    assert_eq!(
        orch.dispatcher().sent()[0].notification_type,
        NotificationType::TaskUnassigned
    );

    let again = must(orch.remove_work_task_from_user(&owner(), task.id, "u1"));
    assert!(again.value.is_none());
    assert!(again.notifications.is_empty());

    let reassigned = must(orch.assign_work_task_to_user(&owner(), task.id, &user("u1")));
    assert_ne!(reassigned.value.id, removed_member.id);
    assert_eq!(must(orch.store().reads().task_members(task.id)).len(), 2);
}

#[test]
fn assignment_notifies_every_active_member_including_new_one() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");
    assign(&mut orch, task.id, &["u1"]);
    orch.dispatcher().clear();

    let applied = must(orch.assign_work_task_to_user(&owner(), task.id, &user("u2")));
    assert_eq!(applied.notified_users(), vec!["u1", "u2"]);

    let err = must_err(orch.assign_work_task_to_user(&owner(), WorkTaskId::new(), &user("u3")));
    assert_eq!(err.code(), "validation");
}

#[test]
fn member_update_reactivation_rechecks_uniqueness() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");
    let first = must(orch.assign_work_task_to_user(&owner(), task.id, &user("u1"))).value;
    must(orch.remove_task_member(&owner(), first.id));
    must(orch.assign_work_task_to_user(&owner(), task.id, &user("u1")));

    let err = must_err(orch.update_task_member(
        &owner(),
        first.id,
        &TaskMemberUpdate {
            role: "Reviewer".to_string(),
            is_active: true,
            assigned_by_user_id: "owner".to_string(),
        },
    ));
    assert_eq!(err.code(), "conflict");

    orch.dispatcher().clear();
    let updated = must(orch.update_task_member(
        &owner(),
        first.id,
        &TaskMemberUpdate {
            role: "Reviewer".to_string(),
            is_active: false,
            assigned_by_user_id: String::new(),
        },
    ))
    .value;
    assert_eq!(updated.role, "Reviewer");
    assert_eq!(updated.assigned_by_user_id, "owner");
    assert_eq!(updated.user_id, first.user_id);
    assert_eq!(orch.dispatcher().sent().len(), 1);
    assert_eq!(
        orch.dispatcher().sent()[0].notification_type,
        NotificationType::TaskMemberUpdated
    );
}

#[test]
fn member_hard_delete_purges_row_and_notifies_remaining_and_purged() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");
    assign(&mut orch, task.id, &["u1", "u2"]);
    let target = must(orch.store().reads().active_membership(task.id, "u2"));
    let target = match target {
        Some(member) => member,
        None => panic!("u2 should be an active member"),
    };
    orch.dispatcher().clear();

    let applied = must(orch.delete_task_member(&owner(), target.id));
    assert_eq!(applied.value.lifecycle, MemberLifecycle::Purged);
    assert_eq!(applied.value.work_task_id, task.id);
    assert_eq!(applied.notified_users(), vec!["u1", "u2"]);
    assert!(must(orch.store().reads().task_member(target.id)).is_none());
    assert_eq!(must_err(orch.get_task_member(target.id)).code(), "not_found");
    assert_eq!(must_err(orch.delete_task_member(&owner(), target.id)).code(), "not_found");
}

#[test]
fn work_area_delete_sends_per_task_notices_plus_one_per_distinct_user() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let first = create_task(&mut orch, &area, "T1");
    let second = create_task(&mut orch, &area, "T2");
    let third = create_task(&mut orch, &area, "T3");
    assign(&mut orch, first.id, &["u1", "u2"]);
    assign(&mut orch, second.id, &["u2", "u3"]);
    assign(&mut orch, third.id, &["u1", "u3"]);
    orch.dispatcher().clear();

    let applied = must(orch.delete_work_area(&owner(), area.id));
    let sent = orch.dispatcher().sent();

    let task_notices = sent
        .iter()
        .filter(|message| message.notification_type == NotificationType::TaskDeleted)
        .count();
    let area_notices: Vec<_> = sent
        .iter()
        .filter(|message| message.notification_type == NotificationType::WorkAreaDeleted)
        .map(|message| message.user_id.as_str())
        .collect();
    assert_eq!(task_notices, 3 * 2);
    assert_eq!(area_notices, vec!["u1", "u2", "u3"]);
    assert_eq!(applied.notifications.len(), 9);

    assert_eq!(must_err(orch.get_work_area(area.id)).code(), "not_found");
    for task in [&first, &second, &third] {
        assert!(must(orch.store().reads().work_task(task.id)).is_none());
    }
}

#[test]
fn work_area_update_notifies_distinct_members_and_guards_creator() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let first = create_task(&mut orch, &area, "T1");
    let second = create_task(&mut orch, &area, "T2");
    assign(&mut orch, first.id, &["u1", "u2"]);
    assign(&mut orch, second.id, &["u2"]);
    orch.dispatcher().clear();

    let mut input = area_input("A renamed");
    input.created_by_user_id = Some("  ".to_string());
    let applied = must(orch.update_work_area(&owner(), area.id, &input));
    assert_eq!(applied.value.created_by_user_id, "owner");
    assert_eq!(applied.notified_users(), vec!["u1", "u2"]);
    assert_eq!(
        applied.notifications[0].metadata["changed_fields"],
        serde_json::json!(["Name"])
    );

    orch.dispatcher().clear();
    let unchanged = must(orch.update_work_area(&owner(), area.id, &input));
    assert_eq!(unchanged.notified_users(), vec!["u1", "u2"]);
    assert_eq!(
        unchanged.notifications[0].metadata["changed_fields"],
        serde_json::json!([])
    );
    assert_eq!(unchanged.notifications[0].message, "Olga updated work area 'A renamed'");

    orch.dispatcher().clear();
    input.created_by_user_id = Some("new-owner".to_string());
    let applied = must(orch.update_work_area(&owner(), area.id, &input));
    assert_eq!(applied.value.created_by_user_id, "new-owner");
    assert_eq!(applied.notified_users(), vec!["u1", "u2"]);
    assert_eq!(orch.dispatcher().sent().len(), 2);
    assert_eq!(
        must(orch.get_work_area(area.id)).created_by_user_id,
        "new-owner"
    );
}

#[test]
fn comment_edits_by_non_author_are_rejected_without_side_effects() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");
    assign(&mut orch, task.id, &["u1", "u2"]);

    let author = Actor::new("u1", "u1-name");
    let comment = must(orch.add_comment(&author, task.id, "first draft")).value;
    orch.dispatcher().clear();

    let intruder = Actor::new("u2", "u2-name");
    let err = must_err(orch.update_comment(&intruder, comment.id, "hijacked"));
    assert_eq!(err.code(), "unauthorized");
    let err = must_err(orch.delete_comment(&intruder, comment.id));
    assert_eq!(err.code(), "unauthorized");
    assert!(orch.dispatcher().sent().is_empty());

    let stored = must(orch.list_comments(task.id, PageRequest::default()));
    assert_eq!(stored.items.len(), 1);
    assert_eq!(stored.items[0].content, "first draft");

    let edited = must(orch.update_comment(&author, comment.id, "second draft"));
    assert_eq!(edited.notified_users(), vec!["u1", "u2"]);
    must(orch.delete_comment(&author, comment.id));
    assert_eq!(
        must(orch.list_comments(task.id, PageRequest::default())).total_count,
        0
    );
    assert_eq!(
        must_err(orch.add_comment(&author, WorkTaskId::new(), "hello")).code(),
        "not_found"
    );
}

#[test]
fn objective_notices_duplicate_for_creator_who_is_member() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "A");
    let task = create_task(&mut orch, &area, "T");
    assign(&mut orch, task.id, &["owner", "u1"]);
    orch.dispatcher().clear();

    let objective = must(orch.create_objective(
        &owner(),
        task.id,
        &ObjectiveInput {
            title: "Write docs".to_string(),
            display_order: 1,
        },
    ));
    assert_eq!(objective.notified_users(), vec!["owner", "owner", "u1"]);

    let completer = Actor::new("u1", "u1-name");
    let completed = must(orch.complete_objective(&completer, objective.value.id, true));
    assert!(completed.value.is_completed);
    assert_eq!(completed.value.completed_by_user_id.as_deref(), Some("u1"));
    assert!(completed.value.completed_date.is_some());
    assert_eq!(completed.notified_users(), vec!["owner", "owner", "u1"]);
    assert_eq!(
        completed.notifications[0].notification_type,
        NotificationType::ObjectiveCompleted
    );

    let reopened = must(orch.complete_objective(&completer, objective.value.id, false));
    assert!(reopened.value.completed_date.is_none());
    assert!(reopened.value.completed_by_user_id.is_none());
    assert_eq!(
        reopened.notifications[0].notification_type,
        NotificationType::ObjectiveReopened
    );

    let deleted = must(orch.delete_objective(&owner(), objective.value.id));
    assert_eq!(deleted.notified_users(), vec!["owner", "u1"]);
    assert!(must(orch.list_objectives(task.id)).is_empty());
    assert_eq!(
        must_err(orch.create_objective(
            &owner(),
            WorkTaskId::new(),
            &ObjectiveInput {
                title: "x".to_string(),
                display_order: 0,
            },
        ))
        .code(),
        "validation"
    );
}

#[test]
fn read_paths_page_from_one_and_filter_by_user() {
    let mut orch = orchestrator();
    let area = create_area(&mut orch, "Backend");
    create_area(&mut orch, "Frontend");
    for title in ["Billing", "billing retries", "Search"] {
        create_task(&mut orch, &area, title);
    }
    let other = Actor::new("u9", "Nia");
    let theirs = must(orch.create_work_task(&other, &task_input(area.id, "Theirs"), &[])).value;
    assign(&mut orch, theirs.id, &["u1"]);

    let areas = must(orch.list_work_areas(&WorkAreaQuery::default(), PageRequest::new(1, 1)));
    assert_eq!(areas.total_count, 2);
    assert_eq!(areas.items.len(), 1);

    let query = WorkTaskQuery {
        work_area_id: None,
        search: Some(worktrack_core::TextSearch::new("billing", false)),
    };
    assert_eq!(must(orch.list_work_tasks(&query, PageRequest::default())).total_count, 2);

    let in_area = must(orch.list_work_tasks_in_area(area.id, PageRequest::new(2, 3)));
    assert_eq!(in_area.total_count, 4);
    assert_eq!(in_area.items.len(), 1);

    let mine = must(orch.get_mine("u1", PageRequest::default()));
    assert_eq!(mine.items.len(), 1);
    assert_eq!(mine.items[0].id, theirs.id);
    assert_eq!(must(orch.get_mine("owner", PageRequest::default())).total_count, 3);

    assert_eq!(
        must_err(orch.list_work_tasks(&query, PageRequest::new(0, 10))).code(),
        "validation"
    );
}
