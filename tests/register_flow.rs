mod common;

use common::{date, policy_input, TestApp};
use policyhub::models::{DocumentStatus, DocumentType, HistoryAction, ReviewFrequency};
use policyhub::register::{DocumentFilter, DocumentUpdate};
use policyhub::settings::KEY_ENFORCE_TRANSITIONS;
use policyhub::RegisterError;

#[test]
fn references_are_assigned_sequentially() {
    let app = TestApp::new().unwrap();

    let first = app
        .ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();
    assert_eq!(first.doc_ref, "POL-AML-001");

    let second = app
        .ctx
        .register
        .create(&app.editor, policy_input("Sanctions Policy"))
        .unwrap();
    assert_eq!(second.doc_ref, "POL-AML-002");

    let suggestion = app
        .ctx
        .register
        .suggest_ref(DocumentType::Policy, "AML")
        .unwrap();
    assert_eq!(suggestion, "POL-AML-003");
}

#[test]
fn duplicate_reference_is_rejected() {
    let app = TestApp::new().unwrap();

    let mut input = policy_input("AML Policy");
    input.doc_ref = Some("POL-AML-010".to_string());
    app.ctx.register.create(&app.editor, input.clone()).unwrap();

    input.title = "Another Policy".to_string();
    match app.ctx.register.create(&app.editor, input) {
        Err(RegisterError::DuplicateReference(doc_ref)) => assert_eq!(doc_ref, "POL-AML-010"),
        other => panic!("expected DuplicateReference, got {other:?}"),
    }
}

#[test]
fn annual_review_advances_one_calendar_year() {
    let app = TestApp::new().unwrap();

    let doc = app
        .ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();
    assert_eq!(doc.next_review_date, date(2025, 1, 10));

    let reviewed = app
        .ctx
        .register
        .mark_reviewed(&app.editor, &doc.doc_id, date(2025, 1, 10), None, None, None)
        .unwrap();
    assert_eq!(reviewed.last_review_date, date(2025, 1, 10));
    assert_eq!(reviewed.next_review_date, date(2026, 1, 10));

    let history = app.ctx.history.for_document(&doc.doc_id).unwrap();
    let reviewed_rows: Vec<_> = history
        .iter()
        .filter(|e| e.action == HistoryAction::Reviewed.as_str())
        .collect();
    assert_eq!(reviewed_rows.len(), 1);
    assert_eq!(reviewed_rows[0].old_value.as_deref(), Some("2025-01-10"));
    assert_eq!(reviewed_rows[0].new_value.as_deref(), Some("2026-01-10"));
}

#[test]
fn review_date_before_effective_date_is_rejected() {
    let app = TestApp::new().unwrap();
    let doc = app
        .ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();

    let result =
        app.ctx
            .register
            .mark_reviewed(&app.editor, &doc.doc_id, date(2024, 1, 9), None, None, None);
    assert!(matches!(result, Err(RegisterError::Validation(_))));

    // Reviewing on the effective date itself is fine.
    app.ctx
        .register
        .mark_reviewed(&app.editor, &doc.doc_id, date(2024, 1, 10), None, None, None)
        .unwrap();
}

#[test]
fn ad_hoc_documents_need_explicit_next_review() {
    let app = TestApp::new().unwrap();

    let mut input = policy_input("Incident Register");
    input.review_frequency = ReviewFrequency::AdHoc;
    assert!(matches!(
        app.ctx.register.create(&app.editor, input.clone()),
        Err(RegisterError::Validation(_))
    ));

    input.next_review_date = Some(date(2024, 9, 1));
    let doc = app.ctx.register.create(&app.editor, input).unwrap();
    assert_eq!(doc.next_review_date, date(2024, 9, 1));

    // Marking reviewed without a new date fails the same way.
    assert!(matches!(
        app.ctx
            .register
            .mark_reviewed(&app.editor, &doc.doc_id, date(2024, 9, 1), None, None, None),
        Err(RegisterError::Validation(_))
    ));
    let reviewed = app
        .ctx
        .register
        .mark_reviewed(
            &app.editor,
            &doc.doc_id,
            date(2024, 9, 1),
            None,
            Some(date(2025, 3, 1)),
            None,
        )
        .unwrap();
    assert_eq!(reviewed.next_review_date, date(2025, 3, 1));
}

#[test]
fn review_can_bump_the_version_in_one_step() {
    let app = TestApp::new().unwrap();
    let doc = app
        .ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();

    let reviewed = app
        .ctx
        .register
        .mark_reviewed(
            &app.editor,
            &doc.doc_id,
            date(2025, 1, 10),
            Some("2.0"),
            None,
            None,
        )
        .unwrap();
    assert_eq!(reviewed.version, "2.0");
    assert_eq!(reviewed.next_review_date, date(2026, 1, 10));

    let history = app.ctx.history.for_document(&doc.doc_id).unwrap();
    assert!(history
        .iter()
        .any(|e| e.action == HistoryAction::Reviewed.as_str()));
    let version_row = history
        .iter()
        .find(|e| {
            e.action == HistoryAction::Updated.as_str()
                && e.field_changed.as_deref() == Some("version")
        })
        .unwrap();
    assert_eq!(version_row.old_value.as_deref(), Some("1.0"));
    assert_eq!(version_row.new_value.as_deref(), Some("2.0"));
}

#[test]
fn update_writes_one_history_row_per_changed_field() {
    let app = TestApp::new().unwrap();
    let doc = app
        .ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();

    let update = DocumentUpdate {
        title: Some("AML & CFT Policy".to_string()),
        owner: Some("MLRO".to_string()),
        version: Some("1.1".to_string()),
        ..Default::default()
    };
    app.ctx.register.update(&app.editor, &doc.doc_id, update).unwrap();

    let history = app.ctx.history.for_document(&doc.doc_id).unwrap();
    let updated_rows: Vec<_> = history
        .iter()
        .filter(|e| e.action == HistoryAction::Updated.as_str())
        .collect();
    assert_eq!(updated_rows.len(), 3);

    let fields: Vec<_> = updated_rows
        .iter()
        .filter_map(|e| e.field_changed.as_deref())
        .collect();
    assert!(fields.contains(&"title"));
    assert!(fields.contains(&"owner"));
    assert!(fields.contains(&"version"));

    let title_row = updated_rows
        .iter()
        .find(|e| e.field_changed.as_deref() == Some("title"))
        .unwrap();
    assert_eq!(title_row.old_value.as_deref(), Some("AML Policy"));
    assert_eq!(title_row.new_value.as_deref(), Some("AML & CFT Policy"));
}

#[test]
fn schedule_recomputes_when_its_inputs_change() {
    let app = TestApp::new().unwrap();
    let doc = app
        .ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();
    assert_eq!(doc.next_review_date, date(2025, 1, 10));

    // Correcting the last review date moves the whole schedule.
    let updated = app
        .ctx
        .register
        .update(
            &app.editor,
            &doc.doc_id,
            DocumentUpdate {
                last_review_date: Some(date(2024, 3, 1)),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.last_review_date, date(2024, 3, 1));
    assert_eq!(updated.next_review_date, date(2025, 3, 1));

    // Changing the frequency recomputes from the last review.
    let updated = app
        .ctx
        .register
        .update(
            &app.editor,
            &doc.doc_id,
            DocumentUpdate {
                review_frequency: Some(ReviewFrequency::Quarterly),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.next_review_date, date(2024, 6, 1));

    // An explicit next review date always wins over the recompute.
    let updated = app
        .ctx
        .register
        .update(
            &app.editor,
            &doc.doc_id,
            DocumentUpdate {
                last_review_date: Some(date(2024, 4, 1)),
                next_review_date: Some(date(2024, 12, 31)),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.next_review_date, date(2024, 12, 31));

    // Unrelated edits leave the schedule alone.
    let untouched = app
        .ctx
        .register
        .update(
            &app.editor,
            &doc.doc_id,
            DocumentUpdate {
                owner: Some("MLRO".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(untouched.next_review_date, date(2024, 12, 31));
}

#[test]
fn list_can_filter_by_review_bucket() {
    let app = TestApp::new().unwrap();

    let mut overdue = policy_input("Ancient Policy");
    overdue.effective_date = date(2020, 1, 1);
    let overdue_doc = app.ctx.register.create(&app.editor, overdue).unwrap();

    let mut on_track = policy_input("Fresh Policy");
    on_track.next_review_date = Some(date(2099, 1, 1));
    app.ctx.register.create(&app.editor, on_track).unwrap();

    let only_overdue = app
        .ctx
        .register
        .list(
            &app.admin,
            &DocumentFilter {
                review_bucket: Some(policyhub::models::ReviewStatus::Overdue),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(only_overdue.len(), 1);
    assert_eq!(only_overdue[0].doc_id, overdue_doc.doc_id);
}

#[test]
fn unchanged_update_records_nothing() {
    let app = TestApp::new().unwrap();
    let doc = app
        .ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();
    let before = app.ctx.history.for_document(&doc.doc_id).unwrap();

    app.ctx
        .register
        .update(&app.editor, &doc.doc_id, DocumentUpdate::default())
        .unwrap();

    let after = app.ctx.history.for_document(&doc.doc_id).unwrap();
    assert_eq!(before, after);
}

#[test]
fn sequential_updates_last_write_wins() {
    let app = TestApp::new().unwrap();
    let doc = app
        .ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();

    app.ctx
        .register
        .update(
            &app.editor,
            &doc.doc_id,
            DocumentUpdate {
                owner: Some("First Owner".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let final_doc = app
        .ctx
        .register
        .update(
            &app.admin,
            &doc.doc_id,
            DocumentUpdate {
                owner: Some("Second Owner".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(final_doc.owner, "Second Owner");
    assert_eq!(final_doc.updated_by, app.admin.user_id);

    // Both writes are on the record.
    let history = app.ctx.history.for_document(&doc.doc_id).unwrap();
    let owner_rows: Vec<_> = history
        .iter()
        .filter(|e| e.field_changed.as_deref() == Some("owner"))
        .collect();
    assert_eq!(owner_rows.len(), 2);
}

#[test]
fn status_transitions_enforced_only_when_enabled() {
    let app = TestApp::new().unwrap();

    let mut input = policy_input("Draft Policy");
    input.status = DocumentStatus::Draft;
    let doc = app.ctx.register.create(&app.editor, input).unwrap();

    // Off by default: any jump is allowed.
    app.ctx
        .register
        .update(
            &app.editor,
            &doc.doc_id,
            DocumentUpdate {
                status: Some(DocumentStatus::Archived),
                ..Default::default()
            },
        )
        .unwrap();
    app.ctx
        .register
        .update(
            &app.editor,
            &doc.doc_id,
            DocumentUpdate {
                status: Some(DocumentStatus::Draft),
                ..Default::default()
            },
        )
        .unwrap();

    app.ctx
        .settings
        .set(&app.admin, KEY_ENFORCE_TRANSITIONS, "true")
        .unwrap();

    assert!(matches!(
        app.ctx.register.update(
            &app.editor,
            &doc.doc_id,
            DocumentUpdate {
                status: Some(DocumentStatus::Archived),
                ..Default::default()
            },
        ),
        Err(RegisterError::Validation(_))
    ));
    let active = app
        .ctx
        .register
        .update(
            &app.editor,
            &doc.doc_id,
            DocumentUpdate {
                status: Some(DocumentStatus::Active),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(active.status, DocumentStatus::Active.as_str());
}

#[test]
fn delete_keeps_history_and_adds_terminal_entry() {
    let app = TestApp::new().unwrap();
    let doc = app
        .ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();

    // Only admins may delete.
    assert!(matches!(
        app.ctx.delete_document(&app.editor, &doc.doc_id),
        Err(RegisterError::PermissionDenied { .. })
    ));

    app.ctx.delete_document(&app.admin, &doc.doc_id).unwrap();

    assert!(matches!(
        app.ctx.register.get(&app.admin, &doc.doc_id),
        Err(RegisterError::NotFound(_))
    ));

    let history = app.ctx.history.for_document(&doc.doc_id).unwrap();
    assert!(!history.is_empty());
    let last = history.last().unwrap();
    assert_eq!(last.action, HistoryAction::StatusChanged.as_str());
    assert_eq!(last.old_value.as_deref(), Some("ACTIVE"));
    assert_eq!(last.new_value.as_deref(), Some("DELETED"));
    assert_eq!(last.notes.as_deref(), Some("document deleted"));
}

#[test]
fn list_filters_by_category_status_and_search() {
    let app = TestApp::new().unwrap();

    app.ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();
    let mut hr = policy_input("Leave Procedure");
    hr.doc_type = DocumentType::Procedure;
    hr.category = "HR".to_string();
    hr.status = DocumentStatus::Draft;
    app.ctx.register.create(&app.editor, hr).unwrap();

    let aml_only = app
        .ctx
        .register
        .list(
            &app.admin,
            &DocumentFilter {
                category: Some("AML".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(aml_only.len(), 1);
    assert_eq!(aml_only[0].category, "AML");

    let drafts = app
        .ctx
        .register
        .list(
            &app.admin,
            &DocumentFilter {
                status: Some(DocumentStatus::Draft),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].title, "Leave Procedure");

    let searched = app
        .ctx
        .register
        .list(
            &app.admin,
            &DocumentFilter {
                search: Some("leave".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(searched.len(), 1);
}

#[test]
fn attention_list_orders_most_urgent_first() {
    let app = TestApp::new().unwrap();

    let mut overdue = policy_input("Old Policy");
    overdue.effective_date = date(2022, 6, 1);
    app.ctx.register.create(&app.editor, overdue).unwrap();

    let mut due_soon = policy_input("Almost Due Policy");
    due_soon.effective_date = date(2023, 7, 1);
    app.ctx.register.create(&app.editor, due_soon).unwrap();

    // On track, should not appear.
    app.ctx
        .register
        .create(&app.editor, policy_input("Fresh Policy"))
        .unwrap();

    let as_of = date(2024, 6, 15);
    let urgent = app.ctx.register.requiring_attention(&app.admin, as_of).unwrap();
    assert_eq!(urgent.len(), 2);
    assert_eq!(urgent[0].0.title, "Old Policy");
    assert_eq!(urgent[1].0.title, "Almost Due Policy");

    let counts = app.ctx.register.counts_by_status(&app.admin, as_of).unwrap();
    assert_eq!(counts.get("OVERDUE"), Some(&1));
    assert_eq!(counts.get("DUE_SOON"), Some(&1));
    assert_eq!(counts.get("ON_TRACK"), Some(&1));
}
