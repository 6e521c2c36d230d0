mod common;

use chrono::{Duration, Utc};
use common::{policy_input, TestApp};
use policyhub::auth::{Actor, Scope};
use policyhub::models::UserRole;
use policyhub::register::{DocumentFilter, DocumentUpdate};
use policyhub::users::UserCreate;
use policyhub::RegisterError;

#[test]
fn denied_action_leaves_the_register_untouched() {
    let app = TestApp::new().unwrap();
    app.ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();

    let before = app
        .ctx
        .register
        .list(&app.admin, &DocumentFilter::default())
        .unwrap();

    assert!(matches!(
        app.ctx.register.create(&app.viewer, policy_input("Sneaky Policy")),
        Err(RegisterError::PermissionDenied { .. })
    ));
    assert!(matches!(
        app.ctx.register.update(
            &app.viewer,
            &before[0].doc_id,
            DocumentUpdate {
                title: Some("Changed".to_string()),
                ..Default::default()
            },
        ),
        Err(RegisterError::PermissionDenied { .. })
    ));

    let after = app
        .ctx
        .register
        .list(&app.admin, &DocumentFilter::default())
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn restricted_editor_works_only_inside_scope() {
    let app = TestApp::new().unwrap();

    // In scope: AML.
    let doc = app
        .ctx
        .register
        .create(&app.restricted, policy_input("AML Policy"))
        .unwrap();
    app.ctx
        .register
        .update(
            &app.restricted,
            &doc.doc_id,
            DocumentUpdate {
                version: Some("1.1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    // Out of scope: HR.
    let mut hr = policy_input("HR Policy");
    hr.category = "HR".to_string();
    assert!(matches!(
        app.ctx.register.create(&app.restricted, hr.clone()),
        Err(RegisterError::PermissionDenied { .. })
    ));

    let hr_doc = app.ctx.register.create(&app.editor, hr).unwrap();
    assert!(matches!(
        app.ctx.register.update(
            &app.restricted,
            &hr_doc.doc_id,
            DocumentUpdate {
                version: Some("2.0".to_string()),
                ..Default::default()
            },
        ),
        Err(RegisterError::PermissionDenied { .. })
    ));

    // Moving a document out of scope is also blocked.
    assert!(matches!(
        app.ctx.register.update(
            &app.restricted,
            &doc.doc_id,
            DocumentUpdate {
                category: Some("HR".to_string()),
                ..Default::default()
            },
        ),
        Err(RegisterError::PermissionDenied { .. })
    ));
}

#[test]
fn restricted_editor_list_is_scope_filtered() {
    let app = TestApp::new().unwrap();
    app.ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();
    let mut hr = policy_input("HR Policy");
    hr.category = "HR".to_string();
    app.ctx.register.create(&app.editor, hr).unwrap();

    let visible = app
        .ctx
        .register
        .list(&app.restricted, &DocumentFilter::default())
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].category, "AML");
}

#[test]
fn unscoped_restricted_editor_is_fail_closed() {
    let app = TestApp::new().unwrap();
    let user = app
        .ctx
        .users
        .create(
            &app.admin,
            UserCreate {
                username: "newhire".to_string(),
                password: "newhire-pass-1".to_string(),
                full_name: "New Hire".to_string(),
                role: UserRole::RestrictedEditor,
                scope: None,
            },
        )
        .unwrap();
    let actor = Actor::from_user(&user).unwrap();

    app.ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();

    assert!(matches!(
        app.ctx.register.create(&actor, policy_input("Blocked Policy")),
        Err(RegisterError::PermissionDenied { .. })
    ));
    let visible = app
        .ctx
        .register
        .list(&actor, &DocumentFilter::default())
        .unwrap();
    assert!(visible.is_empty());
}

#[test]
fn entity_scope_matches_any_segment() {
    let app = TestApp::new().unwrap();
    let user = app
        .ctx
        .users
        .create(
            &app.admin,
            UserCreate {
                username: "fundco".to_string(),
                password: "fundco-pass-1".to_string(),
                full_name: "Fund Editor".to_string(),
                role: UserRole::RestrictedEditor,
                scope: Some(Scope::from_columns(None, Some("FundCo"))),
            },
        )
        .unwrap();
    let actor = Actor::from_user(&user).unwrap();

    let mut input = policy_input("Group Ops Policy");
    input.category = "OPS".to_string();
    input.applicable_entity = Some("HoldCo;FundCo".to_string());
    let doc = app.ctx.register.create(&actor, input).unwrap();

    app.ctx
        .register
        .update(
            &actor,
            &doc.doc_id,
            DocumentUpdate {
                version: Some("1.1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
}

#[test]
fn user_and_settings_management_is_admin_only() {
    let app = TestApp::new().unwrap();

    assert!(matches!(
        app.ctx.users.list(&app.editor),
        Err(RegisterError::PermissionDenied { .. })
    ));
    assert!(matches!(
        app.ctx.settings.set(&app.editor, "company_name", "Acme Fund Services"),
        Err(RegisterError::PermissionDenied { .. })
    ));

    app.ctx
        .settings
        .set(&app.admin, "company_name", "Acme Fund Services")
        .unwrap();
    assert_eq!(
        app.ctx.settings.company_name().unwrap(),
        "Acme Fund Services"
    );
}

#[test]
fn last_active_admin_is_protected() {
    let app = TestApp::new().unwrap();

    assert!(matches!(
        app.ctx.users.deactivate(&app.admin, &app.admin.user_id),
        Err(RegisterError::Validation(_))
    ));
    assert!(matches!(
        app.ctx.users.update_profile(
            &app.admin,
            &app.admin.user_id,
            "Alex Admin",
            UserRole::Viewer,
        ),
        Err(RegisterError::Validation(_))
    ));

    // With a second admin present, the first can step down.
    let second = app
        .ctx
        .users
        .create(
            &app.admin,
            UserCreate {
                username: "admin2".to_string(),
                password: "admin2-pass-1".to_string(),
                full_name: "Backup Admin".to_string(),
                role: UserRole::Admin,
                scope: None,
            },
        )
        .unwrap();
    app.ctx.users.deactivate(&app.admin, &app.admin.user_id).unwrap();
    drop(second);
}

#[test]
fn authentication_rejects_bad_credentials_and_inactive_accounts() {
    let app = TestApp::new().unwrap();

    assert!(app.ctx.auth.authenticate("editor", "wrong-password").is_err());
    assert!(app.ctx.auth.authenticate("ghost", "whatever-pass").is_err());

    app.ctx
        .users
        .deactivate(&app.admin, &app.editor.user_id)
        .unwrap();
    assert!(app.ctx.auth.authenticate("editor", "editor-pass-1").is_err());

    app.ctx
        .users
        .activate(&app.admin, &app.editor.user_id)
        .unwrap();
    let actor = app.ctx.auth.authenticate("editor", "editor-pass-1").unwrap();
    assert_eq!(actor.role, UserRole::Editor);
}

#[test]
fn change_and_reset_password() {
    let app = TestApp::new().unwrap();

    assert!(app
        .ctx
        .auth
        .change_password(&app.editor, "wrong-old", "brand-new-pass")
        .is_err());
    app.ctx
        .auth
        .change_password(&app.editor, "editor-pass-1", "brand-new-pass")
        .unwrap();
    app.ctx.auth.authenticate("editor", "brand-new-pass").unwrap();

    app.ctx
        .users
        .reset_password(&app.admin, &app.viewer.user_id, "reset-by-admin")
        .unwrap();
    app.ctx.auth.authenticate("viewer", "reset-by-admin").unwrap();
}

#[test]
fn full_audit_log_is_admin_only() {
    let app = TestApp::new().unwrap();
    app.ctx
        .register
        .create(&app.editor, policy_input("AML Policy"))
        .unwrap();

    let now = Utc::now().naive_utc();
    let from = now - Duration::hours(1);
    let to = now + Duration::hours(1);

    assert!(matches!(
        app.ctx.history.in_range(&app.editor, from, to),
        Err(RegisterError::PermissionDenied { .. })
    ));
    let entries = app.ctx.history.in_range(&app.admin, from, to).unwrap();
    assert!(!entries.is_empty());
}

#[test]
fn session_tracks_login_and_logout() {
    let app = TestApp::new().unwrap();
    assert!(app.ctx.session.current().is_none());

    let actor = app.ctx.login("editor", "editor-pass-1").unwrap();
    assert_eq!(app.ctx.session.current(), Some(actor));

    app.ctx.logout();
    assert!(app.ctx.session.current().is_none());
}
