use anyhow::Result;
use chrono::NaiveDate;
use policyhub::auth::{Actor, Scope};
use policyhub::config::SharedFolder;
use policyhub::models::{DocumentStatus, DocumentType, ReviewFrequency, UserRole};
use policyhub::register::DocumentCreate;
use policyhub::users::UserCreate;
use policyhub::AppContext;
use tempfile::TempDir;

/// A fully wired context over a temporary shared folder, seeded with one
/// user per role. The restricted editor is scoped to the AML category.
pub struct TestApp {
    pub ctx: AppContext,
    pub admin: Actor,
    pub editor: Actor,
    pub viewer: Actor,
    pub restricted: Actor,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let ctx = AppContext::open(SharedFolder::new(dir.path()))?;

        let admin = ctx
            .auth
            .create_first_admin("admin", "admin-pass-1", "Alex Admin")?;

        let editor_user = ctx.users.create(
            &admin,
            UserCreate {
                username: "editor".to_string(),
                password: "editor-pass-1".to_string(),
                full_name: "Erin Editor".to_string(),
                role: UserRole::Editor,
                scope: None,
            },
        )?;
        let viewer_user = ctx.users.create(
            &admin,
            UserCreate {
                username: "viewer".to_string(),
                password: "viewer-pass-1".to_string(),
                full_name: "Vic Viewer".to_string(),
                role: UserRole::Viewer,
                scope: None,
            },
        )?;
        let restricted_user = ctx.users.create(
            &admin,
            UserCreate {
                username: "restricted".to_string(),
                password: "restricted-pass-1".to_string(),
                full_name: "Rae Restricted".to_string(),
                role: UserRole::RestrictedEditor,
                scope: Some(Scope::from_columns(Some("AML"), None)),
            },
        )?;

        Ok(Self {
            editor: Actor::from_user(&editor_user)?,
            viewer: Actor::from_user(&viewer_user)?,
            restricted: Actor::from_user(&restricted_user)?,
            admin,
            ctx,
            _dir: dir,
        })
    }

    #[allow(dead_code)]
    pub fn shared_root(&self) -> &std::path::Path {
        self._dir.path()
    }
}

#[allow(dead_code)]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A reasonable annual AML policy, effective 10 Jan 2024.
#[allow(dead_code)]
pub fn policy_input(title: &str) -> DocumentCreate {
    DocumentCreate {
        doc_type: DocumentType::Policy,
        doc_ref: None,
        title: title.to_string(),
        description: None,
        category: "AML".to_string(),
        owner: "Compliance Officer".to_string(),
        approver: None,
        status: DocumentStatus::Active,
        version: "1.0".to_string(),
        effective_date: date(2024, 1, 10),
        last_review_date: None,
        review_frequency: ReviewFrequency::Annual,
        next_review_date: None,
        notes: None,
        applicable_entity: None,
    }
}

/// Writes a minimal but genuine PDF into `dir` and returns its path.
#[allow(dead_code)]
pub fn write_sample_pdf(dir: &std::path::Path, name: &str) -> Result<std::path::PathBuf> {
    let path = dir.join(name);
    std::fs::write(
        &path,
        b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF\n",
    )?;
    Ok(path)
}
