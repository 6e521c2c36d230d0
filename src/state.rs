use std::sync::Arc;

use crate::attachments::AttachmentManager;
use crate::auth::{Actor, AuthService, Session};
use crate::categories::CategoryService;
use crate::config::SharedFolder;
use crate::db::{self, DbPool};
use crate::error::Result;
use crate::history::AuditTrail;
use crate::links::LinkManager;
use crate::models::Document;
use crate::register::DocumentRegister;
use crate::reports::ReportCoordinator;
use crate::settings::SettingsService;
use crate::users::UserService;

/// Everything a running instance needs, wired against one shared folder.
#[derive(Clone)]
pub struct AppContext {
    pub pool: DbPool,
    pub shared: SharedFolder,
    pub session: Arc<Session>,
    pub auth: AuthService,
    pub users: UserService,
    pub categories: CategoryService,
    pub settings: SettingsService,
    pub register: DocumentRegister,
    pub attachments: AttachmentManager,
    pub links: LinkManager,
    pub history: AuditTrail,
    pub reports: ReportCoordinator,
}

impl AppContext {
    /// Validates the shared folder, opens the pooled database, runs
    /// migrations and seeds reference data on first use.
    pub fn open(shared: SharedFolder) -> Result<Self> {
        shared.validate()?;
        shared.ensure_layout()?;

        let pool = db::init_pool(&shared.database_path()).map_err(|e| {
            tracing::error!(error = %e, "could not open shared database");
            crate::error::RegisterError::StorageUnavailable
        })?;
        db::initialize(&pool)?;

        let settings = SettingsService::new(pool.clone());
        let context = Self {
            auth: AuthService::new(pool.clone()),
            users: UserService::new(pool.clone()),
            categories: CategoryService::new(pool.clone()),
            register: DocumentRegister::new(pool.clone(), settings.clone()),
            attachments: AttachmentManager::new(pool.clone(), shared.attachments_dir()),
            links: LinkManager::new(pool.clone()),
            history: AuditTrail::new(pool.clone()),
            reports: ReportCoordinator::new(pool.clone(), settings.clone(), shared.exports_dir()),
            session: Arc::new(Session::default()),
            settings,
            pool,
            shared,
        };
        Ok(context)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Actor> {
        let actor = self.auth.authenticate(username, password)?;
        self.session.set(actor.clone());
        Ok(actor)
    }

    pub fn logout(&self) {
        self.session.clear();
    }

    /// Deletes a document and its stored attachment files in one go. The
    /// row deletion cascades to attachment and link rows; the files are
    /// cleaned up afterwards, best effort.
    pub fn delete_document(&self, actor: &Actor, doc_id: &str) -> Result<Document> {
        let document = self.register.delete(actor, doc_id)?;
        if let Err(error) = self.attachments.purge_files(&document.doc_ref) {
            tracing::warn!(doc_ref = %document.doc_ref, %error, "attachment files not fully removed");
        }
        Ok(document)
    }
}
