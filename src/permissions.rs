use crate::auth::Actor;
use crate::error::{RegisterError, Result};
use crate::models::UserRole;

/// Everything a user can be allowed or denied to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewRegister,
    AddDocument,
    EditDocument,
    DeleteDocument,
    UploadAttachment,
    DeleteAttachment,
    ManageLinks,
    MarkReviewed,
    ManageUsers,
    ManageCategories,
    ManageSettings,
    ViewFullAuditLog,
    ExportData,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ViewRegister => "view register",
            Action::AddDocument => "add document",
            Action::EditDocument => "edit document",
            Action::DeleteDocument => "delete document",
            Action::UploadAttachment => "upload attachment",
            Action::DeleteAttachment => "delete attachment",
            Action::ManageLinks => "manage links",
            Action::MarkReviewed => "mark reviewed",
            Action::ManageUsers => "manage users",
            Action::ManageCategories => "manage categories",
            Action::ManageSettings => "manage settings",
            Action::ViewFullAuditLog => "view full audit log",
            Action::ExportData => "export data",
        }
    }

    /// Actions that target a specific document and are therefore subject to
    /// a restricted editor's scope.
    pub fn is_resource_bearing(&self) -> bool {
        matches!(
            self,
            Action::AddDocument
                | Action::EditDocument
                | Action::DeleteDocument
                | Action::UploadAttachment
                | Action::DeleteAttachment
                | Action::ManageLinks
                | Action::MarkReviewed
        )
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The document a resource-bearing action targets.
#[derive(Debug, Clone, Copy)]
pub struct ResourceScope<'a> {
    pub category: &'a str,
    pub applicable_entity: Option<&'a str>,
}

fn role_allows(role: UserRole, action: Action) -> bool {
    match role {
        UserRole::Admin => true,
        UserRole::Editor | UserRole::RestrictedEditor => matches!(
            action,
            Action::ViewRegister
                | Action::AddDocument
                | Action::EditDocument
                | Action::UploadAttachment
                | Action::DeleteAttachment
                | Action::ManageLinks
                | Action::MarkReviewed
                | Action::ExportData
        ),
        UserRole::Viewer => matches!(action, Action::ViewRegister | Action::ExportData),
    }
}

/// Role-level check, ignoring restricted-editor scope.
pub fn is_allowed(actor: &Actor, action: Action) -> bool {
    role_allows(actor.role, action)
}

/// Full permission check. Restricted editors additionally need the target
/// document inside their scope; with no scope configured they are denied
/// every resource-bearing action.
pub fn check(actor: &Actor, action: Action, resource: Option<&ResourceScope<'_>>) -> Result<()> {
    // Denials are routine traffic, so they log below error level.
    let denied = || {
        tracing::debug!(username = %actor.username, role = %actor.role, %action, "permission denied");
        RegisterError::PermissionDenied {
            action,
            role: actor.role,
        }
    };

    if !role_allows(actor.role, action) {
        return Err(denied());
    }

    if actor.role == UserRole::RestrictedEditor && action.is_resource_bearing() {
        if actor.scope.is_empty() {
            return Err(denied());
        }
        match resource {
            Some(r) if actor.scope.allows(r.category, r.applicable_entity) => {}
            _ => return Err(denied()),
        }
    }

    Ok(())
}
