use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::*;

/// Types of documents tracked in the register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Policy,
    Procedure,
    Manual,
    Register,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Policy => "POLICY",
            DocumentType::Procedure => "PROCEDURE",
            DocumentType::Manual => "MANUAL",
            DocumentType::Register => "REGISTER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "POLICY" => Some(DocumentType::Policy),
            "PROCEDURE" => Some(DocumentType::Procedure),
            "MANUAL" => Some(DocumentType::Manual),
            "REGISTER" => Some(DocumentType::Register),
            _ => None,
        }
    }

    /// Reference code prefix for this document type, e.g. `POL-AML-001`.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            DocumentType::Policy => "POL",
            DocumentType::Procedure => "PROC",
            DocumentType::Manual => "MAN",
            DocumentType::Register => "REG",
        }
    }
}

/// Lifecycle status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    Draft,
    Active,
    UnderReview,
    Superseded,
    Archived,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Active => "ACTIVE",
            DocumentStatus::UnderReview => "UNDER_REVIEW",
            DocumentStatus::Superseded => "SUPERSEDED",
            DocumentStatus::Archived => "ARCHIVED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DRAFT" => Some(DocumentStatus::Draft),
            "ACTIVE" => Some(DocumentStatus::Active),
            "UNDER_REVIEW" => Some(DocumentStatus::UnderReview),
            "SUPERSEDED" => Some(DocumentStatus::Superseded),
            "ARCHIVED" => Some(DocumentStatus::Archived),
            _ => None,
        }
    }
}

/// How often a document must be re-reviewed. AdHoc never auto-advances the
/// next review date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewFrequency {
    Annual,
    SemiAnnual,
    Quarterly,
    AdHoc,
}

impl ReviewFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewFrequency::Annual => "ANNUAL",
            ReviewFrequency::SemiAnnual => "SEMI_ANNUAL",
            ReviewFrequency::Quarterly => "QUARTERLY",
            ReviewFrequency::AdHoc => "AD_HOC",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ANNUAL" => Some(ReviewFrequency::Annual),
            "SEMI_ANNUAL" => Some(ReviewFrequency::SemiAnnual),
            "QUARTERLY" => Some(ReviewFrequency::Quarterly),
            "AD_HOC" => Some(ReviewFrequency::AdHoc),
            _ => None,
        }
    }

    /// Review interval in calendar months, `None` for AdHoc.
    pub fn months(&self) -> Option<u32> {
        match self {
            ReviewFrequency::Annual => Some(12),
            ReviewFrequency::SemiAnnual => Some(6),
            ReviewFrequency::Quarterly => Some(3),
            ReviewFrequency::AdHoc => None,
        }
    }
}

/// User roles for access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Admin,
    Editor,
    RestrictedEditor,
    Viewer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Editor => "EDITOR",
            UserRole::RestrictedEditor => "EDITOR_RESTRICTED",
            UserRole::Viewer => "VIEWER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADMIN" => Some(UserRole::Admin),
            "EDITOR" => Some(UserRole::Editor),
            "EDITOR_RESTRICTED" => Some(UserRole::RestrictedEditor),
            "VIEWER" => Some(UserRole::Viewer),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed relationship kinds between documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    Implements,
    References,
    Supersedes,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Implements => "IMPLEMENTS",
            LinkType::References => "REFERENCES",
            LinkType::Supersedes => "SUPERSEDES",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IMPLEMENTS" => Some(LinkType::Implements),
            "REFERENCES" => Some(LinkType::References),
            "SUPERSEDES" => Some(LinkType::Supersedes),
            _ => None,
        }
    }
}

/// Action kinds recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    Created,
    Updated,
    StatusChanged,
    Reviewed,
    AttachmentAdded,
    AttachmentRemoved,
    LinkAdded,
    LinkRemoved,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "CREATED",
            HistoryAction::Updated => "UPDATED",
            HistoryAction::StatusChanged => "STATUS_CHANGED",
            HistoryAction::Reviewed => "REVIEWED",
            HistoryAction::AttachmentAdded => "ATTACHMENT_ADDED",
            HistoryAction::AttachmentRemoved => "ATTACHMENT_REMOVED",
            HistoryAction::LinkAdded => "LINK_ADDED",
            HistoryAction::LinkRemoved => "LINK_REMOVED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(HistoryAction::Created),
            "UPDATED" => Some(HistoryAction::Updated),
            "STATUS_CHANGED" => Some(HistoryAction::StatusChanged),
            "REVIEWED" => Some(HistoryAction::Reviewed),
            "ATTACHMENT_ADDED" => Some(HistoryAction::AttachmentAdded),
            "ATTACHMENT_REMOVED" => Some(HistoryAction::AttachmentRemoved),
            "LINK_ADDED" => Some(HistoryAction::LinkAdded),
            "LINK_REMOVED" => Some(HistoryAction::LinkRemoved),
            _ => None,
        }
    }
}

/// Derived review bucket, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    Overdue,
    DueSoon,
    Upcoming,
    OnTrack,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Overdue => "OVERDUE",
            ReviewStatus::DueSoon => "DUE_SOON",
            ReviewStatus::Upcoming => "UPCOMING",
            ReviewStatus::OnTrack => "ON_TRACK",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OVERDUE" => Some(ReviewStatus::Overdue),
            "DUE_SOON" => Some(ReviewStatus::DueSoon),
            "UPCOMING" => Some(ReviewStatus::Upcoming),
            "ON_TRACK" => Some(ReviewStatus::OnTrack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(primary_key(user_id))]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
    pub allowed_categories: Option<String>,
    pub allowed_entities: Option<String>,
    pub created_at: NaiveDateTime,
    pub created_by: Option<String>,
    pub last_login: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub user_id: String,
    pub username: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
    pub allowed_categories: Option<String>,
    pub allowed_entities: Option<String>,
    pub created_at: NaiveDateTime,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = categories)]
#[diesel(primary_key(code))]
pub struct Category {
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub sort_order: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = categories)]
pub struct NewCategory {
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = documents)]
#[diesel(primary_key(doc_id))]
pub struct Document {
    pub doc_id: String,
    pub doc_type: String,
    pub doc_ref: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub owner: String,
    pub approver: Option<String>,
    pub status: String,
    pub version: String,
    pub effective_date: NaiveDate,
    pub last_review_date: NaiveDate,
    pub next_review_date: NaiveDate,
    pub review_frequency: String,
    pub notes: Option<String>,
    pub applicable_entity: Option<String>,
    pub created_at: NaiveDateTime,
    pub created_by: String,
    pub updated_at: NaiveDateTime,
    pub updated_by: String,
}

impl Document {
    pub fn frequency(&self) -> Option<ReviewFrequency> {
        ReviewFrequency::parse(&self.review_frequency)
    }

    pub fn document_status(&self) -> Option<DocumentStatus> {
        DocumentStatus::parse(&self.status)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub doc_id: String,
    pub doc_type: String,
    pub doc_ref: String,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub owner: String,
    pub approver: Option<String>,
    pub status: String,
    pub version: String,
    pub effective_date: NaiveDate,
    pub last_review_date: NaiveDate,
    pub next_review_date: NaiveDate,
    pub review_frequency: String,
    pub notes: Option<String>,
    pub applicable_entity: Option<String>,
    pub created_at: NaiveDateTime,
    pub created_by: String,
    pub updated_at: NaiveDateTime,
    pub updated_by: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations)]
#[diesel(table_name = attachments)]
#[diesel(primary_key(attachment_id))]
#[diesel(belongs_to(Document, foreign_key = doc_id))]
pub struct Attachment {
    pub attachment_id: String,
    pub doc_id: String,
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub version_label: String,
    pub is_current: bool,
    pub uploaded_at: NaiveDateTime,
    pub uploaded_by: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = attachments)]
pub struct NewAttachment {
    pub attachment_id: String,
    pub doc_id: String,
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub version_label: String,
    pub is_current: bool,
    pub uploaded_at: NaiveDateTime,
    pub uploaded_by: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = document_links)]
#[diesel(primary_key(link_id))]
pub struct DocumentLink {
    pub link_id: String,
    pub parent_doc_id: String,
    pub child_doc_id: String,
    pub link_type: String,
    pub created_at: NaiveDateTime,
    pub created_by: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_links)]
pub struct NewDocumentLink {
    pub link_id: String,
    pub parent_doc_id: String,
    pub child_doc_id: String,
    pub link_type: String,
    pub created_at: NaiveDateTime,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable)]
#[diesel(table_name = document_history)]
#[diesel(primary_key(history_id))]
pub struct HistoryEntry {
    pub history_id: String,
    pub doc_id: String,
    pub action: String,
    pub field_changed: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by: String,
    pub changed_at: NaiveDateTime,
    pub notes: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_history)]
pub struct NewHistoryEntry {
    pub history_id: String,
    pub doc_id: String,
    pub action: String,
    pub field_changed: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by: String,
    pub changed_at: NaiveDateTime,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Insertable)]
#[diesel(table_name = settings)]
#[diesel(primary_key(key))]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
    pub updated_by: Option<String>,
}
