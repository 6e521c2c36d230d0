use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use diesel::prelude::*;

use crate::auth::Actor;
use crate::db::{with_busy_retry, DbPool};
use crate::error::{RegisterError, Result};
use crate::history::{self, AuditEvent};
use crate::models::{Attachment, Document, HistoryAction, NewAttachment};
use crate::permissions::{self, Action, ResourceScope};
use crate::schema::{attachments, documents};

/// Upper bound on attachment size.
pub const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Allowed extensions with the content types their magic bytes may sniff as.
/// Office formats are zip or OLE containers, so those sniffs are accepted.
/// Plain text has no signature at all.
const ALLOWED_TYPES: &[(&str, &[&str])] = &[
    ("pdf", &["application/pdf"]),
    ("doc", &["application/x-ole-storage", "application/msword"]),
    (
        "docx",
        &[
            "application/zip",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ],
    ),
    ("xls", &["application/x-ole-storage", "application/vnd.ms-excel"]),
    (
        "xlsx",
        &[
            "application/zip",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ],
    ),
    ("ppt", &["application/x-ole-storage", "application/vnd.ms-powerpoint"]),
    (
        "pptx",
        &[
            "application/zip",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ],
    ),
    ("txt", &[]),
];

#[derive(Clone)]
pub struct AttachmentManager {
    pool: DbPool,
    attachments_root: PathBuf,
}

impl AttachmentManager {
    pub fn new(pool: DbPool, attachments_root: PathBuf) -> Self {
        Self {
            pool,
            attachments_root,
        }
    }

    /// Copies a file into the shared attachments store. With `mark_current`
    /// the new upload becomes the document's current version and all others
    /// are demoted; without it an older version can be filed alongside the
    /// current one. Every validation runs before anything is copied or
    /// inserted, so a rejected upload leaves no trace.
    pub fn upload(
        &self,
        actor: &Actor,
        doc_id: &str,
        source: &Path,
        version_label: &str,
        mark_current: bool,
    ) -> Result<Attachment> {
        let mut conn = self.pool.get()?;

        let document: Document = documents::table
            .find(doc_id)
            .first(&mut conn)
            .optional()?
            .ok_or(RegisterError::NotFound("document"))?;

        let resource = ResourceScope {
            category: &document.category,
            applicable_entity: document.applicable_entity.as_deref(),
        };
        permissions::check(actor, Action::UploadAttachment, Some(&resource))?;

        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RegisterError::validation("invalid source filename"))?
            .to_string();
        let extension = validate_extension(&filename)?;

        let metadata = fs::metadata(source)
            .map_err(|_| RegisterError::validation("source file does not exist"))?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(RegisterError::validation(format!(
                "file exceeds the {} MB limit",
                MAX_FILE_SIZE / (1024 * 1024)
            )));
        }

        validate_content(source, extension)?;

        let version = version_label.trim();
        if version.is_empty() {
            return Err(RegisterError::validation("version label is required"));
        }

        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let stored_name = format!(
            "{}_v{}_{}_{}",
            document.doc_ref,
            sanitize_component(version),
            timestamp,
            sanitize_component(&filename)
        );
        let relative_path = Path::new(&document.doc_ref).join(&stored_name);
        let target = self.attachments_root.join(&relative_path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &target)?;

        let row = NewAttachment {
            attachment_id: uuid::Uuid::new_v4().to_string(),
            doc_id: doc_id.to_string(),
            filename: filename.clone(),
            file_path: relative_path.to_string_lossy().into_owned(),
            file_size: metadata.len() as i64,
            mime_type: mime_guess::from_path(&filename)
                .first()
                .map(|m| m.essence_str().to_string()),
            version_label: version.to_string(),
            is_current: mark_current,
            uploaded_at: Utc::now().naive_utc(),
            uploaded_by: actor.user_id.clone(),
        };

        let inserted = with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                if mark_current {
                    diesel::update(attachments::table.filter(attachments::doc_id.eq(doc_id)))
                        .set(attachments::is_current.eq(false))
                        .execute(conn)?;
                }
                diesel::insert_into(attachments::table)
                    .values(&row)
                    .execute(conn)?;
                history::record(
                    conn,
                    AuditEvent {
                        doc_id,
                        action: HistoryAction::AttachmentAdded,
                        field_changed: None,
                        old_value: None,
                        new_value: Some(&filename),
                        changed_by: &actor.user_id,
                        notes: None,
                    },
                )?;
                let inserted: Attachment =
                    attachments::table.find(&row.attachment_id).first(conn)?;
                Ok(inserted)
            })
        });

        match inserted {
            Ok(attachment) => {
                tracing::info!(doc_ref = %document.doc_ref, filename = %attachment.filename, "attachment uploaded");
                Ok(attachment)
            }
            Err(error) => {
                // The copy must not outlive a failed insert.
                if let Err(cleanup) = fs::remove_file(&target) {
                    tracing::warn!(path = %target.display(), %cleanup, "could not remove orphaned attachment file");
                }
                Err(error)
            }
        }
    }

    /// Removes an attachment row and its stored file. Earlier versions are
    /// not promoted; the document simply has no current attachment if its
    /// current one is removed.
    pub fn delete(&self, actor: &Actor, attachment_id: &str) -> Result<()> {
        let mut conn = self.pool.get()?;

        let attachment: Attachment = attachments::table
            .find(attachment_id)
            .first(&mut conn)
            .optional()?
            .ok_or(RegisterError::NotFound("attachment"))?;
        let document: Document = documents::table
            .find(&attachment.doc_id)
            .first(&mut conn)?;

        let resource = ResourceScope {
            category: &document.category,
            applicable_entity: document.applicable_entity.as_deref(),
        };
        permissions::check(actor, Action::DeleteAttachment, Some(&resource))?;

        with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                diesel::delete(attachments::table.find(attachment_id)).execute(conn)?;
                history::record(
                    conn,
                    AuditEvent {
                        doc_id: &attachment.doc_id,
                        action: HistoryAction::AttachmentRemoved,
                        field_changed: None,
                        old_value: Some(&attachment.filename),
                        new_value: None,
                        changed_by: &actor.user_id,
                        notes: None,
                    },
                )?;
                Ok(())
            })
        })?;

        let stored = self.attachments_root.join(&attachment.file_path);
        if let Err(error) = fs::remove_file(&stored) {
            tracing::warn!(path = %stored.display(), %error, "attachment file could not be removed");
        }

        tracing::info!(doc_ref = %document.doc_ref, filename = %attachment.filename, "attachment removed");
        Ok(())
    }

    /// All versions for a document, newest first.
    pub fn list_for_document(&self, doc_id: &str) -> Result<Vec<Attachment>> {
        let mut conn = self.pool.get()?;
        let rows = attachments::table
            .filter(attachments::doc_id.eq(doc_id))
            .order(attachments::uploaded_at.desc())
            .load(&mut conn)?;
        Ok(rows)
    }

    pub fn current_attachment(&self, doc_id: &str) -> Result<Option<Attachment>> {
        let mut conn = self.pool.get()?;
        let row = attachments::table
            .filter(attachments::doc_id.eq(doc_id))
            .filter(attachments::is_current.eq(true))
            .order(attachments::uploaded_at.desc())
            .first(&mut conn)
            .optional()?;
        Ok(row)
    }

    /// Absolute path of a stored attachment, for opening in the viewer.
    pub fn open_path(&self, attachment: &Attachment) -> PathBuf {
        self.attachments_root.join(&attachment.file_path)
    }

    /// Removes the per-document attachment directory after its document is
    /// deleted. Missing directories are fine.
    pub fn purge_files(&self, doc_ref: &str) -> Result<()> {
        let dir = self.attachments_root.join(doc_ref);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_extension(filename: &str) -> Result<&'static str> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| RegisterError::validation("file has no extension"))?;

    ALLOWED_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(ext, _)| *ext)
        .ok_or_else(|| {
            RegisterError::validation(format!("file type '.{extension}' is not allowed"))
        })
}

/// Sniffs the file's magic bytes and checks they agree with the extension.
/// A file that claims to be a PDF but is not one is rejected.
fn validate_content(path: &Path, extension: &str) -> Result<()> {
    let accepted = ALLOWED_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mimes)| *mimes)
        .unwrap_or(&[]);

    let sniffed = infer::get_from_path(path)?;
    match sniffed {
        Some(kind) => {
            if extension == "txt" {
                return Err(RegisterError::validation(
                    "file content does not match its extension",
                ));
            }
            if !accepted.contains(&kind.mime_type()) {
                return Err(RegisterError::validation(
                    "file content does not match its extension",
                ));
            }
            Ok(())
        }
        // Only plain text legitimately has no recognizable signature.
        None if extension == "txt" => Ok(()),
        None => Err(RegisterError::validation(
            "file content does not match its extension",
        )),
    }
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
