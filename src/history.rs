use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::auth::Actor;
use crate::db::DbPool;
use crate::error::Result;
use crate::models::{HistoryAction, HistoryEntry, NewHistoryEntry};
use crate::permissions::{self, Action};
use crate::schema::document_history;

/// One audit fact, recorded inside the caller's transaction so the entry
/// commits or rolls back together with the change it describes.
#[derive(Debug, Clone, Copy)]
pub struct AuditEvent<'a> {
    pub doc_id: &'a str,
    pub action: HistoryAction,
    pub field_changed: Option<&'a str>,
    pub old_value: Option<&'a str>,
    pub new_value: Option<&'a str>,
    pub changed_by: &'a str,
    pub notes: Option<&'a str>,
}

pub fn record(conn: &mut SqliteConnection, event: AuditEvent<'_>) -> Result<()> {
    let row = NewHistoryEntry {
        history_id: uuid::Uuid::new_v4().to_string(),
        doc_id: event.doc_id.to_string(),
        action: event.action.as_str().to_string(),
        field_changed: event.field_changed.map(str::to_string),
        old_value: event.old_value.map(str::to_string),
        new_value: event.new_value.map(str::to_string),
        changed_by: event.changed_by.to_string(),
        changed_at: Utc::now().naive_utc(),
        notes: event.notes.map(str::to_string),
    };
    diesel::insert_into(document_history::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

#[derive(Clone)]
pub struct AuditTrail {
    pool: DbPool,
}

impl AuditTrail {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Full change history of one document, oldest first. Survives the
    /// document's deletion.
    pub fn for_document(&self, doc_id: &str) -> Result<Vec<HistoryEntry>> {
        let mut conn = self.pool.get()?;
        let entries = document_history::table
            .filter(document_history::doc_id.eq(doc_id))
            .order(document_history::changed_at.asc())
            .load(&mut conn)?;
        Ok(entries)
    }

    /// Most recent activity across the whole register.
    pub fn recent(&self, limit: i64) -> Result<Vec<HistoryEntry>> {
        let mut conn = self.pool.get()?;
        let entries = document_history::table
            .order(document_history::changed_at.desc())
            .limit(limit)
            .load(&mut conn)?;
        Ok(entries)
    }

    /// Register-wide audit log over a time range. Admin only.
    pub fn in_range(
        &self,
        actor: &Actor,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<HistoryEntry>> {
        permissions::check(actor, Action::ViewFullAuditLog, None)?;
        let mut conn = self.pool.get()?;
        let entries = document_history::table
            .filter(document_history::changed_at.ge(from))
            .filter(document_history::changed_at.le(to))
            .order(document_history::changed_at.asc())
            .load(&mut conn)?;
        Ok(entries)
    }
}
