use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::auth::Actor;
use crate::db::{with_busy_retry, DbPool};
use crate::error::{RegisterError, Result};
use crate::history::{self, AuditEvent};
use crate::models::{Document, DocumentLink, HistoryAction, LinkType, NewDocumentLink};
use crate::permissions::{self, Action, ResourceScope};
use crate::schema::{document_links, documents};

/// A link as seen from one side, with the document on the other end.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedDocument {
    pub link: DocumentLink,
    pub other: Document,
    /// True when the queried document is the parent of the link.
    pub outgoing: bool,
}

#[derive(Clone)]
pub struct LinkManager {
    pool: DbPool,
}

impl LinkManager {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Creates a directed link between two documents. Both sides get an
    /// audit entry. A link that already exists with the same type is
    /// rejected, keeping the original row.
    pub fn create_link(
        &self,
        actor: &Actor,
        parent_doc_id: &str,
        child_doc_id: &str,
        link_type: LinkType,
    ) -> Result<DocumentLink> {
        if parent_doc_id == child_doc_id {
            return Err(RegisterError::validation(
                "a document cannot link to itself",
            ));
        }

        let mut conn = self.pool.get()?;
        let actor_id = actor.user_id.clone();

        let link = with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                let parent = load_document(conn, parent_doc_id)?;
                let child = load_document(conn, child_doc_id)?;

                check_link_permission(actor, &parent)?;
                check_link_permission(actor, &child)?;

                let existing: i64 = document_links::table
                    .filter(document_links::parent_doc_id.eq(parent_doc_id))
                    .filter(document_links::child_doc_id.eq(child_doc_id))
                    .filter(document_links::link_type.eq(link_type.as_str()))
                    .count()
                    .get_result(conn)?;
                if existing > 0 {
                    return Err(RegisterError::Constraint(format!(
                        "link {} {} {} already exists",
                        parent.doc_ref,
                        link_type.as_str(),
                        child.doc_ref
                    )));
                }

                let row = NewDocumentLink {
                    link_id: uuid::Uuid::new_v4().to_string(),
                    parent_doc_id: parent_doc_id.to_string(),
                    child_doc_id: child_doc_id.to_string(),
                    link_type: link_type.as_str().to_string(),
                    created_at: Utc::now().naive_utc(),
                    created_by: actor_id.clone(),
                };
                diesel::insert_into(document_links::table)
                    .values(&row)
                    .execute(conn)?;

                let label_child = format!("{}: {}", link_type.as_str(), child.doc_ref);
                let label_parent = format!("{}: {}", link_type.as_str(), parent.doc_ref);
                history::record(
                    conn,
                    AuditEvent {
                        doc_id: parent_doc_id,
                        action: HistoryAction::LinkAdded,
                        field_changed: None,
                        old_value: None,
                        new_value: Some(&label_child),
                        changed_by: &actor_id,
                        notes: None,
                    },
                )?;
                history::record(
                    conn,
                    AuditEvent {
                        doc_id: child_doc_id,
                        action: HistoryAction::LinkAdded,
                        field_changed: None,
                        old_value: None,
                        new_value: Some(&label_parent),
                        changed_by: &actor_id,
                        notes: None,
                    },
                )?;

                let link: DocumentLink =
                    document_links::table.find(&row.link_id).first(conn)?;
                Ok(link)
            })
        })?;

        Ok(link)
    }

    pub fn delete_link(&self, actor: &Actor, link_id: &str) -> Result<()> {
        let mut conn = self.pool.get()?;
        let actor_id = actor.user_id.clone();

        with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                let link: DocumentLink = document_links::table
                    .find(link_id)
                    .first(conn)
                    .optional()?
                    .ok_or(RegisterError::NotFound("link"))?;

                let parent = load_document(conn, &link.parent_doc_id)?;
                let child = load_document(conn, &link.child_doc_id)?;
                check_link_permission(actor, &parent)?;
                check_link_permission(actor, &child)?;

                diesel::delete(document_links::table.find(link_id)).execute(conn)?;

                let label_child = format!("{}: {}", link.link_type, child.doc_ref);
                let label_parent = format!("{}: {}", link.link_type, parent.doc_ref);
                history::record(
                    conn,
                    AuditEvent {
                        doc_id: &link.parent_doc_id,
                        action: HistoryAction::LinkRemoved,
                        field_changed: None,
                        old_value: Some(&label_child),
                        new_value: None,
                        changed_by: &actor_id,
                        notes: None,
                    },
                )?;
                history::record(
                    conn,
                    AuditEvent {
                        doc_id: &link.child_doc_id,
                        action: HistoryAction::LinkRemoved,
                        field_changed: None,
                        old_value: Some(&label_parent),
                        new_value: None,
                        changed_by: &actor_id,
                        notes: None,
                    },
                )?;
                Ok(())
            })
        })
    }

    /// Every link touching a document, from either side.
    pub fn links_for_document(&self, doc_id: &str) -> Result<Vec<LinkedDocument>> {
        let mut conn = self.pool.get()?;

        let outgoing: Vec<(DocumentLink, Document)> = document_links::table
            .inner_join(
                documents::table.on(documents::doc_id.eq(document_links::child_doc_id)),
            )
            .filter(document_links::parent_doc_id.eq(doc_id))
            .load(&mut conn)?;
        let incoming: Vec<(DocumentLink, Document)> = document_links::table
            .inner_join(
                documents::table.on(documents::doc_id.eq(document_links::parent_doc_id)),
            )
            .filter(document_links::child_doc_id.eq(doc_id))
            .load(&mut conn)?;

        let mut results: Vec<LinkedDocument> = outgoing
            .into_iter()
            .map(|(link, other)| LinkedDocument {
                link,
                other,
                outgoing: true,
            })
            .chain(incoming.into_iter().map(|(link, other)| LinkedDocument {
                link,
                other,
                outgoing: false,
            }))
            .collect();
        results.sort_by(|a, b| a.other.doc_ref.cmp(&b.other.doc_ref));
        Ok(results)
    }

    /// Documents this register entry implements (it is the parent of an
    /// IMPLEMENTS link).
    pub fn implementing(&self, doc_id: &str) -> Result<Vec<Document>> {
        let mut conn = self.pool.get()?;
        let rows = document_links::table
            .inner_join(
                documents::table.on(documents::doc_id.eq(document_links::child_doc_id)),
            )
            .filter(document_links::parent_doc_id.eq(doc_id))
            .filter(document_links::link_type.eq(LinkType::Implements.as_str()))
            .select(documents::all_columns)
            .order(documents::doc_ref.asc())
            .load(&mut conn)?;
        Ok(rows)
    }

    /// Documents that implement this one.
    pub fn implemented_by(&self, doc_id: &str) -> Result<Vec<Document>> {
        let mut conn = self.pool.get()?;
        let rows = document_links::table
            .inner_join(
                documents::table.on(documents::doc_id.eq(document_links::parent_doc_id)),
            )
            .filter(document_links::child_doc_id.eq(doc_id))
            .filter(document_links::link_type.eq(LinkType::Implements.as_str()))
            .select(documents::all_columns)
            .order(documents::doc_ref.asc())
            .load(&mut conn)?;
        Ok(rows)
    }
}

fn load_document(conn: &mut SqliteConnection, doc_id: &str) -> Result<Document> {
    documents::table
        .find(doc_id)
        .first(conn)
        .optional()?
        .ok_or(RegisterError::NotFound("document"))
}

fn check_link_permission(actor: &Actor, document: &Document) -> Result<()> {
    let resource = ResourceScope {
        category: &document.category,
        applicable_entity: document.applicable_entity.as_deref(),
    };
    permissions::check(actor, Action::ManageLinks, Some(&resource))
}
