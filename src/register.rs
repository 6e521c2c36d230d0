use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::auth::Actor;
use crate::db::{with_busy_retry, DbPool};
use crate::error::{RegisterError, Result};
use crate::history::{self, AuditEvent};
use crate::models::{
    Document, DocumentStatus, DocumentType, HistoryAction, NewDocument, ReviewFrequency,
    ReviewStatus,
};
use crate::permissions::{self, Action, ResourceScope};
use crate::review;
use crate::schema::{categories, documents};
use crate::settings::SettingsService;

/// Input for a new register entry. When `doc_ref` is `None` the next free
/// reference for the type and category is assigned.
#[derive(Debug, Clone)]
pub struct DocumentCreate {
    pub doc_type: DocumentType,
    pub doc_ref: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub owner: String,
    pub approver: Option<String>,
    pub status: DocumentStatus,
    pub version: String,
    pub effective_date: NaiveDate,
    pub last_review_date: Option<NaiveDate>,
    pub review_frequency: ReviewFrequency,
    pub next_review_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub applicable_entity: Option<String>,
}

/// Partial update. `None` leaves a field untouched; for nullable fields the
/// inner option distinguishes clearing from skipping.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<String>,
    pub owner: Option<String>,
    pub approver: Option<Option<String>>,
    pub status: Option<DocumentStatus>,
    pub version: Option<String>,
    pub review_frequency: Option<ReviewFrequency>,
    pub last_review_date: Option<NaiveDate>,
    pub next_review_date: Option<NaiveDate>,
    pub notes: Option<Option<String>>,
    pub applicable_entity: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub category: Option<String>,
    pub status: Option<DocumentStatus>,
    pub doc_type: Option<DocumentType>,
    /// Case-insensitive substring match on title or reference.
    pub search: Option<String>,
    /// Keeps only documents in this review bucket, judged as of today.
    pub review_bucket: Option<ReviewStatus>,
}

#[derive(Clone)]
pub struct DocumentRegister {
    pool: DbPool,
    settings: SettingsService,
}

impl DocumentRegister {
    pub fn new(pool: DbPool, settings: SettingsService) -> Self {
        Self { pool, settings }
    }

    pub fn create(&self, actor: &Actor, input: DocumentCreate) -> Result<Document> {
        let resource = ResourceScope {
            category: &input.category,
            applicable_entity: input.applicable_entity.as_deref(),
        };
        permissions::check(actor, Action::AddDocument, Some(&resource))?;

        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(RegisterError::validation("title is required"));
        }
        let owner = input.owner.trim().to_string();
        if owner.is_empty() {
            return Err(RegisterError::validation("owner is required"));
        }
        let version = input.version.trim().to_string();
        if version.is_empty() {
            return Err(RegisterError::validation("version is required"));
        }

        let last_review = input.last_review_date.unwrap_or(input.effective_date);
        if last_review < input.effective_date {
            return Err(RegisterError::validation(
                "last review date cannot be before the effective date",
            ));
        }
        let next_review = resolve_next_review(
            last_review,
            input.review_frequency,
            input.next_review_date,
        )?;

        let mut conn = self.pool.get()?;
        let actor_id = actor.user_id.clone();

        let document = with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                ensure_category_active(conn, &input.category)?;

                let doc_ref = match &input.doc_ref {
                    Some(explicit) => {
                        let trimmed = explicit.trim().to_uppercase();
                        if trimmed.is_empty() {
                            return Err(RegisterError::validation(
                                "document reference is required",
                            ));
                        }
                        trimmed
                    }
                    None => next_reference(conn, input.doc_type, &input.category)?,
                };

                let exists: i64 = documents::table
                    .filter(documents::doc_ref.eq(&doc_ref))
                    .count()
                    .get_result(conn)?;
                if exists > 0 {
                    return Err(RegisterError::DuplicateReference(doc_ref));
                }

                let now = Utc::now().naive_utc();
                let row = NewDocument {
                    doc_id: uuid::Uuid::new_v4().to_string(),
                    doc_type: input.doc_type.as_str().to_string(),
                    doc_ref: doc_ref.clone(),
                    title: title.clone(),
                    description: input.description.clone(),
                    category: input.category.clone(),
                    owner: owner.clone(),
                    approver: input.approver.clone(),
                    status: input.status.as_str().to_string(),
                    version: version.clone(),
                    effective_date: input.effective_date,
                    last_review_date: last_review,
                    next_review_date: next_review,
                    review_frequency: input.review_frequency.as_str().to_string(),
                    notes: input.notes.clone(),
                    applicable_entity: input.applicable_entity.clone(),
                    created_at: now,
                    created_by: actor_id.clone(),
                    updated_at: now,
                    updated_by: actor_id.clone(),
                };
                diesel::insert_into(documents::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(|e| match RegisterError::from(e) {
                        RegisterError::Constraint(_) => {
                            RegisterError::DuplicateReference(doc_ref.clone())
                        }
                        other => other,
                    })?;

                history::record(
                    conn,
                    AuditEvent {
                        doc_id: &row.doc_id,
                        action: HistoryAction::Created,
                        field_changed: None,
                        old_value: None,
                        new_value: Some(&doc_ref),
                        changed_by: &actor_id,
                        notes: None,
                    },
                )?;

                let document: Document = documents::table.find(&row.doc_id).first(conn)?;
                Ok(document)
            })
        })?;

        tracing::info!(doc_ref = %document.doc_ref, "document created");
        Ok(document)
    }

    /// Applies a partial update and writes one audit row per changed field.
    pub fn update(&self, actor: &Actor, doc_id: &str, update: DocumentUpdate) -> Result<Document> {
        let mut conn = self.pool.get()?;
        let actor_id = actor.user_id.clone();
        let enforce_transitions = self.settings.enforce_status_transitions()?;

        let document = with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                let current: Document = documents::table
                    .find(doc_id)
                    .first(conn)
                    .optional()?
                    .ok_or(RegisterError::NotFound("document"))?;

                let resource = ResourceScope {
                    category: &current.category,
                    applicable_entity: current.applicable_entity.as_deref(),
                };
                permissions::check(actor, Action::EditDocument, Some(&resource))?;

                let mut next = current.clone();
                apply_update(&mut next, &update)?;

                if next.title.trim().is_empty() {
                    return Err(RegisterError::validation("title is required"));
                }
                if next.owner.trim().is_empty() {
                    return Err(RegisterError::validation("owner is required"));
                }
                if next.category != current.category {
                    ensure_category_active(conn, &next.category)?;
                    // Moving a document must not take it out of the
                    // editor's own scope.
                    let target = ResourceScope {
                        category: &next.category,
                        applicable_entity: next.applicable_entity.as_deref(),
                    };
                    permissions::check(actor, Action::EditDocument, Some(&target))?;
                }

                if enforce_transitions && next.status != current.status {
                    let from = current
                        .document_status()
                        .ok_or(RegisterError::Constraint("bad stored status".into()))?;
                    let to = DocumentStatus::parse(&next.status)
                        .ok_or_else(|| RegisterError::validation("unknown status"))?;
                    if !review::is_valid_transition(from, to) {
                        return Err(RegisterError::validation(format!(
                            "status cannot move from {} to {}",
                            from.as_str(),
                            to.as_str()
                        )));
                    }
                }

                if next.last_review_date < next.effective_date {
                    return Err(RegisterError::validation(
                        "last review date cannot be before the effective date",
                    ));
                }

                // The schedule is recomputed only when its inputs change,
                // unless the caller supplied an explicit next review date.
                let schedule_changed = next.last_review_date != current.last_review_date
                    || next.review_frequency != current.review_frequency;
                if schedule_changed && update.next_review_date.is_none() {
                    let frequency = ReviewFrequency::parse(&next.review_frequency)
                        .ok_or_else(|| RegisterError::validation("unknown review frequency"))?;
                    next.next_review_date =
                        resolve_next_review(next.last_review_date, frequency, None)?;
                }

                let changes = diff_fields(&current, &next);
                if changes.is_empty() {
                    return Ok(current);
                }

                next.updated_at = Utc::now().naive_utc();
                next.updated_by = actor_id.clone();

                diesel::update(documents::table.find(doc_id))
                    .set((
                        documents::title.eq(&next.title),
                        documents::description.eq(&next.description),
                        documents::category.eq(&next.category),
                        documents::owner.eq(&next.owner),
                        documents::approver.eq(&next.approver),
                        documents::status.eq(&next.status),
                        documents::version.eq(&next.version),
                        documents::review_frequency.eq(&next.review_frequency),
                        documents::last_review_date.eq(next.last_review_date),
                        documents::next_review_date.eq(next.next_review_date),
                        documents::notes.eq(&next.notes),
                        documents::applicable_entity.eq(&next.applicable_entity),
                        documents::updated_at.eq(next.updated_at),
                        documents::updated_by.eq(&next.updated_by),
                    ))
                    .execute(conn)?;

                for change in &changes {
                    let action = if change.field == "status" {
                        HistoryAction::StatusChanged
                    } else {
                        HistoryAction::Updated
                    };
                    history::record(
                        conn,
                        AuditEvent {
                            doc_id,
                            action,
                            field_changed: Some(change.field),
                            old_value: change.old.as_deref(),
                            new_value: change.new.as_deref(),
                            changed_by: &actor_id,
                            notes: None,
                        },
                    )?;
                }

                Ok(next)
            })
        })?;

        tracing::info!(doc_ref = %document.doc_ref, "document updated");
        Ok(document)
    }

    /// Records a completed review and advances the schedule. AdHoc documents
    /// need an explicit next review date. A review may bump the version in
    /// the same step, which is audited as its own change.
    pub fn mark_reviewed(
        &self,
        actor: &Actor,
        doc_id: &str,
        review_date: NaiveDate,
        new_version: Option<&str>,
        next_review_override: Option<NaiveDate>,
        notes: Option<&str>,
    ) -> Result<Document> {
        let mut conn = self.pool.get()?;
        let actor_id = actor.user_id.clone();

        let document = with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                let current: Document = documents::table
                    .find(doc_id)
                    .first(conn)
                    .optional()?
                    .ok_or(RegisterError::NotFound("document"))?;

                let resource = ResourceScope {
                    category: &current.category,
                    applicable_entity: current.applicable_entity.as_deref(),
                };
                permissions::check(actor, Action::MarkReviewed, Some(&resource))?;

                if review_date < current.effective_date {
                    return Err(RegisterError::validation(
                        "review date cannot be before the effective date",
                    ));
                }

                let frequency = current
                    .frequency()
                    .ok_or(RegisterError::Constraint("bad stored frequency".into()))?;
                let next = resolve_next_review(review_date, frequency, next_review_override)?;

                let version = match new_version {
                    Some(raw) => {
                        let trimmed = raw.trim();
                        if trimmed.is_empty() {
                            return Err(RegisterError::validation("version is required"));
                        }
                        trimmed.to_string()
                    }
                    None => current.version.clone(),
                };

                let now = Utc::now().naive_utc();
                diesel::update(documents::table.find(doc_id))
                    .set((
                        documents::last_review_date.eq(review_date),
                        documents::next_review_date.eq(next),
                        documents::version.eq(&version),
                        documents::updated_at.eq(now),
                        documents::updated_by.eq(&actor_id),
                    ))
                    .execute(conn)?;

                let old_next = current.next_review_date.to_string();
                let new_next = next.to_string();
                history::record(
                    conn,
                    AuditEvent {
                        doc_id,
                        action: HistoryAction::Reviewed,
                        field_changed: Some("next_review_date"),
                        old_value: Some(&old_next),
                        new_value: Some(&new_next),
                        changed_by: &actor_id,
                        notes,
                    },
                )?;
                if version != current.version {
                    history::record(
                        conn,
                        AuditEvent {
                            doc_id,
                            action: HistoryAction::Updated,
                            field_changed: Some("version"),
                            old_value: Some(&current.version),
                            new_value: Some(&version),
                            changed_by: &actor_id,
                            notes: None,
                        },
                    )?;
                }

                let document: Document = documents::table.find(doc_id).first(conn)?;
                Ok(document)
            })
        })?;

        tracing::info!(doc_ref = %document.doc_ref, "document reviewed");
        Ok(document)
    }

    /// Removes a document. Admin only. Attachments and links go with it via
    /// cascade; the audit trail keeps a terminal entry and everything before
    /// it. Returns the deleted row so callers can clean up stored files.
    pub fn delete(&self, actor: &Actor, doc_id: &str) -> Result<Document> {
        let mut conn = self.pool.get()?;
        let actor_id = actor.user_id.clone();

        let document = with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                let current: Document = documents::table
                    .find(doc_id)
                    .first(conn)
                    .optional()?
                    .ok_or(RegisterError::NotFound("document"))?;

                let resource = ResourceScope {
                    category: &current.category,
                    applicable_entity: current.applicable_entity.as_deref(),
                };
                permissions::check(actor, Action::DeleteDocument, Some(&resource))?;

                history::record(
                    conn,
                    AuditEvent {
                        doc_id,
                        action: HistoryAction::StatusChanged,
                        field_changed: Some("status"),
                        old_value: Some(&current.status),
                        new_value: Some("DELETED"),
                        changed_by: &actor_id,
                        notes: Some("document deleted"),
                    },
                )?;

                diesel::delete(documents::table.find(doc_id)).execute(conn)?;
                Ok(current)
            })
        })?;

        tracing::info!(doc_ref = %document.doc_ref, "document deleted");
        Ok(document)
    }

    pub fn get(&self, actor: &Actor, doc_id: &str) -> Result<Document> {
        permissions::check(actor, Action::ViewRegister, None)?;
        let mut conn = self.pool.get()?;
        documents::table
            .find(doc_id)
            .first(&mut conn)
            .optional()?
            .ok_or(RegisterError::NotFound("document"))
    }

    pub fn get_by_ref(&self, actor: &Actor, doc_ref: &str) -> Result<Document> {
        permissions::check(actor, Action::ViewRegister, None)?;
        let mut conn = self.pool.get()?;
        documents::table
            .filter(documents::doc_ref.eq(doc_ref))
            .first(&mut conn)
            .optional()?
            .ok_or(RegisterError::NotFound("document"))
    }

    /// Lists register entries, reference order. Restricted editors only see
    /// documents inside their scope.
    pub fn list(&self, actor: &Actor, filter: &DocumentFilter) -> Result<Vec<Document>> {
        permissions::check(actor, Action::ViewRegister, None)?;
        let mut conn = self.pool.get()?;

        let mut query = documents::table.into_boxed();
        if let Some(category) = &filter.category {
            query = query.filter(documents::category.eq(category));
        }
        if let Some(status) = filter.status {
            query = query.filter(documents::status.eq(status.as_str()));
        }
        if let Some(doc_type) = filter.doc_type {
            query = query.filter(documents::doc_type.eq(doc_type.as_str()));
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search.trim());
            query = query.filter(
                documents::title
                    .like(pattern.clone())
                    .or(documents::doc_ref.like(pattern)),
            );
        }

        let mut rows: Vec<Document> = query.order(documents::doc_ref.asc()).load(&mut conn)?;

        if actor.role == crate::models::UserRole::RestrictedEditor {
            rows.retain(|d| {
                actor
                    .scope
                    .allows(&d.category, d.applicable_entity.as_deref())
            });
        }
        if let Some(bucket) = filter.review_bucket {
            let thresholds = self.settings.thresholds()?;
            let as_of = Utc::now().date_naive();
            rows.retain(|d| review::review_status(d.next_review_date, as_of, &thresholds) == bucket);
        }
        Ok(rows)
    }

    /// Suggests the next free reference for a type and category, e.g.
    /// `POL-AML-003` when `POL-AML-002` is the highest taken.
    pub fn suggest_ref(&self, doc_type: DocumentType, category: &str) -> Result<String> {
        let mut conn = self.pool.get()?;
        next_reference(&mut conn, doc_type, category)
    }

    /// Review bucket for one document, using the configured thresholds.
    pub fn compute_status(&self, document: &Document, as_of: NaiveDate) -> Result<ReviewStatus> {
        let thresholds = self.settings.thresholds()?;
        Ok(review::review_status(
            document.next_review_date,
            as_of,
            &thresholds,
        ))
    }

    /// Dashboard counts by review bucket.
    pub fn counts_by_status(
        &self,
        actor: &Actor,
        as_of: NaiveDate,
    ) -> Result<BTreeMap<&'static str, usize>> {
        let thresholds = self.settings.thresholds()?;
        let rows = self.list(actor, &DocumentFilter::default())?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let bucket = review::review_status(row.next_review_date, as_of, &thresholds);
            *counts.entry(bucket.as_str()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Documents that are overdue or due soon, most urgent first.
    pub fn requiring_attention(
        &self,
        actor: &Actor,
        as_of: NaiveDate,
    ) -> Result<Vec<(Document, ReviewStatus)>> {
        let thresholds = self.settings.thresholds()?;
        let rows = self.list(actor, &DocumentFilter::default())?;
        let mut urgent: Vec<(Document, ReviewStatus)> = rows
            .into_iter()
            .filter_map(|d| {
                let bucket = review::review_status(d.next_review_date, as_of, &thresholds);
                matches!(bucket, ReviewStatus::Overdue | ReviewStatus::DueSoon)
                    .then_some((d, bucket))
            })
            .collect();
        urgent.sort_by_key(|(d, _)| d.next_review_date);
        Ok(urgent)
    }
}

fn resolve_next_review(
    last: NaiveDate,
    frequency: ReviewFrequency,
    explicit: Option<NaiveDate>,
) -> Result<NaiveDate> {
    if let Some(date) = explicit {
        if date < last {
            return Err(RegisterError::validation(
                "next review date cannot be before the review date",
            ));
        }
        return Ok(date);
    }
    review::next_review_date(last, frequency).ok_or_else(|| {
        RegisterError::validation("ad-hoc documents need an explicit next review date")
    })
}

fn ensure_category_active(conn: &mut SqliteConnection, code: &str) -> Result<()> {
    let active: Option<bool> = categories::table
        .find(code)
        .select(categories::is_active)
        .first(conn)
        .optional()?;
    match active {
        Some(true) => Ok(()),
        Some(false) => Err(RegisterError::validation(format!(
            "category '{code}' is inactive"
        ))),
        None => Err(RegisterError::validation(format!(
            "unknown category '{code}'"
        ))),
    }
}

fn next_reference(
    conn: &mut SqliteConnection,
    doc_type: DocumentType,
    category: &str,
) -> Result<String> {
    let prefix = format!("{}-{}-", doc_type.code_prefix(), category);
    let refs: Vec<String> = documents::table
        .select(documents::doc_ref)
        .filter(documents::doc_ref.like(format!("{prefix}%")))
        .load(conn)?;
    let max = refs
        .iter()
        .filter_map(|r| r.strip_prefix(&prefix))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    Ok(format!("{prefix}{:03}", max + 1))
}

struct FieldChange {
    field: &'static str,
    old: Option<String>,
    new: Option<String>,
}

fn apply_update(target: &mut Document, update: &DocumentUpdate) -> Result<()> {
    if let Some(title) = &update.title {
        target.title = title.trim().to_string();
    }
    if let Some(description) = &update.description {
        target.description = description.clone();
    }
    if let Some(category) = &update.category {
        target.category = category.clone();
    }
    if let Some(owner) = &update.owner {
        target.owner = owner.trim().to_string();
    }
    if let Some(approver) = &update.approver {
        target.approver = approver.clone();
    }
    if let Some(status) = update.status {
        target.status = status.as_str().to_string();
    }
    if let Some(version) = &update.version {
        let trimmed = version.trim();
        if trimmed.is_empty() {
            return Err(RegisterError::validation("version is required"));
        }
        target.version = trimmed.to_string();
    }
    if let Some(frequency) = update.review_frequency {
        target.review_frequency = frequency.as_str().to_string();
    }
    if let Some(last) = update.last_review_date {
        target.last_review_date = last;
    }
    if let Some(next) = update.next_review_date {
        target.next_review_date = next;
    }
    if let Some(notes) = &update.notes {
        target.notes = notes.clone();
    }
    if let Some(entity) = &update.applicable_entity {
        target.applicable_entity = entity.clone();
    }
    Ok(())
}

fn diff_fields(old: &Document, new: &Document) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let mut push = |field: &'static str, old: Option<String>, new: Option<String>| {
        if old != new {
            changes.push(FieldChange { field, old, new });
        }
    };

    push("title", Some(old.title.clone()), Some(new.title.clone()));
    push("description", old.description.clone(), new.description.clone());
    push("category", Some(old.category.clone()), Some(new.category.clone()));
    push("owner", Some(old.owner.clone()), Some(new.owner.clone()));
    push("approver", old.approver.clone(), new.approver.clone());
    push("status", Some(old.status.clone()), Some(new.status.clone()));
    push("version", Some(old.version.clone()), Some(new.version.clone()));
    push(
        "review_frequency",
        Some(old.review_frequency.clone()),
        Some(new.review_frequency.clone()),
    );
    push(
        "last_review_date",
        Some(old.last_review_date.to_string()),
        Some(new.last_review_date.to_string()),
    );
    push(
        "next_review_date",
        Some(old.next_review_date.to_string()),
        Some(new.next_review_date.to_string()),
    );
    push("notes", old.notes.clone(), new.notes.clone());
    push(
        "applicable_entity",
        old.applicable_entity.clone(),
        new.applicable_entity.clone(),
    );
    changes
}
