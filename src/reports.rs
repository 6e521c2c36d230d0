use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use tempfile::NamedTempFile;

use crate::auth::Actor;
use crate::db::DbPool;
use crate::error::{RegisterError, Result};
use crate::models::{Category, Document, HistoryEntry, ReviewStatus, UserRole};
use crate::permissions::{self, Action};
use crate::register::DocumentFilter;
use crate::review;
use crate::schema::{categories, document_history, documents};
use crate::settings::SettingsService;

/// Rows fetched per batch while assembling a report, so cancellation is
/// checked at a reasonable granularity.
const BATCH_SIZE: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    FullRegister,
    ReviewSchedule,
    ComplianceStatus,
    OverdueDocuments,
    CategorySummary,
    AuditLog,
}

impl ReportKind {
    pub fn title(&self) -> &'static str {
        match self {
            ReportKind::FullRegister => "Full Document Register",
            ReportKind::ReviewSchedule => "Review Schedule",
            ReportKind::ComplianceStatus => "Compliance Status",
            ReportKind::OverdueDocuments => "Overdue Documents",
            ReportKind::CategorySummary => "Category Summary",
            ReportKind::AuditLog => "Audit Log",
        }
    }

    fn file_stem(&self) -> &'static str {
        match self {
            ReportKind::FullRegister => "full_register",
            ReportKind::ReviewSchedule => "review_schedule",
            ReportKind::ComplianceStatus => "compliance_status",
            ReportKind::OverdueDocuments => "overdue_documents",
            ReportKind::CategorySummary => "category_summary",
            ReportKind::AuditLog => "audit_log",
        }
    }
}

/// Assembled tabular report, format-independent.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportData {
    pub title: String,
    pub generated_at: chrono::NaiveDateTime,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

pub trait ReportRenderer: Send + Sync {
    fn extension(&self) -> &'static str;
    fn render(&self, data: &ReportData, out: &mut dyn Write) -> Result<()>;
}

pub struct CsvRenderer;

impl ReportRenderer for CsvRenderer {
    fn extension(&self) -> &'static str {
        "csv"
    }

    fn render(&self, data: &ReportData, out: &mut dyn Write) -> Result<()> {
        let header = data
            .columns
            .iter()
            .map(|c| csv_escape(c))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(out, "{header}")?;
        for row in &data.rows {
            let line = row
                .iter()
                .map(|cell| csv_escape(cell))
                .collect::<Vec<_>>()
                .join(",");
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

fn csv_escape(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

pub struct JsonRenderer;

impl ReportRenderer for JsonRenderer {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn render(&self, data: &ReportData, out: &mut dyn Write) -> Result<()> {
        let rows: Vec<serde_json::Value> = data
            .rows
            .iter()
            .map(|row| {
                data.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, cell)| ((*col).to_string(), serde_json::Value::from(cell.clone())))
                    .collect::<serde_json::Map<_, _>>()
                    .into()
            })
            .collect();
        let body = serde_json::json!({
            "title": data.title,
            "generated_at": data.generated_at.to_string(),
            "rows": rows,
        });
        serde_json::to_writer_pretty(&mut *out, &body)
            .map_err(|e| RegisterError::validation(format!("cannot serialize report: {e}")))?;
        writeln!(out)?;
        Ok(())
    }
}

/// Cooperative cancellation flag shared with the export thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct ReportCoordinator {
    pool: DbPool,
    settings: SettingsService,
    exports_dir: PathBuf,
}

impl ReportCoordinator {
    pub fn new(pool: DbPool, settings: SettingsService, exports_dir: PathBuf) -> Self {
        Self {
            pool,
            settings,
            exports_dir,
        }
    }

    /// Assembles and writes a report into the shared exports folder. The
    /// file appears atomically: it is built in a temp file and only renamed
    /// into place once rendering finishes, so a cancelled or failed export
    /// leaves nothing behind.
    pub fn export(
        &self,
        actor: &Actor,
        kind: ReportKind,
        filters: &DocumentFilter,
        renderer: &dyn ReportRenderer,
        token: &CancelToken,
    ) -> Result<PathBuf> {
        permissions::check(actor, Action::ExportData, None)?;
        if kind == ReportKind::AuditLog {
            permissions::check(actor, Action::ViewFullAuditLog, None)?;
        }

        let as_of = Utc::now().date_naive();
        let data = self.assemble(actor, kind, filters, as_of, token)?;
        if token.is_cancelled() {
            return Err(RegisterError::Cancelled);
        }

        let mut temp = NamedTempFile::new_in(&self.exports_dir)?;
        renderer.render(&data, temp.as_file_mut())?;
        if token.is_cancelled() {
            return Err(RegisterError::Cancelled);
        }

        let filename = format!(
            "{}_{}.{}",
            kind.file_stem(),
            Utc::now().format("%Y%m%d_%H%M%S"),
            renderer.extension()
        );
        let target = self.exports_dir.join(filename);
        temp.persist(&target)
            .map_err(|e| RegisterError::Io(e.error))?;

        tracing::info!(report = kind.title(), path = %target.display(), "report exported");
        Ok(target)
    }

    /// Runs an export on a background thread so the caller stays responsive.
    pub fn spawn_export(
        &self,
        actor: Actor,
        kind: ReportKind,
        filters: DocumentFilter,
        renderer: Arc<dyn ReportRenderer>,
        token: CancelToken,
    ) -> JoinHandle<Result<PathBuf>> {
        let coordinator = self.clone();
        std::thread::spawn(move || {
            coordinator.export(&actor, kind, &filters, renderer.as_ref(), &token)
        })
    }

    pub fn assemble(
        &self,
        actor: &Actor,
        kind: ReportKind,
        filters: &DocumentFilter,
        as_of: NaiveDate,
        token: &CancelToken,
    ) -> Result<ReportData> {
        let thresholds = self.settings.thresholds()?;
        let bucket = |d: &Document| review::review_status(d.next_review_date, as_of, &thresholds);

        let (columns, rows) = match kind {
            ReportKind::FullRegister => {
                let docs = self.load_documents(actor, filters, as_of, token)?;
                let columns = vec![
                    "Reference", "Title", "Type", "Category", "Owner", "Approver", "Status",
                    "Version", "Effective Date", "Last Review", "Next Review", "Frequency",
                    "Applicable Entity",
                ];
                let rows = docs
                    .iter()
                    .map(|d| {
                        vec![
                            d.doc_ref.clone(),
                            d.title.clone(),
                            d.doc_type.clone(),
                            d.category.clone(),
                            d.owner.clone(),
                            d.approver.clone().unwrap_or_default(),
                            d.status.clone(),
                            d.version.clone(),
                            d.effective_date.to_string(),
                            d.last_review_date.to_string(),
                            d.next_review_date.to_string(),
                            d.review_frequency.clone(),
                            d.applicable_entity.clone().unwrap_or_default(),
                        ]
                    })
                    .collect();
                (columns, rows)
            }
            ReportKind::ReviewSchedule => {
                let mut docs = self.load_documents(actor, filters, as_of, token)?;
                docs.sort_by_key(|d| d.next_review_date);
                let columns = vec![
                    "Reference", "Title", "Owner", "Frequency", "Last Review", "Next Review",
                    "Review Status",
                ];
                let rows = docs
                    .iter()
                    .map(|d| {
                        vec![
                            d.doc_ref.clone(),
                            d.title.clone(),
                            d.owner.clone(),
                            d.review_frequency.clone(),
                            d.last_review_date.to_string(),
                            d.next_review_date.to_string(),
                            bucket(d).as_str().to_string(),
                        ]
                    })
                    .collect();
                (columns, rows)
            }
            ReportKind::ComplianceStatus => {
                let docs = self.load_documents(actor, filters, as_of, token)?;
                let columns = vec![
                    "Reference", "Title", "Category", "Status", "Next Review", "Review Status",
                ];
                let rows = docs
                    .iter()
                    .map(|d| {
                        vec![
                            d.doc_ref.clone(),
                            d.title.clone(),
                            d.category.clone(),
                            d.status.clone(),
                            d.next_review_date.to_string(),
                            bucket(d).as_str().to_string(),
                        ]
                    })
                    .collect();
                (columns, rows)
            }
            ReportKind::OverdueDocuments => {
                let mut docs = self.load_documents(actor, filters, as_of, token)?;
                docs.retain(|d| bucket(d) == ReviewStatus::Overdue);
                docs.sort_by_key(|d| d.next_review_date);
                let columns = vec![
                    "Reference", "Title", "Category", "Owner", "Next Review", "Days Overdue",
                ];
                let rows = docs
                    .iter()
                    .map(|d| {
                        let days = (as_of - d.next_review_date).num_days();
                        vec![
                            d.doc_ref.clone(),
                            d.title.clone(),
                            d.category.clone(),
                            d.owner.clone(),
                            d.next_review_date.to_string(),
                            days.to_string(),
                        ]
                    })
                    .collect();
                (columns, rows)
            }
            ReportKind::CategorySummary => {
                let docs = self.load_documents(actor, filters, as_of, token)?;
                let cats = self.load_categories()?;
                let mut totals: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
                for d in &docs {
                    let entry = totals.entry(d.category.as_str()).or_default();
                    entry.0 += 1;
                    if bucket(d) == ReviewStatus::Overdue {
                        entry.1 += 1;
                    }
                }
                let columns = vec!["Code", "Name", "Documents", "Overdue"];
                let rows = cats
                    .iter()
                    .filter_map(|c| {
                        let (total, overdue) = totals.get(c.code.as_str())?;
                        Some(vec![
                            c.code.clone(),
                            c.name.clone(),
                            total.to_string(),
                            overdue.to_string(),
                        ])
                    })
                    .collect();
                (columns, rows)
            }
            ReportKind::AuditLog => {
                let entries = self.load_history(token)?;
                let doc_refs = self.doc_ref_index()?;
                let columns = vec![
                    "When", "Document", "Action", "Field", "Old Value", "New Value", "By",
                    "Notes",
                ];
                let rows = entries
                    .iter()
                    .map(|e| {
                        vec![
                            e.changed_at.to_string(),
                            doc_refs
                                .get(&e.doc_id)
                                .cloned()
                                .unwrap_or_else(|| e.doc_id.clone()),
                            e.action.clone(),
                            e.field_changed.clone().unwrap_or_default(),
                            e.old_value.clone().unwrap_or_default(),
                            e.new_value.clone().unwrap_or_default(),
                            e.changed_by.clone(),
                            e.notes.clone().unwrap_or_default(),
                        ]
                    })
                    .collect();
                (columns, rows)
            }
        };

        Ok(ReportData {
            title: kind.title().to_string(),
            generated_at: Utc::now().naive_utc(),
            columns,
            rows,
        })
    }

    fn load_documents(
        &self,
        actor: &Actor,
        filters: &DocumentFilter,
        as_of: NaiveDate,
        token: &CancelToken,
    ) -> Result<Vec<Document>> {
        let mut conn = self.pool.get()?;
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            if token.is_cancelled() {
                return Err(RegisterError::Cancelled);
            }
            let mut query = documents::table.into_boxed();
            if let Some(category) = &filters.category {
                query = query.filter(documents::category.eq(category));
            }
            if let Some(status) = filters.status {
                query = query.filter(documents::status.eq(status.as_str()));
            }
            if let Some(doc_type) = filters.doc_type {
                query = query.filter(documents::doc_type.eq(doc_type.as_str()));
            }
            if let Some(search) = &filters.search {
                let pattern = format!("%{}%", search.trim());
                query = query.filter(
                    documents::title
                        .like(pattern.clone())
                        .or(documents::doc_ref.like(pattern)),
                );
            }
            let batch: Vec<Document> = query
                .order(documents::doc_ref.asc())
                .limit(BATCH_SIZE)
                .offset(offset)
                .load(&mut conn)?;
            let done = (batch.len() as i64) < BATCH_SIZE;
            all.extend(batch);
            if done {
                break;
            }
            offset += BATCH_SIZE;
        }

        if actor.role == UserRole::RestrictedEditor {
            all.retain(|d| {
                actor
                    .scope
                    .allows(&d.category, d.applicable_entity.as_deref())
            });
        }
        if let Some(bucket) = filters.review_bucket {
            let thresholds = self.settings.thresholds()?;
            all.retain(|d| review::review_status(d.next_review_date, as_of, &thresholds) == bucket);
        }
        Ok(all)
    }

    fn load_history(&self, token: &CancelToken) -> Result<Vec<HistoryEntry>> {
        let mut conn = self.pool.get()?;
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            if token.is_cancelled() {
                return Err(RegisterError::Cancelled);
            }
            let batch: Vec<HistoryEntry> = document_history::table
                .order(document_history::changed_at.asc())
                .limit(BATCH_SIZE)
                .offset(offset)
                .load(&mut conn)?;
            let done = (batch.len() as i64) < BATCH_SIZE;
            all.extend(batch);
            if done {
                break;
            }
            offset += BATCH_SIZE;
        }
        Ok(all)
    }

    fn load_categories(&self) -> Result<Vec<Category>> {
        let mut conn = self.pool.get()?;
        let rows = categories::table
            .order((categories::sort_order.asc(), categories::code.asc()))
            .load(&mut conn)?;
        Ok(rows)
    }

    fn doc_ref_index(&self) -> Result<BTreeMap<String, String>> {
        let mut conn = self.pool.get()?;
        let pairs: Vec<(String, String)> = documents::table
            .select((documents::doc_id, documents::doc_ref))
            .load(&mut conn)?;
        Ok(pairs.into_iter().collect())
    }
}
