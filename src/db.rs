use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{RegisterError, Result};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// How long a connection waits on another writer before giving up.
pub const BUSY_TIMEOUT_MS: u32 = 30_000;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 4;

/// Pragmas applied to every connection. The database lives on a shared
/// network folder, so WAL journaling and a generous busy timeout are
/// required for concurrent workstations.
#[derive(Debug, Clone, Copy)]
struct SharedAccessSettings;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SharedAccessSettings {
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}; \
             PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON;"
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn init_pool(database_path: &Path) -> anyhow::Result<DbPool> {
    init_pool_with_size(database_path, DEFAULT_MAX_POOL_SIZE)
}

pub fn init_pool_with_size(database_path: &Path, max_size: u32) -> anyhow::Result<DbPool> {
    let database_url = database_path.to_string_lossy();
    let manager = ConnectionManager::<SqliteConnection>::new(database_url.as_ref());
    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(Duration::from_secs(10))
        .connection_customizer(Box::new(SharedAccessSettings))
        .build(manager)?;
    Ok(pool)
}

/// Runs pending migrations and seeds reference data on an empty database.
pub fn initialize(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
        tracing::error!(error = %e, "migration failed");
        RegisterError::StorageUnavailable
    })?;
    seed_defaults(&mut conn)?;
    Ok(())
}

/// Retries a storage operation once after a short pause when the shared
/// database reports it is locked.
pub fn with_busy_retry<T, F>(mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    match op() {
        Err(RegisterError::StorageBusy) => {
            std::thread::sleep(Duration::from_millis(250));
            op()
        }
        other => other,
    }
}

const DEFAULT_CATEGORIES: &[(&str, &str, i32)] = &[
    ("AML", "Anti-Money Laundering & CFT", 1),
    ("GOV", "Corporate Governance", 2),
    ("OPS", "Operations", 3),
    ("ACC", "Accounting & Finance", 4),
    ("IT", "Information Technology", 5),
    ("HR", "Human Resources", 6),
    ("DP", "Data Protection", 7),
    ("BCP", "Business Continuity", 8),
    ("RISK", "Risk Management", 9),
    ("REG", "Regulatory Compliance", 10),
    ("OTHER", "Other", 99),
];

const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("company_name", ""),
    ("warning_threshold_days", "30"),
    ("upcoming_threshold_days", "90"),
    ("date_format", "DD/MM/YYYY"),
    ("default_review_frequency", "ANNUAL"),
    ("enforce_status_transitions", "false"),
];

fn seed_defaults(conn: &mut SqliteConnection) -> Result<()> {
    use crate::schema::{categories, settings};

    let category_count: i64 = categories::table.count().get_result(conn)?;
    if category_count == 0 {
        let rows: Vec<crate::models::NewCategory> = DEFAULT_CATEGORIES
            .iter()
            .map(|(code, name, sort_order)| crate::models::NewCategory {
                code: (*code).to_string(),
                name: (*name).to_string(),
                is_active: true,
                sort_order: *sort_order,
            })
            .collect();
        diesel::insert_into(categories::table)
            .values(&rows)
            .execute(conn)?;
        tracing::info!(count = rows.len(), "seeded default categories");
    }

    for (key, value) in DEFAULT_SETTINGS {
        diesel::insert_into(settings::table)
            .values((
                settings::key.eq(*key),
                settings::value.eq(*value),
            ))
            .on_conflict(settings::key)
            .do_nothing()
            .execute(conn)?;
    }

    Ok(())
}
