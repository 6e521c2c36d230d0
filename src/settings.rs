use std::collections::BTreeMap;

use chrono::Utc;
use diesel::prelude::*;

use crate::auth::Actor;
use crate::db::{with_busy_retry, DbPool};
use crate::error::Result;
use crate::models::{ReviewFrequency, Setting};
use crate::permissions::{self, Action};
use crate::review::Thresholds;
use crate::schema::settings;

pub const KEY_COMPANY_NAME: &str = "company_name";
pub const KEY_WARNING_THRESHOLD: &str = "warning_threshold_days";
pub const KEY_UPCOMING_THRESHOLD: &str = "upcoming_threshold_days";
pub const KEY_DATE_FORMAT: &str = "date_format";
pub const KEY_DEFAULT_FREQUENCY: &str = "default_review_frequency";
pub const KEY_ENFORCE_TRANSITIONS: &str = "enforce_status_transitions";

#[derive(Clone)]
pub struct SettingsService {
    pool: DbPool,
}

impl SettingsService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get()?;
        let row: Option<Setting> = settings::table.find(key).first(&mut conn).optional()?;
        Ok(row.and_then(|s| s.value))
    }

    pub fn all(&self) -> Result<BTreeMap<String, String>> {
        let mut conn = self.pool.get()?;
        let rows: Vec<Setting> = settings::table.load(&mut conn)?;
        Ok(rows
            .into_iter()
            .filter_map(|s| s.value.map(|v| (s.key, v)))
            .collect())
    }

    /// Upserts a setting. Admin only.
    pub fn set(&self, actor: &Actor, key: &str, value: &str) -> Result<()> {
        permissions::check(actor, Action::ManageSettings, None)?;
        let mut conn = self.pool.get()?;
        with_busy_retry(|| {
            diesel::insert_into(settings::table)
                .values((
                    settings::key.eq(key),
                    settings::value.eq(value),
                    settings::updated_at.eq(Utc::now().naive_utc()),
                    settings::updated_by.eq(&actor.user_id),
                ))
                .on_conflict(settings::key)
                .do_update()
                .set((
                    settings::value.eq(value),
                    settings::updated_at.eq(Utc::now().naive_utc()),
                    settings::updated_by.eq(&actor.user_id),
                ))
                .execute(&mut conn)?;
            Ok(())
        })?;
        tracing::info!(key, "setting updated");
        Ok(())
    }

    /// Review thresholds, falling back to the defaults when a value is
    /// missing or unparseable.
    pub fn thresholds(&self) -> Result<Thresholds> {
        let defaults = Thresholds::default();
        let warning = self
            .get(KEY_WARNING_THRESHOLD)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.warning_days);
        let upcoming = self
            .get(KEY_UPCOMING_THRESHOLD)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.upcoming_days);
        Ok(Thresholds {
            warning_days: warning,
            upcoming_days: upcoming,
        })
    }

    pub fn company_name(&self) -> Result<String> {
        Ok(self.get(KEY_COMPANY_NAME)?.unwrap_or_default())
    }

    pub fn date_format(&self) -> Result<String> {
        Ok(self
            .get(KEY_DATE_FORMAT)?
            .unwrap_or_else(|| "DD/MM/YYYY".to_string()))
    }

    pub fn default_review_frequency(&self) -> Result<ReviewFrequency> {
        Ok(self
            .get(KEY_DEFAULT_FREQUENCY)?
            .as_deref()
            .and_then(ReviewFrequency::parse)
            .unwrap_or(ReviewFrequency::Annual))
    }

    pub fn enforce_status_transitions(&self) -> Result<bool> {
        Ok(self
            .get(KEY_ENFORCE_TRANSITIONS)?
            .map(|v| v == "true")
            .unwrap_or(false))
    }
}
