use diesel::prelude::*;

use crate::auth::Actor;
use crate::db::{with_busy_retry, DbPool};
use crate::error::{RegisterError, Result};
use crate::models::{Category, NewCategory};
use crate::permissions::{self, Action};
use crate::schema::{categories, documents};

#[derive(Clone)]
pub struct CategoryService {
    pool: DbPool,
}

impl CategoryService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Categories in display order. Inactive ones are included only when
    /// asked for, so pickers can hide them while old documents still render.
    pub fn list(&self, include_inactive: bool) -> Result<Vec<Category>> {
        let mut conn = self.pool.get()?;
        let mut query = categories::table.into_boxed();
        if !include_inactive {
            query = query.filter(categories::is_active.eq(true));
        }
        let rows = query
            .order((categories::sort_order.asc(), categories::code.asc()))
            .load(&mut conn)?;
        Ok(rows)
    }

    pub fn get(&self, code: &str) -> Result<Category> {
        let mut conn = self.pool.get()?;
        categories::table
            .find(code)
            .first(&mut conn)
            .optional()?
            .ok_or(RegisterError::NotFound("category"))
    }

    pub fn create(&self, actor: &Actor, code: &str, name: &str, sort_order: i32) -> Result<Category> {
        permissions::check(actor, Action::ManageCategories, None)?;

        let code = code.trim().to_uppercase();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RegisterError::validation(
                "category code must be alphanumeric",
            ));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(RegisterError::validation("category name is required"));
        }

        let row = NewCategory {
            code: code.clone(),
            name: name.to_string(),
            is_active: true,
            sort_order,
        };

        let mut conn = self.pool.get()?;
        with_busy_retry(|| {
            diesel::insert_into(categories::table)
                .values(&row)
                .execute(&mut conn)
                .map_err(|e| match RegisterError::from(e) {
                    RegisterError::Constraint(_) => RegisterError::validation(format!(
                        "category '{code}' already exists"
                    )),
                    other => other,
                })?;
            Ok(())
        })?;

        tracing::info!(%code, "category created");
        self.get(&code)
    }

    pub fn rename(&self, actor: &Actor, code: &str, name: &str) -> Result<Category> {
        permissions::check(actor, Action::ManageCategories, None)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RegisterError::validation("category name is required"));
        }
        let mut conn = self.pool.get()?;
        with_busy_retry(|| {
            let updated = diesel::update(categories::table.find(code))
                .set(categories::name.eq(name))
                .execute(&mut conn)?;
            if updated == 0 {
                return Err(RegisterError::NotFound("category"));
            }
            Ok(())
        })?;
        self.get(code)
    }

    /// Hides a category from pickers. Documents already filed under it are
    /// untouched, so deactivation is always allowed.
    pub fn deactivate(&self, actor: &Actor, code: &str) -> Result<()> {
        permissions::check(actor, Action::ManageCategories, None)?;
        self.set_active(code, false)
    }

    pub fn activate(&self, actor: &Actor, code: &str) -> Result<()> {
        permissions::check(actor, Action::ManageCategories, None)?;
        self.set_active(code, true)
    }

    /// How many documents are filed under a category.
    pub fn document_count(&self, code: &str) -> Result<i64> {
        let mut conn = self.pool.get()?;
        let count = documents::table
            .filter(documents::category.eq(code))
            .count()
            .get_result(&mut conn)?;
        Ok(count)
    }

    fn set_active(&self, code: &str, active: bool) -> Result<()> {
        let mut conn = self.pool.get()?;
        with_busy_retry(|| {
            let updated = diesel::update(categories::table.find(code))
                .set(categories::is_active.eq(active))
                .execute(&mut conn)?;
            if updated == 0 {
                return Err(RegisterError::NotFound("category"));
            }
            Ok(())
        })
    }
}
