use chrono::Utc;
use diesel::prelude::*;

use crate::auth::{password, Actor, Scope};
use crate::db::{with_busy_retry, DbPool};
use crate::error::{RegisterError, Result};
use crate::models::{NewUser, User, UserRole};
use crate::permissions::{self, Action};
use crate::schema::users;

#[derive(Debug, Clone)]
pub struct UserCreate {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub role: UserRole,
    pub scope: Option<Scope>,
}

#[derive(Clone)]
pub struct UserService {
    pool: DbPool,
}

impl UserService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn create(&self, actor: &Actor, input: UserCreate) -> Result<User> {
        permissions::check(actor, Action::ManageUsers, None)?;

        let username = input.username.trim().to_lowercase();
        if username.is_empty() {
            return Err(RegisterError::validation("username is required"));
        }
        if input.password.len() < crate::auth::MIN_PASSWORD_LENGTH {
            return Err(RegisterError::validation(format!(
                "password must be at least {} characters",
                crate::auth::MIN_PASSWORD_LENGTH
            )));
        }

        let scope = input.scope.unwrap_or_default();
        let (allowed_categories, allowed_entities) = scope.to_columns();

        let row = NewUser {
            user_id: uuid::Uuid::new_v4().to_string(),
            username: username.clone(),
            password_hash: password::hash_password(&input.password)?,
            full_name: input.full_name.trim().to_string(),
            role: input.role.as_str().to_string(),
            is_active: true,
            allowed_categories,
            allowed_entities,
            created_at: Utc::now().naive_utc(),
            created_by: Some(actor.user_id.clone()),
        };

        let mut conn = self.pool.get()?;
        with_busy_retry(|| {
            diesel::insert_into(users::table)
                .values(&row)
                .execute(&mut conn)
                .map_err(|e| match RegisterError::from(e) {
                    RegisterError::Constraint(_) => RegisterError::validation(format!(
                        "username '{username}' is already taken"
                    )),
                    other => other,
                })?;
            Ok(())
        })?;

        tracing::info!(%username, role = %input.role, "user created");
        users::table
            .find(&row.user_id)
            .first(&mut conn)
            .map_err(Into::into)
    }

    pub fn update_profile(
        &self,
        actor: &Actor,
        user_id: &str,
        full_name: &str,
        role: UserRole,
    ) -> Result<User> {
        permissions::check(actor, Action::ManageUsers, None)?;
        let mut conn = self.pool.get()?;

        with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                let current: User = users::table
                    .find(user_id)
                    .first(conn)
                    .optional()?
                    .ok_or(RegisterError::NotFound("user"))?;

                // Demoting the last active admin would lock everyone out.
                if current.role == UserRole::Admin.as_str()
                    && role != UserRole::Admin
                    && current.is_active
                {
                    ensure_not_last_active_admin(conn, user_id)?;
                }

                diesel::update(users::table.find(user_id))
                    .set((
                        users::full_name.eq(full_name.trim()),
                        users::role.eq(role.as_str()),
                    ))
                    .execute(conn)?;
                Ok(())
            })
        })?;

        users::table
            .find(user_id)
            .first(&mut conn)
            .map_err(Into::into)
    }

    /// Replaces a restricted editor's category and entity scope.
    pub fn set_scope(&self, actor: &Actor, user_id: &str, scope: &Scope) -> Result<()> {
        permissions::check(actor, Action::ManageUsers, None)?;
        let (allowed_categories, allowed_entities) = scope.to_columns();
        let mut conn = self.pool.get()?;
        with_busy_retry(|| {
            let updated = diesel::update(users::table.find(user_id))
                .set((
                    users::allowed_categories.eq(&allowed_categories),
                    users::allowed_entities.eq(&allowed_entities),
                ))
                .execute(&mut conn)?;
            if updated == 0 {
                return Err(RegisterError::NotFound("user"));
            }
            Ok(())
        })
    }

    /// Disables an account. The last active admin cannot be deactivated.
    pub fn deactivate(&self, actor: &Actor, user_id: &str) -> Result<()> {
        permissions::check(actor, Action::ManageUsers, None)?;
        let mut conn = self.pool.get()?;

        with_busy_retry(|| {
            conn.immediate_transaction(|conn| {
                let current: User = users::table
                    .find(user_id)
                    .first(conn)
                    .optional()?
                    .ok_or(RegisterError::NotFound("user"))?;

                if current.role == UserRole::Admin.as_str() && current.is_active {
                    ensure_not_last_active_admin(conn, user_id)?;
                }

                diesel::update(users::table.find(user_id))
                    .set(users::is_active.eq(false))
                    .execute(conn)?;
                Ok(())
            })
        })?;

        tracing::info!(user_id, "user deactivated");
        Ok(())
    }

    pub fn activate(&self, actor: &Actor, user_id: &str) -> Result<()> {
        permissions::check(actor, Action::ManageUsers, None)?;
        let mut conn = self.pool.get()?;
        with_busy_retry(|| {
            let updated = diesel::update(users::table.find(user_id))
                .set(users::is_active.eq(true))
                .execute(&mut conn)?;
            if updated == 0 {
                return Err(RegisterError::NotFound("user"));
            }
            Ok(())
        })
    }

    /// Admin password reset, no knowledge of the old password required.
    pub fn reset_password(&self, actor: &Actor, user_id: &str, new_password: &str) -> Result<()> {
        permissions::check(actor, Action::ManageUsers, None)?;
        if new_password.len() < crate::auth::MIN_PASSWORD_LENGTH {
            return Err(RegisterError::validation(format!(
                "password must be at least {} characters",
                crate::auth::MIN_PASSWORD_LENGTH
            )));
        }
        let hash = password::hash_password(new_password)?;
        let mut conn = self.pool.get()?;
        with_busy_retry(|| {
            let updated = diesel::update(users::table.find(user_id))
                .set(users::password_hash.eq(&hash))
                .execute(&mut conn)?;
            if updated == 0 {
                return Err(RegisterError::NotFound("user"));
            }
            Ok(())
        })
    }

    pub fn get(&self, actor: &Actor, user_id: &str) -> Result<User> {
        permissions::check(actor, Action::ManageUsers, None)?;
        let mut conn = self.pool.get()?;
        users::table
            .find(user_id)
            .first(&mut conn)
            .optional()?
            .ok_or(RegisterError::NotFound("user"))
    }

    pub fn list(&self, actor: &Actor) -> Result<Vec<User>> {
        permissions::check(actor, Action::ManageUsers, None)?;
        let mut conn = self.pool.get()?;
        let rows = users::table.order(users::username.asc()).load(&mut conn)?;
        Ok(rows)
    }
}

fn ensure_not_last_active_admin(
    conn: &mut diesel::sqlite::SqliteConnection,
    user_id: &str,
) -> Result<()> {
    let other_admins: i64 = users::table
        .filter(users::role.eq(UserRole::Admin.as_str()))
        .filter(users::is_active.eq(true))
        .filter(users::user_id.ne(user_id))
        .count()
        .get_result(conn)?;
    if other_admins == 0 {
        return Err(RegisterError::validation(
            "cannot remove the last active admin",
        ));
    }
    Ok(())
}
