pub mod password;

use std::collections::BTreeSet;
use std::sync::RwLock;

use chrono::Utc;
use diesel::prelude::*;

use crate::db::{with_busy_retry, DbPool};
use crate::error::{RegisterError, Result};
use crate::models::{NewUser, User, UserRole};
use crate::schema::users;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Category and entity codes a restricted editor may touch. Both sets
/// empty means the user has not been scoped yet and is denied writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub categories: BTreeSet<String>,
    pub entities: BTreeSet<String>,
}

impl Scope {
    /// Parses the semicolon-separated scope columns from the users table.
    pub fn from_columns(categories: Option<&str>, entities: Option<&str>) -> Self {
        Self {
            categories: split_scope(categories),
            entities: split_scope(entities),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.entities.is_empty()
    }

    /// A document is in scope when its category matches, or any of its
    /// applicable entities matches.
    pub fn allows(&self, category: &str, applicable_entity: Option<&str>) -> bool {
        if self.categories.contains(category) {
            return true;
        }
        if let Some(raw) = applicable_entity {
            return raw
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .any(|entity| self.entities.contains(entity));
        }
        false
    }

    pub fn to_columns(&self) -> (Option<String>, Option<String>) {
        (join_scope(&self.categories), join_scope(&self.entities))
    }
}

fn split_scope(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|s| {
        s.split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn join_scope(set: &BTreeSet<String>) -> Option<String> {
    if set.is_empty() {
        None
    } else {
        Some(set.iter().cloned().collect::<Vec<_>>().join(";"))
    }
}

/// The authenticated identity the rest of the crate works against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub username: String,
    pub full_name: String,
    pub role: UserRole,
    pub scope: Scope,
}

impl Actor {
    pub fn from_user(user: &User) -> Result<Self> {
        let role = UserRole::parse(&user.role)
            .ok_or_else(|| RegisterError::Constraint(format!("unknown role '{}'", user.role)))?;
        Ok(Self {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role,
            scope: Scope::from_columns(
                user.allowed_categories.as_deref(),
                user.allowed_entities.as_deref(),
            ),
        })
    }
}

/// The in-process session slot. One login per running instance.
#[derive(Debug, Default)]
pub struct Session {
    current: RwLock<Option<Actor>>,
}

impl Session {
    pub fn set(&self, actor: Actor) {
        if let Ok(mut slot) = self.current.write() {
            *slot = Some(actor);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.current.write() {
            *slot = None;
        }
    }

    pub fn current(&self) -> Option<Actor> {
        self.current.read().ok().and_then(|slot| slot.clone())
    }
}

#[derive(Clone)]
pub struct AuthService {
    pool: DbPool,
}

impl AuthService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Verifies credentials against the users table. Inactive accounts and
    /// unknown usernames report the same error so the dialog cannot be used
    /// to probe for accounts.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Actor> {
        let mut conn = self.pool.get()?;

        let user: Option<User> = users::table
            .filter(users::username.eq(username))
            .first(&mut conn)
            .optional()?;

        let Some(user) = user else {
            return Err(RegisterError::validation("invalid username or password"));
        };
        if !user.is_active {
            return Err(RegisterError::validation("invalid username or password"));
        }
        if !password::verify_password(password, &user.password_hash)? {
            return Err(RegisterError::validation("invalid username or password"));
        }

        with_busy_retry(|| {
            diesel::update(users::table.find(&user.user_id))
                .set(users::last_login.eq(Utc::now().naive_utc()))
                .execute(&mut conn)?;
            Ok(())
        })?;

        tracing::info!(username = %user.username, "user authenticated");
        Actor::from_user(&user)
    }

    /// Bootstraps the very first admin account. Refuses once any user exists.
    pub fn create_first_admin(
        &self,
        username: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Actor> {
        validate_credentials(username, password)?;
        let mut conn = self.pool.get()?;

        let count: i64 = users::table.count().get_result(&mut conn)?;
        if count > 0 {
            return Err(RegisterError::validation(
                "initial admin can only be created on an empty register",
            ));
        }

        let new_user = NewUser {
            user_id: uuid::Uuid::new_v4().to_string(),
            username: username.trim().to_string(),
            password_hash: password::hash_password(password)?,
            full_name: full_name.trim().to_string(),
            role: UserRole::Admin.as_str().to_string(),
            is_active: true,
            allowed_categories: None,
            allowed_entities: None,
            created_at: Utc::now().naive_utc(),
            created_by: None,
        };

        with_busy_retry(|| {
            diesel::insert_into(users::table)
                .values(&new_user)
                .execute(&mut conn)?;
            Ok(())
        })?;

        tracing::info!(username = %new_user.username, "created initial admin");
        self.authenticate(username, password)
    }

    /// Lets a user change their own password after proving the current one.
    pub fn change_password(&self, actor: &Actor, current: &str, new: &str) -> Result<()> {
        if new.len() < MIN_PASSWORD_LENGTH {
            return Err(RegisterError::validation(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        let mut conn = self.pool.get()?;

        let user: User = users::table.find(&actor.user_id).first(&mut conn)?;
        if !password::verify_password(current, &user.password_hash)? {
            return Err(RegisterError::validation("current password is incorrect"));
        }

        let hash = password::hash_password(new)?;
        with_busy_retry(|| {
            diesel::update(users::table.find(&actor.user_id))
                .set(users::password_hash.eq(&hash))
                .execute(&mut conn)?;
            Ok(())
        })?;
        Ok(())
    }
}

fn validate_credentials(username: &str, password: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(RegisterError::validation("username is required"));
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(RegisterError::validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_splits_and_trims_segments() {
        let scope = Scope::from_columns(Some("AML; HR ;"), Some(""));
        assert!(scope.categories.contains("AML"));
        assert!(scope.categories.contains("HR"));
        assert_eq!(scope.categories.len(), 2);
        assert!(scope.entities.is_empty());
    }

    #[test]
    fn scope_matches_any_applicable_entity() {
        let scope = Scope::from_columns(None, Some("FundCo"));
        assert!(scope.allows("OPS", Some("HoldCo;FundCo")));
        assert!(!scope.allows("OPS", Some("HoldCo")));
        assert!(!scope.allows("OPS", None));
    }

    #[test]
    fn empty_scope_allows_nothing() {
        let scope = Scope::default();
        assert!(scope.is_empty());
        assert!(!scope.allows("AML", Some("HoldCo")));
    }

    #[test]
    fn scope_round_trips_through_columns() {
        let scope = Scope::from_columns(Some("AML;HR"), Some("FundCo"));
        let (cats, ents) = scope.to_columns();
        assert_eq!(cats.as_deref(), Some("AML;HR"));
        assert_eq!(ents.as_deref(), Some("FundCo"));
        assert_eq!(Scope::from_columns(cats.as_deref(), ents.as_deref()), scope);
    }
}
