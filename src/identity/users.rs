//! User directory: registration, authentication and profiles

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use super::password::{Argon2Hasher, validate_password};
use crate::types::{User, UserId};
use crate::{Error, Result};

/// Maximum username and name length
pub const MAX_NAME_LENGTH: usize = 150;

/// Input for creating an account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Must repeat `password`
    pub password_confirm: String,
    pub first_name: String,
    pub last_name: String,
}

impl Registration {
    /// Registration with a matching confirmation
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        let password = password.into();
        Self {
            username: username.into(),
            email: email.into(),
            password_confirm: password.clone(),
            password,
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

/// Partial profile update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

struct UserRecord {
    user: User,
    password_hash: String,
}

#[derive(Default)]
struct UserTable {
    users: BTreeMap<UserId, UserRecord>,
    by_username: HashMap<String, UserId>,
    /// Lowercased email -> user
    by_email: HashMap<String, UserId>,
}

/// In-process identity store
pub struct UserDirectory {
    hasher: Argon2Hasher,
    table: RwLock<UserTable>,
    next_id: AtomicU64,
}

impl UserDirectory {
    pub fn new(hasher: Argon2Hasher) -> Self {
        Self {
            hasher,
            table: RwLock::new(UserTable::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a regular account
    pub fn register(&self, registration: Registration) -> Result<User> {
        self.insert(registration, false)
    }

    /// Create an account with the admin flag set
    pub fn register_admin(&self, registration: Registration) -> Result<User> {
        self.insert(registration, true)
    }

    fn insert(&self, registration: Registration, is_admin: bool) -> Result<User> {
        let username = registration.username.trim().to_string();
        let email = registration.email.trim().to_string();

        validate_username(&username)?;
        validate_email(&email)?;
        validate_name("first_name", &registration.first_name)?;
        validate_name("last_name", &registration.last_name)?;

        if registration.password != registration.password_confirm {
            return Err(Error::validation("password", "Password fields didn't match."));
        }
        validate_password(&registration.password, &username, &email)?;

        // Hash before taking the write lock; Argon2 is deliberately slow
        let password_hash = self.hasher.hash(&registration.password)?;

        let mut table = self
            .table
            .write()
            .map_err(|_| Error::internal("User directory write error"))?;

        if table.by_username.contains_key(&username) {
            return Err(Error::validation(
                "username",
                "A user with that username already exists.",
            ));
        }
        let email_key = email.to_lowercase();
        if table.by_email.contains_key(&email_key) {
            return Err(Error::validation("email", "This field must be unique."));
        }

        let user = User {
            id: UserId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            username: username.clone(),
            email,
            first_name: registration.first_name.trim().to_string(),
            last_name: registration.last_name.trim().to_string(),
            is_admin,
            date_joined: Utc::now(),
        };

        table.by_username.insert(username, user.id);
        table.by_email.insert(email_key, user.id);
        table.users.insert(
            user.id,
            UserRecord {
                user: user.clone(),
                password_hash,
            },
        );

        tracing::info!(user_id = %user.id, username = %user.username, is_admin, "user registered");
        Ok(user)
    }

    /// Check credentials; unknown users and wrong passwords fail identically
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let record = {
            let table = self
                .table
                .read()
                .map_err(|_| Error::internal("User directory read error"))?;

            table
                .by_username
                .get(username.trim())
                .and_then(|id| table.users.get(id))
                .map(|record| (record.user.clone(), record.password_hash.clone()))
        };

        let Some((user, password_hash)) = record else {
            // Spend comparable time on unknown usernames
            let _ = self.hasher.hash(password);
            return Err(Error::unauthorized("No active account found with the given credentials"));
        };

        if self.hasher.verify(password, &password_hash)? {
            Ok(user)
        } else {
            tracing::warn!(username = %user.username, "failed login attempt");
            Err(Error::unauthorized("No active account found with the given credentials"))
        }
    }

    /// Replace a password after verifying the current one
    pub fn change_password(&self, user_id: UserId, old_password: &str, new_password: &str) -> Result<()> {
        let (user, current_hash) = {
            let table = self
                .table
                .read()
                .map_err(|_| Error::internal("User directory read error"))?;
            let record = table
                .users
                .get(&user_id)
                .ok_or_else(|| Error::not_found("User", user_id))?;
            (record.user.clone(), record.password_hash.clone())
        };

        if !self.hasher.verify(old_password, &current_hash)? {
            return Err(Error::validation("old_password", "Old password is incorrect."));
        }
        validate_password(new_password, &user.username, &user.email)?;

        let new_hash = self.hasher.hash(new_password)?;

        let mut table = self
            .table
            .write()
            .map_err(|_| Error::internal("User directory write error"))?;
        let record = table
            .users
            .get_mut(&user_id)
            .ok_or_else(|| Error::not_found("User", user_id))?;
        record.password_hash = new_hash;

        tracing::info!(user_id = %user_id, "password changed");
        Ok(())
    }

    /// Apply a partial profile update
    pub fn update_profile(&self, user_id: UserId, update: ProfileUpdate) -> Result<User> {
        if let Some(email) = &update.email {
            validate_email(email.trim())?;
        }
        if let Some(first_name) = &update.first_name {
            validate_name("first_name", first_name)?;
        }
        if let Some(last_name) = &update.last_name {
            validate_name("last_name", last_name)?;
        }

        let mut table = self
            .table
            .write()
            .map_err(|_| Error::internal("User directory write error"))?;

        let current_email = table
            .users
            .get(&user_id)
            .map(|record| record.user.email.to_lowercase())
            .ok_or_else(|| Error::not_found("User", user_id))?;

        if let Some(email) = &update.email {
            let email_key = email.trim().to_lowercase();
            if email_key != current_email {
                if table.by_email.contains_key(&email_key) {
                    return Err(Error::validation("email", "This field must be unique."));
                }
                table.by_email.remove(&current_email);
                table.by_email.insert(email_key, user_id);
            }
        }

        let record = table
            .users
            .get_mut(&user_id)
            .ok_or_else(|| Error::not_found("User", user_id))?;
        if let Some(email) = update.email {
            record.user.email = email.trim().to_string();
        }
        if let Some(first_name) = update.first_name {
            record.user.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = update.last_name {
            record.user.last_name = last_name.trim().to_string();
        }

        Ok(record.user.clone())
    }

    /// Grant or withdraw the admin flag
    pub fn set_admin(&self, user_id: UserId, is_admin: bool) -> Result<User> {
        let mut table = self
            .table
            .write()
            .map_err(|_| Error::internal("User directory write error"))?;
        let record = table
            .users
            .get_mut(&user_id)
            .ok_or_else(|| Error::not_found("User", user_id))?;
        record.user.is_admin = is_admin;

        tracing::info!(user_id = %user_id, is_admin, "admin flag updated");
        Ok(record.user.clone())
    }

    pub fn get(&self, user_id: UserId) -> Result<User> {
        let table = self
            .table
            .read()
            .map_err(|_| Error::internal("User directory read error"))?;
        table
            .users
            .get(&user_id)
            .map(|record| record.user.clone())
            .ok_or_else(|| Error::not_found("User", user_id))
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let table = self
            .table
            .read()
            .map_err(|_| Error::internal("User directory read error"))?;
        Ok(table
            .by_username
            .get(username)
            .and_then(|id| table.users.get(id))
            .map(|record| record.user.clone()))
    }

    /// All users, newest first; non-admin requesters get an empty list
    pub fn list_users(&self, requester: &User) -> Result<Vec<User>> {
        if !requester.is_admin {
            return Ok(Vec::new());
        }

        let table = self
            .table
            .read()
            .map_err(|_| Error::internal("User directory read error"))?;

        let mut users: Vec<User> = table.users.values().map(|record| record.user.clone()).collect();
        users.sort_by(|a, b| b.date_joined.cmp(&a.date_joined).then(b.id.cmp(&a.id)));
        Ok(users)
    }

    pub fn len(&self) -> Result<usize> {
        let table = self
            .table
            .read()
            .map_err(|_| Error::internal("User directory read error"))?;
        Ok(table.users.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(Error::validation("username", "This field may not be blank."));
    }
    if username.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            "username",
            format!("Ensure this field has no more than {MAX_NAME_LENGTH} characters."),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || "@.+-_".contains(c))
    {
        return Err(Error::validation(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    let invalid = || Error::validation("email", "Enter a valid email address.");

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid());
    }
    Ok(())
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(field, "This field may not be blank."));
    }
    if value.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            field,
            format!("Ensure this field has no more than {MAX_NAME_LENGTH} characters."),
        ));
    }
    Ok(())
}
