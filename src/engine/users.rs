//! Staff and guest accounts. Passwords are stored as Argon2id PHC strings.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::reservations::validate_phone;
use super::{Engine, EngineError};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub id: Ulid,
    pub username: Option<String>,
    pub password: Option<String>,
    pub role: Option<UserRole>,
    pub phone: Option<String>,
}

pub(crate) fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// `Ok(false)` on mismatch; `Err` only for a malformed stored hash.
pub(crate) fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Argon2 is deliberately slow; keep it off the async workers.
async fn hash_blocking(password: String) -> Result<String, EngineError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| EngineError::Validation(format!("password hashing aborted: {e}")))?
        .map_err(|e| EngineError::Validation(format!("password hashing failed: {e}")))
}

impl Engine {
    pub async fn create_user(&self, new: NewUser) -> Result<UserInfo, EngineError> {
        let username = new.username.map(|u| u.trim().to_string()).unwrap_or_default();
        if username.is_empty() {
            return Err(EngineError::Validation("username is required".into()));
        }
        if username.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("username too long"));
        }
        let password = new.password.unwrap_or_default();
        if password.len() < MIN_PASSWORD_LEN {
            return Err(EngineError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters long"
            )));
        }
        let phone = new
            .phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if let Some(p) = &phone {
            validate_phone(p)?;
        }

        let password_hash = hash_blocking(password).await?;

        let _catalog = self.catalog_lock.lock().await;
        if self.users.len() >= MAX_CATALOG_ENTRIES {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        for existing in self.users.iter() {
            if existing.id == new.id {
                return Err(EngineError::Conflict(format!("user {} already exists", new.id)));
            }
            if existing.username == username {
                return Err(EngineError::Conflict(format!("username {username} is taken")));
            }
            if phone.is_some() && existing.phone == phone {
                return Err(EngineError::Conflict("phone number already registered".into()));
            }
        }

        let user = User {
            id: new.id,
            username,
            password_hash,
            role: new.role.unwrap_or(UserRole::Guest),
            phone,
        };
        self.persist_catalog(Event::UserCreated { user: user.clone() })
            .await?;
        info!(user = %user.id, role = user.role.as_str(), "user created");
        Ok(UserInfo::from(&user))
    }

    /// Check credentials. Unknown user and wrong password are indistinguishable.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserInfo, EngineError> {
        let Some(user) = self
            .users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.value().clone())
        else {
            return Err(EngineError::Unauthorized);
        };

        let candidate = password.to_string();
        let stored = user.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || verify_password(&candidate, &stored))
            .await
            .map_err(|_| EngineError::Unauthorized)?;
        match verified {
            Ok(true) => Ok(UserInfo::from(&user)),
            Ok(false) => Err(EngineError::Unauthorized),
            Err(e) => {
                warn!(user = %user.id, "stored password hash is unreadable: {e}");
                Err(EngineError::Unauthorized)
            }
        }
    }

    /// Users sorted by username. Hashes never leave the engine.
    pub fn list_users(&self) -> Vec<UserInfo> {
        let mut users: Vec<UserInfo> = self.users.iter().map(|u| UserInfo::from(u.value())).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// Create an admin account on first start. Existing usernames are left alone.
    pub async fn ensure_admin(&self, username: &str, password: &str) -> Result<bool, EngineError> {
        if self.users.iter().any(|u| u.username == username) {
            return Ok(false);
        }
        self.create_user(NewUser {
            id: Ulid::new(),
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            role: Some(UserRole::Admin),
            phone: None,
        })
        .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("front-desk-2024").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("front-desk-2024", &hash).unwrap());
        assert!(!verify_password("front-desk-2025", &hash).unwrap());
    }

    #[test]
    fn salts_differ() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("x", "not-a-phc-string").is_err());
    }
}
