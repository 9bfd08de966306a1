//! Credential verification
//!
//! Argon2id password hashes persisted in SQLite. A missing username and a
//! wrong password take the same path: both run a full hash verification
//! (against a throwaway hash for unknown users) and both return `false`.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Password store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("password store: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("password store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("user {0} already exists")]
    Exists(String),

    #[error("user {0} not found")]
    NotFound(String),

    #[error("{0} is empty")]
    EmptyField(&'static str),
}

/// Checks a username/password pair
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// `true` only when `username` exists and `password` matches its stored hash
    async fn verify(&self, username: &str, password: &str) -> bool;
}

/// SQLite-backed password store
#[derive(Clone)]
pub struct PasswordStore {
    conn: Arc<Mutex<Connection>>,
    /// Verified against when the username is unknown
    decoy_hash: Arc<str>,
}

impl PasswordStore {
    /// Open or create the password database
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        info!("Password store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory store (tests, first-run tooling)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password TEXT NOT NULL
            );
            "#,
        )?;

        let decoy = Self::hash_password("decoy-password-never-matches")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            decoy_hash: Arc::from(decoy),
        })
    }

    /// Hash a password using Argon2id
    pub fn hash_password(password: &str) -> Result<String, StoreError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| StoreError::Hash(e.to_string()))
    }

    fn verify_password(password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                warn!("Stored password hash is malformed: {}", e);
                false
            }
        }
    }

    fn stored_hash(&self, username: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let hash = conn
            .query_row(
                "SELECT password FROM users WHERE username = ?1",
                params![username],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Blocking credential check
    pub fn check(&self, username: &str, password: &str) -> bool {
        let stored = match self.stored_hash(username) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Credential lookup failed: {}", e);
                None
            }
        };
        let hash = stored.as_deref().unwrap_or(self.decoy_hash.as_ref());
        let matched = Self::verify_password(password, hash);
        matched && stored.is_some()
    }

    /// All usernames, sorted
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT username FROM users ORDER BY username")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Add a user
    pub fn create(&self, username: &str, password: &str) -> Result<(), StoreError> {
        validate(username, password)?;
        let hash = Self::hash_password(password)?;

        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (username, password) VALUES (?1, ?2)",
            params![username, hash],
        )?;
        if inserted == 0 {
            return Err(StoreError::Exists(username.to_string()));
        }
        Ok(())
    }

    /// Replace a user's password
    pub fn update(&self, username: &str, password: &str) -> Result<(), StoreError> {
        validate(username, password)?;
        let hash = Self::hash_password(password)?;

        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET password = ?2 WHERE username = ?1",
            params![username, hash],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(username.to_string()));
        }
        Ok(())
    }

    /// Remove a user
    pub fn delete(&self, username: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM users WHERE username = ?1", params![username])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(username.to_string()));
        }
        Ok(())
    }
}

fn validate(username: &str, password: &str) -> Result<(), StoreError> {
    if username.trim().is_empty() {
        return Err(StoreError::EmptyField("username"));
    }
    if password.is_empty() {
        return Err(StoreError::EmptyField("password"));
    }
    Ok(())
}

#[async_trait]
impl CredentialVerifier for PasswordStore {
    async fn verify(&self, username: &str, password: &str) -> bool {
        let store = self.clone();
        let username = username.to_string();
        let password = Zeroizing::new(password.to_string());

        tokio::task::spawn_blocking(move || store.check(&username, &password))
            .await
            .unwrap_or(false)
    }
}
