//! Account bootstrap and password primitives.
//!
//! First-time setup runs exactly once, gated by both an empty users table
//! and the absence of a sentinel file; an empty table with the sentinel
//! present means someone tampered with the accounts database, and the
//! server refuses to mint a fresh admin over it.

use crate::error::AuthError;
use crate::storage::UserStore;
use argon2::password_hash::rand_core::OsRng as HashOsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;
use rand::rngs::OsRng;
use std::path::Path;
use tracing::info;

/// Session lifetime: two hours, no refresh.
pub const SESSION_DURATION_SECS: i64 = 2 * 60 * 60;

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "logcrunch_session";

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

const BOOTSTRAP_PASSWORD_LEN: usize = 32;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Hash a password for storage.
///
/// # Errors
///
/// Returns [`AuthError::Hash`] if the hasher fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut HashOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Verify a password against a stored hash. Comparison inside the verifier
/// is constant-time; an unparseable stored hash simply fails verification.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Random 32-character alphanumeric password for the bootstrap admin.
#[must_use]
pub fn generate_bootstrap_password() -> String {
    let mut bytes = [0u8; BOOTSTRAP_PASSWORD_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| char::from(CHARSET[usize::from(*b) % CHARSET.len()]))
        .collect()
}

/// Create the initial `admin` account when this is genuinely a first run.
///
/// The generated password is printed once to the operator console and never
/// stored anywhere else; the account is flagged for an immediate password
/// change.
///
/// # Errors
///
/// Returns [`AuthError::SetupTampering`] when the users table is empty but
/// the sentinel already exists, and [`AuthError`] variants for database or
/// sentinel I/O failures.
pub async fn first_time_setup(store: &UserStore, sentinel: &Path) -> Result<(), AuthError> {
    let user_count = store.user_count().await?;
    let sentinel_exists = sentinel.exists();

    if user_count > 0 {
        return Ok(());
    }
    if sentinel_exists {
        return Err(AuthError::SetupTampering);
    }

    let password = generate_bootstrap_password();
    let hash = hash_password(&password)?;
    store.create_user("admin", &hash, true).await?;

    if let Some(parent) = sentinel.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(sentinel, b"").await?;

    info!("first-time setup complete; bootstrap credentials printed to console");
    println!("SETUP: user {{admin}} created with password {{{password}}}. UPDATE THIS IMMEDIATELY!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_verify_round_tripped_password() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_should_generate_32_char_alnum_bootstrap_password() {
        let password = generate_bootstrap_password();
        assert_eq!(password.len(), 32);
        assert!(password.bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(password, generate_bootstrap_password());
    }

    #[tokio::test]
    async fn test_should_create_admin_and_sentinel_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(&dir.path().join("accounts.db"))
            .await
            .unwrap();
        let sentinel = dir.path().join(".setupCompleted");

        first_time_setup(&store, &sentinel).await.unwrap();

        assert!(sentinel.exists());
        let admin = store.get_user_by_username("admin").await.unwrap().unwrap();
        assert!(admin.requires_password_change);
        assert!(admin.can_create_users);

        // Second run is a no-op: users exist.
        first_time_setup(&store, &sentinel).await.unwrap();
        assert_eq!(store.user_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_should_refuse_setup_when_sentinel_exists_over_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::open(&dir.path().join("accounts.db"))
            .await
            .unwrap();
        let sentinel = dir.path().join(".setupCompleted");
        std::fs::write(&sentinel, b"").unwrap();

        let err = first_time_setup(&store, &sentinel).await.unwrap_err();
        assert!(matches!(err, AuthError::SetupTampering));
        assert_eq!(store.user_count().await.unwrap(), 0);
    }
}
