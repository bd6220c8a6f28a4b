//! Users and sessions: the state behind the web read path's gate.
//!
//! Sessions are IP-bound rows with a 256-bit random identifier; a session
//! is honoured only while unexpired and presented from the IP it was
//! created for.

use crate::domain_types::SessionId;
use crate::error::AuthError;
use crate::record::now_unix;
use rand::RngCore;
use rand::rngs::OsRng;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

static USERS_MIGRATOR: Migrator = sqlx::migrate!("migrations/users");

/// A user account row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub can_create_users: bool,
    pub created_at: i64,
    pub last_login: Option<i64>,
    pub last_seen_ip: Option<String>,
    pub is_active: bool,
    pub requires_password_change: bool,
}

/// An active session row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub user_id: i64,
    pub created_at: i64,
    pub expires_at: i64,
    pub ip_address: String,
}

/// Create a cryptographically random session identifier: 32 bytes of OS
/// entropy, hex-encoded to 64 characters.
#[must_use]
pub fn generate_session_id() -> SessionId {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    SessionId::try_new(hex::encode(bytes)).expect("32 random bytes always hex-encode to 64 chars")
}

fn decode_user(row: &SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        can_create_users: row.try_get("can_create_users")?,
        created_at: row.try_get("created_at")?,
        last_login: row.try_get("last_login")?,
        last_seen_ip: row.try_get("last_seen_ip")?,
        is_active: row.try_get("is_active")?,
        requires_password_change: row.try_get("requires_password_change")?,
    })
}

const SELECT_USER: &str = "
SELECT id, username, password_hash, can_create_users, created_at,
       last_login, last_seen_ip, is_active, requires_password_change
FROM users
";

/// Handle over the users database. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    /// Open (creating if needed) the users database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on open or migration failure. Fatal at startup.
    pub async fn open(path: &Path) -> Result<Self, AuthError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        USERS_MIGRATOR.run(&pool).await?;
        info!(path = %path.display(), "users database ready");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Total number of user rows.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn user_count(&self) -> Result<i64, AuthError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Insert a new user. New accounts start with a forced password change.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure (including a duplicate
    /// username).
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        can_create_users: bool,
    ) -> Result<i64, AuthError> {
        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, can_create_users, requires_password_change) \
             VALUES (?, ?, ?, 1)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(can_create_users)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query(&format!("{SELECT_USER} WHERE username = ?"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_user).transpose().map_err(Into::into)
    }

    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, AuthError> {
        let row = sqlx::query(&format!("{SELECT_USER} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_user).transpose().map_err(Into::into)
    }

    /// Replace the password hash and clear the forced-change flag.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure or when the user does not
    /// exist.
    pub async fn update_password(&self, user_id: i64, new_hash: &str) -> Result<(), AuthError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = ?, requires_password_change = 0 WHERE id = ?",
        )
        .bind(new_hash)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn update_last_login(&self, user_id: i64, ip: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET last_login = ?, last_seen_ip = ? WHERE id = ?")
            .bind(now_unix())
            .bind(ip)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Enable or disable an account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure or when the user does not
    /// exist.
    pub async fn set_user_active(&self, user_id: i64, is_active: bool) -> Result<(), AuthError> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AuthError::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }

    /// Create a session bound to `ip` for `duration_secs` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn create_session(
        &self,
        user_id: i64,
        ip: &str,
        duration_secs: i64,
    ) -> Result<Session, AuthError> {
        let session = Session {
            id: generate_session_id(),
            user_id,
            created_at: now_unix(),
            expires_at: now_unix() + duration_secs,
            ip_address: ip.to_string(),
        };
        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, expires_at, ip_address) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.user_id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(&session.ip_address)
        .execute(&self.pool)
        .await?;
        Ok(session)
    }

    /// Fetch an unexpired session by id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        let row = sqlx::query(
            "SELECT id, user_id, created_at, expires_at, ip_address \
             FROM sessions WHERE id = ? AND expires_at > ?",
        )
        .bind(session_id)
        .bind(now_unix())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id")?;
        let Ok(id) = SessionId::try_new(id) else {
            // A malformed id in the table is treated as absent.
            return Ok(None);
        };
        Ok(Some(Session {
            id,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            ip_address: row.try_get("ip_address")?,
        }))
    }

    /// A session is valid only when unexpired AND presented from the IP it
    /// was bound to.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn validate_session(
        &self,
        session_id: &str,
        ip: &str,
    ) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        if session.ip_address != ip {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Remove one session (logout).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every session a user holds (force logout everywhere).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn delete_all_user_sessions(&self, user_id: i64) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop expired session rows, returning how many went away.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] on database failure.
    pub async fn clean_expired_sessions(&self) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(now_unix())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
