use rusqlite::{params, ErrorCode, OptionalExtension};

use crate::auth::AuthError;
use crate::config::AdminConfig;
use crate::db::models::{User, USER_COLUMNS};
use crate::parking::domain::Role;
use crate::state::DbPool;

const MAX_USERNAME_LEN: usize = 80;

/// Create an account with a bcrypt-hashed password.
pub fn register(
    pool: &DbPool,
    username: &str,
    password: &str,
    role: Role,
    bcrypt_cost: u32,
) -> Result<User, AuthError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AuthError::InvalidInput("Username cannot be empty".into()));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(AuthError::InvalidInput(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidInput("Password cannot be empty".into()));
    }

    let conn = pool.get()?;
    let taken: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )?;
    if taken {
        return Err(AuthError::UsernameTaken);
    }

    let password_hash = bcrypt::hash(password, bcrypt_cost)?;

    let inserted = conn.execute(
        "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
        params![username, password_hash, role.as_str()],
    );
    match inserted {
        Ok(_) => {}
        // lost a race with a concurrent registration
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(AuthError::UsernameTaken);
        }
        Err(e) => return Err(e.into()),
    }

    let user = conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![conn.last_insert_rowid()],
        User::from_row,
    )?;

    tracing::info!(user_id = %user.id, role = %user.role, "User registered");
    Ok(user)
}

/// Check a username/password pair. `None` when either is wrong.
pub fn verify_credentials(
    pool: &DbPool,
    username: &str,
    password: &str,
) -> Result<Option<User>, AuthError> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
            params![username.trim()],
            User::from_row,
        )
        .optional()?;

    let Some(user) = user else {
        return Ok(None);
    };

    if bcrypt::verify(password, &user.password_hash)? {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// Seed the configured administrator when no admin account exists yet.
///
/// Returns the created account, or `None` if an admin was already present.
pub fn ensure_admin(
    pool: &DbPool,
    admin: &AdminConfig,
    bcrypt_cost: u32,
) -> Result<Option<User>, AuthError> {
    let has_admin: bool = {
        let conn = pool.get()?;
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE role = ?1",
            params![Role::Admin.as_str()],
            |row| row.get(0),
        )?
    };
    if has_admin {
        return Ok(None);
    }

    let user = register(pool, &admin.username, &admin.password, Role::Admin, bcrypt_cost)?;
    tracing::warn!(
        username = %user.username,
        "Created default admin account; change its password"
    );
    Ok(Some(user))
}
