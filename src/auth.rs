use chrono::{Duration, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::db;
use crate::error::{PercError, Result};
use crate::models::Role;

/// bcrypt work factor for admin and agent passwords.
pub const HASH_COST: u32 = 10;

// ---------------------------------------------------------------------------
// Credential hashing
// ---------------------------------------------------------------------------

/// Salted bcrypt hash in the standard `$2b$<cost>$...` encoding.
pub fn hash_secret(secret: &str) -> Result<String> {
    Ok(bcrypt::hash(secret, HASH_COST)?)
}

/// Malformed hashes never verify.
pub fn verify_secret(secret: &str, encoded: &str) -> bool {
    bcrypt::verify(secret, encoded).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub token: String,
    /// Admin username or participant matricule.
    pub subject: String,
    pub role: Role,
    pub expires_at: String,
}

fn new_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()
}

pub fn create_session_at(
    conn: &Connection,
    subject: &str,
    role: Role,
    now: NaiveDateTime,
    hours: i64,
) -> Result<Session> {
    let token = new_token();
    let expires_at = db::timestamp(now + Duration::hours(hours));
    conn.execute(
        "INSERT INTO sessions (token, subject, user_type, expires_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![token, subject, role.as_str(), expires_at],
    )?;
    log::info!("{} session opened for {subject}", role.as_str());
    Ok(Session {
        token,
        subject: subject.to_string(),
        role,
        expires_at,
    })
}

pub fn create_session(conn: &Connection, subject: &str, role: Role, hours: i64) -> Result<Session> {
    create_session_at(conn, subject, role, db::now(), hours)
}

/// Resolve a bearer token. Unknown and expired tokens are the same error.
pub fn verify_token_at(conn: &Connection, token: &str, now: NaiveDateTime) -> Result<Session> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT subject, user_type, expires_at FROM sessions WHERE token = ?1",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let (subject, user_type, expires_at) = row.ok_or(PercError::InvalidSession)?;
    let role = Role::parse(&user_type).ok_or(PercError::InvalidSession)?;
    match parse_timestamp(&expires_at) {
        Some(expiry) if expiry > now => Ok(Session {
            token: token.to_string(),
            subject,
            role,
            expires_at,
        }),
        _ => Err(PercError::InvalidSession),
    }
}

pub fn verify_token(conn: &Connection, token: &str) -> Result<Session> {
    verify_token_at(conn, token, db::now())
}

/// The session behind `token`, provided it carries `role`.
pub fn require_role(conn: &Connection, token: Option<&str>, role: Role) -> Result<Session> {
    let token = token.ok_or(PercError::NotLoggedIn)?;
    let session = verify_token(conn, token)?;
    if session.role != role {
        return Err(PercError::Forbidden(format!("{} access required", role.as_str())));
    }
    Ok(session)
}

pub fn logout(conn: &Connection, token: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
    Ok(deleted > 0)
}

// ---------------------------------------------------------------------------
// Admins
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Admin {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
}

pub fn admin_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT count(*) FROM admins", [], |r| r.get(0))?)
}

pub fn create_admin(
    conn: &Connection,
    username: &str,
    full_name: &str,
    email: &str,
    password: &str,
) -> Result<Admin> {
    let username = username.trim();
    if username.is_empty() {
        return Err(PercError::Other("username cannot be empty".to_string()));
    }
    if password.is_empty() {
        return Err(PercError::Other("password cannot be empty".to_string()));
    }
    let taken: bool = conn
        .prepare("SELECT 1 FROM admins WHERE username = ?1")?
        .exists([username])?;
    if taken {
        return Err(PercError::Other(format!("admin \"{username}\" already exists")));
    }
    conn.execute(
        "INSERT INTO admins (username, full_name, email, role, password_hash) VALUES (?1, ?2, ?3, 'admin', ?4)",
        rusqlite::params![username, full_name, email, hash_secret(password)?],
    )?;
    log::info!("admin {username} created");
    Ok(Admin {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        full_name: full_name.to_string(),
        email: email.to_string(),
        role: Role::Admin.as_str().to_string(),
        is_active: true,
    })
}

pub fn admin_login(conn: &Connection, username: &str, password: &str, hours: i64) -> Result<Session> {
    let row: Option<(String, bool)> = conn
        .query_row(
            "SELECT password_hash, is_active FROM admins WHERE username = ?1",
            [username],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    match row {
        Some((hash, true)) if verify_secret(password, &hash) => {
            create_session(conn, username, Role::Admin, hours)
        }
        _ => {
            log::warn!("failed admin login for {username}");
            Err(PercError::InvalidCredentials)
        }
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

pub fn agent_login(conn: &Connection, matricule: &str, password: &str, hours: i64) -> Result<Session> {
    let row: Option<Option<String>> = conn
        .query_row(
            "SELECT password_hash FROM participants WHERE matricule = ?1",
            [matricule],
            |r| r.get(0),
        )
        .optional()?;
    match row {
        None => {
            log::warn!("failed agent login for {matricule}");
            Err(PercError::InvalidCredentials)
        }
        Some(None) => Err(PercError::PasswordNotSet(matricule.to_string())),
        Some(Some(hash)) if verify_secret(password, &hash) => {
            create_session(conn, matricule, Role::Agent, hours)
        }
        Some(Some(_)) => {
            log::warn!("failed agent login for {matricule}");
            Err(PercError::InvalidCredentials)
        }
    }
}

pub fn set_agent_password(conn: &Connection, matricule: &str, password: &str) -> Result<()> {
    if password.chars().count() < 6 {
        return Err(PercError::Other("password must be at least 6 characters".to_string()));
    }
    let updated = conn.execute(
        "UPDATE participants SET password_hash = ?1, password_set = 1, first_login_done = 1, \
         updated_at = datetime('now') WHERE matricule = ?2",
        rusqlite::params![hash_secret(password)?, matricule],
    )?;
    if updated == 0 {
        return Err(PercError::UnknownParticipant(matricule.to_string()));
    }
    Ok(())
}
