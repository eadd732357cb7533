use colored::Colorize;
use zeroize::Zeroize;

use crate::auth::{self, Session};
use crate::error::{PercError, Result};
use crate::settings::{load_settings, save_settings};

fn remember(session: &Session) -> Result<()> {
    let mut settings = load_settings();
    settings.session_token = Some(session.token.clone());
    save_settings(&settings)
}

fn print_session(session: &Session, json: bool) -> Result<()> {
    if json {
        return super::print_json(session);
    }
    println!(
        "Logged in as {} ({}) until {}",
        session.subject.bold(),
        session.role.as_str(),
        session.expires_at
    );
    Ok(())
}

pub fn add_admin(username: &str, name: Option<&str>, email: Option<&str>, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    // the first admin bootstraps the system
    if auth::admin_count(&conn)? > 0 {
        super::require_admin(&conn)?;
    }
    let mut password = super::read_new_password()?;
    let created = auth::create_admin(&conn, username, name.unwrap_or(username), email.unwrap_or(""), &password);
    password.zeroize();
    let admin = created?;

    if json {
        return super::print_json(&admin);
    }
    println!("Added admin: {}", admin.username);
    Ok(())
}

pub fn login_admin(username: &str, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let hours = load_settings().session_hours;
    let mut password = super::read_password("Password: ")?;
    let session = auth::admin_login(&conn, username, &password, hours);
    password.zeroize();
    let session = session?;
    remember(&session)?;
    print_session(&session, json)
}

pub fn login_agent(matricule: &str, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let hours = load_settings().session_hours;
    let mut password = super::read_password("Password: ")?;
    let session = auth::agent_login(&conn, matricule, &password, hours);
    password.zeroize();
    let session = session?;
    remember(&session)?;
    print_session(&session, json)
}

pub fn logout(json: bool) -> Result<()> {
    let mut settings = load_settings();
    let Some(token) = settings.session_token.take() else {
        return Err(PercError::NotLoggedIn);
    };
    let conn = super::open_db()?;
    auth::logout(&conn, &token)?;
    save_settings(&settings)?;
    if json {
        return super::print_json(&serde_json::json!({ "logged_out": true }));
    }
    println!("Logged out.");
    Ok(())
}

pub fn whoami(json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let settings = load_settings();
    let token = settings.session_token.as_deref().ok_or(PercError::NotLoggedIn)?;
    let session = auth::verify_token(&conn, token)?;
    print_session(&session, json)
}

pub fn set_password(json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let session = super::require_agent(&conn)?;
    let mut password = super::read_new_password()?;
    let result = auth::set_agent_password(&conn, &session.subject, &password);
    password.zeroize();
    result?;

    if json {
        return super::print_json(&serde_json::json!({ "password_set": true }));
    }
    println!("Password updated for {}.", session.subject);
    Ok(())
}
