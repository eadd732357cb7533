use crate::auth::create_session;
use crate::error::Result;
use crate::models::Role;
use crate::otp::{self, LogNotifier};
use crate::settings::{load_settings, save_settings};

pub fn request(matricule: &str, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    let issued = otp::request_otp(&conn, matricule, &LogNotifier)?;
    if json {
        return super::print_json(&issued);
    }
    println!(
        "Code sent to {} (valid until {}).",
        issued.masked_phone, issued.expires_at
    );
    Ok(())
}

pub fn verify(matricule: &str, code: &str, json: bool) -> Result<()> {
    let conn = super::open_db()?;
    otp::verify_otp(&conn, matricule, code)?;

    let mut settings = load_settings();
    let session = create_session(&conn, matricule, Role::Agent, settings.session_hours)?;
    settings.session_token = Some(session.token.clone());
    save_settings(&settings)?;

    if json {
        return super::print_json(&session);
    }
    println!("Verified. Logged in as {matricule} until {}.", session.expires_at);
    println!("Run `perc password` to set a password for next time.");
    Ok(())
}
