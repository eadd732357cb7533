use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::db;
use crate::error::{PercError, Result};

pub const CODE_TTL_MINUTES: i64 = 5;
pub const MAX_ATTEMPTS: i64 = 3;
/// Codes are deleted once they have been expired this long.
pub const PURGE_AFTER_HOURS: i64 = 24;

/// Delivery channel for one-time codes.
pub trait Notifier {
    fn send_code(&self, phone: &str, code: &str) -> Result<()>;
}

/// Writes the code to the log instead of sending it. Logged at `warn` so the
/// code shows under the default filter.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_code(&self, phone: &str, code: &str) -> Result<()> {
        log::warn!("OTP for {phone}: {code}");
        Ok(())
    }
}

pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

/// Keep the last two digits only.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().collect();
    if digits.len() <= 2 {
        return "*".repeat(digits.len());
    }
    let tail: String = digits[digits.len() - 2..].iter().collect();
    format!("{}{tail}", "*".repeat(digits.len() - 2))
}

#[derive(Debug, Clone, Serialize)]
pub struct OtpIssued {
    pub matricule: String,
    pub masked_phone: String,
    pub expires_at: String,
}

fn purge_stale(conn: &Connection, now: NaiveDateTime) -> Result<usize> {
    let cutoff = db::timestamp(now - Duration::hours(PURGE_AFTER_HOURS));
    Ok(conn.execute("DELETE FROM otp_codes WHERE expires_at < ?1", [cutoff])?)
}

pub fn request_otp_at(
    conn: &Connection,
    matricule: &str,
    notifier: &dyn Notifier,
    now: NaiveDateTime,
) -> Result<OtpIssued> {
    let phone: String = conn
        .query_row(
            "SELECT phone FROM participants WHERE matricule = ?1",
            [matricule],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| PercError::UnknownParticipant(matricule.to_string()))?;
    if phone.is_empty() {
        return Err(PercError::Other(format!("no phone number on file for {matricule}")));
    }

    let purged = purge_stale(conn, now)?;
    if purged > 0 {
        log::debug!("purged {purged} stale OTP codes");
    }

    let code = generate_code();
    let expires_at = db::timestamp(now + Duration::minutes(CODE_TTL_MINUTES));
    conn.execute(
        "INSERT INTO otp_codes (matricule, code, phone, created_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![matricule, code, phone, db::timestamp(now), expires_at],
    )?;
    notifier.send_code(&phone, &code)?;
    Ok(OtpIssued {
        matricule: matricule.to_string(),
        masked_phone: mask_phone(&phone),
        expires_at,
    })
}

pub fn request_otp(conn: &Connection, matricule: &str, notifier: &dyn Notifier) -> Result<OtpIssued> {
    request_otp_at(conn, matricule, notifier, db::now())
}

/// Check `code` against the newest unused code for `matricule`.
/// A mismatch burns one attempt on that code.
pub fn verify_otp_at(conn: &Connection, matricule: &str, code: &str, now: NaiveDateTime) -> Result<()> {
    let pending: Option<(i64, String, i64, String)> = conn
        .query_row(
            "SELECT id, code, attempts, expires_at FROM otp_codes \
             WHERE matricule = ?1 AND is_used = 0 ORDER BY id DESC LIMIT 1",
            [matricule],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((id, expected, attempts, expires_at)) = pending else {
        log::warn!("OTP verify for {matricule}: no pending code");
        return Err(PercError::OtpRejected);
    };
    if expires_at <= db::timestamp(now) {
        log::warn!("OTP verify for {matricule}: code expired");
        return Err(PercError::OtpRejected);
    }
    if attempts >= MAX_ATTEMPTS {
        log::warn!("OTP verify for {matricule}: too many attempts");
        return Err(PercError::OtpRejected);
    }
    if expected != code.trim() {
        conn.execute("UPDATE otp_codes SET attempts = attempts + 1 WHERE id = ?1", [id])?;
        log::warn!("OTP verify for {matricule}: wrong code (attempt {})", attempts + 1);
        return Err(PercError::OtpRejected);
    }
    conn.execute("UPDATE otp_codes SET is_used = 1 WHERE id = ?1", [id])?;
    Ok(())
}

pub fn verify_otp(conn: &Connection, matricule: &str, code: &str) -> Result<()> {
    verify_otp_at(conn, matricule, code, db::now())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::db::test_db;

    #[derive(Default)]
    struct Outbox(RefCell<Vec<(String, String)>>);

    impl Notifier for Outbox {
        fn send_code(&self, phone: &str, code: &str) -> Result<()> {
            self.0.borrow_mut().push((phone.to_string(), code.to_string()));
            Ok(())
        }
    }

    impl Outbox {
        fn last_code(&self) -> String {
            self.0.borrow().last().unwrap().1.clone()
        }
    }

    fn setup() -> (tempfile::TempDir, Connection) {
        let (dir, conn) = test_db();
        conn.execute(
            "INSERT INTO participants (matricule, name, phone) VALUES ('M1', 'Awa', '+221771234567')",
            [],
        )
        .unwrap();
        (dir, conn)
    }

    #[test]
    fn test_code_shape() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+221771234567"), "***********67");
        assert_eq!(mask_phone("7"), "*");
    }

    #[test]
    fn test_request_then_verify() {
        let (_dir, conn) = setup();
        let outbox = Outbox::default();
        let now = db::now();
        let issued = request_otp_at(&conn, "M1", &outbox, now).unwrap();
        assert!(issued.masked_phone.ends_with("67"));
        assert_eq!(outbox.0.borrow()[0].0, "+221771234567");
        let code = outbox.last_code();
        verify_otp_at(&conn, "M1", &code, now + Duration::minutes(1)).unwrap();
        // single use
        assert!(matches!(
            verify_otp_at(&conn, "M1", &code, now + Duration::minutes(2)),
            Err(PercError::OtpRejected)
        ));
    }

    #[test]
    fn test_expired_code_rejected() {
        let (_dir, conn) = setup();
        let outbox = Outbox::default();
        let now = db::now();
        request_otp_at(&conn, "M1", &outbox, now).unwrap();
        let code = outbox.last_code();
        assert!(verify_otp_at(&conn, "M1", &code, now + Duration::minutes(CODE_TTL_MINUTES)).is_err());
    }

    #[test]
    fn test_attempts_are_limited() {
        let (_dir, conn) = setup();
        let outbox = Outbox::default();
        let now = db::now();
        request_otp_at(&conn, "M1", &outbox, now).unwrap();
        let code = outbox.last_code();
        let wrong = if code == "123456" { "654321" } else { "123456" };
        for _ in 0..MAX_ATTEMPTS {
            assert!(verify_otp_at(&conn, "M1", wrong, now).is_err());
        }
        assert!(verify_otp_at(&conn, "M1", &code, now).is_err());
        let attempts: i64 = conn.query_row("SELECT attempts FROM otp_codes", [], |r| r.get(0)).unwrap();
        assert_eq!(attempts, MAX_ATTEMPTS);
    }

    #[test]
    fn test_only_newest_code_counts() {
        let (_dir, conn) = setup();
        let outbox = Outbox::default();
        let now = db::now();
        request_otp_at(&conn, "M1", &outbox, now).unwrap();
        let old = outbox.last_code();
        request_otp_at(&conn, "M1", &outbox, now).unwrap();
        let new = outbox.last_code();
        if old != new {
            assert!(verify_otp_at(&conn, "M1", &old, now).is_err());
        }
        verify_otp_at(&conn, "M1", &new, now).unwrap();
    }

    #[test]
    fn test_stale_codes_are_purged() {
        let (_dir, conn) = setup();
        let outbox = Outbox::default();
        let long_ago = db::now() - Duration::days(3);
        request_otp_at(&conn, "M1", &outbox, long_ago).unwrap();
        request_otp_at(&conn, "M1", &outbox, db::now()).unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM otp_codes", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unknown_participant() {
        let (_dir, conn) = setup();
        assert!(matches!(
            request_otp(&conn, "M9", &LogNotifier),
            Err(PercError::UnknownParticipant(_))
        ));
    }
}
