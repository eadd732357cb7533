use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const HEADER: &str = "Matricule,Compte N°,Nom,Direction,E-mail,Tél.,Montant Versé\n";

struct Sandbox {
    home: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            home: tempfile::tempdir().unwrap(),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("perc").unwrap();
        cmd.env("HOME", self.home.path())
            .env("NO_COLOR", "1")
            .env_remove("PERC_DATA_DIR")
            .env_remove("PERC_PASSWORD")
            .env_remove("PERC_LOG")
            .env_remove("RUST_LOG");
        cmd
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.home.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn init(&self) {
        self.cmd().arg("init").assert().success();
    }

    /// Fresh database with a logged-in admin.
    fn admin(&self) {
        self.init();
        self.cmd()
            .args(["admin", "add", "fatou", "--name", "Fatou Sow"])
            .env("PERC_PASSWORD", "hunter22")
            .assert()
            .success();
        self.cmd()
            .args(["login", "admin", "fatou"])
            .env("PERC_PASSWORD", "hunter22")
            .assert()
            .success()
            .stdout(predicate::str::contains("Logged in as fatou"));
    }

    fn import(&self, name: &str, body: &str) -> assert_cmd::assert::Assert {
        let path = self.write(name, &format!("{HEADER}{body}"));
        self.cmd()
            .args(["--json", "import"])
            .arg(&path)
            .assert()
    }
}

#[test]
fn test_init_and_status() {
    let sb = Sandbox::new();
    sb.init();
    sb.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Participants:   0"));
}

#[test]
fn test_status_without_database() {
    let sb = Sandbox::new();
    sb.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Run `perc init`"));
}

#[test]
fn test_import_requires_login() {
    let sb = Sandbox::new();
    sb.init();
    let path = sb.write("cgf.csv", &format!("{HEADER}M1,C1,Awa,,,,100\n"));
    sb.cmd()
        .arg("import")
        .arg(&path)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_import_partial_file() {
    let sb = Sandbox::new();
    sb.admin();
    sb.import("cgf.csv", "M1,C1,Awa Diop,DRH,,,100\nM2,C2,Binta,DAF,,,\nM3,C3,Cheikh,DSI,,,\"1 500,50\"\n")
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .stdout(predicate::str::contains("\"status\": \"partial\""))
        .stdout(predicate::str::contains("\"success_count\": 2"))
        .stdout(predicate::str::contains("\"error_count\": 1"))
        .stdout(predicate::str::contains("\"line\": 3"));

    sb.cmd()
        .args(["--json", "participants", "show", "M3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"balance\": \"1500.50\""));
}

#[test]
fn test_import_human_output() {
    let sb = Sandbox::new();
    sb.admin();
    let path = sb.write("cgf.csv", &format!("{HEADER}M1,C1,Awa,,,,100\nM1,C1,Awa,,,,abc\n"));
    sb.cmd()
        .arg("import")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 applied, 1 rejected"))
        .stdout(predicate::str::contains("invalid amount"));
}

#[test]
fn test_unsupported_extension() {
    let sb = Sandbox::new();
    sb.admin();
    let path = sb.write("scan.pdf", "not a sheet");
    sb.cmd()
        .args(["--json", "import"])
        .arg(&path)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"success\": false"))
        .stdout(predicate::str::contains("\"status\": 400"));
    sb.cmd()
        .args(["--json", "imports", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"data\": []"));
}

#[test]
fn test_empty_file_is_rejected() {
    let sb = Sandbox::new();
    sb.admin();
    sb.import("empty.csv", "")
        .code(2)
        .stdout(predicate::str::contains("Empty file"));
}

#[test]
fn test_import_history() {
    let sb = Sandbox::new();
    sb.admin();
    sb.import("jan.csv", "M1,C1,Awa,,,,100\n").success();
    sb.import("feb.csv", "M1,C1,Awa,,,,50\n").success();
    sb.cmd()
        .args(["imports", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("jan.csv"))
        .stdout(predicate::str::contains("feb.csv"));
    sb.cmd()
        .args(["--json", "imports", "show", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"filename\": \"jan.csv\""));
    sb.cmd()
        .args(["imports", "show", "99"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Unknown import: 99"));
}

#[test]
fn test_correction_then_audit() {
    let sb = Sandbox::new();
    sb.admin();
    sb.import("cgf.csv", "M1,C1,Awa,,,,100\nM1,C1,Awa,,,,50\n").success();
    sb.cmd()
        .args(["participants", "correct", "M1", "--balance", "120", "--reason", "duplicate line"])
        .assert()
        .success()
        .stdout(predicate::str::contains("corrected"));
    sb.cmd()
        .arg("audit")
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));
    sb.cmd()
        .args(["--json", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_balance\": \"120\""));
}

#[test]
fn test_participant_search() {
    let sb = Sandbox::new();
    sb.admin();
    sb.import("cgf.csv", "M1,C1,Awa Diop,,,,100\nM2,C2,Binta Fall,,,,50\n").success();
    sb.cmd()
        .args(["participants", "list", "--search", "binta"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Binta Fall"))
        .stdout(predicate::str::contains("Awa Diop").not());
}

#[test]
fn test_agent_otp_flow() {
    let sb = Sandbox::new();
    sb.admin();
    sb.import("cgf.csv", "M1,C1,Awa,DRH,,77 123 45 67,100\nM1,C1,Awa,DRH,,77 123 45 67,50\n")
        .success();
    sb.cmd().arg("logout").assert().success();

    sb.cmd()
        .args(["login", "agent", "M1"])
        .env("PERC_PASSWORD", "whatever")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No password set"));

    let out = sb
        .cmd()
        .args(["otp", "request", "M1"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let stderr = String::from_utf8(out.stderr).unwrap();
    let line = stderr.lines().find(|l| l.contains("OTP for +221771234567")).unwrap();
    let code = line.rsplit(' ').next().unwrap().trim().to_string();
    assert_eq!(code.len(), 6);

    sb.cmd()
        .args(["otp", "verify", "M1", "000000"])
        .assert()
        .code(3);
    sb.cmd()
        .args(["otp", "verify", "M1", &code])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in as M1"));

    sb.cmd()
        .args(["--json", "account", "balance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"balance\": \"150\""));
    sb.cmd()
        .args(["account", "movements"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CGF import - cgf.csv"));

    sb.cmd()
        .arg("password")
        .env("PERC_PASSWORD", "new-secret")
        .assert()
        .success();
    sb.cmd().arg("logout").assert().success();
    sb.cmd()
        .args(["login", "agent", "M1"])
        .env("PERC_PASSWORD", "new-secret")
        .assert()
        .success();
    sb.cmd()
        .arg("whoami")
        .assert()
        .success()
        .stdout(predicate::str::contains("M1 (agent)"));
}

#[test]
fn test_agent_cannot_use_admin_commands() {
    let sb = Sandbox::new();
    sb.admin();
    sb.import("cgf.csv", "M1,C1,Awa,,,771234567,100\n").success();
    let out = sb
        .cmd()
        .args(["otp", "request", "M1"])
        .output()
        .unwrap();
    let stderr = String::from_utf8(out.stderr).unwrap();
    let line = stderr.lines().find(|l| l.contains("OTP for")).unwrap();
    let code = line.rsplit(' ').next().unwrap().trim().to_string();
    sb.cmd().args(["otp", "verify", "M1", &code]).assert().success();

    sb.cmd()
        .arg("stats")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Access denied"));
}

#[test]
fn test_second_admin_needs_a_session() {
    let sb = Sandbox::new();
    sb.admin();
    sb.cmd().arg("logout").assert().success();
    sb.cmd()
        .args(["admin", "add", "moussa"])
        .env("PERC_PASSWORD", "pw123456")
        .assert()
        .code(3);
}

#[test]
fn test_bad_period_flag() {
    let sb = Sandbox::new();
    sb.admin();
    let path = sb.write("cgf.csv", &format!("{HEADER}M1,C1,Awa,,,,100\n"));
    sb.cmd()
        .args(["import", "--period", "2025-13"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected YYYY-MM"));
}

#[test]
fn test_backup() {
    let sb = Sandbox::new();
    sb.admin();
    let dest = sb.home.path().join("copy.db");
    sb.cmd()
        .args(["backup", "--output"])
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup saved"));
    assert!(dest.exists());
}
