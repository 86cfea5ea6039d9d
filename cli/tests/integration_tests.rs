use std::fs;
use std::process::{Command, Output};

const BIN: &str = env!("CARGO_BIN_EXE_dbsnap");

/// Runs the binary with no database configured through the environment.
fn dbsnap(args: &[&str]) -> Output {
    Command::new(BIN)
        .args(args)
        .env_remove("DBSNAP_DATABASE_URL")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run dbsnap")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

#[test]
fn help_lists_all_commands() {
    let output = dbsnap(&["--help"]);
    assert!(output.status.success());
    let help = stdout(&output);
    for command in [
        "status",
        "list",
        "dump",
        "save-production",
        "restore-production",
        "init-config",
    ] {
        assert!(help.contains(command), "help should mention {command}");
    }
}

#[test]
fn unknown_list_format_is_rejected() {
    let output = dbsnap(&["--url", "postgres://localhost/app", "list", "--format", "xml"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("xml"));
}

// ---------------------------------------------------------------------------
// init-config
// ---------------------------------------------------------------------------

#[test]
fn init_config_writes_default_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dbsnap.yml");

    let output = dbsnap(&[
        "init-config",
        path.to_str().unwrap(),
        "--database-url",
        "postgres://ci@db:5432/app_ci",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let yaml = fs::read_to_string(&path).unwrap();
    assert!(yaml.contains("postgres://ci@db:5432/app_ci"));
    assert!(yaml.contains("maintenance_database: postgres"));
    assert!(yaml.contains("backup_suffix: _backup"));
    assert!(yaml.contains("protect_production: true"));
}

#[test]
fn init_config_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dbsnap.yml");
    fs::write(&path, "database_url: postgres://keep/me\n").unwrap();

    let output = dbsnap(&["init-config", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("already exists"));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "database_url: postgres://keep/me\n"
    );

    let output = dbsnap(&["init-config", path.to_str().unwrap(), "--force"]);
    assert!(output.status.success());
    assert!(fs::read_to_string(&path).unwrap().contains("app_test"));
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[test]
fn status_without_database_fails() {
    let output = dbsnap(&["status"]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.starts_with("error: no database configured"), "stderr: {err}");
    assert!(err.contains("DBSNAP_DATABASE_URL"));
}

#[test]
fn missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yml");

    let output = dbsnap(&["--config", path.to_str().unwrap(), "list"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Failed to load config"));
}

#[test]
fn invalid_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dbsnap.yml");
    fs::write(&path, "database_url: postgres://localhost/app\nskip_marker: \"\"\n").unwrap();

    let output = dbsnap(&["dump", "--config", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("skip_marker"));
}

#[test]
fn unreachable_server_is_reported() {
    let output = dbsnap(&[
        "--url",
        "postgres://nobody@127.0.0.1:1/absent?connect_timeout=1",
        "status",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Failed to connect"));
}
