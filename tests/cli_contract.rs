use std::fs;
use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

fn run_dashlapse(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_dashlapse"))
        .current_dir(cwd)
        .args(args)
        .env_remove("DASHLAPSE_GRAFANA_URL")
        .env_remove("DASHLAPSE_WEBDRIVER_URL")
        .env("RUST_LOG", "off")
        .output()
        .expect("dashlapse command should run")
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn list_scenarios_prints_builtins() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dashlapse(dir.path(), &["--list-scenarios"]);
    assert!(output.status.success(), "--list-scenarios should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let names = stdout.lines().collect::<Vec<_>>();
    assert_eq!(names, vec!["playdemo", "playdemo-yearly"]);
}

#[test]
fn missing_scenario_is_a_configuration_error() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dashlapse(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("--scenario is mandatory"));
}

#[test]
fn solo_view_without_panel_exits_before_any_work() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dashlapse(
        dir.path(),
        &["--scenario", "playdemo", "--dashboard-view", "d-solo"],
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("--panel-id is mandatory"));
    assert!(!dir.path().join("var").exists(), "no spool should be created");
}

#[test]
fn json_flag_prints_an_error_envelope() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dashlapse(
        dir.path(),
        &["--scenario", "playdemo", "--header-layout", "studio,neon", "--json"],
    );
    assert_eq!(output.status.code(), Some(2));
    let envelope: Value = serde_json::from_slice(&output.stdout).expect("envelope should parse");
    assert_eq!(envelope["ok"], Value::Bool(false));
    assert_eq!(envelope["error"]["code"], "E_CONFIG");
    assert!(envelope["error"]["message"]
        .as_str()
        .is_some_and(|message| message.contains("neon")));
}

#[test]
fn unknown_builtin_scenario_names_the_alternatives() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dashlapse(dir.path(), &["--scenario", "nope"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("playdemo"));
}

#[test]
fn scenario_file_without_uid_is_rejected() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("local.yaml"),
        r#"
scenarios:
  default:
    steps:
      - { start: "2021-01-01T00:00:00Z", end: "2021-01-01T01:00:00Z", interval: 5min }
"#,
    )
    .expect("scenario should write");

    let output = run_dashlapse(
        dir.path(),
        &["--scenario", "local.yaml", "--webdriver-url", "http://127.0.0.1:9"],
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("dashboard uid is mandatory"));
}

#[test]
fn malformed_window_size_is_rejected() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dashlapse(
        dir.path(),
        &["--scenario", "playdemo", "--window-size", "wide"],
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("WIDTHxHEIGHT"));
}

#[test]
fn version_mentions_the_binary() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_dashlapse(dir.path(), &["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("dashlapse "));
}
