//! CLI integration tests.
//!
//! These run the built binary against a temporary config and database and
//! never touch Bluetooth or the network.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};
use std::thread;

fn run(args: &[&str], home: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_heightscale"))
        .args(args)
        .env("HEIGHTSCALE_CONFIG", home.join("config.toml"))
        .env("HEIGHTSCALE_DB", home.join("data.db"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run heightscale binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&["--help"], home.path());

    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["scan", "watch", "history", "latest", "sync", "prune", "clear", "status"] {
        assert!(text.contains(command), "help is missing {command}");
    }
}

#[test]
fn test_version() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&["--version"], home.path());

    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_config_path_honors_env() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&["config", "path"], home.path());

    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim(),
        home.path().join("config.toml").display().to_string()
    );
}

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();

    let init = run(&["config", "init"], home.path());
    assert!(init.status.success());
    assert!(home.path().join("config.toml").exists());

    let again = run(&["config", "init"], home.path());
    assert!(!again.status.success());

    let show = run(&["config", "show"], home.path());
    assert!(show.status.success());
    let text = stdout(&show);
    assert!(text.contains("target_bmi = \"21\""));
    assert!(text.contains("collector_url = \"http://localhost:8000\""));
}

#[test]
fn test_completions() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&["completions", "bash"], home.path());

    assert!(output.status.success());
    assert!(stdout(&output).contains("heightscale"));
}

#[test]
fn test_history_on_empty_database() {
    let home = tempfile::tempdir().unwrap();

    let text = run(&["history"], home.path());
    assert!(text.status.success());
    assert_eq!(stdout(&text), "No measurements\n");

    let csv = run(&["history", "--format", "csv"], home.path());
    assert!(csv.status.success());
    assert_eq!(stdout(&csv), "timestamp,weight_kg,impedance_ohm,height_m\n");

    let json = run(&["latest", "--format", "json"], home.path());
    assert!(json.status.success());
    assert_eq!(stdout(&json).trim(), "null");
}

#[test]
fn test_clear_requires_confirmation() {
    let home = tempfile::tempdir().unwrap();

    assert!(!run(&["clear"], home.path()).status.success());
    assert!(run(&["clear", "--yes"], home.path()).status.success());
}

#[test]
fn test_prune_on_empty_database() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&["prune", "--days", "7"], home.path());
    assert!(output.status.success());
}

/// Serve canned collector responses on a local port; returns its base URL.
fn fake_collector() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            loop {
                let mut header = String::new();
                match reader.read_line(&mut header) {
                    Ok(0) | Err(_) => break,
                    Ok(_) if header == "\r\n" => break,
                    Ok(_) => {}
                }
            }
            let path = request_line.split_whitespace().nth(1).unwrap_or("");
            let body = match path {
                "/api/health" => r#"{"status": "healthy", "timestamp": "2026-05-05T07:00:01"}"#,
                "/api/measurement/latest" => {
                    r#"{"weight": 71.0, "impedance": 480, "height": 1.8388, "timestamp": "2026-05-05T07:00:00.250000"}"#
                }
                "/api/measurements" => {
                    r#"[{"weight": 70.0, "impedance": 500, "height": 1.8257, "timestamp": "2026-05-04T06:12:30"},
                        {"weight": 71.0, "impedance": 480, "height": 1.8388, "timestamp": "2026-05-05T07:00:00.250000"}]"#
                }
                _ => "null",
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    url
}

fn write_config(home: &Path, collector_url: &str) {
    std::fs::write(
        home.join("config.toml"),
        format!("ble_enabled = false\ncollector_url = \"{collector_url}\"\n"),
    )
    .unwrap();
}

#[test]
fn test_latest_from_collector() {
    let home = tempfile::tempdir().unwrap();
    write_config(home.path(), &fake_collector());

    let text = run(&["latest", "--remote"], home.path());
    assert!(text.status.success());
    let text = stdout(&text);
    assert!(text.starts_with("Latest Measurement (collector)\n"));
    assert!(text.contains("Weight: 71.0 kg"));
    assert!(text.contains("Last updated: 2026-05-05 07:00:00"));

    let json = run(&["latest", "--remote", "--format", "json"], home.path());
    assert!(json.status.success());
    let value: serde_json::Value = serde_json::from_str(&stdout(&json)).unwrap();
    assert_eq!(value["impedance"], 480);
}

#[test]
fn test_history_from_collector_is_newest_first() {
    let home = tempfile::tempdir().unwrap();
    write_config(home.path(), &fake_collector());

    let output = run(&["history", "--remote", "--limit", "1"], home.path());
    assert!(output.status.success());
    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Measurement History (collector) (1 measurements)");
    assert!(lines[1].starts_with("2026-05-05 07:00:00  Weight 71.0 kg"));
}

#[test]
fn test_status_in_remote_mode_shows_collector_reading() {
    let home = tempfile::tempdir().unwrap();
    write_config(home.path(), &fake_collector());

    let output = run(&["status"], home.path());
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Mode:   remote"));
    assert!(text.contains("reachable (healthy)"));
    assert!(text.contains("0 measurement(s)"));
    assert!(text.contains("Latest Measurement (collector)"));
    assert!(text.contains("Weight: 71.0 kg"));
}

#[test]
fn test_status_offline_shows_local_store() {
    let home = tempfile::tempdir().unwrap();
    // Port 9 (discard) refuses connections.
    write_config(home.path(), "http://127.0.0.1:9");

    let output = run(&["status"], home.path());
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Mode:   offline"));
    assert!(text.contains("unreachable"));
    assert!(text.ends_with("No measurements\n"));

    assert!(!run(&["latest", "--remote"], home.path()).status.success());
}
