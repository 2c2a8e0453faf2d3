use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn binary() -> String {
    // Prefer the test-built binary when available to avoid extra cargo builds.
    std::env::var("CARGO_BIN_EXE_cryo-seq").unwrap_or_else(|_| {
        let candidates = [
            "../../target/release/cryo-seq",
            "target/release/cryo-seq",
            "../../target/debug/cryo-seq",
            "target/debug/cryo-seq",
        ];
        for candidate in candidates {
            if Path::new(candidate).exists() {
                return candidate.to_string();
            }
        }
        panic!(
            "Failed to locate cryo-seq binary. Expected CARGO_BIN_EXE_cryo-seq or a build in target/{{release,debug}}/cryo-seq."
        );
    })
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    fn sequence(&self, json: &str) -> PathBuf {
        let path = self.dir.path().join("sequence.json");
        std::fs::write(&path, json).expect("Failed to write sequence file");
        path
    }

    fn audit_path(&self) -> PathBuf {
        self.dir.path().join("audit").join("audit.jsonl")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(binary())
            .args(args)
            .env("RUST_LOG", "warn")
            .output()
            .expect("Failed to run cryo-seq")
    }

    fn audit_events(&self) -> Vec<serde_json::Value> {
        let content = std::fs::read_to_string(self.audit_path()).expect("Audit log missing");
        content
            .lines()
            .map(|line| serde_json::from_str(line).expect("Audit line is JSON"))
            .collect()
    }
}

fn event_types(events: &[serde_json::Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["event_type"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn stdout_messages(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

#[test]
fn test_sequence_runs_to_completion() {
    let ws = Workspace::new();
    let sequence = ws.sequence(
        r#"[
            {"typ":"scan_T","sequence_temperature":[10.0,4.3]},
            {"typ":"Wait","Temp":4.3,"Field":0.0,"Delay":0.2}
        ]"#,
    );
    let audit = ws.audit_path();

    let output = ws.run(&[
        "--sequence",
        sequence.to_str().unwrap(),
        "--sim-tau",
        "0",
        "--telemetry-ms",
        "10",
        "--poll-ms",
        "20",
        "--audit-log",
        audit.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let types = event_types(&ws.audit_events());
    assert_eq!(types.first().map(String::as_str), Some("system_start"));
    assert_eq!(types.last().map(String::as_str), Some("system_shutdown"));
    assert!(types.contains(&"run_started".to_string()));
    assert_eq!(types.iter().filter(|t| *t == "step_started").count(), 2);
    assert_eq!(types.iter().filter(|t| *t == "setpoint_commanded").count(), 4);
    assert_eq!(types.iter().filter(|t| *t == "run_completed").count(), 1);
    assert!(!types.contains(&"run_aborted".to_string()));

    let summary = stdout_messages(&output)
        .into_iter()
        .find(|m| m["type"] == "run_summary")
        .expect("run summary on stdout");
    assert_eq!(summary["outcome"], "completed");
    assert_eq!(summary["steps_executed"], 2);
    assert_eq!(summary["delays_observed"], 1);
}

#[test]
fn test_stop_after_aborts_run() {
    let ws = Workspace::new();
    // With a very slow rig the wait can never converge on its own.
    let sequence = ws.sequence(
        r#"{"version":{"major":1,"minor":0},"steps":[
            {"typ":"scan_T","sequence_temperature":[4.3]},
            {"typ":"Wait","Temp":4.3,"Field":0.0,"Delay":0.0},
            {"typ":"scan_T","sequence_temperature":[20.0]}
        ]}"#,
    );
    let audit = ws.audit_path();

    let output = ws.run(&[
        "--sequence",
        sequence.to_str().unwrap(),
        "--sim-tau",
        "100000",
        "--stop-after",
        "0.5",
        "--audit-log",
        audit.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(2));

    let events = ws.audit_events();
    let types = event_types(&events);
    assert_eq!(types.iter().filter(|t| *t == "run_aborted").count(), 1);
    assert!(!types.contains(&"run_completed".to_string()));
    // Only the first scan ran: VTI and sample setpoints once each.
    assert_eq!(types.iter().filter(|t| *t == "setpoint_commanded").count(), 2);

    let aborted = events
        .iter()
        .find(|e| e["event_type"] == "run_aborted")
        .unwrap();
    assert_eq!(aborted["details"]["step"], 1);
}

#[test]
fn test_measurement_publishes_result() {
    let ws = Workspace::new();
    let audit = ws.audit_path();

    let output = ws.run(&[
        "--measure",
        "--current",
        "1e-3",
        "--samples",
        "5",
        "--sim-resistance",
        "150",
        "--sim-offset-voltage",
        "0.004",
        "--audit-log",
        audit.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let measurement = stdout_messages(&output)
        .into_iter()
        .find(|m| m["type"] == "measurement")
        .expect("measurement on stdout");
    let r_mean = measurement["R_mean_Ohm"].as_f64().unwrap();
    assert!((r_mean - 150.0).abs() < 1e-6, "R_mean = {r_mean}");
    assert_eq!(measurement["sample_count"], 5);

    let types = event_types(&ws.audit_events());
    assert_eq!(
        types.iter().filter(|t| *t == "measurement_published").count(),
        1
    );
}

#[test]
fn test_measure_without_current_fails() {
    let ws = Workspace::new();
    let output = ws.run(&["--measure"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("applied current"));
}

#[test]
fn test_invalid_sequence_is_rejected() {
    let ws = Workspace::new();
    let sequence = ws.sequence(r#"[{"typ":"scan_T","sequence_temperature":[1000.0]}]"#);

    let output = ws.run(&["--sequence", sequence.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("sequence rejected"));
}
