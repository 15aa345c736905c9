//! CLI tests for the `bridge` binary.
//!
//! Spawns the binary in a temp directory and checks exit codes, files written
//! and printed envelopes. Window tools are replaced with small shell commands.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use bridge::exit_codes;
use bridge::io::config::{BridgeConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use bridge::io::transcript::read_transcript;

fn bridge(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bridge"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("run bridge")
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

/// Config whose window listing returns one `Agent` window and whose effector
/// steps succeed without touching a desktop.
fn headless_config(type_text: &[&str]) -> BridgeConfig {
    let mut cfg = BridgeConfig {
        poll_interval_ms: 50,
        pause_between_commands_ms: 0,
        ..BridgeConfig::default()
    };
    cfg.window.title_contains = strings(&["agent"]);
    cfg.window.list_command = strings(&[
        "sh",
        "-c",
        "echo '0x00a00001  0 0 0 1024 768 host Agent'",
    ]);
    cfg.effector.focus = strings(&["true"]);
    cfg.effector.clear = strings(&["true"]);
    cfg.effector.type_text = strings(type_text);
    cfg.effector.submit = strings(&["true"]);
    cfg
}

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = bridge(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let config_path = temp.path().join(DEFAULT_CONFIG_PATH);
    assert_eq!(
        load_config(&config_path).expect("load"),
        BridgeConfig::default()
    );

    fs::write(&config_path, "poll_interval_ms = 500\n").expect("edit config");
    let output = bridge(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(&config_path).expect("read"),
        "poll_interval_ms = 500\n"
    );

    let output = bridge(temp.path(), &["init", "--force"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        load_config(&config_path).expect("load"),
        BridgeConfig::default()
    );
}

#[test]
fn envelope_prints_instruction_and_marker_line() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = bridge(
        temp.path(),
        &[
            "envelope",
            "--id",
            "7",
            "--conversation-id",
            "desk-demo",
            "Open the notes application.",
        ],
    );

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.starts_with("Open the notes application.\n\n"));
    assert!(stdout.contains("RESPONSE_COMPLETE: Command_7 (conversation desk-demo)"));
    assert!(stdout.contains(".bridge/agent_responses.log"));
}

#[test]
fn envelope_rejects_zero_id_and_blank_instruction() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = bridge(temp.path(), &["envelope", "--id", "0", "hello"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));

    let output = bridge(temp.path(), &["envelope", "   "]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn reset_truncates_log_channel() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_path = temp.path().join(".bridge").join("agent_responses.log");
    fs::create_dir_all(log_path.parent().expect("parent")).expect("mkdir");
    fs::write(&log_path, "RESPONSE_COMPLETE: Command_1\n").expect("seed log");

    let output = bridge(temp.path(), &["reset"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(fs::read_to_string(&log_path).expect("read log"), "");
}

#[test]
fn run_without_target_window_is_undelivered() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = headless_config(&["true"]);
    cfg.window.list_command = strings(&["true"]);
    write_config(&temp.path().join(DEFAULT_CONFIG_PATH), &cfg).expect("write config");
    fs::write(
        temp.path().join("conversation.toml"),
        "conversation_id = \"no-window\"\n\n[[commands]]\ninstruction = \"A\"\n\n[[commands]]\ninstruction = \"B\"\n",
    )
    .expect("write conversation");

    let output = bridge(temp.path(), &["run", "conversation.toml"]);

    assert_eq!(output.status.code(), Some(exit_codes::UNDELIVERED));
    let transcript = read_transcript(
        &temp
            .path()
            .join(".bridge/conversations/no-window/result.json"),
    )
    .expect("read transcript");
    assert_eq!(transcript.records.len(), 1);
    assert!(!transcript.records[0].success());
}

#[test]
fn send_completes_when_agent_appends_marker() {
    let temp = tempfile::tempdir().expect("tempdir");
    // The "typing" step plays the agent: it copies the marker line from the
    // typed envelope into the log channel.
    let cfg = headless_config(&[
        "sh",
        "-c",
        "grep '^RESPONSE_COMPLETE' >> .bridge/agent_responses.log",
    ]);
    write_config(&temp.path().join(DEFAULT_CONFIG_PATH), &cfg).expect("write config");

    let output = bridge(
        temp.path(),
        &[
            "send",
            "--conversation-id",
            "one-shot",
            "--timeout-secs",
            "10",
            "What is 15 + 27?",
        ],
    );

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let transcript = read_transcript(
        &temp
            .path()
            .join(".bridge/conversations/one-shot/result.json"),
    )
    .expect("read transcript");
    assert_eq!(
        transcript.records[0].matched_line(),
        Some("RESPONSE_COMPLETE: Command_1 (conversation one-shot)")
    );
}

#[test]
fn wait_times_out_without_marker() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = BridgeConfig {
        poll_interval_ms: 50,
        ..BridgeConfig::default()
    };
    write_config(&temp.path().join(DEFAULT_CONFIG_PATH), &cfg).expect("write config");

    let output = bridge(temp.path(), &["wait", "--id", "2", "--timeout-secs", "1"]);

    assert_eq!(output.status.code(), Some(exit_codes::TIMED_OUT));
}

#[test]
fn invalid_config_is_reported() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join(DEFAULT_CONFIG_PATH);
    fs::create_dir_all(config_path.parent().expect("parent")).expect("mkdir");
    fs::write(&config_path, "marker_prefix = \"has space\"\n").expect("write config");

    let output = bridge(temp.path(), &["reset"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("config"));
}

#[test]
fn zero_timeout_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = bridge(temp.path(), &["wait", "--id", "1", "--timeout-secs", "0"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--timeout-secs must be > 0"));

    let output = bridge(temp.path(), &["send", "--timeout-secs", "0", "hello"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn reused_conversation_id_keeps_first_transcript() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = headless_config(&[
        "sh",
        "-c",
        "grep '^RESPONSE_COMPLETE' >> .bridge/agent_responses.log",
    ]);
    write_config(&temp.path().join(DEFAULT_CONFIG_PATH), &cfg).expect("write config");
    let args = [
        "send",
        "--conversation-id",
        "desk-demo",
        "--timeout-secs",
        "10",
        "Open the notes application.",
    ];

    let first = bridge(temp.path(), &args);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let transcript_path = temp
        .path()
        .join(".bridge/conversations/desk-demo/result.json");
    let before = fs::read_to_string(&transcript_path).expect("read transcript");

    let second = bridge(temp.path(), &args);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already has a transcript"));
    assert_eq!(
        fs::read_to_string(&transcript_path).expect("read transcript"),
        before
    );
}
