//! Conversation-level scenarios driving the real dispatcher, waiter and log
//! channel against a scripted agent on a virtual clock.
//!
//! Every test uses a 1 s poll interval and a 5 s deadline per command. Agent
//! write times are relative to the moment the command was submitted.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge::conversation::{CommandSpec, ConversationEvent, ConversationRunner, ConversationSettings};
use bridge::core::envelope::{DirectiveTemplate, EnvelopeSettings};
use bridge::core::ids::ConversationId;
use bridge::core::types::{ConversationStatus, Failure};
use bridge::dispatch::Dispatcher;
use bridge::io::desktop::WindowQuery;
use bridge::io::log_channel::LogChannel;
use bridge::test_support::{
    AgentStep, ScriptedAgent, ScriptedLocator, VirtualClock, append_to, temp_log, window,
};
use bridge::wait::Clock;

struct Harness {
    _temp: tempfile::TempDir,
    log_path: PathBuf,
    clock: VirtualClock,
    locator: ScriptedLocator,
}

impl Harness {
    fn new() -> Self {
        let (temp, log_path) = temp_log();
        Self {
            _temp: temp,
            log_path,
            clock: VirtualClock::new(),
            locator: ScriptedLocator::new(vec![window("0x3a00007", "Claude", 1900, 1020)]),
        }
    }

    fn agent(&self, steps: Vec<AgentStep>) -> ScriptedAgent<'_> {
        ScriptedAgent::new(&self.clock, &self.log_path, steps)
    }

    fn settings(&self) -> ConversationSettings {
        ConversationSettings {
            poll_interval: Duration::from_secs(1),
            pause_between_commands: Duration::ZERO,
            envelope: EnvelopeSettings {
                log_path: self.log_path.clone(),
                marker_prefix: "Command".to_string(),
                template: DirectiveTemplate::Builtin,
            },
        }
    }
}

fn query() -> WindowQuery {
    WindowQuery {
        title_contains: vec!["claude".to_string(), "untitled".to_string()],
        min_width: 500,
        min_height: 400,
    }
}

fn commands(instructions: &[&str]) -> Vec<CommandSpec> {
    instructions
        .iter()
        .map(|instruction| CommandSpec {
            instruction: instruction.to_string(),
            timeout: Duration::from_secs(5),
        })
        .collect()
}

fn runner(id: &str, instructions: &[&str]) -> ConversationRunner {
    ConversationRunner::new(
        ConversationId::parse(id).expect("conversation id"),
        commands(instructions),
    )
}

fn seed(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    append_to(path, text);
}

/// Agent answers `Command_1` 2 s after the first submission and `Command_2`
/// 3 s after the second; both commands complete with their own lines.
#[test]
fn two_commands_complete_with_their_own_markers() {
    let harness = Harness::new();
    let agent = harness.agent(vec![
        AgentStep::writes(Duration::from_secs(2), "...Command_1 done...\n"),
        AgentStep::writes(Duration::from_secs(3), "...Command_2 done...\n"),
    ]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-scenario-a", &["A", "B"]);

    let result = runner
        .run(&mut channel, &dispatcher, &harness.clock, &harness.settings(), |_| {})
        .expect("run");

    assert_eq!(result.status, ConversationStatus::Completed);
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.records[0].command_id.get(), 1);
    assert_eq!(result.records[0].matched_line(), Some("...Command_1 done..."));
    assert_eq!(result.records[0].elapsed_ms, 2000);
    assert_eq!(result.records[1].command_id.get(), 2);
    assert_eq!(result.records[1].matched_line(), Some("...Command_2 done..."));
    assert_eq!(result.records[1].elapsed_ms, 3000);
    assert_eq!(
        agent.submit_times(),
        vec![Duration::ZERO, Duration::from_secs(2)]
    );
}

/// A silent agent yields one timeout record at the 5 s deadline and the
/// second command is never dispatched.
#[test]
fn silent_agent_aborts_after_first_deadline() {
    let harness = Harness::new();
    let agent = harness.agent(vec![AgentStep::Silent, AgentStep::Silent]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-scenario-b", &["A", "B"]);

    let result = runner
        .run(&mut channel, &dispatcher, &harness.clock, &harness.settings(), |_| {})
        .expect("run");

    assert_eq!(result.status, ConversationStatus::Aborted);
    assert_eq!(result.records.len(), 1);
    assert_eq!(
        result.records[0].failure(),
        Some(&Failure::CompletionTimeout { waited_ms: 5000 })
    );
    assert_eq!(harness.clock.now(), Duration::from_secs(5));
    assert_eq!(agent.submitted().len(), 1);
}

/// Command 2 of 3 times out: exactly two records, the second failed, and
/// command 3 is never submitted.
#[test]
fn timeout_in_the_middle_stops_the_sequence() {
    let harness = Harness::new();
    let agent = harness.agent(vec![
        AgentStep::completes_after(Duration::from_secs(1)),
        AgentStep::writes(Duration::from_secs(1), "working on it\n"),
        AgentStep::completes_after(Duration::from_secs(1)),
    ]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-mid", &["A", "B", "C"]);

    let result = runner
        .run(&mut channel, &dispatcher, &harness.clock, &harness.settings(), |_| {})
        .expect("run");

    assert_eq!(result.status, ConversationStatus::Aborted);
    let outcomes: Vec<(u32, bool)> = result
        .records
        .iter()
        .map(|record| (record.command_id.get(), record.success()))
        .collect();
    assert_eq!(outcomes, vec![(1, true), (2, false)]);
    assert_eq!(agent.submitted().len(), 2);
}

/// A `Command_1` marker left over from an earlier session is truncated at
/// conversation start and cannot satisfy the new wait.
#[test]
fn stale_marker_before_reset_is_ignored() {
    let harness = Harness::new();
    seed(
        &harness.log_path,
        "RESPONSE_COMPLETE: Command_1 (conversation conv-old)\n",
    );
    let agent = harness.agent(vec![AgentStep::Silent]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-new", &["A"]);

    let result = runner
        .run(&mut channel, &dispatcher, &harness.clock, &harness.settings(), |_| {})
        .expect("run");

    assert_eq!(result.status, ConversationStatus::Aborted);
    assert!(matches!(
        result.records[0].failure(),
        Some(Failure::CompletionTimeout { .. })
    ));
    assert_eq!(fs::read_to_string(&harness.log_path).expect("read log"), "");
}

/// Content that matched command 1 is consumed; command 2 only sees bytes
/// appended after that point, even when the agent wrote both markers early.
#[test]
fn markers_from_one_batch_are_not_reused_for_the_next_command() {
    let harness = Harness::new();
    let agent = harness.agent(vec![
        AgentStep::writes(
            Duration::from_secs(1),
            "Command_1 done\nCommand_2 done too early\n",
        ),
        AgentStep::Silent,
    ]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-batch", &["A", "B"]);

    let result = runner
        .run(&mut channel, &dispatcher, &harness.clock, &harness.settings(), |_| {})
        .expect("run");

    assert_eq!(result.status, ConversationStatus::Aborted);
    assert!(result.records[0].success());
    assert!(!result.records[1].success());
}

/// Numerically similar markers (`Command_12`) never confirm command 1.
#[test]
fn numeric_prefix_marker_does_not_confirm() {
    let harness = Harness::new();
    let agent = harness.agent(vec![AgentStep::Write(vec![
        (Duration::from_secs(1), "RESPONSE_COMPLETE: Command_12\n".to_string()),
        (Duration::from_secs(3), "RESPONSE_COMPLETE: Command_1\n".to_string()),
    ])]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-prefix", &["A"]);

    let result = runner
        .run(&mut channel, &dispatcher, &harness.clock, &harness.settings(), |_| {})
        .expect("run");

    assert_eq!(result.status, ConversationStatus::Completed);
    assert_eq!(
        result.records[0].matched_line(),
        Some("RESPONSE_COMPLETE: Command_1")
    );
    assert_eq!(result.records[0].elapsed_ms, 3000);
}

/// Events arrive in protocol order for a one-command conversation.
#[test]
fn events_follow_protocol_order() {
    let harness = Harness::new();
    let agent = harness.agent(vec![AgentStep::completes_after(Duration::from_secs(2))]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-events", &["A"]);

    let mut seen = Vec::new();
    runner
        .run(
            &mut channel,
            &dispatcher,
            &harness.clock,
            &harness.settings(),
            |event| {
                seen.push(match event {
                    ConversationEvent::Started { .. } => "started",
                    ConversationEvent::Dispatching { .. } => "dispatching",
                    ConversationEvent::Delivered { .. } => "delivered",
                    ConversationEvent::Waiting(_) => "waiting",
                    ConversationEvent::Finished { .. } => "finished",
                });
            },
        )
        .expect("run");

    assert_eq!(
        seen,
        vec![
            "started",
            "dispatching",
            "delivered",
            "waiting",
            "waiting",
            "finished"
        ]
    );
}

/// A `Command_2` line written while the runner pauses between commands
/// predates dispatch 2 and must not confirm it.
#[test]
fn marker_written_during_pause_does_not_confirm_next_command() {
    let harness = Harness::new();
    let agent = harness.agent(vec![
        AgentStep::Write(vec![
            (Duration::from_secs(1), "Command_1 done\n".to_string()),
            (Duration::from_secs(2), "Command_2 stray early\n".to_string()),
        ]),
        AgentStep::Silent,
    ]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-pause", &["A", "B"]);
    let mut settings = harness.settings();
    settings.pause_between_commands = Duration::from_secs(2);

    let result = runner
        .run(&mut channel, &dispatcher, &harness.clock, &settings, |_| {})
        .expect("run");

    assert_eq!(
        agent.submit_times(),
        vec![Duration::ZERO, Duration::from_secs(3)]
    );
    assert_eq!(result.status, ConversationStatus::Aborted);
    assert!(result.records[0].success());
    assert_eq!(
        result.records[1].failure(),
        Some(&Failure::CompletionTimeout { waited_ms: 5000 })
    );
}

/// A marker appended after the reset but before the first dispatch is
/// skipped; only content written after submission counts.
#[test]
fn marker_written_before_first_dispatch_does_not_confirm() {
    let harness = Harness::new();
    let agent = harness.agent(vec![AgentStep::Silent]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-early", &["A"]);
    let log_path = harness.log_path.clone();

    let result = runner
        .run(
            &mut channel,
            &dispatcher,
            &harness.clock,
            &harness.settings(),
            |event| {
                if let ConversationEvent::Dispatching { .. } = event {
                    seed(&log_path, "RESPONSE_COMPLETE: Command_1 (premature)\n");
                }
            },
        )
        .expect("run");

    assert_eq!(result.status, ConversationStatus::Aborted);
    assert!(matches!(
        result.records[0].failure(),
        Some(Failure::CompletionTimeout { .. })
    ));
}

/// An agent that answers before the first poll still lands its line: the
/// channel directory exists by the time the command is submitted.
#[test]
fn immediate_answer_into_fresh_log_directory_is_seen() {
    let harness = Harness::new();
    assert!(!harness.log_path.parent().expect("parent").exists());
    let agent = harness.agent(vec![AgentStep::completes_after(Duration::from_millis(10))]);
    let dispatcher = Dispatcher::new(&harness.locator, &agent, query());
    let mut channel = LogChannel::new(&harness.log_path);
    let mut runner = runner("conv-fast", &["A"]);

    let result = runner
        .run(&mut channel, &dispatcher, &harness.clock, &harness.settings(), |_| {})
        .expect("run");

    assert_eq!(result.status, ConversationStatus::Completed);
    assert_eq!(result.records[0].elapsed_ms, 1000);
}
