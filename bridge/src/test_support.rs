//! Test-only collaborators: a virtual clock and scripted desktop doubles.
//!
//! [`ScriptedAgent`] plays the external agent. It records every effector call
//! and, on each submit, schedules the next [`AgentStep`]'s writes to the log
//! file on the [`VirtualClock`], relative to the submit time.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::marker::COMPLETION_TAG;
use crate::io::desktop::{WindowHandle, WindowLocator, WindowQuery};
use crate::io::effector::InputEffector;
use crate::wait::Clock;

type Action = Box<dyn FnOnce()>;

/// Deterministic clock: `sleep` advances time instantly and runs any actions
/// scheduled up to the new time, in schedule order.
#[derive(Default)]
pub struct VirtualClock {
    now: Cell<Duration>,
    seq: Cell<u64>,
    pending: RefCell<Vec<(Duration, u64, Action)>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` once virtual time reaches `when`.
    pub fn at(&self, when: Duration, action: impl FnOnce() + 'static) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.pending.borrow_mut().push((when, seq, Box::new(action)));
    }

    fn run_due(&self) {
        let now = self.now.get();
        let mut due = {
            let mut pending = self.pending.borrow_mut();
            let (due, rest): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|(when, _, _)| *when <= now);
            *pending = rest;
            due
        };
        due.sort_by_key(|(when, seq, _)| (*when, *seq));
        for (_, _, action) in due {
            action();
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
        self.run_due();
    }
}

/// What the scripted agent does after one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStep {
    /// Never writes anything.
    Silent,
    /// Appends the completion line found in the submitted text after `delay`.
    Complete { delay: Duration },
    /// Appends each text at its delay after submission, verbatim.
    Write(Vec<(Duration, String)>),
}

impl AgentStep {
    pub fn completes_after(delay: Duration) -> Self {
        Self::Complete { delay }
    }

    pub fn writes(delay: Duration, text: &str) -> Self {
        Self::Write(vec![(delay, text.to_string())])
    }
}

/// Scripted stand-in for the effector and the agent behind it.
pub struct ScriptedAgent<'a> {
    clock: &'a VirtualClock,
    log_path: PathBuf,
    steps: RefCell<VecDeque<AgentStep>>,
    fail_on: Option<&'static str>,
    typed: RefCell<Option<String>>,
    actions: RefCell<Vec<String>>,
    submitted: RefCell<Vec<String>>,
    submit_times: RefCell<Vec<Duration>>,
}

impl<'a> ScriptedAgent<'a> {
    pub fn new(clock: &'a VirtualClock, log_path: impl AsRef<Path>, steps: Vec<AgentStep>) -> Self {
        Self {
            clock,
            log_path: log_path.as_ref().to_path_buf(),
            steps: RefCell::new(steps.into()),
            fail_on: None,
            typed: RefCell::new(None),
            actions: RefCell::new(Vec::new()),
            submitted: RefCell::new(Vec::new()),
            submit_times: RefCell::new(Vec::new()),
        }
    }

    /// Make the named step (`focus`, `clear`, `type`, `submit`) fail every time.
    pub fn failing_on(mut self, step: &'static str) -> Self {
        self.fail_on = Some(step);
        self
    }

    /// Successful effector calls as `"<step> <window id>"`.
    pub fn actions(&self) -> Vec<String> {
        self.actions.borrow().clone()
    }

    /// Full texts that were submitted, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.borrow().clone()
    }

    /// Virtual time of each submission.
    pub fn submit_times(&self) -> Vec<Duration> {
        self.submit_times.borrow().clone()
    }

    fn record(&self, step: &'static str, window: &WindowHandle) -> Result<()> {
        if self.fail_on == Some(step) {
            return Err(anyhow!("scripted {step} failure"));
        }
        self.actions.borrow_mut().push(format!("{step} {}", window.id));
        Ok(())
    }

    fn schedule(&self, text: &str) {
        let step = self
            .steps
            .borrow_mut()
            .pop_front()
            .unwrap_or(AgentStep::Silent);
        let writes = match step {
            AgentStep::Silent => Vec::new(),
            AgentStep::Complete { delay } => completion_line(text)
                .map(|line| vec![(delay, format!("{line}\n"))])
                .unwrap_or_default(),
            AgentStep::Write(writes) => writes,
        };
        let now = self.clock.now();
        for (delay, content) in writes {
            let path = self.log_path.clone();
            self.clock
                .at(now + delay, move || append_to(&path, &content));
        }
    }
}

impl InputEffector for ScriptedAgent<'_> {
    fn focus(&self, window: &WindowHandle) -> Result<()> {
        self.record("focus", window)
    }

    fn clear_input_field(&self, window: &WindowHandle) -> Result<()> {
        self.record("clear", window)?;
        self.typed.borrow_mut().take();
        Ok(())
    }

    fn type_text(&self, window: &WindowHandle, text: &str) -> Result<()> {
        self.record("type", window)?;
        *self.typed.borrow_mut() = Some(text.to_string());
        Ok(())
    }

    fn submit(&self, window: &WindowHandle) -> Result<()> {
        self.record("submit", window)?;
        let text = self.typed.borrow_mut().take().unwrap_or_default();
        self.submit_times.borrow_mut().push(self.clock.now());
        self.schedule(&text);
        self.submitted.borrow_mut().push(text);
        Ok(())
    }
}

fn completion_line(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with(COMPLETION_TAG))
}

/// Locator over a fixed window list that can start failing after a number
/// of successful lookups.
pub struct ScriptedLocator {
    windows: Vec<WindowHandle>,
    calls: Cell<usize>,
    fail_from: Option<(usize, String)>,
}

impl ScriptedLocator {
    pub fn new(windows: Vec<WindowHandle>) -> Self {
        Self {
            windows,
            calls: Cell::new(0),
            fail_from: None,
        }
    }

    /// Every lookup fails with `message`.
    pub fn broken(message: &str) -> Self {
        Self::new(Vec::new()).failing_from(0, message)
    }

    /// Lookups succeed `ok_calls` times, then fail with `message`.
    pub fn failing_from(mut self, ok_calls: usize, message: &str) -> Self {
        self.fail_from = Some((ok_calls, message.to_string()));
        self
    }
}

impl WindowLocator for ScriptedLocator {
    fn find(&self, query: &WindowQuery) -> Result<Option<WindowHandle>> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if let Some((ok_calls, message)) = &self.fail_from
            && call >= *ok_calls
        {
            return Err(anyhow!("{message}"));
        }
        Ok(query.select(&self.windows).cloned())
    }
}

/// Build a window handle with the given geometry.
pub fn window(id: &str, title: &str, width: u32, height: u32) -> WindowHandle {
    WindowHandle {
        id: id.to_string(),
        title: title.to_string(),
        width,
        height,
    }
}

/// Fresh temp directory plus a log path inside a `logs/` subdirectory that
/// does not exist yet. Keep the directory alive for the test's duration.
pub fn temp_log() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("logs").join("agent_responses.log");
    (dir, path)
}

/// Append `text` to `path`, creating the file if needed.
pub fn append_to(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log for append");
    file.write_all(text.as_bytes()).expect("append to log");
}
