//! Input simulation against the target window.
//!
//! Each [`InputEffector`] method is one scoped action on an explicit
//! [`WindowHandle`]. [`CommandEffector`] maps the actions onto external tools
//! (default `xdotool`), substituting `{window}` with the handle id.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::desktop::WindowHandle;
use crate::io::process::run_tool;

const WINDOW_PLACEHOLDER: &str = "{window}";
const EFFECTOR_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Scoped input actions. Each call completes before it returns.
pub trait InputEffector {
    /// Raise and focus the window.
    fn focus(&self, window: &WindowHandle) -> Result<()>;
    /// Remove whatever text is already in the input field.
    fn clear_input_field(&self, window: &WindowHandle) -> Result<()>;
    /// Type `text` into the focused input field.
    fn type_text(&self, window: &WindowHandle, text: &str) -> Result<()>;
    /// Submit the typed text.
    fn submit(&self, window: &WindowHandle) -> Result<()>;
}

/// Argument vectors for each effector step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectorCommands {
    pub focus: Vec<String>,
    pub clear: Vec<String>,
    /// The text to type is written to this command's stdin.
    pub type_text: Vec<String>,
    pub submit: Vec<String>,
}

/// Effector that shells out to a desktop automation tool.
#[derive(Debug, Clone)]
pub struct CommandEffector {
    pub commands: EffectorCommands,
    pub step_timeout: Duration,
}

impl CommandEffector {
    fn run_step(
        &self,
        label: &str,
        argv: &[String],
        window: &WindowHandle,
        stdin: Option<&[u8]>,
    ) -> Result<()> {
        let argv = expand_window(argv, window);
        if argv.is_empty() {
            return Err(anyhow!("{label} command is not configured"));
        }
        let output = run_tool(&argv, stdin, self.step_timeout, EFFECTOR_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run {label} command"))?;
        output.ensure_success(label)?;
        debug!(step = label, window = %window.id, "effector step done");
        Ok(())
    }
}

impl InputEffector for CommandEffector {
    #[instrument(skip_all, fields(window = %window.id))]
    fn focus(&self, window: &WindowHandle) -> Result<()> {
        self.run_step("focus", &self.commands.focus, window, None)
    }

    #[instrument(skip_all, fields(window = %window.id))]
    fn clear_input_field(&self, window: &WindowHandle) -> Result<()> {
        self.run_step("clear", &self.commands.clear, window, None)
    }

    #[instrument(skip_all, fields(window = %window.id, len = text.len()))]
    fn type_text(&self, window: &WindowHandle, text: &str) -> Result<()> {
        self.run_step(
            "type",
            &self.commands.type_text,
            window,
            Some(text.as_bytes()),
        )
    }

    #[instrument(skip_all, fields(window = %window.id))]
    fn submit(&self, window: &WindowHandle) -> Result<()> {
        self.run_step("submit", &self.commands.submit, window, None)
    }
}

/// Replace every `{window}` occurrence in `argv` with the window id.
pub fn expand_window(argv: &[String], window: &WindowHandle) -> Vec<String> {
    argv.iter()
        .map(|arg| arg.replace(WINDOW_PLACEHOLDER, &window.id))
        .collect()
}
