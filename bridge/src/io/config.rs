//! Bridge configuration stored under `.bridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::envelope::{DirectiveTemplate, EnvelopeSettings};
use crate::core::marker::{DEFAULT_MARKER_PREFIX, validate_marker_prefix};
use crate::io::desktop::{CommandWindowLocator, WindowQuery};
use crate::io::effector::{CommandEffector, EffectorCommands};

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".bridge/config.toml";

/// Bridge configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Shared file the agent appends completion lines to.
    pub log_path: PathBuf,

    /// Delay between two reads of the log channel.
    pub poll_interval_ms: u64,

    /// Per-command completion deadline unless the command sets its own.
    pub default_timeout_secs: u64,

    /// Pause after a confirmed command before dispatching the next one.
    pub pause_between_commands_ms: u64,

    /// Marker token prefix: the agent writes `<prefix>_<command id>`.
    pub marker_prefix: String,

    /// Optional minijinja template replacing the built-in completion directive.
    pub directive_template: Option<String>,

    /// Directory for per-conversation `result.json` transcripts.
    pub transcript_dir: PathBuf,

    pub window: WindowConfig,

    pub effector: EffectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowConfig {
    /// Case-insensitive title substrings identifying the target window.
    pub title_contains: Vec<String>,
    pub min_width: u32,
    pub min_height: u32,
    /// Window listing command; output must follow the `wmctrl -lG` layout.
    pub list_command: Vec<String>,
    pub list_timeout_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title_contains: vec!["claude".to_string(), "untitled".to_string()],
            min_width: 500,
            min_height: 400,
            list_command: strings(&["wmctrl", "-lG"]),
            list_timeout_secs: 10,
        }
    }
}

/// Commands for each input step. `{window}` is replaced with the window id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EffectorConfig {
    pub focus: Vec<String>,
    pub clear: Vec<String>,
    /// Receives the full envelope text on stdin.
    pub type_text: Vec<String>,
    pub submit: Vec<String>,
    pub step_timeout_secs: u64,
}

impl Default for EffectorConfig {
    fn default() -> Self {
        Self {
            focus: strings(&["xdotool", "windowactivate", "--sync", "{window}"]),
            clear: strings(&[
                "xdotool",
                "key",
                "--clearmodifiers",
                "--window",
                "{window}",
                "ctrl+a",
                "BackSpace",
            ]),
            type_text: strings(&[
                "xdotool",
                "type",
                "--clearmodifiers",
                "--delay",
                "10",
                "--window",
                "{window}",
                "--file",
                "-",
            ]),
            submit: strings(&[
                "xdotool",
                "key",
                "--clearmodifiers",
                "--window",
                "{window}",
                "Return",
            ]),
            step_timeout_secs: 120,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(".bridge/agent_responses.log"),
            poll_interval_ms: 3_000,
            default_timeout_secs: 180,
            pause_between_commands_ms: 2_000,
            marker_prefix: DEFAULT_MARKER_PREFIX.to_string(),
            directive_template: None,
            transcript_dir: PathBuf::from(".bridge/conversations"),
            window: WindowConfig::default(),
            effector: EffectorConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_path.as_os_str().is_empty() {
            return Err(anyhow!("log_path must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.default_timeout_secs == 0 {
            return Err(anyhow!("default_timeout_secs must be > 0"));
        }
        validate_marker_prefix(&self.marker_prefix)?;
        if let Some(template) = &self.directive_template {
            DirectiveTemplate::custom(template.clone()).context("directive_template")?;
        }
        if self.transcript_dir.as_os_str().is_empty() {
            return Err(anyhow!("transcript_dir must not be empty"));
        }
        ensure_command("window.list_command", &self.window.list_command)?;
        if self.window.list_timeout_secs == 0 {
            return Err(anyhow!("window.list_timeout_secs must be > 0"));
        }
        ensure_command("effector.focus", &self.effector.focus)?;
        ensure_command("effector.clear", &self.effector.clear)?;
        ensure_command("effector.type_text", &self.effector.type_text)?;
        ensure_command("effector.submit", &self.effector.submit)?;
        if self.effector.step_timeout_secs == 0 {
            return Err(anyhow!("effector.step_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn pause_between_commands(&self) -> Duration {
        Duration::from_millis(self.pause_between_commands_ms)
    }

    pub fn envelope_settings(&self) -> Result<EnvelopeSettings> {
        let template = match &self.directive_template {
            Some(source) => DirectiveTemplate::custom(source.clone())?,
            None => DirectiveTemplate::Builtin,
        };
        Ok(EnvelopeSettings {
            log_path: self.log_path.clone(),
            marker_prefix: self.marker_prefix.clone(),
            template,
        })
    }

    pub fn window_query(&self) -> WindowQuery {
        WindowQuery {
            title_contains: self.window.title_contains.clone(),
            min_width: self.window.min_width,
            min_height: self.window.min_height,
        }
    }

    pub fn window_locator(&self) -> CommandWindowLocator {
        CommandWindowLocator {
            list_command: self.window.list_command.clone(),
            timeout: Duration::from_secs(self.window.list_timeout_secs),
        }
    }

    pub fn effector(&self) -> CommandEffector {
        CommandEffector {
            commands: EffectorCommands {
                focus: self.effector.focus.clone(),
                clear: self.effector.clear.clone(),
                type_text: self.effector.type_text.clone(),
                submit: self.effector.submit.clone(),
            },
            step_timeout: Duration::from_secs(self.effector.step_timeout_secs),
        }
    }
}

fn ensure_command(name: &str, argv: &[String]) -> Result<()> {
    if argv.is_empty() || argv[0].trim().is_empty() {
        return Err(anyhow!("{name} must be a non-empty array"));
    }
    Ok(())
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BridgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        let cfg = BridgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BridgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BridgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
