//! Completion protocol for driving a UI-only agent through a shared log file.
//!
//! The bridge types an instruction into the agent's window together with a
//! directive to append a marker line to a shared file when done, then polls
//! that file until the marker appears. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (ids, markers, envelopes, outcome
//!   types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (log channel, desktop tools,
//!   config, transcripts). Behind traits where tests need doubles.
//!
//! Orchestration modules ([`dispatch`], [`wait`], [`conversation`],
//! [`session`]) combine the two to implement the CLI commands.

pub mod conversation;
pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod wait;
