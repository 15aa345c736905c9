//! Stable exit codes for bridge CLI commands.

/// Command succeeded; every command was confirmed.
pub const OK: i32 = 0;
/// Invalid config/conversation file or another hard error.
pub const INVALID: i32 = 1;
/// A command was delivered but its marker never appeared in time.
pub const TIMED_OUT: i32 = 2;
/// A command could not be delivered (no target window or input failure).
pub const UNDELIVERED: i32 = 3;
/// The log channel could not be read.
pub const CHANNEL_UNREADABLE: i32 = 4;
