//! Side-effecting collaborators: the log file, desktop tools, config and
//! transcripts.

pub mod config;
pub mod conversation_file;
pub mod desktop;
pub mod effector;
pub mod log_channel;
pub mod process;
pub mod transcript;
