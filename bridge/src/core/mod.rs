//! Deterministic, pure logic for the completion protocol.
//!
//! Core modules must be free of I/O side effects: identities, marker
//! matching, envelope rendering and the shared outcome types.

pub mod envelope;
pub mod ids;
pub mod marker;
pub mod types;
