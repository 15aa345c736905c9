//! Polling the log channel until a command's marker shows up.
//!
//! The waiter is the only part of the protocol that suspends. It sleeps
//! through a [`Clock`], so callers can substitute a virtual clock in tests or
//! a cancellable one in a larger system.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::ids::CommandId;
use crate::core::marker::Marker;
use crate::core::types::{CompletionRecord, Failure, duration_ms};
use crate::io::log_channel::LogChannel;

/// Longest unterminated line kept between polls of a single wait.
const MAX_CARRY_BYTES: usize = 64 * 1024;

/// Monotonic time source plus the sleep used between polls.
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`thread::sleep`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Progress notification emitted after every poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitProgress {
    pub command_id: CommandId,
    pub elapsed: Duration,
    pub deadline: Duration,
    /// Bytes consumed from the channel by this poll.
    pub new_bytes: usize,
}

/// Sleep-poll loop over a [`LogChannel`].
pub struct CompletionWaiter<'a, C: Clock> {
    clock: &'a C,
    poll_interval: Duration,
}

impl<'a, C: Clock> CompletionWaiter<'a, C> {
    pub fn new(clock: &'a C, poll_interval: Duration) -> Self {
        Self {
            clock,
            poll_interval,
        }
    }

    /// Wait for `marker` in content appended to `channel` from now on.
    ///
    /// Returns as soon as the marker is seen. Content without the marker is
    /// consumed and ignored. The deadline is fixed up front; channel activity
    /// never extends it. A channel read error ends the wait as
    /// [`Failure::MalformedChannel`].
    pub fn wait<F: FnMut(&WaitProgress)>(
        &self,
        channel: &mut LogChannel,
        marker: &Marker,
        deadline: Duration,
        mut on_progress: F,
    ) -> CompletionRecord {
        let command_id = marker.command_id();
        let start = self.clock.now();
        let mut carry: Vec<u8> = Vec::new();
        debug!(%command_id, token = marker.token(), deadline_ms = duration_ms(deadline), "waiting for marker");

        loop {
            let remaining = deadline.saturating_sub(self.elapsed_since(start));
            self.clock.sleep(self.poll_interval.min(remaining));
            let elapsed = self.elapsed_since(start);

            let fresh = match channel.poll_once() {
                Ok(fresh) => fresh,
                Err(err) => {
                    warn!(%command_id, err = %format!("{err:#}"), "log channel unreadable");
                    return CompletionRecord::failed(
                        command_id,
                        Failure::MalformedChannel {
                            reason: format!("{err:#}"),
                        },
                        elapsed,
                    );
                }
            };
            on_progress(&WaitProgress {
                command_id,
                elapsed,
                deadline,
                new_bytes: fresh.len(),
            });

            if !fresh.is_empty() {
                carry.extend_from_slice(&fresh);
                let text = String::from_utf8_lossy(&carry);
                if let Some(line) = marker.find_line(&text) {
                    info!(%command_id, elapsed_ms = duration_ms(elapsed), "completion marker found");
                    return CompletionRecord::completed(command_id, line.to_string(), elapsed);
                }
                carry = unterminated_tail(carry);
            }

            if elapsed >= deadline {
                warn!(%command_id, elapsed_ms = duration_ms(elapsed), "completion timed out");
                return CompletionRecord::failed(
                    command_id,
                    Failure::CompletionTimeout {
                        waited_ms: duration_ms(elapsed),
                    },
                    elapsed,
                );
            }
        }
    }

    fn elapsed_since(&self, start: Duration) -> Duration {
        self.clock.now().saturating_sub(start)
    }
}

/// Keep only the bytes after the last newline, capped at [`MAX_CARRY_BYTES`].
fn unterminated_tail(mut buf: Vec<u8>) -> Vec<u8> {
    let start = buf
        .iter()
        .rposition(|&byte| byte == b'\n')
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let start = start.max(buf.len().saturating_sub(MAX_CARRY_BYTES));
    buf.drain(..start);
    buf
}
