//! Delivering envelopes to the target window.
//!
//! Delivery is locate → focus → clear → type → submit, in that order, with
//! nothing in between. A failed step ends delivery; it is never retried
//! because a repeated instruction may repeat its side effects.

use anyhow::{Error, Result};
use tracing::{info, instrument, warn};

use crate::core::envelope::CommandEnvelope;
use crate::core::types::Failure;
use crate::io::desktop::{WindowHandle, WindowLocator, WindowQuery};
use crate::io::effector::InputEffector;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { window: WindowHandle },
    Failed(Failure),
}

/// Sends envelopes to the agent.
pub trait Dispatch {
    /// `Ok(Failed(..))` for expected failures (no window, step failed);
    /// `Err` only when the locator backend itself breaks.
    fn send(&self, envelope: &CommandEnvelope) -> Result<DispatchOutcome>;
}

/// Dispatcher composed from a window locator and an input effector.
pub struct Dispatcher<'a, L: WindowLocator, E: InputEffector> {
    locator: &'a L,
    effector: &'a E,
    query: WindowQuery,
}

impl<'a, L: WindowLocator, E: InputEffector> Dispatcher<'a, L, E> {
    pub fn new(locator: &'a L, effector: &'a E, query: WindowQuery) -> Self {
        Self {
            locator,
            effector,
            query,
        }
    }

    fn deliver(&self, window: &WindowHandle, text: &str) -> Result<(), (&'static str, Error)> {
        self.effector.focus(window).map_err(|err| ("focus", err))?;
        self.effector
            .clear_input_field(window)
            .map_err(|err| ("clear", err))?;
        self.effector
            .type_text(window, text)
            .map_err(|err| ("type", err))?;
        self.effector.submit(window).map_err(|err| ("submit", err))?;
        Ok(())
    }
}

impl<L: WindowLocator, E: InputEffector> Dispatch for Dispatcher<'_, L, E> {
    #[instrument(skip_all, fields(command_id = %envelope.command_id()))]
    fn send(&self, envelope: &CommandEnvelope) -> Result<DispatchOutcome> {
        let Some(window) = self.locator.find(&self.query)? else {
            warn!(query = %self.query, "target window not found");
            return Ok(DispatchOutcome::Failed(Failure::TargetNotFound {
                query: self.query.to_string(),
            }));
        };

        let text = envelope.text();
        if let Err((step, err)) = self.deliver(&window, &text) {
            warn!(step, window = %window.id, err = %format!("{err:#}"), "delivery failed");
            return Ok(DispatchOutcome::Failed(Failure::DeliveryFailure {
                step: step.to_string(),
                reason: format!("{err:#}"),
            }));
        }

        info!(window = %window.id, title = %window.title, len = text.len(), "envelope delivered");
        Ok(DispatchOutcome::Delivered { window })
    }
}
