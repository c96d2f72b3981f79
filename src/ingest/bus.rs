//! Bus messages and the recovery policy applied to them.

use super::graph::PipelineState;

/// Backend-neutral bus message.
#[derive(Clone, Debug, PartialEq)]
pub enum BusEvent {
    Error {
        source: String,
        message: String,
        debug: Option<String>,
    },
    Warning {
        source: String,
        message: String,
        debug: Option<String>,
    },
    Eos,
    StateChanged {
        old: PipelineState,
        new: PipelineState,
        pending: PipelineState,
        /// Whether the message came from the pipeline itself.
        top_level: bool,
    },
}

/// What the bus pump does after a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusAction {
    Continue,
    /// Leave the pump; teardown follows and reconnect unless the user stopped.
    Unwind,
    /// Bounce `Null -> Playing` in place.
    Bounce,
}

/// Recovery policy for one run.
///
/// Warnings get at most one in-place bounce per run. Errors and end of
/// stream always unwind. A failed bounce is reported back through
/// [`bounce_failed`](Self::bounce_failed) and unwinds on the next cycle.
#[derive(Debug)]
pub struct RecoveryPolicy {
    soft_recovery: bool,
    bounced: bool,
    escalate: bool,
}

impl RecoveryPolicy {
    pub fn new(soft_recovery: bool) -> Self {
        Self {
            soft_recovery,
            bounced: false,
            escalate: false,
        }
    }

    pub fn decide(&mut self, event: &BusEvent) -> BusAction {
        match event {
            BusEvent::Error {
                source,
                message,
                debug,
            } => {
                log::error!(
                    "bus error from {source}: {message} ({})",
                    debug.as_deref().unwrap_or("no debug info")
                );
                BusAction::Unwind
            }
            BusEvent::Eos => {
                log::info!("end of stream");
                BusAction::Unwind
            }
            BusEvent::Warning {
                source,
                message,
                debug,
            } => {
                log::warn!(
                    "bus warning from {source}: {message} ({})",
                    debug.as_deref().unwrap_or("no debug info")
                );
                if self.soft_recovery && !self.bounced {
                    self.bounced = true;
                    BusAction::Bounce
                } else {
                    BusAction::Continue
                }
            }
            BusEvent::StateChanged {
                old,
                new,
                pending,
                top_level,
            } => {
                if *top_level {
                    log::info!("pipeline state {old} -> {new} (pending {pending})");
                }
                BusAction::Continue
            }
        }
    }

    pub fn bounce_failed(&mut self) {
        self.escalate = true;
    }

    /// Checked once per bus cycle, including empty polls.
    pub fn take_escalation(&mut self) -> bool {
        std::mem::take(&mut self.escalate)
    }
}
