//! Flow-control signals a step can return to its caller (spec §4.5 "flow
//! directives", §4.6 action/loop control flow).
//!
//! A [`FlowSignal`] is a first-class return value rather than a side
//! channel: `run_steps` stops the current step sequence the moment one is
//! produced and hands it back up, same as the teacher's `FrontierCommand`
//! interrupting normal edge-following.

use crate::program::{FlowDirective, JumpThen, RetryPolicy};
use crate::value::Value;

#[derive(Clone, Debug)]
pub enum FlowSignal {
    /// Abandon the remainder of the current action; no error recorded.
    Skip,
    /// Abandon the remainder of the current action and re-run it, after an
    /// optional backoff override.
    Retry { backoff: Option<RetryPolicy> },
    /// Abandon the remainder of the pipeline and resume at `target`.
    Jump { target: String, then: JumpThen },
    /// Push `value` onto `target`'s work queue (or the current action's,
    /// when `target` is `None`) for later processing.
    Queue { value: Value, target: Option<String> },
    /// Abort the whole mission run.
    Abort { message: Option<String> },
}

impl FlowSignal {
    /// Lifts a declared `FlowDirective` into a live signal, reading the
    /// value to enqueue (for `Queue`) from the current response register.
    /// `Continue` carries no signal — callers see `None` and keep running.
    #[must_use]
    pub fn from_directive(directive: &FlowDirective, current: Option<&Value>) -> Option<Self> {
        match directive {
            FlowDirective::Continue => None,
            FlowDirective::Skip => Some(FlowSignal::Skip),
            FlowDirective::Retry { backoff } => Some(FlowSignal::Retry { backoff: backoff.clone() }),
            FlowDirective::Jump { target, then } => Some(FlowSignal::Jump { target: target.clone(), then: *then }),
            FlowDirective::Queue { target } => {
                Some(FlowSignal::Queue { value: current.cloned().unwrap_or(Value::Null), target: target.clone() })
            }
            FlowDirective::Abort { message } => Some(FlowSignal::Abort { message: message.clone() }),
        }
    }
}
