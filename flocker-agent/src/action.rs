//! Structured action logging: an action is opened before its work starts
//! and closed - with a success or failure outcome - on every exit path.
//!
//! One call opens a `tracing` span and records the input fields; the
//! `succeeded`/`failed` methods record the outcome and close it.

use std::fmt::Debug;

use serde::Serialize;
use tracing::{span, Level, Span};

/// An in-flight structured action. Holds the `tracing` span open for the
/// duration of the work; dropping it without calling `succeeded`/`failed`
/// still closes the span, just without an explicit outcome field.
pub struct Action {
    span: Span,
    _entered: tracing::span::EnteredSpan,
}

impl Action {
    /// Open a new action named `action_type`, recording `input` as its
    /// starting fields.
    pub fn start(action_type: &'static str, input: impl Serialize + Debug) -> Self {
        let input_json = serde_json::to_string(&input).unwrap_or_else(|_| "null".to_string());
        let span = span!(Level::INFO, "action", action_type, input = %input_json);
        let entered = span.clone().entered();
        tracing::info!(action_type, input = ?input, "action started");
        Self {
            span,
            _entered: entered,
        }
    }

    /// Close the action successfully, recording `output`.
    pub fn succeeded(self, output: impl Serialize + Debug) {
        let _guard = self.span.enter();
        tracing::info!(outcome = "success", output = ?output, "action finished");
    }

    /// Close the action with a failure, recording `error`'s `Display`
    /// form.
    pub fn failed(self, error: &impl std::fmt::Display) {
        let _guard = self.span.enter();
        tracing::error!(outcome = "failure", error = %error, "action finished");
    }
}
