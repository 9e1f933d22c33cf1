//! Error taxonomy for distribution runs.
//!
//! Fatal errors unwind the whole run; per-target outcomes that are not
//! fatal (skips, soft failures) travel as [`StepStatus`] values so callers
//! can render "not replacing existing package" distinctly from a failure.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal error raised by the distribution engine.
#[derive(Debug, Error)]
pub enum DistributionError {
    /// A retryable operation exhausted its attempt budget.
    #[error("{operation} failed after {attempts} attempts (last: {last_outcome})")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_outcome: String,
    },

    /// A named category does not exist on the server.
    #[error("category '{0}' does not exist on the server")]
    UnknownCategory(String),

    /// A required field was missing from a server response.
    #[error("missing '{field}' in {operation} response")]
    MissingResponseField {
        operation: &'static str,
        field: &'static str,
    },

    /// The local artifact does not exist.
    #[error("artifact not found: {0}")]
    ArtifactMissing(PathBuf),

    /// Configuration was rejected during the one-shot parse/validate step.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A non-retryable call returned an unexpected status.
    #[error("{operation} returned unexpected status {status}")]
    UnexpectedStatus { operation: &'static str, status: u16 },
}

/// Outcome of a single distribution step against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// Nothing needed doing (e.g. target already holds this content).
    Skipped { reason: String },
    /// The step completed and changed remote state (or verified it).
    Succeeded,
    /// The step failed for this target without aborting the run.
    Failed { reason: String },
}

impl StepStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StepStatus::Skipped {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        StepStatus::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StepStatus::Succeeded)
    }
}
