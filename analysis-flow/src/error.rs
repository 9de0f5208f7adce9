use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by session bookkeeping and the presentation state machine
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlowError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("Job {0} is no longer current")]
    StaleJob(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// Input rejected before any model call is made
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("document URI must start with 'data:'")]
    MissingDataPrefix,

    #[error("document URI has no MIME type")]
    MissingMimeType,

    #[error("document URI has a malformed MIME type: {0}")]
    InvalidMimeType(String),

    #[error("document URI must use base64 encoding")]
    NotBase64Encoded,

    #[error("document URI has an empty payload")]
    EmptyPayload,

    #[error("document payload is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("document is empty")]
    EmptyDocument,

    #[error("unsupported document type: {0} (accepted: PDF, PNG, JPEG, WebP)")]
    UnsupportedMimeType(String),

    #[error("document is {size} bytes, limit is {limit} bytes")]
    FileTooLarge { size: usize, limit: usize },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("no file was provided")]
    MissingFile,
}

/// Failure of the transport to the hosted model
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ModelError(pub String);

impl ModelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("could not read document: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("model contract violation: {0}")]
    ContractViolation(String),

    #[error("model call failed: {0}")]
    Transport(#[from] ModelError),
}

impl AnalysisError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalysisError::Io(_) => FailureKind::Io,
            AnalysisError::Validation(_) => FailureKind::Validation,
            AnalysisError::ContractViolation(_) => FailureKind::ContractViolation,
            AnalysisError::Transport(_) => FailureKind::Transport,
        }
    }

    /// Collapse any error into the notice shown to the user.
    ///
    /// Validation and read errors are specific enough to show verbatim. Model-side
    /// failures are reported generically; the detail stays in the logs.
    pub fn notice(&self) -> FailureNotice {
        let description = match self {
            AnalysisError::Io(e) => format!("The file could not be read ({e}). Please try again."),
            AnalysisError::Validation(e) => format!("{}.", capitalize(&e.to_string())),
            AnalysisError::ContractViolation(_) | AnalysisError::Transport(_) => {
                "Failed to process the document. Please try again.".to_string()
            }
        };

        FailureNotice {
            kind: self.kind(),
            title: "An error occurred.".to_string(),
            description,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CreditError {
    #[error("credit store unavailable: {0}")]
    Unavailable(String),

    #[error("credit document is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Io,
    Validation,
    ContractViolation,
    Transport,
    InsufficientCredits,
}

/// The one user-facing failure notification every error is turned into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub kind: FailureKind,
    pub title: String,
    pub description: String,
}

impl FailureNotice {
    pub fn insufficient_credits() -> Self {
        Self {
            kind: FailureKind::InsufficientCredits,
            title: "Out of processing credits.".to_string(),
            description: "No processing credits remain. Please try again later.".to_string(),
        }
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_failures_are_reported_generically() {
        let error = AnalysisError::Transport(ModelError::new("upstream 503"));
        let notice = error.notice();

        assert_eq!(notice.kind, FailureKind::Transport);
        assert!(!notice.description.contains("503"));

        let violation = AnalysisError::ContractViolation("missing field `keyFacts`".into());
        assert_eq!(violation.notice().description, notice.description);
    }

    #[test]
    fn validation_notice_keeps_the_reason() {
        let error = AnalysisError::from(ValidationError::UnsupportedMimeType("text/plain".into()));
        let notice = error.notice();

        assert_eq!(notice.kind, FailureKind::Validation);
        assert!(notice.description.starts_with("Unsupported document type: text/plain"));
    }
}
