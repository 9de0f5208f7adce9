pub mod analyzer;
pub mod contract;
pub mod credits;
pub mod data_uri;
pub mod error;
pub mod job;
pub mod model;
pub mod presentation;
pub mod progress;
pub mod prompt;
pub mod request;
pub mod runner;
pub mod storage;

// Re-export commonly used types
pub use analyzer::DocumentAnalyzer;
pub use contract::{
    AnalysisRequest, AnalysisResult, KeyFact, LegalClausesRequest, LegalClausesSummary, RiskOrFee,
    ToDoItem, UNPROCESSABLE_DOCUMENT_TYPE,
};
pub use credits::{CreditLedger, CreditStore, INITIAL_CREDITS, InMemoryCreditStore};
pub use data_uri::{DataUri, DocumentFormat};
pub use error::{
    AnalysisError, CreditError, FailureKind, FailureNotice, FlowError, ModelError, Result,
    ValidationError,
};
pub use job::JobId;
pub use model::GenerativeModel;
pub use presentation::Presentation;
pub use progress::{DEFAULT_TICK_INTERVAL, ProcessingStep, ProgressSimulator, StepStatus, default_steps};
pub use request::{DEFAULT_MAX_DOCUMENT_BYTES, DocumentUpload, RequestBuilder};
pub use runner::{AnalysisRunner, RunHandle, RunOutcome, apply_update};
pub use storage::{InMemorySessionStorage, Session, SessionStorage, SessionUpdate};
