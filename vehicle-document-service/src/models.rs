use analysis_flow::{AnalysisResult, FailureNotice, ProcessingStep, Session};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub state: String,
    pub is_loading: bool,
    pub file_name: Option<String>,
    pub job_id: Option<String>,
    pub steps: Vec<ProcessingStep>,
    pub result: Option<AnalysisResult>,
    pub error: Option<FailureNotice>,
    pub notices: Vec<FailureNotice>,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        let presentation = &session.presentation;
        Self {
            session_id: session.id.clone(),
            state: presentation.name().to_string(),
            is_loading: presentation.is_loading(),
            file_name: presentation.file_name().map(str::to_string),
            job_id: presentation.job_id().map(|job| job.to_string()),
            steps: presentation.steps().to_vec(),
            result: presentation.result().cloned(),
            error: presentation.notice().cloned(),
            notices: session.notices.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub job_id: String,
    pub file_name: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreditsResponse {
    pub credits: i64,
    pub configured: bool,
}
