use serde::{Deserialize, Serialize};

use crate::{
    contract::AnalysisResult,
    error::{FailureNotice, FlowError, Result},
    job::JobId,
    progress::{ProcessingStep, StepStatus},
};

/// What a client should render for one session.
///
/// A result and an in-flight simulation never coexist: `Running` has no result,
/// and `Succeeded` only ever holds completed steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Presentation {
    #[default]
    Idle,
    AwaitingUpload {
        file_name: String,
    },
    Running {
        job_id: JobId,
        file_name: String,
        steps: Vec<ProcessingStep>,
    },
    Succeeded {
        job_id: JobId,
        file_name: String,
        steps: Vec<ProcessingStep>,
        result: AnalysisResult,
    },
    Failed {
        file_name: Option<String>,
        notice: FailureNotice,
    },
}

impl Presentation {
    pub fn name(&self) -> &'static str {
        match self {
            Presentation::Idle => "idle",
            Presentation::AwaitingUpload { .. } => "awaiting_upload",
            Presentation::Running { .. } => "running",
            Presentation::Succeeded { .. } => "succeeded",
            Presentation::Failed { .. } => "failed",
        }
    }

    /// A file was picked and is being read. A failed attempt can be retried directly.
    pub fn select_file(&mut self, file_name: impl Into<String>) -> Result<()> {
        match self {
            Presentation::Idle
            | Presentation::AwaitingUpload { .. }
            | Presentation::Failed { .. } => {
                *self = Presentation::AwaitingUpload {
                    file_name: file_name.into(),
                };
                Ok(())
            }
            _ => Err(self.invalid("select a file")),
        }
    }

    /// The file could not be read or encoded; the submission is halted.
    pub fn upload_failed(&mut self, notice: FailureNotice) -> Result<()> {
        match self {
            Presentation::AwaitingUpload { file_name } => {
                *self = Presentation::Failed {
                    file_name: Some(std::mem::take(file_name)),
                    notice,
                };
                Ok(())
            }
            _ => Err(self.invalid("report an upload failure")),
        }
    }

    pub fn start(&mut self, job_id: JobId, steps: Vec<ProcessingStep>) -> Result<()> {
        match self {
            Presentation::AwaitingUpload { file_name } => {
                *self = Presentation::Running {
                    job_id,
                    file_name: std::mem::take(file_name),
                    steps,
                };
                Ok(())
            }
            _ => Err(self.invalid("start an analysis")),
        }
    }

    pub fn advance(&mut self, job: &JobId, new_steps: &[ProcessingStep]) -> Result<()> {
        match self {
            Presentation::Running { job_id, steps, .. } if *job_id == *job => {
                steps.clear();
                steps.extend_from_slice(new_steps);
                Ok(())
            }
            _ => Err(FlowError::StaleJob(job.to_string())),
        }
    }

    /// Show the result. Any step not yet complete is completed here.
    pub fn succeed(&mut self, job: &JobId, result: AnalysisResult) -> Result<()> {
        match self {
            Presentation::Running {
                job_id,
                file_name,
                steps,
            } if *job_id == *job => {
                let mut steps = std::mem::take(steps);
                for step in &mut steps {
                    step.status = StepStatus::Complete;
                }
                *self = Presentation::Succeeded {
                    job_id: job_id.clone(),
                    file_name: std::mem::take(file_name),
                    steps,
                    result,
                };
                Ok(())
            }
            _ => Err(FlowError::StaleJob(job.to_string())),
        }
    }

    pub fn fail(&mut self, job: &JobId, notice: FailureNotice) -> Result<()> {
        match self {
            Presentation::Running {
                job_id, file_name, ..
            } if *job_id == *job => {
                *self = Presentation::Failed {
                    file_name: Some(std::mem::take(file_name)),
                    notice,
                };
                Ok(())
            }
            _ => Err(FlowError::StaleJob(job.to_string())),
        }
    }

    /// Back to `Idle` from anywhere. Returns the job that was running, if any,
    /// so the caller can stop its timer.
    pub fn reset(&mut self) -> Option<JobId> {
        match std::mem::take(self) {
            Presentation::Running { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            Presentation::AwaitingUpload { .. } | Presentation::Running { .. }
        )
    }

    pub fn running_job(&self) -> Option<&JobId> {
        match self {
            Presentation::Running { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Presentation::Running { job_id, .. } | Presentation::Succeeded { job_id, .. } => {
                Some(job_id)
            }
            _ => None,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            Presentation::AwaitingUpload { file_name }
            | Presentation::Running { file_name, .. }
            | Presentation::Succeeded { file_name, .. } => Some(file_name),
            Presentation::Failed { file_name, .. } => file_name.as_deref(),
            Presentation::Idle => None,
        }
    }

    pub fn steps(&self) -> &[ProcessingStep] {
        match self {
            Presentation::Running { steps, .. } | Presentation::Succeeded { steps, .. } => steps,
            _ => &[],
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            Presentation::Succeeded { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn notice(&self) -> Option<&FailureNotice> {
        match self {
            Presentation::Failed { notice, .. } => Some(notice),
            _ => None,
        }
    }

    fn invalid(&self, action: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            from: self.name(),
            action,
        }
    }
}
