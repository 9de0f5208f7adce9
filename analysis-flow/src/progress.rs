//! Narrated processing stages shown while the real analysis call is in flight.
//!
//! None of these stages do any work. The simulator only moves a cursor over
//! them; the runner decides when to stop it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cadence at which the simulated pipeline advances.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Processing,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStep {
    pub key: String,
    pub title: String,
    pub description: String,
    pub status: StepStatus,
}

impl ProcessingStep {
    pub fn new(key: &str, title: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: StepStatus::Pending,
        }
    }
}

/// The six narrated stages, all pending.
pub fn default_steps() -> Vec<ProcessingStep> {
    vec![
        ProcessingStep::new("upload", "Upload", "Receiving and encoding your document"),
        ProcessingStep::new("auto_clean", "Auto-Clean", "Straightening and cleaning page images"),
        ProcessingStep::new("ocr", "OCR", "Reading printed and handwritten text"),
        ProcessingStep::new("chunking", "Chunking", "Splitting the document into sections"),
        ProcessingStep::new("ai_analysis", "AI Analysis", "Extracting facts, fees and to-dos"),
        ProcessingStep::new("quality_review", "Quality Review", "Checking citations and results"),
    ]
}

pub fn all_complete(steps: &[ProcessingStep]) -> bool {
    steps.iter().all(|s| s.status == StepStatus::Complete)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SimulatorPhase {
    Idle,
    Advancing { cursor: usize },
    Settled,
    Aborted,
}

/// Cursor over a list of steps. At most one step is `Processing` at any time.
#[derive(Debug, Clone)]
pub struct ProgressSimulator {
    steps: Vec<ProcessingStep>,
    phase: SimulatorPhase,
}

impl ProgressSimulator {
    pub fn new(mut steps: Vec<ProcessingStep>) -> Self {
        for step in &mut steps {
            step.status = StepStatus::Pending;
        }
        Self {
            steps,
            phase: SimulatorPhase::Idle,
        }
    }

    pub fn steps(&self) -> &[ProcessingStep] {
        &self.steps
    }

    pub fn phase(&self) -> SimulatorPhase {
        self.phase
    }

    pub fn start(&mut self) {
        if self.phase != SimulatorPhase::Idle {
            return;
        }
        match self.steps.first_mut() {
            Some(first) => {
                first.status = StepStatus::Processing;
                self.phase = SimulatorPhase::Advancing { cursor: 0 };
            }
            None => self.phase = SimulatorPhase::Settled,
        }
    }

    /// Complete the current step and start the next one.
    ///
    /// Returns `false` when nothing changed: the simulator is not advancing, or
    /// it is parked on the last step waiting for the real result.
    pub fn tick(&mut self) -> bool {
        let SimulatorPhase::Advancing { cursor } = self.phase else {
            return false;
        };
        if cursor + 1 >= self.steps.len() {
            return false;
        }

        self.steps[cursor].status = StepStatus::Complete;
        self.steps[cursor + 1].status = StepStatus::Processing;
        self.phase = SimulatorPhase::Advancing { cursor: cursor + 1 };
        true
    }

    /// Force every step to `Complete`. Used once the real result is known.
    pub fn settle(&mut self) {
        if self.phase == SimulatorPhase::Aborted {
            return;
        }
        for step in &mut self.steps {
            step.status = StepStatus::Complete;
        }
        self.phase = SimulatorPhase::Settled;
    }

    pub fn abort(&mut self) {
        if self.phase != SimulatorPhase::Settled {
            self.phase = SimulatorPhase::Aborted;
        }
    }

    pub fn completed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Complete)
            .count()
    }

    pub fn is_parked(&self) -> bool {
        matches!(self.phase, SimulatorPhase::Advancing { cursor } if cursor + 1 == self.steps.len())
    }
}
