//! AnalysisRunner – starts the real analysis call and the simulated progress
//! together, and reconciles them into one session.
//!
//! ## The race
//! Two things start at the same instant when [`AnalysisRunner::launch`] is called:
//! * the **analysis call**, spawned as its own task, and
//! * the **driver**, which owns a `tokio::time::interval` and advances a
//!   [`ProgressSimulator`] one step per tick.
//!
//! The driver waits on both with a `biased` `select!`, result first. That
//! gives a fixed reconciliation order:
//! * result before the last step: the timer is dropped, every step is forced
//!   to `complete`, the session moves to `Succeeded`;
//! * last step reached first: the simulator parks on it and the driver keeps
//!   waiting for the result;
//! * the call fails: the simulator is aborted, the session moves to `Failed`,
//!   and exactly one notice is recorded.
//!
//! ## Cancellation
//! [`RunHandle::cancel`] aborts the driver, which drops its timer. The
//! network call is left alone and resolves into the void: its result is
//! applied only if the session is still running the same job, which after a
//! reset it is not. A driver that is not cancelled notices the reset on its
//! next tick and stops by itself.
//!
//! ## Credits
//! Every successful model call consumes one credit, whether or not its result
//! is still wanted by the time it arrives.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::{
    analyzer::DocumentAnalyzer,
    contract::{AnalysisRequest, AnalysisResult},
    credits::CreditLedger,
    error::{AnalysisError, FlowError, ModelError, Result},
    job::JobId,
    progress::{DEFAULT_TICK_INTERVAL, ProcessingStep, ProgressSimulator, default_steps},
    storage::{Session, SessionStorage},
};

/// How a run ended, from the session's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed,
    /// The session moved on (reset, or the run was cancelled) before the run finished.
    Discarded,
}

/// Handle on a launched run
#[derive(Debug)]
pub struct RunHandle {
    job_id: JobId,
    driver: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Stop the progress timer. The in-flight model call is not cancelled.
    pub fn cancel(&self) {
        self.driver.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }

    pub async fn wait(self) -> RunOutcome {
        self.driver.await.unwrap_or(RunOutcome::Discarded)
    }
}

/// Launches analysis runs against sessions in a [`SessionStorage`].
#[derive(Clone)]
pub struct AnalysisRunner {
    analyzer: DocumentAnalyzer,
    storage: Arc<dyn SessionStorage>,
    credits: CreditLedger,
    tick_interval: Duration,
    steps: Vec<ProcessingStep>,
}

impl AnalysisRunner {
    pub fn new(
        analyzer: DocumentAnalyzer,
        storage: Arc<dyn SessionStorage>,
        credits: CreditLedger,
    ) -> Self {
        Self {
            analyzer,
            storage,
            credits,
            tick_interval: DEFAULT_TICK_INTERVAL,
            steps: default_steps(),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_steps(mut self, steps: Vec<ProcessingStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Move the session from `AwaitingUpload` to `Running` and start the race.
    pub async fn launch(&self, session_id: &str, request: AnalysisRequest) -> Result<RunHandle> {
        let job_id = JobId::mint();
        let mut simulator = ProgressSimulator::new(self.steps.clone());
        simulator.start();

        let job = job_id.clone();
        let steps = simulator.steps().to_vec();
        apply_update(self.storage.as_ref(), session_id, move |session: &mut Session| {
            session.presentation.start(job, steps)
        })
        .await?;

        info!(
            session_id = %session_id,
            job_id = %job_id,
            tick_ms = self.tick_interval.as_millis() as u64,
            "Analysis run started"
        );

        let analyzer = self.analyzer.clone();
        let credits = self.credits.clone();
        let analysis = tokio::spawn(async move {
            let outcome = analyzer.process_document(&request).await;
            if outcome.is_ok() {
                credits.decrement_credits().await;
            }
            outcome
        });

        let driver = tokio::spawn(drive(
            self.storage.clone(),
            session_id.to_string(),
            job_id.clone(),
            simulator,
            self.tick_interval,
            analysis,
        ));

        Ok(RunHandle { job_id, driver })
    }
}

async fn drive(
    storage: Arc<dyn SessionStorage>,
    session_id: String,
    job_id: JobId,
    mut simulator: ProgressSimulator,
    tick_interval: Duration,
    mut analysis: JoinHandle<std::result::Result<AnalysisResult, AnalysisError>>,
) -> RunOutcome {
    let mut ticker = tokio::time::interval_at(Instant::now() + tick_interval, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            biased;

            joined = &mut analysis => {
                break joined.unwrap_or_else(|e| {
                    Err(ModelError::new(format!("analysis task failed: {e}")).into())
                });
            }
            _ = ticker.tick() => {
                if !simulator.tick() {
                    continue;
                }
                let job = job_id.clone();
                let steps = simulator.steps().to_vec();
                let advanced = apply_update(storage.as_ref(), &session_id, move |session: &mut Session| {
                    session.presentation.advance(&job, &steps)
                })
                .await;

                if let Err(e) = advanced {
                    info!(
                        session_id = %session_id,
                        job_id = %job_id,
                        reason = %e,
                        "Session moved on, stopping progress simulation"
                    );
                    return RunOutcome::Discarded;
                }
            }
        }
    };
    drop(ticker);

    match outcome {
        Ok(result) => {
            simulator.settle();
            let job = job_id.clone();
            let applied = apply_update(storage.as_ref(), &session_id, move |session: &mut Session| {
                session.presentation.succeed(&job, result)
            })
            .await;

            match applied {
                Ok(()) => {
                    info!(session_id = %session_id, job_id = %job_id, "Analysis run succeeded");
                    RunOutcome::Succeeded
                }
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        job_id = %job_id,
                        reason = %e,
                        "Discarding analysis result"
                    );
                    RunOutcome::Discarded
                }
            }
        }
        Err(analysis_error) => {
            simulator.abort();
            error!(
                session_id = %session_id,
                job_id = %job_id,
                completed_steps = simulator.completed(),
                error = %analysis_error,
                "Analysis run failed"
            );

            let job = job_id.clone();
            let notice = analysis_error.notice();
            let applied = apply_update(storage.as_ref(), &session_id, move |session: &mut Session| {
                session.presentation.fail(&job, notice.clone())?;
                session.notify(notice);
                Ok(())
            })
            .await;

            match applied {
                Ok(()) => RunOutcome::Failed,
                Err(_) => RunOutcome::Discarded,
            }
        }
    }
}

/// Apply a transition to a stored session, mapping a missing session to an error.
pub async fn apply_update<'a>(
    storage: &dyn SessionStorage,
    session_id: &str,
    apply: impl FnOnce(&mut Session) -> Result<()> + Send + 'a,
) -> Result<()> {
    match storage.update(session_id, Box::new(apply)).await? {
        Some(outcome) => outcome,
        None => Err(FlowError::SessionNotFound(session_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::tests::INVOICE_REPLY;
    use crate::credits::{CreditStore, InMemoryCreditStore};
    use crate::data_uri::{DataUri, DocumentFormat};
    use crate::error::FailureKind;
    use crate::model::GenerativeModel;
    use crate::progress::StepStatus;
    use crate::storage::InMemorySessionStorage;
    use async_trait::async_trait;

    const TICK: Duration = Duration::from_millis(100);

    /// Answers after a fixed delay
    struct DelayedModel {
        delay: Duration,
        reply: std::result::Result<String, ModelError>,
    }

    #[async_trait]
    impl GenerativeModel for DelayedModel {
        async fn generate_with_document(
            &self,
            _instructions: &str,
            _document: &DataUri,
        ) -> std::result::Result<String, ModelError> {
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }

        async fn generate(&self, _instructions: &str) -> std::result::Result<String, ModelError> {
            self.reply.clone()
        }
    }

    struct Fixture {
        runner: AnalysisRunner,
        storage: Arc<InMemorySessionStorage>,
        credits: Arc<InMemoryCreditStore>,
    }

    async fn fixture(delay: Duration, reply: std::result::Result<&str, &str>) -> Fixture {
        let model = DelayedModel {
            delay,
            reply: reply.map(str::to_string).map_err(ModelError::new),
        };
        let storage = Arc::new(InMemorySessionStorage::new());
        let credits = Arc::new(InMemoryCreditStore::with_balance(5));

        let mut session = Session::new("s1");
        session.presentation.select_file("invoice.jpg").unwrap();
        storage.save(session).await.unwrap();

        let runner = AnalysisRunner::new(
            DocumentAnalyzer::new(Arc::new(model)),
            storage.clone(),
            CreditLedger::new(credits.clone()),
        )
        .with_tick_interval(TICK);

        Fixture {
            runner,
            storage,
            credits,
        }
    }

    fn request() -> AnalysisRequest {
        let uri = DataUri::encode(DocumentFormat::Jpeg, &[0xFF, 0xD8, 0xFF, 0xDB]).unwrap();
        AnalysisRequest::new(&uri)
    }

    async fn session(storage: &InMemorySessionStorage) -> Session {
        storage.get("s1").await.unwrap().unwrap()
    }

    fn completed(session: &Session) -> usize {
        session
            .presentation
            .steps()
            .iter()
            .filter(|s| s.status == StepStatus::Complete)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn result_at_tick_zero_completes_every_step() {
        let f = fixture(Duration::ZERO, Ok(INVOICE_REPLY)).await;

        let handle = f.runner.launch("s1", request()).await.unwrap();
        assert_eq!(handle.wait().await, RunOutcome::Succeeded);

        let session = session(&f.storage).await;
        assert_eq!(session.presentation.name(), "succeeded");
        assert_eq!(session.presentation.result().unwrap().document_type, "Invoice");
        assert_eq!(session.presentation.steps().len(), 6);
        assert!(
            session
                .presentation
                .steps()
                .iter()
                .all(|s| s.status == StepStatus::Complete)
        );
        assert!(session.notices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_three_steps_clears_loading_and_notifies_once() {
        let f = fixture(Duration::from_millis(350), Err("upstream timeout")).await;

        let handle = f.runner.launch("s1", request()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(320)).await;
        let midway = session(&f.storage).await;
        assert_eq!(completed(&midway), 3);
        assert!(midway.presentation.is_loading());

        assert_eq!(handle.wait().await, RunOutcome::Failed);
        let session = session(&f.storage).await;
        assert!(!session.presentation.is_loading());
        assert!(session.presentation.result().is_none());
        assert_eq!(session.notices.len(), 1);
        assert_eq!(session.notices[0].kind, FailureKind::Transport);

        tokio::time::sleep(TICK * 10).await;
        assert_eq!(self::session(&f.storage).await.notices.len(), 1);
        assert_eq!(f.credits.get_credits().await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn simulator_parks_on_the_last_step_until_the_result_arrives() {
        let f = fixture(Duration::from_millis(1_000), Ok(INVOICE_REPLY)).await;

        let handle = f.runner.launch("s1", request()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(850)).await;
        let parked = session(&f.storage).await;
        let steps = parked.presentation.steps();
        assert_eq!(completed(&parked), 5);
        assert_eq!(steps[5].status, StepStatus::Processing);

        assert_eq!(handle.wait().await, RunOutcome::Succeeded);
        let done = session(&f.storage).await;
        assert_eq!(completed(&done), 6);
        assert_eq!(f.credits.get_credits().await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_discards_the_late_result() {
        let f = fixture(Duration::from_millis(1_000), Ok(INVOICE_REPLY)).await;

        let handle = f.runner.launch("s1", request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let cancelled = f
            .storage
            .update(
                "s1",
                Box::new(|session: &mut Session| {
                    session.presentation.reset();
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert!(cancelled.is_some());
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert!(handle.is_finished());

        let session = session(&f.storage).await;
        assert_eq!(session.presentation.name(), "idle");
        assert!(session.notices.is_empty());
        // The call itself still completed and was paid for.
        assert_eq!(f.credits.get_credits().await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_stops_by_itself_after_a_reset() {
        let f = fixture(Duration::from_millis(1_000), Ok(INVOICE_REPLY)).await;

        let handle = f.runner.launch("s1", request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        f.storage
            .update(
                "s1",
                Box::new(|session: &mut Session| {
                    session.presentation.reset();
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert_eq!(handle.wait().await, RunOutcome::Discarded);
        assert_eq!(session(&f.storage).await.presentation.name(), "idle");
    }

    #[tokio::test]
    async fn launch_requires_a_selected_file() {
        let f = fixture(Duration::ZERO, Ok(INVOICE_REPLY)).await;
        f.storage.save(Session::new("fresh")).await.unwrap();

        let err = f.runner.launch("fresh", request()).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidTransition { from: "idle", .. }));

        let err = f.runner.launch("missing", request()).await.unwrap_err();
        assert_eq!(err, FlowError::SessionNotFound("missing".into()));
    }
}
