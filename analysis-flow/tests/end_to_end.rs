use analysis_flow::{
    AnalysisError, AnalysisRunner, CreditLedger, CreditStore, DataUri, DocumentAnalyzer, DocumentUpload,
    GenerativeModel, InMemoryCreditStore, InMemorySessionStorage, LegalClausesRequest, ModelError,
    RequestBuilder, RunOutcome, Session, SessionStorage, StepStatus, ValidationError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const INVOICE: &str = r#"{"documentType":"Invoice","summary":"Dealer invoice for a 2019 hatchback.","keyFacts":[],"risksAndFees":[],"toDoItems":[]}"#;

#[derive(Default)]
struct RecordingModel {
    calls: AtomicUsize,
    uris: Mutex<Vec<String>>,
}

#[async_trait]
impl GenerativeModel for RecordingModel {
    async fn generate_with_document(
        &self,
        _instructions: &str,
        document: &DataUri,
    ) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.uris.lock().unwrap().push(document.to_string());
        Ok(INVOICE.to_string())
    }

    async fn generate(&self, _instructions: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(r#"{"summary":"unused"}"#.to_string())
    }
}

fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
    bytes.resize(len, 0x42);
    bytes
}

#[tokio::test(start_paused = true)]
async fn jpeg_upload_runs_to_a_rendered_result() -> anyhow::Result<()> {
    let upload = DocumentUpload {
        file_name: "test.jpg".to_string(),
        content_type: Some("image/jpeg".to_string()),
        bytes: jpeg_bytes(10 * 1024),
    };
    let request = RequestBuilder::default().build(&upload)?;
    assert!(request.document_data_uri.starts_with("data:image/jpeg;base64,"));

    let model = Arc::new(RecordingModel::default());
    let storage = Arc::new(InMemorySessionStorage::new());
    let credits = Arc::new(InMemoryCreditStore::with_balance(3));
    let runner = AnalysisRunner::new(
        DocumentAnalyzer::new(model.clone()),
        storage.clone(),
        CreditLedger::new(credits.clone()),
    )
    .with_tick_interval(Duration::from_millis(800));

    let mut session = Session::new("e2e");
    session.presentation.select_file(&upload.file_name)?;
    storage.save(session).await?;

    let handle = runner.launch("e2e", request.clone()).await?;
    assert_eq!(handle.wait().await, RunOutcome::Succeeded);

    let session = storage.get("e2e").await?.expect("session exists");
    let result = session.presentation.result().expect("result rendered");
    assert_eq!(result.document_type, "Invoice");
    assert_eq!(result.summary, "Dealer invoice for a 2019 hatchback.");
    assert!(result.key_facts.is_empty());
    assert!(result.risks_and_fees.is_empty());
    assert!(result.to_do_items.is_empty());

    let steps = session.presentation.steps();
    assert_eq!(steps.len(), 6);
    assert!(steps.iter().all(|s| s.status == StepStatus::Complete));
    assert!(!session.presentation.is_loading());
    assert!(session.notices.is_empty());

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        model.uris.lock().unwrap().as_slice(),
        [request.document_data_uri]
    );
    assert_eq!(credits.get_credits().await?, 2);
    Ok(())
}

#[tokio::test]
async fn non_url_is_refused_without_a_model_call() {
    let model = Arc::new(RecordingModel::default());
    let analyzer = DocumentAnalyzer::new(model.clone());

    let err = analyzer
        .extract_summarize_legal_clauses(&LegalClausesRequest::new("not-a-url"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AnalysisError::Validation(ValidationError::InvalidUrl(_))
    ));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}
