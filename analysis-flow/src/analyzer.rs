use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    contract::{AnalysisRequest, AnalysisResult, LegalClausesRequest, LegalClausesSummary},
    error::AnalysisError,
    model::GenerativeModel,
    prompt,
};

/// Validates requests, talks to the model and checks what comes back.
///
/// Holds nothing but the model handle, so calls are independent and safe to retry.
#[derive(Clone)]
pub struct DocumentAnalyzer {
    model: Arc<dyn GenerativeModel>,
}

impl DocumentAnalyzer {
    pub fn new(model: Arc<dyn GenerativeModel>) -> Self {
        Self { model }
    }

    pub async fn process_document(
        &self,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResult, AnalysisError> {
        let document = request.validate()?;
        info!(
            mime_type = %document.mime_type(),
            payload_len = document.payload().len(),
            "Submitting document for analysis"
        );

        let output = self
            .model
            .generate_with_document(&prompt::document_analysis_prompt(), &document)
            .await
            .map_err(|e| {
                error!(error = %e, "Document analysis call failed");
                AnalysisError::from(e)
            })?;

        let result = AnalysisResult::from_model_output(&output).inspect_err(|e| {
            error!(error = %e, "Model response failed schema validation");
        })?;

        if result.is_unprocessable() {
            warn!(summary = %result.summary, "Model could not process the document");
        } else {
            info!(
                document_type = %result.document_type,
                key_facts = result.key_facts.len(),
                risks_and_fees = result.risks_and_fees.len(),
                to_do_items = result.to_do_items.len(),
                "Document analysis completed"
            );
        }
        Ok(result)
    }

    pub async fn extract_summarize_legal_clauses(
        &self,
        request: &LegalClausesRequest,
    ) -> Result<LegalClausesSummary, AnalysisError> {
        let url = request.validate()?;
        info!(url = %url, "Distilling legal clauses");

        let output = self
            .model
            .generate(&prompt::legal_clauses_prompt(url.as_str()))
            .await
            .map_err(|e| {
                error!(error = %e, "Legal distillation call failed");
                AnalysisError::from(e)
            })?;

        LegalClausesSummary::from_model_output(&output).inspect_err(|e| {
            error!(error = %e, "Legal summary failed schema validation");
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data_uri::{DataUri, DocumentFormat};
    use crate::error::{ModelError, ValidationError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a canned reply and records what it was sent
    pub(crate) struct ScriptedModel {
        reply: std::result::Result<String, ModelError>,
        pub(crate) calls: AtomicUsize,
        pub(crate) documents: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub(crate) fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
                documents: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                reply: Err(ModelError::new(message)),
                calls: AtomicUsize::new(0),
                documents: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate_with_document(
            &self,
            _instructions: &str,
            document: &DataUri,
        ) -> std::result::Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.documents.lock().unwrap().push(document.to_string());
            self.reply.clone()
        }

        async fn generate(&self, _instructions: &str) -> std::result::Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    pub(crate) const INVOICE_REPLY: &str = r#"{"documentType":"Invoice","summary":"Dealer invoice for a used sedan.","keyFacts":[],"risksAndFees":[],"toDoItems":[]}"#;

    fn jpeg_request() -> AnalysisRequest {
        let uri = DataUri::encode(DocumentFormat::Jpeg, &[0xFF, 0xD8, 0xFF, 0xE0, 0x00]).unwrap();
        AnalysisRequest::new(&uri)
    }

    #[tokio::test]
    async fn forwards_the_document_untouched() {
        let model = Arc::new(ScriptedModel::replying(INVOICE_REPLY));
        let analyzer = DocumentAnalyzer::new(model.clone());
        let request = jpeg_request();

        let result = analyzer.process_document(&request).await.unwrap();

        assert_eq!(result.document_type, "Invoice");
        assert_eq!(
            model.documents.lock().unwrap().as_slice(),
            [request.document_data_uri.clone()]
        );
    }

    #[tokio::test]
    async fn malformed_uri_never_reaches_the_model() {
        let model = Arc::new(ScriptedModel::replying(INVOICE_REPLY));
        let analyzer = DocumentAnalyzer::new(model.clone());
        let request = AnalysisRequest {
            document_data_uri: "data:image/jpeg,raw-bytes".to_string(),
        };

        let err = analyzer.process_document(&request).await.unwrap_err();

        assert!(matches!(
            err,
            AnalysisError::Validation(ValidationError::NotBase64Encoded)
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unaccepted_formats_never_reach_the_model() {
        let model = Arc::new(ScriptedModel::replying(INVOICE_REPLY));
        let analyzer = DocumentAnalyzer::new(model.clone());
        let request = AnalysisRequest {
            document_data_uri: "data:text/html;base64,PGgxPmhpPC9oMT4=".to_string(),
        };

        let err = analyzer.process_document(&request).await.unwrap_err();

        assert!(matches!(
            err,
            AnalysisError::Validation(ValidationError::UnsupportedMimeType(ref mime)) if mime == "text/html"
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_calls_are_independent() {
        let model = Arc::new(ScriptedModel::replying(INVOICE_REPLY));
        let analyzer = DocumentAnalyzer::new(model.clone());
        let request = jpeg_request();

        let first = analyzer.process_document(&request).await.unwrap();
        let second = analyzer.process_document(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn schema_mismatch_is_a_contract_violation() {
        let model = Arc::new(ScriptedModel::replying(
            r#"{"documentType":"Invoice","summary":"An invoice."}"#,
        ));
        let analyzer = DocumentAnalyzer::new(model);

        let err = analyzer.process_document(&jpeg_request()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ContractViolation(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let analyzer = DocumentAnalyzer::new(Arc::new(ScriptedModel::failing("timeout")));

        let err = analyzer.process_document(&jpeg_request()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Transport(_)));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_any_call() {
        let model = Arc::new(ScriptedModel::replying(r#"{"summary":"ok"}"#));
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

    #[tokio::test]
    async fn distills_legal_text() {
        let model = Arc::new(ScriptedModel::replying(
            r#"{"summary":"You may cancel within 14 days."}"#,
        ));
        let analyzer = DocumentAnalyzer::new(model);

        let summary = analyzer
            .extract_summarize_legal_clauses(&LegalClausesRequest::new(
                "https://policies.google.com/terms",
            ))
            .await
            .unwrap();
        assert_eq!(summary.summary, "You may cancel within 14 days.");
    }
}
