use analysis_flow::{
    AnalysisError, AnalysisRequest, AnalysisResult, AnalysisRunner, CreditLedger,
    DocumentAnalyzer, DocumentUpload, FailureKind, FailureNotice, FlowError, GenerativeModel,
    InMemorySessionStorage, LegalClausesRequest, LegalClausesSummary, RequestBuilder, RunHandle,
    Session, SessionStorage, ValidationError, apply_update,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, Request, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode},
    middleware::{Next, from_fn},
    response::{Json, Response},
    routing::{get, post},
};
use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ServiceConfig,
    firestore::FirestoreCreditStore,
    llm::OpenRouterModel,
    models::{CreditsResponse, SessionResponse, UploadResponse},
};

/// Room for multipart framing and JSON wrapping on top of the encoded document.
const BODY_SLACK_BYTES: usize = 64 * 1024;
const CORRELATION_HEADER: &str = "x-correlation-id";
const UNNAMED_UPLOAD: &str = "document";

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn notice_error(status: StatusCode, notice: &FailureNotice) -> ApiError {
    (
        status,
        Json(json!({
            "error": notice.title,
            "details": notice.description,
            "kind": notice.kind
        })),
    )
}

fn analysis_error(e: &AnalysisError) -> ApiError {
    let status = match e.kind() {
        FailureKind::Validation => StatusCode::BAD_REQUEST,
        FailureKind::Io => StatusCode::UNPROCESSABLE_ENTITY,
        FailureKind::ContractViolation | FailureKind::Transport => StatusCode::BAD_GATEWAY,
        FailureKind::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
    };
    notice_error(status, &e.notice())
}

fn flow_error(e: FlowError, session_id: &str) -> ApiError {
    match e {
        FlowError::SessionNotFound(_) => not_found_error("Session not found", session_id),
        FlowError::InvalidTransition { .. } | FlowError::StaleJob(_) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Session is busy",
                "details": e.to_string(),
                "session_id": session_id
            })),
        ),
        FlowError::StorageError(details) => internal_error("Session storage failed", &details),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub analyzer: DocumentAnalyzer,
    pub runner: AnalysisRunner,
    pub session_storage: Arc<dyn SessionStorage>,
    pub credits: CreditLedger,
    pub request_builder: RequestBuilder,
    pub active_runs: Arc<DashMap<String, RunHandle>>,
}

impl AppState {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        credits: CreditLedger,
        tick_interval: Duration,
        max_upload_bytes: usize,
    ) -> Self {
        let session_storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
        let analyzer = DocumentAnalyzer::new(model);
        let runner = AnalysisRunner::new(analyzer.clone(), session_storage.clone(), credits.clone())
            .with_tick_interval(tick_interval);

        Self {
            analyzer,
            runner,
            session_storage,
            credits,
            request_builder: RequestBuilder::new(max_upload_bytes),
            active_runs: Arc::new(DashMap::new()),
        }
    }
}

pub fn create_app(config: &ServiceConfig) -> Router {
    let model = Arc::new(OpenRouterModel::new(config.model.clone()));

    let credits = match &config.firestore {
        Some(firestore) => {
            info!(project_id = %firestore.project_id, "Using Firestore processing credits");
            CreditLedger::new(Arc::new(FirestoreCreditStore::new(firestore)))
        }
        None => {
            warn!("FIRESTORE_PROJECT_ID not set, processing credits are not enforced");
            CreditLedger::unconfigured()
        }
    };

    build_router(AppState::new(
        model,
        credits,
        config.tick_interval,
        config.max_upload_bytes,
    ))
}

pub fn build_router(app_state: AppState) -> Router {
    // Base64 grows the document by a third when it arrives as a data URI.
    let body_limit = app_state.request_builder.max_bytes().div_ceil(3) * 4 + BODY_SLACK_BYTES;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/credits", get(get_credits))
        .route("/documents/analyze", post(analyze_document))
        .route("/legal/distill", post(distill_legal_clauses))
        .route("/sessions", post(create_session))
        .route(
            "/sessions/{session_id}",
            get(get_session_status).delete(delete_session),
        )
        .route("/sessions/{session_id}/documents", post(upload_document))
        .route("/sessions/{session_id}/reset", post(reset_session))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Tag each request with a correlation id and run it inside a span carrying it.
async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&correlation_id).ok();

    if let Some(value) = &header {
        request.headers_mut().insert(CORRELATION_HEADER, value.clone());
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    if let Some(value) = header {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Vehicle Document Intelligence Service",
        "version": "1.0.0",
        "description": "AI-powered analysis of car purchase documents with simulated processing progress",
        "endpoints": {
            "POST /documents/analyze": "Analyze a document sent as a data URI",
            "POST /legal/distill": "Summarize the legal clauses found at a URL",
            "POST /sessions": "Create an analysis session",
            "GET /sessions/{session_id}": "Get session progress and results",
            "DELETE /sessions/{session_id}": "Delete the session and stop any analysis it is running",
            "POST /sessions/{session_id}/documents": "Upload a document (multipart field 'file') and start analysis",
            "POST /sessions/{session_id}/reset": "Clear the session and stop its progress",
            "GET /credits": "Remaining processing credits",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn get_credits(State(state): State<AppState>) -> Json<CreditsResponse> {
    Json(CreditsResponse {
        credits: state.credits.get_credits().await,
        configured: state.credits.is_configured(),
    })
}

async fn ensure_credits(state: &AppState) -> Result<(), ApiError> {
    if state.credits.is_exhausted().await {
        warn!("Rejecting analysis, no processing credits left");
        return Err(notice_error(
            StatusCode::PAYMENT_REQUIRED,
            &FailureNotice::insufficient_credits(),
        ));
    }
    Ok(())
}

async fn analyze_document(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<AnalysisResult> {
    ensure_credits(&state).await?;

    let result = state
        .analyzer
        .process_document(&request)
        .await
        .map_err(|e| {
            error!(error = %e, "Document analysis request failed");
            analysis_error(&e)
        })?;

    state.credits.decrement_credits().await;
    Ok(Json(result))
}

async fn distill_legal_clauses(
    State(state): State<AppState>,
    Json(request): Json<LegalClausesRequest>,
) -> ApiResult<LegalClausesSummary> {
    state
        .analyzer
        .extract_summarize_legal_clauses(&request)
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, url = %request.url, "Legal distillation request failed");
            analysis_error(&e)
        })
}

async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session = Session::new(Uuid::new_v4().to_string());
    let response = SessionResponse::from(&session);

    state.session_storage.save(session).await.map_err(|e| {
        error!("Failed to create session: {}", e);
        internal_error("Failed to create analysis session", &e.to_string())
    })?;

    info!(session_id = %response.session_id, "Session created");
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    match state.session_storage.get(&session_id).await {
        Ok(Some(session)) => Ok(Json(SessionResponse::from(&session))),
        Ok(None) => Err(not_found_error("Session not found", &session_id)),
        Err(e) => {
            error!("Failed to load session {}: {}", session_id, e);
            Err(internal_error("Failed to load session", &e.to_string()))
        }
    }
}

async fn upload_document(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    if state
        .session_storage
        .get(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?
        .is_none()
    {
        return Err(not_found_error("Session not found", &session_id));
    }

    let max_bytes = state.request_builder.max_bytes();
    let upload = match read_multipart_upload(&mut multipart, max_bytes).await {
        Ok(upload) => upload,
        Err(UploadFailure {
            file_name: Some(file_name),
            error: e,
        }) => {
            warn!(
                session_id = %session_id,
                file_name = %file_name,
                error = %e,
                "Could not read uploaded document"
            );
            record_upload_failure(&state, &session_id, file_name, &e).await?;
            return Err(analysis_error(&e));
        }
        Err(UploadFailure {
            file_name: None,
            error: e,
        }) => {
            warn!(session_id = %session_id, error = %e, "Could not read uploaded document");
            return Err(match &e {
                AnalysisError::Validation(ValidationError::MissingFile) => {
                    bad_request_error("No file was provided", &e.to_string())
                }
                _ => analysis_error(&e),
            });
        }
    };
    ensure_credits(&state).await?;

    let file_name = upload.file_name.clone();
    let request = match state.request_builder.build(&upload) {
        Ok(request) => request,
        Err(e) => {
            warn!(session_id = %session_id, file_name = %file_name, error = %e, "Upload rejected");
            record_upload_failure(&state, &session_id, file_name, &e).await?;
            return Err(analysis_error(&e));
        }
    };

    let selected = file_name.clone();
    apply_update(
        state.session_storage.as_ref(),
        &session_id,
        move |session: &mut Session| session.presentation.select_file(selected),
    )
    .await
    .map_err(|e| flow_error(e, &session_id))?;

    let handle = state
        .runner
        .launch(&session_id, request)
        .await
        .map_err(|e| flow_error(e, &session_id))?;
    let job_id = handle.job_id().to_string();

    state.active_runs.retain(|_, run| !run.is_finished());
    if let Some(previous) = state.active_runs.insert(session_id.clone(), handle) {
        previous.cancel();
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            session_id,
            job_id,
            file_name,
            status: "started".to_string(),
        }),
    ))
}

/// Marks the upload as selected and failed in one step and keeps the notice.
async fn record_upload_failure(
    state: &AppState,
    session_id: &str,
    file_name: String,
    e: &AnalysisError,
) -> Result<(), ApiError> {
    let notice = e.notice();
    apply_update(
        state.session_storage.as_ref(),
        session_id,
        move |session: &mut Session| {
            session.presentation.select_file(file_name)?;
            session.presentation.upload_failed(notice.clone())?;
            session.notify(notice);
            Ok(())
        },
    )
    .await
    .map_err(|e| flow_error(e, session_id))
}

/// A multipart read that went wrong, with the file name once its field was seen.
struct UploadFailure {
    file_name: Option<String>,
    error: AnalysisError,
}

impl From<AnalysisError> for UploadFailure {
    fn from(error: AnalysisError) -> Self {
        Self {
            file_name: None,
            error,
        }
    }
}

async fn read_multipart_upload(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<DocumentUpload, UploadFailure> {
    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        let error = stream_error(e, 0, max_bytes);
        // An oversized body can fail before the file field's headers are read.
        let file_name = matches!(
            error,
            AnalysisError::Validation(ValidationError::FileTooLarge { .. })
        )
        .then(|| UNNAMED_UPLOAD.to_string());
        UploadFailure { file_name, error }
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or(UNNAMED_UPLOAD).to_string();
        let content_type = field.content_type().map(str::to_string);

        // Stop reading as soon as the limit is crossed.
        let mut bytes = Vec::new();
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    return Err(UploadFailure {
                        file_name: Some(file_name),
                        error: stream_error(e, bytes.len(), max_bytes),
                    });
                }
            };
            if bytes.len() + chunk.len() > max_bytes {
                return Err(UploadFailure {
                    file_name: Some(file_name),
                    error: ValidationError::FileTooLarge {
                        size: bytes.len() + chunk.len(),
                        limit: max_bytes,
                    }
                    .into(),
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(DocumentUpload {
            file_name,
            content_type,
            bytes,
        });
    }
    Err(AnalysisError::from(ValidationError::MissingFile).into())
}

/// The body limit surfaces as a 413 stream error; anything else is unreadable input.
fn stream_error(e: MultipartError, received: usize, max_bytes: usize) -> AnalysisError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ValidationError::FileTooLarge {
            size: received.max(max_bytes + 1),
            limit: max_bytes,
        }
        .into();
    }
    AnalysisError::Io(std::io::Error::other(e.body_text()))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state
        .session_storage
        .get(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?
        .is_none()
    {
        return Err(not_found_error("Session not found", &session_id));
    }

    if let Some((_, run)) = state.active_runs.remove(&session_id) {
        info!(session_id = %session_id, job_id = %run.job_id(), "Cancelling analysis run");
        run.cancel();
    }
    state
        .session_storage
        .delete(&session_id)
        .await
        .map_err(|e| flow_error(e, &session_id))?;

    info!(session_id = %session_id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    apply_update(
        state.session_storage.as_ref(),
        &session_id,
        |session: &mut Session| {
            session.presentation.reset();
            session.notices.clear();
            Ok(())
        },
    )
    .await
    .map_err(|e| flow_error(e, &session_id))?;

    if let Some((_, run)) = state.active_runs.remove(&session_id) {
        info!(session_id = %session_id, job_id = %run.job_id(), "Cancelling analysis run");
        run.cancel();
    }

    get_session_status(State(state), Path(session_id)).await
}
