//! Credit counter kept in a single Firestore document, spoken to over the REST API.

use analysis_flow::{CreditError, CreditStore, INITIAL_CREDITS};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::FirestoreConfig;

const COLLECTION_ID: &str = "app_state";
const DOCUMENT_ID: &str = "processing_credits";
const CREDITS_FIELD: &str = "credits";
const PRODUCTION_HOST: &str = "https://firestore.googleapis.com";
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CreditSnapshot {
    credits: i64,
    update_time: String,
}

/// Result of a conditional write
enum WriteOutcome {
    Applied,
    Conflict,
}

pub struct FirestoreCreditStore {
    http: Client,
    base_url: String,
    document_name: String,
    access_token: Option<String>,
}

impl FirestoreCreditStore {
    pub fn new(config: &FirestoreConfig) -> Self {
        let base_url = match &config.emulator_host {
            Some(host) if host.starts_with("http") => host.trim_end_matches('/').to_string(),
            Some(host) => format!("http://{}", host.trim_end_matches('/')),
            None => PRODUCTION_HOST.to_string(),
        };

        Self {
            http: Client::new(),
            base_url,
            document_name: format!(
                "projects/{}/databases/(default)/documents/{COLLECTION_ID}/{DOCUMENT_ID}",
                config.project_id
            ),
            access_token: config.access_token.clone(),
        }
    }

    fn document_url(&self) -> String {
        format!("{}/v1/{}", self.base_url, self.document_name)
    }

    fn commit_url(&self) -> String {
        let database = self
            .document_name
            .split("/documents/")
            .next()
            .unwrap_or(&self.document_name);
        format!("{}/v1/{database}/documents:commit", self.base_url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read(&self) -> Result<Option<CreditSnapshot>, CreditError> {
        let response = self
            .authorized(self.http.get(self.document_url()))
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let document: Value = response.json().await.map_err(unavailable)?;
                parse_credit_document(&document).map(Some)
            }
            status => Err(CreditError::Unavailable(format!(
                "reading credits returned {status}"
            ))),
        }
    }

    /// Create the document with `credits`, only if it does not exist yet.
    async fn create(&self, credits: i64) -> Result<WriteOutcome, CreditError> {
        let response = self
            .authorized(self.http.patch(self.document_url()))
            .query(&[("currentDocument.exists", "false")])
            .json(&json!({ "fields": credit_fields(credits) }))
            .send()
            .await
            .map_err(unavailable)?;

        write_outcome(response.status(), "creating the credit document")
    }

    /// Commit writing the absolute balance, guarded by the snapshot's `updateTime`.
    fn replace_body(&self, snapshot: &CreditSnapshot, credits: i64) -> Value {
        json!({
            "writes": [{
                "update": {
                    "name": self.document_name,
                    "fields": credit_fields(credits)
                },
                "currentDocument": { "updateTime": snapshot.update_time }
            }]
        })
    }

    /// Overwrite the balance, only if nobody wrote since `snapshot` was read.
    async fn replace(&self, snapshot: &CreditSnapshot, credits: i64) -> Result<WriteOutcome, CreditError> {
        let response = self
            .authorized(self.http.post(self.commit_url()))
            .json(&self.replace_body(snapshot, credits))
            .send()
            .await
            .map_err(unavailable)?;

        write_outcome(response.status(), "updating the credit document")
    }
}

#[async_trait]
impl CreditStore for FirestoreCreditStore {
    async fn get_credits(&self) -> Result<i64, CreditError> {
        for _ in 0..MAX_ATTEMPTS {
            if let Some(snapshot) = self.read().await? {
                return Ok(snapshot.credits);
            }
            match self.create(INITIAL_CREDITS).await? {
                WriteOutcome::Applied => {
                    info!(credits = INITIAL_CREDITS, "Initialised processing credits");
                    return Ok(INITIAL_CREDITS);
                }
                // Someone else created it first; read theirs.
                WriteOutcome::Conflict => continue,
            }
        }
        Err(CreditError::Unavailable(
            "credit document kept changing while being read".to_string(),
        ))
    }

    async fn decrement_credits(&self) -> Result<(), CreditError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let outcome = match self.read().await? {
                None => self.create(INITIAL_CREDITS - 1).await?,
                Some(snapshot) if snapshot.credits <= 0 => {
                    debug!("No credits left to consume");
                    return Ok(());
                }
                Some(snapshot) => self.replace(&snapshot, snapshot.credits - 1).await?,
            };

            match outcome {
                WriteOutcome::Applied => return Ok(()),
                WriteOutcome::Conflict => {
                    warn!(attempt, "Concurrent credit update, retrying");
                }
            }
        }
        Err(CreditError::Unavailable(format!(
            "gave up decrementing credits after {MAX_ATTEMPTS} conflicting attempts"
        )))
    }
}

fn unavailable(error: reqwest::Error) -> CreditError {
    CreditError::Unavailable(error.to_string())
}

fn credit_fields(credits: i64) -> Value {
    json!({
        CREDITS_FIELD: { "integerValue": credits.to_string() }
    })
}

fn write_outcome(status: StatusCode, action: &str) -> Result<WriteOutcome, CreditError> {
    match status {
        // Failed preconditions come back as 400 FAILED_PRECONDITION or 409 ABORTED/ALREADY_EXISTS.
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            Ok(WriteOutcome::Conflict)
        }
        status if status.is_success() => Ok(WriteOutcome::Applied),
        status => Err(CreditError::Unavailable(format!("{action} returned {status}"))),
    }
}

fn parse_credit_document(document: &Value) -> Result<CreditSnapshot, CreditError> {
    let field = &document["fields"][CREDITS_FIELD];
    let credits = match (&field["integerValue"], &field["doubleValue"]) {
        (Value::String(raw), _) => raw
            .parse::<i64>()
            .map_err(|e| CreditError::Malformed(format!("credits is not an integer: {e}")))?,
        (Value::Number(n), _) => n
            .as_i64()
            .ok_or_else(|| CreditError::Malformed(format!("credits out of range: {n}")))?,
        (_, Value::Number(n)) => n
            .as_f64()
            .map(|v| v as i64)
            .ok_or_else(|| CreditError::Malformed(format!("credits out of range: {n}")))?,
        _ => {
            return Err(CreditError::Malformed(
                "document has no numeric credits field".to_string(),
            ));
        }
    };

    let update_time = document["updateTime"]
        .as_str()
        .ok_or_else(|| CreditError::Malformed("document has no updateTime".to_string()))?
        .to_string();

    Ok(CreditSnapshot {
        credits,
        update_time,
    })
}
