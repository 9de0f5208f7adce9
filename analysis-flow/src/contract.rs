//! Request and response shapes exchanged with the hosted model.
//!
//! The model is trusted to *interpret* a document, never to produce a well formed
//! answer. Everything it returns goes through [`AnalysisResult::from_model_output`]
//! before a caller can see it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data_uri::DataUri;
use crate::error::{AnalysisError, ValidationError};

/// Document type the model reports when it cannot read or translate a document.
pub const UNPROCESSABLE_DOCUMENT_TYPE: &str = "Unprocessable";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub document_data_uri: String,
}

impl AnalysisRequest {
    pub fn new(document: &DataUri) -> Self {
        Self {
            document_data_uri: document.to_string(),
        }
    }

    /// Parse the data URI and check it carries one of the accepted formats.
    pub fn validate(&self) -> Result<DataUri, ValidationError> {
        let document = DataUri::parse(&self.document_data_uri)?;
        if document.format().is_none() {
            return Err(ValidationError::UnsupportedMimeType(
                document.mime_type().to_string(),
            ));
        }
        Ok(document)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub document_type: String,
    pub summary: String,
    pub key_facts: Vec<KeyFact>,
    pub risks_and_fees: Vec<RiskOrFee>,
    pub to_do_items: Vec<ToDoItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFact {
    pub fact: String,
    pub citation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskOrFee {
    pub description: String,
    pub citation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToDoItem {
    pub item: String,
    pub citation: String,
}

impl AnalysisResult {
    pub fn from_model_output(output: &str) -> Result<Self, AnalysisError> {
        let result: AnalysisResult = parse_json_object(output)?;
        result.check().map_err(AnalysisError::ContractViolation)?;
        Ok(result)
    }

    /// True when the model declined to analyse the document.
    pub fn is_unprocessable(&self) -> bool {
        self.document_type
            .trim()
            .eq_ignore_ascii_case(UNPROCESSABLE_DOCUMENT_TYPE)
    }

    fn check(&self) -> Result<(), String> {
        if self.document_type.trim().is_empty() {
            return Err("documentType is empty".to_string());
        }
        if self.summary.trim().is_empty() {
            return Err("summary is empty".to_string());
        }

        let entries = self
            .key_facts
            .iter()
            .map(|f| ("keyFacts", f.fact.as_str(), f.citation.as_str()))
            .chain(
                self.risks_and_fees
                    .iter()
                    .map(|r| ("risksAndFees", r.description.as_str(), r.citation.as_str())),
            )
            .chain(
                self.to_do_items
                    .iter()
                    .map(|t| ("toDoItems", t.item.as_str(), t.citation.as_str())),
            );

        for (field, text, citation) in entries {
            if text.trim().is_empty() {
                return Err(format!("{field} contains an entry without text"));
            }
            if citation.trim().is_empty() {
                return Err(format!("{field} contains an entry without a citation"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalClausesRequest {
    pub url: String,
}

impl LegalClausesRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Only absolute http(s) URLs are accepted; the model has to be able to fetch them.
    pub fn validate(&self) -> Result<url::Url, ValidationError> {
        let parsed = url::Url::parse(self.url.trim())
            .map_err(|e| ValidationError::InvalidUrl(format!("{}: {e}", self.url)))?;
        match parsed.scheme() {
            "http" | "https" if parsed.host().is_some() => Ok(parsed),
            scheme => Err(ValidationError::InvalidUrl(format!(
                "{}: unsupported scheme '{scheme}'",
                self.url
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalClausesSummary {
    pub summary: String,
}

impl LegalClausesSummary {
    pub fn from_model_output(output: &str) -> Result<Self, AnalysisError> {
        let parsed: LegalClausesSummary = parse_json_object(output)?;
        if parsed.summary.trim().is_empty() {
            return Err(AnalysisError::ContractViolation(
                "summary is empty".to_string(),
            ));
        }
        Ok(parsed)
    }
}

/// Pull the outermost JSON object out of a model reply and deserialize it strictly.
///
/// Models often wrap JSON in markdown fences or add a sentence before it.
fn parse_json_object<T: DeserializeOwned>(output: &str) -> Result<T, AnalysisError> {
    let start = output.find('{');
    let end = output.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &output[start..=end],
        _ => {
            return Err(AnalysisError::ContractViolation(
                "response does not contain a JSON object".to_string(),
            ));
        }
    };

    serde_json::from_str(json).map_err(|e| AnalysisError::ContractViolation(e.to_string()))
}
