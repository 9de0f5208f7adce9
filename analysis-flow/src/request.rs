//! Turns an uploaded file into a self-contained [`AnalysisRequest`].

use std::path::Path;
use tracing::{debug, warn};

use crate::{
    contract::AnalysisRequest,
    data_uri::{DataUri, DocumentFormat},
    error::{AnalysisError, ValidationError},
};

/// Advertised upload limit: 50 MiB.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;

/// Raw file as received from a client
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    max_bytes: usize,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DOCUMENT_BYTES)
    }
}

impl RequestBuilder {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn build(&self, upload: &DocumentUpload) -> Result<AnalysisRequest, AnalysisError> {
        if upload.bytes.is_empty() {
            return Err(ValidationError::EmptyDocument.into());
        }
        if upload.bytes.len() > self.max_bytes {
            return Err(ValidationError::FileTooLarge {
                size: upload.bytes.len(),
                limit: self.max_bytes,
            }
            .into());
        }

        let format = resolve_format(upload)?;
        debug!(
            file_name = %upload.file_name,
            mime_type = format.mime_type(),
            size = upload.bytes.len(),
            "Encoding document"
        );

        let document = DataUri::encode(format, &upload.bytes)?;
        Ok(AnalysisRequest::new(&document))
    }

    /// Read a file from disk and build a request from it.
    ///
    /// A read failure is reported as [`AnalysisError::Io`]; nothing is encoded.
    pub async fn from_path(&self, path: impl AsRef<Path>) -> Result<AnalysisRequest, AnalysisError> {
        self.build(&self.read_upload(path).await?)
    }

    pub async fn read_upload(&self, path: impl AsRef<Path>) -> Result<DocumentUpload, AnalysisError> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path).await?;
        if metadata.len() > self.max_bytes as u64 {
            return Err(ValidationError::FileTooLarge {
                size: usize::try_from(metadata.len()).unwrap_or(usize::MAX),
                limit: self.max_bytes,
            }
            .into());
        }

        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(DocumentUpload {
            file_name,
            content_type: None,
            bytes,
        })
    }
}

/// Content sniffing wins over the declared type, which wins over the extension.
fn resolve_format(upload: &DocumentUpload) -> Result<DocumentFormat, ValidationError> {
    if let Some(kind) = infer::get(&upload.bytes) {
        return DocumentFormat::from_mime(kind.mime_type()).ok_or_else(|| {
            ValidationError::UnsupportedMimeType(kind.mime_type().to_string())
        });
    }

    if let Some(declared) = upload
        .content_type
        .as_deref()
        .filter(|c| !c.trim().is_empty() && !is_generic(c))
    {
        return DocumentFormat::from_mime(declared)
            .ok_or_else(|| ValidationError::UnsupportedMimeType(declared.to_string()));
    }

    let guessed = mime_guess::from_path(&upload.file_name).first();
    match guessed {
        Some(mime) => DocumentFormat::from_mime(mime.essence_str())
            .ok_or_else(|| ValidationError::UnsupportedMimeType(mime.essence_str().to_string())),
        None => {
            warn!(file_name = %upload.file_name, "Could not determine document type");
            Err(ValidationError::UnsupportedMimeType(
                "application/octet-stream".to_string(),
            ))
        }
    }
}

fn is_generic(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or(content_type).trim();
    essence.eq_ignore_ascii_case("application/octet-stream")
        || essence.eq_ignore_ascii_case("binary/octet-stream")
}
