//! Inline document encoding: `data:<mime>;base64,<payload>`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::error::ValidationError;

static MIME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.+-]+/[\w.+-]+$").expect("valid MIME pattern"));

/// Document formats accepted for analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Pdf,
    Png,
    Jpeg,
    Webp,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 4] = [
        DocumentFormat::Pdf,
        DocumentFormat::Png,
        DocumentFormat::Jpeg,
        DocumentFormat::Webp,
    ];

    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Png => "image/png",
            DocumentFormat::Jpeg => "image/jpeg",
            DocumentFormat::Webp => "image/webp",
        }
    }

    /// Match a MIME string, ignoring parameters and case. `image/jpg` is accepted as JPEG.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or(mime).trim().to_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(DocumentFormat::Pdf),
            "image/png" => Some(DocumentFormat::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(DocumentFormat::Jpeg),
            "image/webp" => Some(DocumentFormat::Webp),
            _ => None,
        }
    }

    pub fn is_image(self) -> bool {
        !matches!(self, DocumentFormat::Pdf)
    }
}

/// A parsed data URI. Rendering it with `Display` reproduces the input exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    mime_type: String,
    payload: String,
}

impl DataUri {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let rest = raw
            .strip_prefix("data:")
            .ok_or(ValidationError::MissingDataPrefix)?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or(ValidationError::NotBase64Encoded)?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or(ValidationError::NotBase64Encoded)?;

        if mime_type.is_empty() {
            return Err(ValidationError::MissingMimeType);
        }
        if !MIME_PATTERN.is_match(mime_type) {
            return Err(ValidationError::InvalidMimeType(mime_type.to_string()));
        }
        if payload.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        STANDARD
            .decode(payload)
            .map_err(|e| ValidationError::InvalidBase64(e.to_string()))?;

        Ok(Self {
            mime_type: mime_type.to_string(),
            payload: payload.to_string(),
        })
    }

    pub fn encode(format: DocumentFormat, bytes: &[u8]) -> Result<Self, ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::EmptyDocument);
        }
        Ok(Self {
            mime_type: format.mime_type().to_string(),
            payload: STANDARD.encode(bytes),
        })
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn format(&self) -> Option<DocumentFormat> {
        DocumentFormat::from_mime(&self.mime_type)
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri_shape() -> Regex {
        Regex::new(r"^data:[\w/.+-]+;base64,[A-Za-z0-9+/=]+$").unwrap()
    }

    #[test]
    fn encoded_documents_match_the_uri_shape() {
        let shape = uri_shape();
        let samples: [&[u8]; 4] = [b"%PDF-1.7", &[0xFF, 0xD8, 0xFF, 0xE0], &[0u8; 1], &[0xAB; 1027]];

        for format in DocumentFormat::ALL {
            for bytes in samples {
                let uri = DataUri::encode(format, bytes).unwrap().to_string();
                assert!(shape.is_match(&uri), "{uri} does not match");
            }
        }
    }

    #[test]
    fn parse_preserves_the_original_string() {
        let raw = "data:image/png;base64,iVBORw0KGgo=";
        let uri = DataUri::parse(raw).unwrap();

        assert_eq!(uri.mime_type(), "image/png");
        assert_eq!(uri.format(), Some(DocumentFormat::Png));
        assert_eq!(uri.to_string(), raw);
    }

    #[test]
    fn malformed_uris_are_rejected() {
        let cases = [
            ("image/png;base64,AAAA", ValidationError::MissingDataPrefix),
            ("data:;base64,AAAA", ValidationError::MissingMimeType),
            ("data:image/png,AAAA", ValidationError::NotBase64Encoded),
            ("data:image/png;base64", ValidationError::NotBase64Encoded),
            ("data:image/png;base64,", ValidationError::EmptyPayload),
            (
                "data:png;base64,AAAA",
                ValidationError::InvalidMimeType("png".into()),
            ),
        ];

        for (raw, expected) in cases {
            assert_eq!(DataUri::parse(raw), Err(expected), "input: {raw}");
        }

        assert!(matches!(
            DataUri::parse("data:image/png;base64,not base64!"),
            Err(ValidationError::InvalidBase64(_))
        ));
    }

    #[test]
    fn empty_documents_cannot_be_encoded() {
        assert_eq!(
            DataUri::encode(DocumentFormat::Pdf, &[]),
            Err(ValidationError::EmptyDocument)
        );
    }

    #[test]
    fn format_matching_ignores_case_and_parameters() {
        assert_eq!(DocumentFormat::from_mime("IMAGE/JPG"), Some(DocumentFormat::Jpeg));
        assert_eq!(
            DocumentFormat::from_mime("application/pdf; name=contract.pdf"),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(DocumentFormat::from_mime("image/gif"), None);
    }
}
