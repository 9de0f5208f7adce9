use anyhow::{Context, anyhow};
use std::str::FromStr;
use std::time::Duration;

use analysis_flow::{DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_TICK_INTERVAL};

pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_DOCUMENT_MODEL: &str = "openai/gpt-4.1-mini";
pub const DEFAULT_LEGAL_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_MAX_TOKENS: u32 = 4000;
pub const DEFAULT_PORT: u16 = 3000;

/// Settings for the hosted model
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub document_model: String,
    pub legal_model: String,
    pub max_tokens: u32,
}

/// Where the shared credit counter lives. Absent means credits are not enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub emulator_host: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub model: ModelConfig,
    pub tick_interval: Duration,
    pub max_upload_bytes: usize,
    pub firestore: Option<FirestoreConfig>,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENROUTER_API_KEY")
            .ok_or_else(|| anyhow!("OPENROUTER_API_KEY environment variable is required"))?;

        let model = ModelConfig {
            api_key,
            base_url: get("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            document_model: get("DOCUMENT_MODEL")
                .unwrap_or_else(|| DEFAULT_DOCUMENT_MODEL.to_string()),
            legal_model: get("LEGAL_MODEL").unwrap_or_else(|| DEFAULT_LEGAL_MODEL.to_string()),
            max_tokens: parse_or(get("MODEL_MAX_TOKENS"), "MODEL_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
        };

        let tick_ms = parse_or(
            get("PROGRESS_TICK_MS"),
            "PROGRESS_TICK_MS",
            DEFAULT_TICK_INTERVAL.as_millis() as u64,
        )?;
        if tick_ms == 0 {
            return Err(anyhow!("PROGRESS_TICK_MS must be greater than zero"));
        }

        let firestore = get("FIRESTORE_PROJECT_ID").map(|project_id| FirestoreConfig {
            project_id,
            emulator_host: get("FIRESTORE_EMULATOR_HOST"),
            access_token: get("FIRESTORE_ACCESS_TOKEN"),
        });

        Ok(Self {
            port: parse_or(get("PORT"), "PORT", DEFAULT_PORT)?,
            model,
            tick_interval: Duration::from_millis(tick_ms),
            max_upload_bytes: parse_or(
                get("MAX_UPLOAD_BYTES"),
                "MAX_UPLOAD_BYTES",
                DEFAULT_MAX_DOCUMENT_BYTES,
            )?,
            firestore,
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
