use async_trait::async_trait;

use crate::{data_uri::DataUri, error::ModelError};

/// The hosted generative model, seen as an opaque text generator
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Run `instructions` against an inline document and return the raw reply.
    ///
    /// Implementations must forward `document` exactly as given.
    async fn generate_with_document(
        &self,
        instructions: &str,
        document: &DataUri,
    ) -> Result<String, ModelError>;

    /// Run text-only instructions and return the raw reply
    async fn generate(&self, instructions: &str) -> Result<String, ModelError>;
}
