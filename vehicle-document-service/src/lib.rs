pub mod config;
pub mod firestore;
pub mod llm;
pub mod models;
pub mod service;

pub use config::ServiceConfig;
pub use firestore::FirestoreCreditStore;
pub use llm::OpenRouterModel;
pub use models::*;
pub use service::{AppState, build_router, create_app};
