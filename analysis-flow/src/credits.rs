//! Global processing-credit budget.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{error, info, warn};

use crate::error::CreditError;

/// Balance a freshly created counter starts with.
pub const INITIAL_CREDITS: i64 = 50;

/// A shared counter. Implementations must never take the balance below zero.
#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn get_credits(&self) -> Result<i64, CreditError>;
    /// Take one credit if any remain; no-op at zero.
    async fn decrement_credits(&self) -> Result<(), CreditError>;
}

/// Process-local counter
pub struct InMemoryCreditStore {
    credits: AtomicI64,
}

impl InMemoryCreditStore {
    pub fn new() -> Self {
        Self::with_balance(INITIAL_CREDITS)
    }

    pub fn with_balance(credits: i64) -> Self {
        Self {
            credits: AtomicI64::new(credits.max(0)),
        }
    }
}

impl Default for InMemoryCreditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CreditStore for InMemoryCreditStore {
    async fn get_credits(&self) -> Result<i64, CreditError> {
        Ok(self.credits.load(Ordering::SeqCst))
    }

    async fn decrement_credits(&self) -> Result<(), CreditError> {
        // Err means the balance was already zero, which is not a failure.
        let _ = self
            .credits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current > 0).then(|| current - 1)
            });
        Ok(())
    }
}

/// Credit access with the degraded mode built in.
///
/// Without a store every read is 0 and every decrement is a no-op. Store
/// failures are logged and treated the same way; nothing here returns an error.
#[derive(Clone, Default)]
pub struct CreditLedger {
    store: Option<Arc<dyn CreditStore>>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn unconfigured() -> Self {
        Self { store: None }
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub async fn get_credits(&self) -> i64 {
        let Some(store) = &self.store else {
            return 0;
        };
        match store.get_credits().await {
            Ok(credits) => credits.max(0),
            Err(e) => {
                warn!(error = %e, "Credit store unavailable, reporting 0 credits");
                0
            }
        }
    }

    pub async fn decrement_credits(&self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.decrement_credits().await {
            Ok(()) => info!("Consumed one processing credit"),
            Err(e) => error!(error = %e, "Failed to decrement processing credits"),
        }
    }

    /// True when a configured store reports an empty balance.
    pub async fn is_exhausted(&self) -> bool {
        self.is_configured() && self.get_credits().await <= 0
    }
}
