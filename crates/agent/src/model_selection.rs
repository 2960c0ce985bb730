//! Which model a request runs against.
//!
//! An explicitly configured model always wins. Without one, the first model
//! the service lists is looked up lazily and remembered until the
//! configuration changes; then the remembered value is dropped wholesale.

use std::sync::Mutex;
use stepwise_core::error::ProviderError;
use stepwise_core::provider::ModelService;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Model used when nothing is configured and the service lists none.
pub const FALLBACK_MODEL: &str = "default";

#[derive(Debug, Default)]
struct Selection {
    configured: Option<String>,
    resolved: Option<String>,
}

/// Resolves and caches the active model.
#[derive(Debug, Default)]
pub struct ModelSelector {
    slot: Mutex<Selection>,
}

impl ModelSelector {
    pub fn new(configured: Option<String>) -> Self {
        Self {
            slot: Mutex::new(Selection {
                configured,
                resolved: None,
            }),
        }
    }

    fn current(&self) -> Option<String> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.configured.clone().or_else(|| slot.resolved.clone())
    }

    /// The model to use, asking the service only when nothing is known yet.
    ///
    /// Fails only with `ProviderError::Cancelled`, when `cancel` fires while
    /// the service is being asked.
    pub async fn resolve(
        &self,
        service: &dyn ModelService,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        if let Some(model) = self.current() {
            return Ok(model);
        }

        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            listed = service.list_models() => listed,
        };
        let model = match listed {
            Ok(models) => models.into_iter().next(),
            Err(e) => {
                warn!(service = %service.name(), error = %e, "Failed to list models");
                None
            }
        };
        let model = model.unwrap_or_else(|| FALLBACK_MODEL.to_string());
        debug!(model = %model, "Resolved default model");

        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        // A concurrent reconfigure wins over the value looked up here
        if let Some(configured) = &slot.configured {
            return Ok(configured.clone());
        }
        Ok(slot.resolved.get_or_insert(model).clone())
    }

    /// Replace the configured model and forget any resolved default.
    pub fn reconfigure(&self, configured: Option<String>) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Selection {
            configured,
            resolved: None,
        };
    }
}
