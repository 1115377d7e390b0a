//! Application state shared across handlers.

use std::sync::Arc;

use secrecy::SecretString;

use crate::config::PipelineConfig;
use crate::notify::Notifier;
use crate::orders::Materializer;
use crate::store::Stores;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: PipelineConfig,
    stores: Stores,
    materializer: Materializer,
    notifier: Notifier,
}

impl AppState {
    #[must_use]
    pub fn new(config: PipelineConfig, stores: Stores, notifier: Notifier) -> Self {
        let materializer = Materializer::new(stores.clone(), notifier.clone());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                stores,
                materializer,
                notifier,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn webhook_secret(&self) -> &SecretString {
        &self.inner.config.webhook_secret
    }

    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    #[must_use]
    pub fn materializer(&self) -> &Materializer {
        &self.inner.materializer
    }

    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }
}
