// storefront/src/state.rs

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::services::notifier::Notifier;
use crate::store::CommerceStore;
use flowline::Registry;

/// Everything a request needs, passed explicitly into handlers and pipeline
/// contexts.
#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn CommerceStore>,
  pub registry: Arc<Registry<AppError>>,
  pub config: Arc<AppConfig>,
  pub clock: Arc<dyn Clock>,
  /// Shared connection pool for outbound provider calls.
  pub http: reqwest::Client,
  pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for AppState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AppState")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

impl AppState {
  /// Wires the shared services together and registers every pipeline on a
  /// fresh registry.
  pub fn new(
    store: Arc<dyn CommerceStore>,
    config: AppConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(config.provider_timeout())
      .build()
      .map_err(|e| AppError::Config(format!("HTTP client: {}", e)))?;
    let registry = Arc::new(Registry::<AppError>::new());
    let state = Self {
      store,
      registry: registry.clone(),
      config: Arc::new(config),
      clock,
      http,
      notifier,
    };
    crate::pipelines::register_all_pipelines(&registry, &state);
    Ok(state)
  }
}
