// storefront/src/pipelines/mod.rs

//! Defines and registers the workflows of the service.

use crate::errors::AppError;
use crate::state::AppState;
use flowline::Registry;
use std::sync::Arc;

pub mod common_steps;
pub mod contexts;

pub mod checkout_pipeline;
pub mod session_pipeline;
pub mod webhook_pipeline;

/// Registers every pipeline. Called once at startup, before the server binds.
pub fn register_all_pipelines(registry: &Arc<Registry<AppError>>, app_state: &AppState) {
  tracing::info!("Registering pipelines...");

  session_pipeline::register_session_pipeline(registry, app_state);
  checkout_pipeline::register_checkout_pipeline(registry, app_state);
  webhook_pipeline::register_webhook_pipeline(registry, app_state);

  tracing::info!("All application pipelines registered.");
}
