// storefront/src/main.rs

use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use storefront::clock::SystemClock;
use storefront::config::AppConfig;
use storefront::services::{notifier::LogNotifier, sweeper};
use storefront::store::PgStore;
use storefront::web::configure_app_routes;
use storefront::AppState;

fn init_tracing(json: bool) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);
  if json {
    builder.json().init();
  } else {
    builder.init();
  }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
  // LOG_JSON is read ahead of the full config so config errors are logged in the right format.
  dotenvy::dotenv().ok();
  let log_json = std::env::var("LOG_JSON").map(|v| v == "true").unwrap_or(false);
  init_tracing(log_json);

  tracing::info!("Starting storefront server...");

  let app_config = AppConfig::from_env().map_err(|e| {
    tracing::error!(error = %e, "Failed to load application configuration.");
    e
  })?;

  let store = PgStore::connect(&app_config.database_url).await.map_err(|e| {
    tracing::error!(error = %e, "Failed to connect to the database.");
    e
  })?;
  tracing::info!("Successfully connected to the database.");
  if app_config.run_migrations {
    store.run_migrations().await?;
    tracing::info!("Database schema applied.");
  }

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  let app_state = AppState::new(
    Arc::new(store),
    app_config,
    Arc::new(SystemClock),
    Arc::new(LogNotifier),
  )?;

  let sweeper_handle = match app_state.config.session_sweep_interval_secs {
    0 => {
      tracing::info!("Session sweeper disabled.");
      None
    }
    secs => Some(sweeper::spawn(
      app_state.store.clone(),
      app_state.clock.clone(),
      Duration::from_secs(secs),
      app_state.config.stale_claim_secs,
    )),
  };

  tracing::info!("Attempting to bind server to {}...", server_address);
  HttpServer::new(move || {
    App::new()
      .app_data(web::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await?;

  if let Some(handle) = sweeper_handle {
    handle.abort();
  }
  tracing::info!("Server stopped.");
  Ok(())
}
