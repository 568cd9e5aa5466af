// storefront/src/web/routes.rs

use actix_web::{error::JsonPayloadError, web, HttpRequest};

use crate::errors::AppError;
use crate::web::handlers::{checkout_handlers, order_handlers, session_handlers, webhook_handlers};

async fn health_check_handler() -> actix_web::HttpResponse {
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Malformed JSON bodies surface as `INVALID_REQUEST` rather than actix's plain-text 400.
fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
  AppError::InvalidRequest(err.to_string()).into()
}

pub fn json_config() -> web::JsonConfig {
  web::JsonConfig::default().error_handler(json_error_handler)
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.app_data(json_config()).service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/checkout-sessions")
          .route("", web::post().to(session_handlers::create_session_handler))
          .route("/{session_id}", web::get().to(session_handlers::get_session_handler))
          .route(
            "/{session_id}/complete",
            web::post().to(checkout_handlers::complete_checkout_handler),
          ),
      )
      .service(
        web::scope("/orders")
          .route("/{order_id}", web::get().to(order_handlers::get_order_handler))
          .route("/{order_id}/status", web::patch().to(order_handlers::change_status_handler))
          .route(
            "/{order_id}/shipments",
            web::post().to(order_handlers::register_shipment_handler),
          )
          .route(
            "/{order_id}/payments",
            web::post().to(order_handlers::initiate_payment_handler),
          ),
      )
      .service(
        web::scope("/webhooks").route(
          "/{shop_id}/{provider_id}",
          web::post().to(webhook_handlers::provider_webhook_handler),
        ),
      ),
  );
}
