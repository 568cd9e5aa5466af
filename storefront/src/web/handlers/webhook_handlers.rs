// storefront/src/web/handlers/webhook_handlers.rs

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::pipelines::contexts::{RejectedCallback, WebhookCtxData};
use crate::providers::{InboundCallback, ProviderKind};
use crate::state::AppState;
use flowline::{ContextData, PipelineResult};

/// Acknowledgement in the exact form each provider treats as delivered.
fn accepted(kind: ProviderKind) -> HttpResponse {
  match kind {
    ProviderKind::NewebPay => HttpResponse::Ok().content_type("text/plain").body("SUCCESS"),
    ProviderKind::EcPay => HttpResponse::Ok().content_type("text/plain").body("1|OK"),
    ProviderKind::HmacWebhook => HttpResponse::Ok().json(json!({ "received": true })),
    ProviderKind::PayPal => HttpResponse::Ok().finish(),
  }
}

fn rejected(kind: ProviderKind, rejection: &RejectedCallback) -> HttpResponse {
  let status = if rejection.auth_failure {
    StatusCode::UNAUTHORIZED
  } else {
    StatusCode::BAD_REQUEST
  };
  match kind {
    ProviderKind::NewebPay => HttpResponse::build(status).content_type("text/plain").body("FAIL"),
    ProviderKind::EcPay => HttpResponse::build(status)
      .content_type("text/plain")
      .body(format!("0|{}", rejection.reason)),
    ProviderKind::HmacWebhook => HttpResponse::build(status).json(json!({
      "error": {
        "code": if rejection.auth_failure { "UNAUTHORIZED" } else { "INVALID_REQUEST" },
        "message": rejection.reason,
      }
    })),
    ProviderKind::PayPal => HttpResponse::build(status).finish(),
  }
}

#[instrument(
  name = "handler::provider_webhook",
  skip(app_state, req, path, body),
  fields(shop_id = %path.0, provider_id = %path.1, body_len = body.len())
)]
pub async fn provider_webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  path: web::Path<(Uuid, String)>,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let (shop_id, provider_id) = path.into_inner();
  let headers = req
    .headers()
    .iter()
    .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())));
  let callback = InboundCallback::new(headers, body);

  let ctx_initial = WebhookCtxData::new(app_state.get_ref().clone(), shop_id, provider_id, callback);
  let ctx_data = ContextData::new(ctx_initial);

  let result = app_state.registry.run(ctx_data.clone()).await;
  let guard = ctx_data.read();
  match result {
    Ok(PipelineResult::Completed) => {
      let kind = guard
        .provider_kind
        .ok_or_else(|| AppError::Internal("provider kind missing after reconciliation".to_string()))?;
      info!(outcome = ?guard.outcome, "Callback acknowledged.");
      Ok(accepted(kind))
    }
    Ok(PipelineResult::Stopped) => match (guard.provider_kind, guard.rejection.as_ref()) {
      (Some(kind), Some(rejection)) => {
        warn!(reason = %rejection.reason, auth_failure = rejection.auth_failure, "Callback refused.");
        Ok(rejected(kind, rejection))
      }
      _ => {
        error!("Webhook pipeline stopped without a rejection.");
        Err(AppError::Internal("webhook processing was halted".to_string()))
      }
    },
    Err(app_err) => Err(app_err),
  }
}
