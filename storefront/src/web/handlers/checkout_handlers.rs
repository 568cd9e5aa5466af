// storefront/src/web/handlers/checkout_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::pipelines::contexts::CompleteCtxData;
use crate::state::AppState;
use crate::web::extractors::{AuthenticatedMerchant, OptionalJson};
use flowline::{ContextData, PipelineResult};

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
  pub handler_id: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompleteCheckoutRequest {
  pub merchant_id: Option<String>,
  #[serde(default)]
  pub payment_info: PaymentInfo,
}

/// Completes a checkout session into an order. The body is optional.
#[instrument(
  name = "handler::complete_checkout",
  skip(app_state, merchant, req_payload),
  fields(merchant_id = %merchant.merchant_id, session_id = %session_id)
)]
pub async fn complete_checkout_handler(
  app_state: web::Data<AppState>,
  merchant: AuthenticatedMerchant,
  session_id: web::Path<Uuid>,
  req_payload: OptionalJson<CompleteCheckoutRequest>,
) -> Result<HttpResponse, AppError> {
  let session_id = session_id.into_inner();
  let req = req_payload.into_inner().unwrap_or_default();
  merchant.ensure_merchant(req.merchant_id.as_deref())?;

  let ctx_initial = CompleteCtxData::new(
    app_state.get_ref().clone(),
    merchant.scope,
    session_id,
    req.payment_info.handler_id,
  );
  let ctx_data = ContextData::new(ctx_initial);

  match app_state.registry.run(ctx_data.clone()).await {
    Ok(PipelineResult::Completed) => {
      let guard = ctx_data.read();
      let order = guard.order.as_ref().ok_or_else(|| {
        warn!("Checkout pipeline completed without an order.");
        AppError::Internal("order was not created".to_string())
      })?;
      info!(
        order_id = %order.id,
        payment_ready = guard.payment_request.is_some(),
        confirmation_sent = guard.confirmation_sent,
        "Checkout completed."
      );

      let mut body = json!({
        "order": order,
        "payment": guard.payment,
      });
      if let Some(request) = &guard.payment_request {
        body["paymentRequest"] = json!(request);
      }
      if let Some(error) = &guard.payment_error {
        body["paymentError"] = json!(error);
      }
      Ok(HttpResponse::Created().json(body))
    }
    Ok(PipelineResult::Stopped) => {
      warn!("Checkout pipeline stopped unexpectedly.");
      Err(AppError::Internal("checkout was halted".to_string()))
    }
    Err(app_err) => Err(app_err),
  }
}
