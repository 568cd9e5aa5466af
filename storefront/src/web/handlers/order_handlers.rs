// storefront/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{OrderStatus, Role};
use crate::services::{order_service, payment_service};
use crate::state::AppState;
use crate::web::extractors::{AuthenticatedMerchant, OptionalJson};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
  pub status: OrderStatus,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegisterShipmentRequest {
  pub provider_id: String,
  pub tracking_number: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
  pub handler_id: Option<String>,
}

#[instrument(name = "handler::get_order", skip(app_state, merchant), fields(merchant_id = %merchant.merchant_id))]
pub async fn get_order_handler(
  app_state: web::Data<AppState>,
  merchant: AuthenticatedMerchant,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let view = order_service::load_view(app_state.store.as_ref(), merchant.scope, order_id.into_inner()).await?;
  Ok(HttpResponse::Ok().json(view))
}

#[instrument(
  name = "handler::change_order_status",
  skip(app_state, merchant, req_payload),
  fields(merchant_id = %merchant.merchant_id, to = ?req_payload.status)
)]
pub async fn change_status_handler(
  app_state: web::Data<AppState>,
  merchant: AuthenticatedMerchant,
  order_id: web::Path<Uuid>,
  req_payload: web::Json<StatusChangeRequest>,
) -> Result<HttpResponse, AppError> {
  merchant.require_role(Role::Staff)?;
  let order = order_service::change_status(
    app_state.store.as_ref(),
    merchant.scope,
    order_id.into_inner(),
    req_payload.status,
  )
  .await?;
  Ok(HttpResponse::Ok().json(order))
}

#[instrument(
  name = "handler::register_shipment",
  skip(app_state, merchant, req_payload),
  fields(merchant_id = %merchant.merchant_id, provider_id = %req_payload.provider_id)
)]
pub async fn register_shipment_handler(
  app_state: web::Data<AppState>,
  merchant: AuthenticatedMerchant,
  order_id: web::Path<Uuid>,
  req_payload: web::Json<RegisterShipmentRequest>,
) -> Result<HttpResponse, AppError> {
  merchant.require_role(Role::Staff)?;
  let shipment = order_service::register_shipment(
    app_state.store.as_ref(),
    merchant.scope,
    order_id.into_inner(),
    &req_payload.provider_id,
    &req_payload.tracking_number,
    app_state.clock.now(),
  )
  .await?;
  Ok(HttpResponse::Created().json(shipment))
}

#[instrument(name = "handler::initiate_payment", skip(app_state, merchant, req_payload), fields(merchant_id = %merchant.merchant_id))]
pub async fn initiate_payment_handler(
  app_state: web::Data<AppState>,
  merchant: AuthenticatedMerchant,
  order_id: web::Path<Uuid>,
  req_payload: OptionalJson<InitiatePaymentRequest>,
) -> Result<HttpResponse, AppError> {
  merchant.require_role(Role::Staff)?;
  let req = req_payload.into_inner().unwrap_or_default();
  let (payment, request) = payment_service::initiate_for_order(
    app_state.get_ref(),
    merchant.scope,
    order_id.into_inner(),
    req.handler_id.as_deref(),
  )
  .await?;
  info!(payment_id = %payment.id, "Payment request issued.");
  Ok(HttpResponse::Ok().json(json!({
    "payment": payment,
    "paymentRequest": request,
  })))
}
