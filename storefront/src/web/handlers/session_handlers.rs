// storefront/src/web/handlers/session_handlers.rs

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Address, CheckoutSession, Money, SessionStatus};
use crate::pipelines::contexts::SessionCtxData;
use crate::services::payment_service::{self, PaymentHandlerView};
use crate::state::AppState;
use crate::web::extractors::AuthenticatedMerchant;
use flowline::{ContextData, PipelineResult};

// --- Request DTOs ---

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CartLineRequest {
  pub offer_id: Uuid,
  pub quantity: i32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
  pub merchant_id: Option<String>,
  pub cart: Vec<CartLineRequest>,
  pub shipping_address: Option<Address>,
  pub billing_address: Option<Address>,
  pub buyer_email: Option<String>,
}

// --- Response DTOs ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LineItemView {
  pub offer_id: Uuid,
  pub sku: String,
  pub name: String,
  pub quantity: i32,
  pub unit_price: Money,
  pub line_total: Money,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TotalsView {
  pub subtotal: Money,
  pub shipping: Money,
  pub tax: Money,
  pub total: Money,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
  pub id: Uuid,
  /// Status as observed now; a lapsed session reads `EXPIRED` before any sweep.
  pub status: SessionStatus,
  pub line_items: Vec<LineItemView>,
  pub totals: TotalsView,
  pub payment_handlers: Vec<PaymentHandlerView>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub shipping_address: Option<Address>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub billing_address: Option<Address>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub buyer_email: Option<String>,
  pub expires_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub order_id: Option<Uuid>,
}

impl SessionView {
  pub fn new(session: &CheckoutSession, payment_handlers: Vec<PaymentHandlerView>, now: DateTime<Utc>) -> Self {
    let money = |value: i64| Money::new(value, session.currency.clone());
    Self {
      id: session.id,
      status: session.effective_status(now),
      line_items: session
        .cart
        .0
        .iter()
        .map(|line| LineItemView {
          offer_id: line.offer_id,
          sku: line.sku.clone(),
          name: line.name.clone(),
          quantity: line.quantity,
          unit_price: money(line.unit_price),
          line_total: money(line.line_total),
        })
        .collect(),
      totals: TotalsView {
        subtotal: money(session.subtotal),
        shipping: money(session.shipping_fee),
        tax: money(session.tax),
        total: money(session.total),
      },
      payment_handlers,
      shipping_address: session.shipping_address.as_ref().map(|a| a.0.clone()),
      billing_address: session.billing_address.as_ref().map(|a| a.0.clone()),
      buyer_email: session.buyer_email.clone(),
      expires_at: session.expires_at,
      order_id: session.order_id,
    }
  }
}

// --- Handler Implementations ---

#[instrument(
  name = "handler::create_checkout_session",
  skip(app_state, merchant, req_payload),
  fields(merchant_id = %merchant.merchant_id, lines = req_payload.cart.len())
)]
pub async fn create_session_handler(
  app_state: web::Data<AppState>,
  merchant: AuthenticatedMerchant,
  req_payload: web::Json<CreateSessionRequest>,
) -> Result<HttpResponse, AppError> {
  let req = req_payload.into_inner();
  merchant.ensure_merchant(req.merchant_id.as_deref())?;

  let ctx_initial = SessionCtxData::new(
    app_state.get_ref().clone(),
    merchant.scope,
    req.cart.iter().map(|l| (l.offer_id, l.quantity)).collect(),
    req.shipping_address,
    req.billing_address,
    req.buyer_email,
  );
  let ctx_data = ContextData::new(ctx_initial);

  match app_state.registry.run(ctx_data.clone()).await {
    Ok(PipelineResult::Completed) => {
      let guard = ctx_data.read();
      let session = guard.session.as_ref().ok_or_else(|| {
        warn!("Session pipeline completed without a session.");
        AppError::Internal("checkout session was not created".to_string())
      })?;
      info!(session_id = %session.id, "Checkout session created.");
      let view = SessionView::new(session, guard.payment_handlers.clone(), app_state.clock.now());
      Ok(HttpResponse::Created().json(view))
    }
    Ok(PipelineResult::Stopped) => {
      warn!("Session pipeline stopped unexpectedly.");
      Err(AppError::Internal("checkout session creation was halted".to_string()))
    }
    Err(app_err) => Err(app_err),
  }
}

#[instrument(
  name = "handler::get_checkout_session",
  skip(app_state, merchant),
  fields(merchant_id = %merchant.merchant_id)
)]
pub async fn get_session_handler(
  app_state: web::Data<AppState>,
  merchant: AuthenticatedMerchant,
  session_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let session_id = session_id.into_inner();
  let session = app_state
    .store
    .find_session(merchant.scope, session_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("checkout session {}", session_id)))?;
  let accounts = app_state.store.list_provider_accounts(merchant.scope).await?;
  let view = SessionView::new(
    &session,
    payment_service::payment_handlers(&accounts),
    app_state.clock.now(),
  );
  Ok(HttpResponse::Ok().json(view))
}
