// storefront/src/pipelines/checkout_pipeline.rs

//! Checkout completion: turns a claimed session into exactly one order.

use sqlx::types::Json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
  CheckoutSession, Order, OrderAddress, OrderItem, OrderPaymentStatus, OrderStatus, SessionStatus, ShippingStatus,
  TenantScope,
};
use crate::pipelines::common_steps;
use crate::pipelines::contexts::CompleteCtxData;
use crate::services::notifier::Notification;
use crate::services::{payment_service, pricing};
use crate::state::AppState;
use crate::store::{MaterializeOutcome, OrderDraft};
use flowline::{ContextData, Pipeline, PipelineControl, Registry};

/// Error for a session that can no longer be completed, judged from a fresh read.
fn unavailable(session: &CheckoutSession, now: chrono::DateTime<chrono::Utc>) -> AppError {
  match session.effective_status(now) {
    SessionStatus::Completed => AppError::Conflict {
      message: "checkout session is already completed".to_string(),
      order_id: session.order_id,
    },
    SessionStatus::Expired => AppError::SessionExpired,
    SessionStatus::Cancelled => AppError::Conflict {
      message: "checkout session was cancelled".to_string(),
      order_id: None,
    },
    SessionStatus::Claimed | SessionStatus::Pending => AppError::ConcurrentClaim,
  }
}

fn build_draft(
  session: &CheckoutSession,
  account: Option<&crate::models::ProviderAccount>,
  now: chrono::DateTime<chrono::Utc>,
) -> OrderDraft {
  let order_id = Uuid::new_v4();
  let order = Order {
    id: order_id,
    tenant_id: session.tenant_id,
    shop_id: session.shop_id,
    order_no: pricing::generate_order_no(now),
    status: OrderStatus::Pending,
    payment_status: OrderPaymentStatus::Pending,
    shipping_status: ShippingStatus::Pending,
    currency: session.currency.clone(),
    subtotal: session.subtotal,
    shipping_fee: session.shipping_fee,
    tax: session.tax,
    total_amount: session.total,
    checkout_session_id: Some(session.id),
    buyer_email: session.buyer_email.clone(),
    created_at: now,
    updated_at: now,
  };

  let items = session
    .cart
    .0
    .iter()
    .map(|line| OrderItem {
      id: Uuid::new_v4(),
      tenant_id: session.tenant_id,
      order_id,
      product_id: line.offer_id,
      sku: line.sku.clone(),
      name: line.name.clone(),
      quantity: line.quantity,
      unit_price: line.unit_price,
      line_total: line.line_total,
    })
    .collect();

  let addresses = [("SHIPPING", &session.shipping_address), ("BILLING", &session.billing_address)]
    .into_iter()
    .filter_map(|(kind, address)| {
      address.as_ref().map(|a| OrderAddress {
        tenant_id: session.tenant_id,
        order_id,
        kind: kind.to_string(),
        address: Json(a.0.clone()),
      })
    })
    .collect();

  let payment = account.map(|a| payment_service::new_payment(&order, a, now));
  OrderDraft {
    order,
    items,
    addresses,
    payment,
  }
}

async fn release(app_state: &AppState, scope: TenantScope, session_id: Uuid, token: Uuid) {
  match app_state.store.release_claim(scope, session_id, token).await {
    Ok(true) => info!(%session_id, "Claim released."),
    Ok(false) => warn!(%session_id, "Claim was already gone when releasing."),
    Err(e) => error!(%session_id, error = %e, "Failed to release claim; the sweeper will recover it."),
  }
}

pub fn register_checkout_pipeline(registry: &Arc<Registry<AppError>>, _app_state: &AppState) {
  let mut p = Pipeline::<CompleteCtxData, AppError>::new(&[
    ("load_session", false, None),
    ("check_session_state", false, None),
    ("select_payment_handler", false, None),
    ("claim_session", false, None),
    ("materialize_order", false, None),
    ("initiate_payment", true, None),
    ("send_confirmation", true, None),
  ]);

  p.on_root("load_session", |ctx_data: ContextData<CompleteCtxData>| {
    Box::pin(async move {
      let (app_state, scope, session_id) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.scope, guard.session_id)
      };
      let session = app_state
        .store
        .find_session(scope, session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("checkout session {}", session_id)))?;
      ctx_data.write().session = Some(session);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.on_root("check_session_state", |ctx_data: ContextData<CompleteCtxData>| {
    Box::pin(async move {
      let guard = ctx_data.read();
      let session = guard
        .session
        .as_ref()
        .ok_or_else(|| AppError::Internal("session missing from context".to_string()))?;
      let now = guard.app_state.clock.now();
      if session.effective_status(now) != SessionStatus::Pending {
        let err = unavailable(session, now);
        info!(session_id = %session.id, code = err.code(), "Session cannot be completed.");
        return Err(err);
      }
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  // Validation before the claim so a bad handler id has no side effects.
  p.on_root("select_payment_handler", |ctx_data: ContextData<CompleteCtxData>| {
    Box::pin(async move {
      let (app_state, scope, handler_id) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.scope, guard.handler_id.clone())
      };
      let accounts = app_state.store.list_provider_accounts(scope).await?;
      let account = payment_service::select_payment_account(&accounts, handler_id.as_deref())?.cloned();
      if account.is_none() {
        warn!("Shop has no payment handler; order will be created without a payment.");
      }
      ctx_data.write().payment_account = account;
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.on_root("claim_session", |ctx_data: ContextData<CompleteCtxData>| {
    Box::pin(async move {
      let (app_state, scope, session_id) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.scope, guard.session_id)
      };
      let token = Uuid::new_v4();
      let now = app_state.clock.now();

      if app_state.store.claim_session(scope, session_id, token, now).await? {
        info!(%session_id, "Session claimed.");
        ctx_data.write().claim_token = Some(token);
        return Ok(PipelineControl::Continue);
      }

      // Lost the race or crossed the deadline: a fresh read tells which.
      let fresh = app_state
        .store
        .find_session(scope, session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("checkout session {}", session_id)))?;
      let err = unavailable(&fresh, app_state.clock.now());
      info!(%session_id, code = err.code(), "Session claim rejected.");
      Err::<PipelineControl, _>(err)
    })
  });

  p.on_root("materialize_order", |ctx_data: ContextData<CompleteCtxData>| {
    Box::pin(async move {
      let (app_state, scope, session_id, token, draft) = {
        let guard = ctx_data.read();
        let session = guard
          .session
          .as_ref()
          .ok_or_else(|| AppError::Internal("session missing from context".to_string()))?;
        let token = guard
          .claim_token
          .ok_or_else(|| AppError::Internal("materialize_order ran without a claim".to_string()))?;
        let draft = build_draft(session, guard.payment_account.as_ref(), guard.app_state.clock.now());
        (guard.app_state.clone(), guard.scope, guard.session_id, token, draft)
      };

      let outcome = match app_state.store.materialize_order(scope, session_id, token, &draft).await {
        Ok(outcome) => outcome,
        Err(e) => {
          release(&app_state, scope, session_id, token).await;
          return Err(e);
        }
      };

      match outcome {
        MaterializeOutcome::Created(order) => {
          info!(order_id = %order.id, order_no = %order.order_no, total = order.total_amount, "Order created.");
          let mut guard = ctx_data.write();
          guard.order = Some(order);
          guard.payment = draft.payment;
          Ok(PipelineControl::Continue)
        }
        MaterializeOutcome::InsufficientStock {
          product_id,
          requested,
          available,
        } => {
          release(&app_state, scope, session_id, token).await;
          Err(AppError::InsufficientStock {
            product_id,
            requested,
            available,
          })
        }
        MaterializeOutcome::ProductUnavailable { product_id } => {
          release(&app_state, scope, session_id, token).await;
          Err(AppError::InvalidCart(format!("product {} is no longer available", product_id)))
        }
        MaterializeOutcome::ClaimLost => {
          warn!(%session_id, "Claim was lost before the order was written.");
          Err(AppError::ConcurrentClaim)
        }
      }
    })
  });

  // Runs after the order commits. A provider failure leaves the order PENDING.
  p.on_root("initiate_payment", |ctx_data: ContextData<CompleteCtxData>| {
    Box::pin(async move {
      let (app_state, account, order) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.payment_account.clone(), guard.order.clone())
      };
      let (Some(account), Some(order)) = (account, order) else {
        return Ok::<_, AppError>(PipelineControl::Continue);
      };

      match payment_service::build_request(&app_state, &account, &order).await {
        Ok(request) => ctx_data.write().payment_request = Some(request),
        Err(e) => {
          warn!(order_id = %order.id, error = %e, "Payment initiation failed; order kept for retry.");
          ctx_data.write().payment_error = Some(e.to_string());
        }
      }
      Ok(PipelineControl::Continue)
    })
  });

  p.on_root("send_confirmation", |ctx_data: ContextData<CompleteCtxData>| {
    Box::pin(async move {
      let (app_state, order) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.order.clone())
      };
      if let Some(order) = order {
        let sent = common_steps::notify_best_effort(
          &app_state,
          Notification::OrderCreated {
            order_id: order.id,
            order_no: order.order_no.clone(),
            buyer_email: order.buyer_email.clone(),
            total_amount: order.total_amount,
            currency: order.currency.clone(),
          },
        )
        .await;
        ctx_data.write().confirmation_sent = sent;
      }
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  registry.register_pipeline(p);
}
