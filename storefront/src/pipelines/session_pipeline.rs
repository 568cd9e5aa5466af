// storefront/src/pipelines/session_pipeline.rs

use sqlx::types::Json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{CheckoutSession, SessionStatus};
use crate::pipelines::common_steps;
use crate::pipelines::contexts::SessionCtxData;
use crate::services::{payment_service, pricing};
use crate::state::AppState;
use flowline::{ContextData, Pipeline, PipelineControl, Registry};

pub fn register_session_pipeline(registry: &Arc<Registry<AppError>>, _app_state: &AppState) {
  let mut p = Pipeline::<SessionCtxData, AppError>::new(&[
    ("load_shop", false, None),
    ("price_cart", false, None),
    ("list_payment_handlers", false, None),
    ("persist_session", false, None),
  ]);

  p.on_root("load_shop", |ctx_data: ContextData<SessionCtxData>| {
    Box::pin(async move {
      let (app_state, scope) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.scope)
      };
      let shop = common_steps::load_shop(&app_state, scope).await?;
      ctx_data.write().shop = Some(shop);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  // Validates every line against the catalog and prices it from catalog data.
  p.on_root("price_cart", |ctx_data: ContextData<SessionCtxData>| {
    Box::pin(async move {
      let (app_state, scope, shop, requested) = {
        let guard = ctx_data.read();
        (
          guard.app_state.clone(),
          guard.scope,
          guard.shop.clone(),
          guard.requested_lines.clone(),
        )
      };
      let shop = shop.ok_or_else(|| AppError::Internal("price_cart ran before load_shop".to_string()))?;

      let lines = pricing::merge_lines(&requested)?;
      let ids: Vec<Uuid> = lines.iter().map(|(id, _)| *id).collect();
      let catalog = app_state.store.find_products(scope, &ids).await?;
      let priced = pricing::price_cart(&shop, &lines, &catalog).map_err(|e| {
        warn!(error = %e, "Cart rejected.");
        e
      })?;

      info!(
        lines = priced.lines.len(),
        subtotal = priced.subtotal,
        total = priced.total,
        currency = %shop.currency,
        "Cart priced."
      );
      ctx_data.write().priced = Some(priced);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.on_root("list_payment_handlers", |ctx_data: ContextData<SessionCtxData>| {
    Box::pin(async move {
      let (app_state, scope) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.scope)
      };
      let accounts = app_state.store.list_provider_accounts(scope).await?;
      ctx_data.write().payment_handlers = payment_service::payment_handlers(&accounts);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.on_root("persist_session", |ctx_data: ContextData<SessionCtxData>| {
    Box::pin(async move {
      let (app_state, session) = {
        let guard = ctx_data.read();
        let shop = guard
          .shop
          .as_ref()
          .ok_or_else(|| AppError::Internal("shop missing from context".to_string()))?;
        let priced = guard
          .priced
          .as_ref()
          .ok_or_else(|| AppError::Internal("priced cart missing from context".to_string()))?;
        let now = guard.app_state.clock.now();
        let expires_at = guard
          .app_state
          .config
          .session_ttl()
          .and_then(|ttl| now.checked_add_signed(ttl))
          .ok_or_else(|| AppError::Config("session TTL is out of range".to_string()))?;
        let session = CheckoutSession {
          id: Uuid::new_v4(),
          tenant_id: guard.scope.tenant_id,
          shop_id: guard.scope.shop_id,
          status: SessionStatus::Pending,
          cart: Json(priced.lines.clone()),
          currency: shop.currency.clone(),
          subtotal: priced.subtotal,
          shipping_fee: priced.shipping_fee,
          tax: priced.tax,
          total: priced.total,
          shipping_address: guard.shipping_address.clone().map(Json),
          billing_address: guard.billing_address.clone().map(Json),
          buyer_email: guard.buyer_email.clone(),
          expires_at,
          claim_token: None,
          claimed_at: None,
          order_id: None,
          created_at: now,
          updated_at: now,
        };
        (guard.app_state.clone(), session)
      };

      app_state.store.insert_session(&session).await?;
      info!(session_id = %session.id, expires_at = %session.expires_at, "Checkout session created.");
      ctx_data.write().session = Some(session);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  registry.register_pipeline(p);
}
