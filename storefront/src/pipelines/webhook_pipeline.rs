// storefront/src/pipelines/webhook_pipeline.rs

//! Provider callbacks: verify first, then reconcile. Nothing is written for a
//! callback that fails verification.

use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::TenantScope;
use crate::pipelines::common_steps;
use crate::pipelines::contexts::{RejectedCallback, WebhookCtxData};
use crate::services::notifier::Notification;
use crate::services::reconciliation::{self, ReconcileOutcome};
use crate::state::AppState;
use flowline::{ContextData, Pipeline, PipelineControl, Registry};

pub fn register_webhook_pipeline(registry: &Arc<Registry<AppError>>, _app_state: &AppState) {
  let mut p = Pipeline::<WebhookCtxData, AppError>::new(&[
    ("resolve_provider", false, None),
    ("verify_signature", false, None),
    ("reconcile_event", false, None),
    ("notify", true, None),
  ]);

  // The shop in the callback URL fixes the tenant; the provider must belong to it.
  p.on_root("resolve_provider", |ctx_data: ContextData<WebhookCtxData>| {
    Box::pin(async move {
      let (app_state, shop_id, provider_id) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.shop_id, guard.provider_id.clone())
      };
      let shop = app_state
        .store
        .find_shop(shop_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("shop {}", shop_id)))?;
      let scope = TenantScope {
        tenant_id: shop.tenant_id,
        shop_id: shop.id,
      };
      let account = app_state
        .store
        .find_provider_account(scope, &provider_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("provider {}", provider_id)))?;

      let mut guard = ctx_data.write();
      guard.scope = Some(scope);
      guard.provider_kind = Some(account.config.0.kind());
      guard.provider_config = Some(account.config.0);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.on_root("verify_signature", |ctx_data: ContextData<WebhookCtxData>| {
    Box::pin(async move {
      let (app_state, config, callback, provider_id) = {
        let guard = ctx_data.read();
        (
          guard.app_state.clone(),
          guard.provider_config.clone(),
          guard.callback.clone(),
          guard.provider_id.clone(),
        )
      };
      let config = config.ok_or_else(|| AppError::Internal("provider config missing from context".to_string()))?;
      let adapter = config.adapter(&app_state.http);

      match adapter.verify_callback(&callback).await {
        Ok(event) => {
          ctx_data.write().event = Some(event);
          Ok(PipelineControl::Continue)
        }
        Err(e) => {
          warn!(%provider_id, kind = %adapter.kind(), error = %e, "Callback rejected.");
          ctx_data.write().rejection = Some(RejectedCallback::from(&e));
          Ok::<_, AppError>(PipelineControl::Stop)
        }
      }
    })
  });

  p.on_root("reconcile_event", |ctx_data: ContextData<WebhookCtxData>| {
    Box::pin(async move {
      let (app_state, scope, kind, event, provider_id) = {
        let guard = ctx_data.read();
        (
          guard.app_state.clone(),
          guard.scope,
          guard.provider_kind,
          guard.event.clone(),
          guard.provider_id.clone(),
        )
      };
      let (Some(scope), Some(kind), Some(event)) = (scope, kind, event) else {
        return Err(AppError::Internal("reconcile_event ran before verification".to_string()));
      };

      let outcome = reconciliation::reconcile(app_state.store.as_ref(), scope, &provider_id, kind, &event).await?;
      info!(%provider_id, ?outcome, "Callback reconciled.");
      ctx_data.write().outcome = Some(outcome);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.on_root("notify", |ctx_data: ContextData<WebhookCtxData>| {
    Box::pin(async move {
      let (app_state, outcome) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.outcome.clone())
      };
      if let Some(ReconcileOutcome::Applied {
        order_id,
        order_no,
        change,
      }) = outcome
      {
        common_steps::notify_best_effort(
          &app_state,
          Notification::OrderUpdated {
            order_id,
            order_no,
            change,
          },
        )
        .await;
      }
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  registry.register_pipeline(p);
}
