// storefront/src/pipelines/common_steps.rs

use tracing::{info, instrument, warn};

use crate::errors::{AppError, Result as AppResult};
use crate::models::{Shop, TenantScope};
use crate::services::notifier::Notification;
use crate::state::AppState;

/// Resolves the shop of `scope`. A shop owned by another tenant is treated as
/// absent.
#[instrument(name = "common_step::load_shop", skip(app_state))]
pub async fn load_shop(app_state: &AppState, scope: TenantScope) -> AppResult<Shop> {
  match app_state.store.find_shop(scope.shop_id).await? {
    Some(shop) if shop.tenant_id == scope.tenant_id => Ok(shop),
    _ => Err(AppError::NotFound(format!("shop {}", scope.shop_id))),
  }
}

/// Sends `notification`, logging instead of failing. Returns whether it went out.
#[instrument(name = "common_step::notify", skip_all)]
pub async fn notify_best_effort(app_state: &AppState, notification: Notification) -> bool {
  match app_state.notifier.notify(&notification).await {
    Ok(()) => {
      info!("Notification delivered.");
      true
    }
    Err(e) => {
      warn!(error = %e, "Notification failed; state change stands.");
      false
    }
  }
}
