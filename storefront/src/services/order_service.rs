// storefront/src/services/order_service.rs

//! Merchant-side order operations: read, manual status change and shipment
//! registration.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{
  Order, OrderAddress, OrderItem, OrderStatus, Payment, ShippingOrder, ShippingStatus, TenantScope,
};
use crate::services::state_machine;
use crate::store::{CommerceStore, OrderUpdate, Transition};

/// Attempts at a conditional update before giving up on a hot row.
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
  #[serde(flatten)]
  pub order: Order,
  pub items: Vec<OrderItem>,
  pub addresses: Vec<OrderAddress>,
  pub payments: Vec<Payment>,
  pub shipments: Vec<ShippingOrder>,
}

async fn load_order(store: &dyn CommerceStore, scope: TenantScope, order_id: Uuid) -> Result<Order> {
  store
    .find_order(scope, order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))
}

#[instrument(name = "order_service::load_view", skip(store))]
pub async fn load_view(store: &dyn CommerceStore, scope: TenantScope, order_id: Uuid) -> Result<OrderView> {
  let order = load_order(store, scope, order_id).await?;
  Ok(OrderView {
    items: store.find_order_items(scope, order_id).await?,
    addresses: store.find_order_addresses(scope, order_id).await?,
    payments: store.find_payments_for_order(scope, order_id).await?,
    shipments: store.find_shipments_for_order(scope, order_id).await?,
    order,
  })
}

/// Applies one edge of the order status table. A concurrent change is
/// re-evaluated against the fresh row.
#[instrument(name = "order_service::change_status", skip(store))]
pub async fn change_status(
  store: &dyn CommerceStore,
  scope: TenantScope,
  order_id: Uuid,
  to: OrderStatus,
) -> Result<Order> {
  for attempt in 1..=MAX_ATTEMPTS {
    let order = load_order(store, scope, order_id).await?;
    let payments = store.find_payments_for_order(scope, order_id).await?;
    let open_payment = payments
      .iter()
      .filter(|p| p.status.is_open())
      .max_by_key(|p| p.created_at);
    let transition = state_machine::plan_manual_status(&order, open_payment, to)?;
    if store.apply_transition(scope.tenant_id, &transition).await? {
      info!(from = ?order.status, ?to, "Order status changed.");
      return load_order(store, scope, order_id).await;
    }
    warn!(attempt, "Order changed concurrently, re-evaluating.");
  }
  Err(AppError::Conflict {
    message: "order is being modified concurrently".to_string(),
    order_id: Some(order_id),
  })
}

/// Registers the carrier label of an order. One shipment per order; tracking
/// numbers are unique per tenant and logistics provider.
#[instrument(name = "order_service::register_shipment", skip(store))]
pub async fn register_shipment(
  store: &dyn CommerceStore,
  scope: TenantScope,
  order_id: Uuid,
  provider_id: &str,
  tracking_number: &str,
  now: DateTime<Utc>,
) -> Result<ShippingOrder> {
  let tracking_number = tracking_number.trim();
  if tracking_number.is_empty() {
    return Err(AppError::InvalidRequest("trackingNumber must not be empty".to_string()));
  }
  let account = store
    .find_provider_account(scope, provider_id)
    .await?
    .ok_or_else(|| AppError::InvalidRequest(format!("unknown logistics provider '{}'", provider_id)))?;
  if account.config.0.supports_payments() {
    return Err(AppError::InvalidRequest(format!(
      "provider '{}' is not a logistics provider",
      provider_id
    )));
  }

  let order = load_order(store, scope, order_id).await?;
  if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Refunding) {
    return Err(AppError::InvalidStateTransition {
      entity: "shipping",
      from: format!("{:?}", order.status).to_uppercase(),
      to: "PREPARING".to_string(),
    });
  }
  if order.shipping_status != ShippingStatus::Pending {
    return Err(AppError::Conflict {
      message: "order already has a shipment".to_string(),
      order_id: Some(order_id),
    });
  }
  if store
    .find_shipment_by_tracking(scope.tenant_id, provider_id, tracking_number)
    .await?
    .is_some()
  {
    return Err(AppError::Conflict {
      message: format!("tracking number {} is already registered", tracking_number),
      order_id: None,
    });
  }

  let shipment = ShippingOrder {
    id: Uuid::new_v4(),
    tenant_id: scope.tenant_id,
    order_id,
    provider_id: provider_id.to_string(),
    tracking_number: tracking_number.to_string(),
    status: ShippingStatus::Preparing,
    created_at: now,
    updated_at: now,
  };
  let mut next = order.state();
  next.shipping_status = ShippingStatus::Preparing;
  let transition = Transition {
    order: Some(OrderUpdate {
      order_id,
      expected: order.state(),
      next,
    }),
    new_shipment: Some(shipment.clone()),
    ..Transition::default()
  };

  if !store.apply_transition(scope.tenant_id, &transition).await? {
    return Err(AppError::Conflict {
      message: "order or tracking number changed while registering the shipment".to_string(),
      order_id: Some(order_id),
    });
  }
  info!(shipment_id = %shipment.id, "Shipment registered.");
  Ok(shipment)
}
