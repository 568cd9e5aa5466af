// storefront/src/services/reconciliation.rs

//! Applies a verified provider event to the stored payment or shipment.

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{money, Order, Payment, ShippingOrder, TenantScope};
use crate::providers::{NormalizedEvent, PaymentEventStatus, ProviderKind};
use crate::services::state_machine::{self, Plan};
use crate::store::CommerceStore;

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
  Applied {
    order_id: Uuid,
    order_no: String,
    change: String,
  },
  AlreadyApplied,
  Ignored(String),
}

/// The payment a callback refers to: the newest open attempt, else the newest.
fn current_payment(mut payments: Vec<Payment>) -> Option<Payment> {
  let open = payments.iter().rposition(|p| p.status.is_open());
  match open {
    Some(idx) => Some(payments.swap_remove(idx)),
    None => payments.pop(),
  }
}

async fn order_of(store: &dyn CommerceStore, tenant_id: Uuid, order_id: Uuid) -> Result<Order> {
  store
    .find_order_in_tenant(tenant_id, order_id)
    .await?
    .ok_or_else(|| AppError::Internal(format!("order {} referenced by a payment or shipment is missing", order_id)))
}

#[instrument(name = "reconciliation::reconcile", skip(store, event))]
pub async fn reconcile(
  store: &dyn CommerceStore,
  scope: TenantScope,
  provider_id: &str,
  provider_kind: ProviderKind,
  event: &NormalizedEvent,
) -> Result<ReconcileOutcome> {
  match event {
    NormalizedEvent::Payment {
      order_no,
      status,
      transaction_no,
      amount,
    } => {
      reconcile_payment(
        store,
        scope.tenant_id,
        provider_kind,
        order_no,
        *status,
        transaction_no.as_deref(),
        amount.as_deref(),
      )
      .await
    }
    NormalizedEvent::Shipment {
      tracking_number,
      status,
    } => reconcile_shipment(store, scope.tenant_id, provider_id, tracking_number, status).await,
    NormalizedEvent::Ignored { event_type } => {
      debug!(%event_type, "Provider event type is not handled.");
      Ok(ReconcileOutcome::Ignored(format!("event type {} is not handled", event_type)))
    }
  }
}

async fn reconcile_payment(
  store: &dyn CommerceStore,
  tenant_id: Uuid,
  provider_kind: ProviderKind,
  order_no: &str,
  status: PaymentEventStatus,
  transaction_no: Option<&str>,
  reported_amount: Option<&str>,
) -> Result<ReconcileOutcome> {
  for attempt in 1..=MAX_ATTEMPTS {
    let payments = store.find_payments_by_order_no(tenant_id, provider_kind, order_no).await?;
    let Some(payment) = current_payment(payments) else {
      warn!(%order_no, "Callback names an order number with no payment.");
      return Ok(ReconcileOutcome::Ignored(format!("no payment for order number {}", order_no)));
    };

    if status == PaymentEventStatus::Paid {
      if let Some(reported) = reported_amount {
        if money::parse_major_units(reported, &payment.currency) != Some(payment.amount) {
          warn!(
            %order_no,
            reported,
            expected = payment.amount,
            currency = %payment.currency,
            "Paid amount does not match the payment, not applying."
          );
          return Ok(ReconcileOutcome::Ignored("paid amount does not match".to_string()));
        }
      }
    }

    let order = order_of(store, tenant_id, payment.order_id).await?;
    match state_machine::plan_payment_event(&order, &payment, status, transaction_no.map(str::to_string)) {
      Plan::AlreadyApplied => return Ok(ReconcileOutcome::AlreadyApplied),
      Plan::Ignored(reason) => {
        warn!(%order_no, %reason, "Payment event not applicable.");
        return Ok(ReconcileOutcome::Ignored(reason));
      }
      Plan::Apply(transition) => {
        if store.apply_transition(tenant_id, &transition).await? {
          let change = format!("payment {:?}", status).to_lowercase();
          info!(order_id = %order.id, %order_no, %change, "Payment event applied.");
          return Ok(ReconcileOutcome::Applied {
            order_id: order.id,
            order_no: order.order_no,
            change,
          });
        }
        debug!(attempt, "Payment or order changed concurrently, re-planning.");
      }
    }
  }
  Err(AppError::Internal(format!(
    "payment for order number {} kept changing during reconciliation",
    order_no
  )))
}

async fn reconcile_shipment(
  store: &dyn CommerceStore,
  tenant_id: Uuid,
  provider_id: &str,
  tracking_number: &str,
  status: &crate::providers::ShipmentEventStatus,
) -> Result<ReconcileOutcome> {
  for attempt in 1..=MAX_ATTEMPTS {
    let shipment: Option<ShippingOrder> = store
      .find_shipment_by_tracking(tenant_id, provider_id, tracking_number)
      .await?;
    let Some(shipment) = shipment else {
      warn!(%tracking_number, "Callback names an unknown tracking number.");
      return Ok(ReconcileOutcome::Ignored(format!("unknown tracking number {}", tracking_number)));
    };

    let order = order_of(store, tenant_id, shipment.order_id).await?;
    match state_machine::plan_shipment_event(&order, &shipment, status) {
      Plan::AlreadyApplied => return Ok(ReconcileOutcome::AlreadyApplied),
      Plan::Ignored(reason) => {
        warn!(%tracking_number, %reason, "Shipment event not applicable.");
        return Ok(ReconcileOutcome::Ignored(reason));
      }
      Plan::Apply(transition) => {
        if store.apply_transition(tenant_id, &transition).await? {
          let change = format!("shipment {:?}", status).to_lowercase();
          info!(order_id = %order.id, %tracking_number, %change, "Shipment event applied.");
          return Ok(ReconcileOutcome::Applied {
            order_id: order.id,
            order_no: order.order_no,
            change,
          });
        }
        debug!(attempt, "Shipment or order changed concurrently, re-planning.");
      }
    }
  }
  Err(AppError::Internal(format!(
    "shipment {} kept changing during reconciliation",
    tracking_number
  )))
}
