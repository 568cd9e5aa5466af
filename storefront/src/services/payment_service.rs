// storefront/src/services/payment_service.rs

//! Payment handler selection and outbound payment requests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{Order, OrderPaymentStatus, OrderStatus, Payment, PaymentStatus, ProviderAccount, TenantScope};
use crate::providers::{PaymentOrder, PaymentRequest};
use crate::state::AppState;
use crate::store::{OrderUpdate, Transition};

/// A payment handler as listed on a checkout session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHandlerView {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
}

pub fn payment_handlers(accounts: &[ProviderAccount]) -> Vec<PaymentHandlerView> {
  accounts
    .iter()
    .filter(|a| a.config.0.supports_payments())
    .map(|a| PaymentHandlerView {
      id: a.provider_id.clone(),
      kind: a.config.0.kind().to_string(),
    })
    .collect()
}

/// Picks the handler named by the buyer, or the first payment-capable one.
/// `None` when the shop has no payment provider at all.
pub fn select_payment_account<'a>(
  accounts: &'a [ProviderAccount],
  handler_id: Option<&str>,
) -> Result<Option<&'a ProviderAccount>> {
  let mut capable = accounts.iter().filter(|a| a.config.0.supports_payments());
  match handler_id {
    Some(id) => capable
      .find(|a| a.provider_id == id)
      .map(Some)
      .ok_or_else(|| AppError::InvalidRequest(format!("unknown payment handler '{}'", id))),
    None => Ok(capable.next()),
  }
}

pub fn new_payment(order: &Order, account: &ProviderAccount, now: DateTime<Utc>) -> Payment {
  Payment {
    id: Uuid::new_v4(),
    tenant_id: order.tenant_id,
    order_id: order.id,
    provider_id: account.provider_id.clone(),
    provider_kind: account.config.0.kind(),
    order_no: order.order_no.clone(),
    amount: order.total_amount,
    currency: order.currency.clone(),
    status: PaymentStatus::Initiated,
    transaction_no: None,
    created_at: now,
    updated_at: now,
  }
}

pub fn callback_url(state: &AppState, shop_id: Uuid, provider_id: &str) -> String {
  format!("{}/api/v1/webhooks/{}/{}", state.config.app_base_url, shop_id, provider_id)
}

/// Builds the gateway request for `payment`, bounded by the provider timeout.
#[instrument(name = "payment_service::build_request", skip_all, fields(order_no = %order.order_no, provider_id = %account.provider_id))]
pub async fn build_request(state: &AppState, account: &ProviderAccount, order: &Order) -> Result<PaymentRequest> {
  let payment_order = PaymentOrder {
    order_no: order.order_no.clone(),
    amount: order.total_amount,
    currency: order.currency.clone(),
    description: format!("Order {}", order.order_no),
    buyer_email: order.buyer_email.clone(),
    created_at: order.created_at,
    notify_url: callback_url(state, order.shop_id, &account.provider_id),
    return_url: format!("{}/orders/{}", state.config.app_base_url, order.id),
  };

  let adapter = account.config.0.adapter(&state.http);
  match tokio::time::timeout(
    state.config.provider_timeout(),
    adapter.build_payment_request(&payment_order),
  )
  .await
  {
    Ok(Ok(request)) => Ok(request),
    Ok(Err(e)) => {
      warn!(error = %e, "Payment request could not be built.");
      Err(e.into())
    }
    Err(_) => {
      warn!(timeout_ms = state.config.provider_timeout_ms, "Payment provider timed out.");
      Err(AppError::Provider("payment provider timed out".to_string()))
    }
  }
}

/// Starts a payment for an unpaid order. Reuses the open payment when it is on
/// the requested handler; otherwise opens a new `INITIATED` one.
#[instrument(name = "payment_service::initiate_for_order", skip(state))]
pub async fn initiate_for_order(
  state: &AppState,
  scope: TenantScope,
  order_id: Uuid,
  handler_id: Option<&str>,
) -> Result<(Payment, PaymentRequest)> {
  let order = state
    .store
    .find_order(scope, order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;

  if order.status != OrderStatus::Pending
    || !matches!(order.payment_status, OrderPaymentStatus::Pending | OrderPaymentStatus::Failed)
  {
    return Err(AppError::InvalidStateTransition {
      entity: "payment",
      from: format!("{:?}", order.payment_status).to_uppercase(),
      to: "INITIATED".to_string(),
    });
  }

  let accounts = state.store.list_provider_accounts(scope).await?;
  let payments = state.store.find_payments_for_order(scope, order_id).await?;
  let open = payments.iter().rev().find(|p| p.status.is_open());

  let (payment, account) = match open {
    Some(open) if handler_id.map_or(true, |h| h == open.provider_id) => {
      let account = accounts
        .iter()
        .find(|a| a.provider_id == open.provider_id)
        .ok_or_else(|| AppError::Conflict {
          message: format!("payment handler '{}' is no longer configured", open.provider_id),
          order_id: Some(order_id),
        })?;
      (open.clone(), account)
    }
    Some(open) => {
      return Err(AppError::Conflict {
        message: format!("payment {} is still in progress", open.id),
        order_id: Some(order_id),
      })
    }
    None => {
      let account = select_payment_account(&accounts, handler_id)?
        .ok_or_else(|| AppError::InvalidRequest("shop has no payment handler configured".to_string()))?;
      let payment = new_payment(&order, account, state.clock.now());

      let mut transition = Transition {
        new_payment: Some(payment.clone()),
        ..Transition::default()
      };
      if order.payment_status == OrderPaymentStatus::Failed {
        let mut next = order.state();
        next.payment_status = OrderPaymentStatus::Pending;
        transition.order = Some(OrderUpdate {
          order_id,
          expected: order.state(),
          next,
        });
      }
      if !state.store.apply_transition(scope.tenant_id, &transition).await? {
        return Err(AppError::Conflict {
          message: "order changed while starting the payment".to_string(),
          order_id: Some(order_id),
        });
      }
      info!(payment_id = %payment.id, provider_id = %account.provider_id, "Payment initiated.");
      (payment, account)
    }
  };

  let request = build_request(state, account, &order).await?;
  Ok((payment, request))
}
