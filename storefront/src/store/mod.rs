// storefront/src/store/mod.rs

//! Persistence boundary.
//!
//! All cross-request coordination happens here as single conditional writes:
//! the session claim, the guarded stock decrement and the optimistic status
//! transitions each report through their return value whether they took effect.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{
  CheckoutSession, MerchantCredential, Order, OrderAddress, OrderItem, OrderState, Payment, PaymentStatus, Product,
  ProviderAccount, ShippingOrder, ShippingStatus, Shop, TenantScope,
};
use crate::providers::ProviderKind;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Everything written when a claimed session becomes an order.
#[derive(Debug, Clone)]
pub struct OrderDraft {
  pub order: Order,
  pub items: Vec<OrderItem>,
  pub addresses: Vec<OrderAddress>,
  pub payment: Option<Payment>,
}

impl OrderDraft {
  /// `(product_id, quantity)` per product, sorted by product id so concurrent
  /// reservations lock rows in the same order.
  pub fn reservations(&self) -> Vec<(Uuid, i32)> {
    let mut lines: Vec<(Uuid, i32)> = Vec::new();
    for item in &self.items {
      match lines.iter_mut().find(|(id, _)| *id == item.product_id) {
        Some((_, qty)) => *qty += item.quantity,
        None => lines.push((item.product_id, item.quantity)),
      }
    }
    lines.sort_by_key(|(id, _)| *id);
    lines
  }
}

#[derive(Debug, Clone)]
pub enum MaterializeOutcome {
  Created(Order),
  /// A conditional decrement affected no row. Nothing was written.
  InsufficientStock {
    product_id: Uuid,
    requested: i32,
    available: i32,
  },
  /// The product vanished from the tenant's catalog since the session was created.
  ProductUnavailable { product_id: Uuid },
  /// The session is no longer claimed with this token. Nothing was written.
  ClaimLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderUpdate {
  pub order_id: Uuid,
  pub expected: OrderState,
  pub next: OrderState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUpdate {
  pub payment_id: Uuid,
  pub expected: PaymentStatus,
  pub next: PaymentStatus,
  pub transaction_no: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipmentUpdate {
  pub shipment_id: Uuid,
  pub expected: ShippingStatus,
  pub next: ShippingStatus,
}

/// An all-or-nothing set of conditional writes. Each update only applies when
/// the row still holds its `expected` status; if any part does not apply, none
/// of it does.
#[derive(Debug, Clone, Default)]
pub struct Transition {
  pub order: Option<OrderUpdate>,
  pub payment: Option<PaymentUpdate>,
  pub shipment: Option<ShipmentUpdate>,
  /// Rejected if the order already has an open payment.
  pub new_payment: Option<Payment>,
  /// Rejected if the tracking number is taken for the provider.
  pub new_shipment: Option<ShippingOrder>,
}

impl Transition {
  pub fn is_empty(&self) -> bool {
    self.order.is_none()
      && self.payment.is_none()
      && self.shipment.is_none()
      && self.new_payment.is_none()
      && self.new_shipment.is_none()
  }
}

#[async_trait]
pub trait CommerceStore: Send + Sync {
  async fn find_shop(&self, shop_id: Uuid) -> Result<Option<Shop>>;

  async fn find_credential_by_key_hash(&self, key_hash: &str) -> Result<Option<MerchantCredential>>;

  async fn list_provider_accounts(&self, scope: TenantScope) -> Result<Vec<ProviderAccount>>;

  async fn find_provider_account(&self, scope: TenantScope, provider_id: &str) -> Result<Option<ProviderAccount>>;

  async fn find_products(&self, scope: TenantScope, ids: &[Uuid]) -> Result<Vec<Product>>;

  async fn insert_session(&self, session: &CheckoutSession) -> Result<()>;

  async fn find_session(&self, scope: TenantScope, session_id: Uuid) -> Result<Option<CheckoutSession>>;

  /// `PENDING -> CLAIMED` when the session is unexpired at `now`.
  async fn claim_session(&self, scope: TenantScope, session_id: Uuid, token: Uuid, now: DateTime<Utc>)
    -> Result<bool>;

  /// `CLAIMED -> PENDING`, only for the holder of `token`.
  async fn release_claim(&self, scope: TenantScope, session_id: Uuid, token: Uuid) -> Result<bool>;

  /// Reserves stock, writes the draft and marks the session `COMPLETED`, in one
  /// atomic unit.
  async fn materialize_order(
    &self,
    scope: TenantScope,
    session_id: Uuid,
    token: Uuid,
    draft: &OrderDraft,
  ) -> Result<MaterializeOutcome>;

  /// Housekeeping: `PENDING -> EXPIRED` for sessions past their deadline.
  async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64>;

  /// Housekeeping: returns claims taken before `cutoff` to `PENDING`.
  async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64>;

  async fn find_order(&self, scope: TenantScope, order_id: Uuid) -> Result<Option<Order>>;

  async fn find_order_items(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<OrderItem>>;

  async fn find_order_addresses(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<OrderAddress>>;

  async fn find_payments_for_order(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<Payment>>;

  /// Payments narrowed by tenant and provider family, oldest first.
  async fn find_payments_by_order_no(
    &self,
    tenant_id: Uuid,
    provider_kind: ProviderKind,
    order_no: &str,
  ) -> Result<Vec<Payment>>;

  async fn find_shipments_for_order(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<ShippingOrder>>;

  async fn find_shipment_by_tracking(
    &self,
    tenant_id: Uuid,
    provider_id: &str,
    tracking_number: &str,
  ) -> Result<Option<ShippingOrder>>;

  /// Order lookup by id within a tenant, for callbacks that only know the tenant.
  async fn find_order_in_tenant(&self, tenant_id: Uuid, order_id: Uuid) -> Result<Option<Order>>;

  async fn apply_transition(&self, tenant_id: Uuid, transition: &Transition) -> Result<bool>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{OrderPaymentStatus, OrderStatus};

  fn item(product_id: Uuid, quantity: i32) -> OrderItem {
    OrderItem {
      id: Uuid::new_v4(),
      tenant_id: Uuid::nil(),
      order_id: Uuid::nil(),
      product_id,
      sku: "sku".into(),
      name: "name".into(),
      quantity,
      unit_price: 100,
      line_total: 100 * quantity as i64,
    }
  }

  #[test]
  fn reservations_are_merged_and_sorted() {
    let a = Uuid::from_u128(2);
    let b = Uuid::from_u128(1);
    let now = Utc::now();
    let draft = OrderDraft {
      order: Order {
        id: Uuid::nil(),
        tenant_id: Uuid::nil(),
        shop_id: Uuid::nil(),
        order_no: "X".into(),
        status: OrderStatus::Pending,
        payment_status: OrderPaymentStatus::Pending,
        shipping_status: ShippingStatus::Pending,
        currency: "TWD".into(),
        subtotal: 0,
        shipping_fee: 0,
        tax: 0,
        total_amount: 0,
        checkout_session_id: None,
        buyer_email: None,
        created_at: now,
        updated_at: now,
      },
      items: vec![item(a, 1), item(b, 2), item(a, 3)],
      addresses: vec![],
      payment: None,
    };
    assert_eq!(draft.reservations(), vec![(b, 2), (a, 4)]);
  }
}
