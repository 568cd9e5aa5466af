// storefront/src/store/memory.rs

//! In-process store. One lock guards every table, so each trait method is a
//! single atomic step exactly like a database transaction would be.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use super::{CommerceStore, MaterializeOutcome, OrderDraft, Transition};
use crate::errors::Result;
use crate::models::{
  CheckoutSession, MerchantCredential, Order, OrderAddress, OrderItem, Payment, Product, ProviderAccount,
  SessionStatus, ShippingOrder, Shop, TenantScope,
};
use crate::providers::ProviderKind;

#[derive(Default)]
struct Tables {
  shops: HashMap<Uuid, Shop>,
  credentials: Vec<MerchantCredential>,
  provider_accounts: Vec<ProviderAccount>,
  products: HashMap<Uuid, Product>,
  sessions: HashMap<Uuid, CheckoutSession>,
  orders: HashMap<Uuid, Order>,
  order_items: Vec<OrderItem>,
  order_addresses: Vec<OrderAddress>,
  payments: Vec<Payment>,
  shipments: Vec<ShippingOrder>,
}

#[derive(Default)]
pub struct MemoryStore {
  tables: Mutex<Tables>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert_shop(&self, shop: Shop) {
    self.tables.lock().shops.insert(shop.id, shop);
  }

  pub fn insert_credential(&self, credential: MerchantCredential) {
    self.tables.lock().credentials.push(credential);
  }

  pub fn insert_provider_account(&self, account: ProviderAccount) {
    self.tables.lock().provider_accounts.push(account);
  }

  pub fn insert_product(&self, product: Product) {
    self.tables.lock().products.insert(product.id, product);
  }

  pub fn product_stock(&self, product_id: Uuid) -> Option<i32> {
    self.tables.lock().products.get(&product_id).map(|p| p.stock)
  }

  pub fn order_count(&self) -> usize {
    self.tables.lock().orders.len()
  }

  pub fn payment_count(&self) -> usize {
    self.tables.lock().payments.len()
  }
}

fn in_scope(scope: TenantScope, tenant_id: Uuid, shop_id: Uuid) -> bool {
  scope.tenant_id == tenant_id && scope.shop_id == shop_id
}

impl Tables {
  /// Checks every part of `transition` against the current rows without
  /// touching them.
  fn transition_applies(&self, tenant_id: Uuid, transition: &Transition) -> bool {
    if let Some(update) = &transition.order {
      match self.orders.get(&update.order_id) {
        Some(order) if order.tenant_id == tenant_id && order.state() == update.expected => {}
        _ => return false,
      }
    }
    if let Some(update) = &transition.payment {
      let ok = self
        .payments
        .iter()
        .any(|p| p.id == update.payment_id && p.tenant_id == tenant_id && p.status == update.expected);
      if !ok {
        return false;
      }
    }
    if let Some(update) = &transition.shipment {
      let ok = self
        .shipments
        .iter()
        .any(|s| s.id == update.shipment_id && s.tenant_id == tenant_id && s.status == update.expected);
      if !ok {
        return false;
      }
    }
    if let Some(new_payment) = &transition.new_payment {
      let open = self.payments.iter().any(|p| {
        p.order_id == new_payment.order_id
          && p.status.is_open()
          // A payment closed by this same transition no longer counts.
          && transition.payment.as_ref().map_or(true, |u| u.payment_id != p.id || u.next.is_open())
      });
      if open || new_payment.tenant_id != tenant_id {
        return false;
      }
    }
    if let Some(new_shipment) = &transition.new_shipment {
      let taken = self.shipments.iter().any(|s| {
        s.tenant_id == new_shipment.tenant_id
          && s.provider_id == new_shipment.provider_id
          && s.tracking_number == new_shipment.tracking_number
      });
      if taken || new_shipment.tenant_id != tenant_id {
        return false;
      }
    }
    true
  }
}

#[async_trait]
impl CommerceStore for MemoryStore {
  async fn find_shop(&self, shop_id: Uuid) -> Result<Option<Shop>> {
    Ok(self.tables.lock().shops.get(&shop_id).cloned())
  }

  async fn find_credential_by_key_hash(&self, key_hash: &str) -> Result<Option<MerchantCredential>> {
    Ok(
      self
        .tables
        .lock()
        .credentials
        .iter()
        .find(|c| c.key_hash == key_hash)
        .cloned(),
    )
  }

  async fn list_provider_accounts(&self, scope: TenantScope) -> Result<Vec<ProviderAccount>> {
    let mut accounts: Vec<ProviderAccount> = self
      .tables
      .lock()
      .provider_accounts
      .iter()
      .filter(|a| in_scope(scope, a.tenant_id, a.shop_id))
      .cloned()
      .collect();
    accounts.sort_by_key(|a| a.created_at);
    Ok(accounts)
  }

  async fn find_provider_account(&self, scope: TenantScope, provider_id: &str) -> Result<Option<ProviderAccount>> {
    Ok(
      self
        .tables
        .lock()
        .provider_accounts
        .iter()
        .find(|a| in_scope(scope, a.tenant_id, a.shop_id) && a.provider_id == provider_id)
        .cloned(),
    )
  }

  async fn find_products(&self, scope: TenantScope, ids: &[Uuid]) -> Result<Vec<Product>> {
    let tables = self.tables.lock();
    Ok(
      ids
        .iter()
        .filter_map(|id| tables.products.get(id))
        .filter(|p| in_scope(scope, p.tenant_id, p.shop_id))
        .cloned()
        .collect(),
    )
  }

  async fn insert_session(&self, session: &CheckoutSession) -> Result<()> {
    self.tables.lock().sessions.insert(session.id, session.clone());
    Ok(())
  }

  async fn find_session(&self, scope: TenantScope, session_id: Uuid) -> Result<Option<CheckoutSession>> {
    Ok(
      self
        .tables
        .lock()
        .sessions
        .get(&session_id)
        .filter(|s| in_scope(scope, s.tenant_id, s.shop_id))
        .cloned(),
    )
  }

  async fn claim_session(
    &self,
    scope: TenantScope,
    session_id: Uuid,
    token: Uuid,
    now: DateTime<Utc>,
  ) -> Result<bool> {
    let mut tables = self.tables.lock();
    match tables.sessions.get_mut(&session_id) {
      Some(s)
        if in_scope(scope, s.tenant_id, s.shop_id) && s.status == SessionStatus::Pending && s.expires_at > now =>
      {
        s.status = SessionStatus::Claimed;
        s.claim_token = Some(token);
        s.claimed_at = Some(now);
        s.updated_at = now;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn release_claim(&self, scope: TenantScope, session_id: Uuid, token: Uuid) -> Result<bool> {
    let mut tables = self.tables.lock();
    match tables.sessions.get_mut(&session_id) {
      Some(s)
        if in_scope(scope, s.tenant_id, s.shop_id)
          && s.status == SessionStatus::Claimed
          && s.claim_token == Some(token) =>
      {
        s.status = SessionStatus::Pending;
        s.claim_token = None;
        s.claimed_at = None;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn materialize_order(
    &self,
    scope: TenantScope,
    session_id: Uuid,
    token: Uuid,
    draft: &OrderDraft,
  ) -> Result<MaterializeOutcome> {
    let mut tables = self.tables.lock();

    let claimed = tables.sessions.get(&session_id).map_or(false, |s| {
      in_scope(scope, s.tenant_id, s.shop_id) && s.status == SessionStatus::Claimed && s.claim_token == Some(token)
    });
    if !claimed {
      return Ok(MaterializeOutcome::ClaimLost);
    }

    let reservations = draft.reservations();
    for (product_id, requested) in &reservations {
      match tables.products.get(product_id) {
        Some(p) if in_scope(scope, p.tenant_id, p.shop_id) => {
          if p.stock < *requested {
            return Ok(MaterializeOutcome::InsufficientStock {
              product_id: *product_id,
              requested: *requested,
              available: p.stock,
            });
          }
        }
        _ => return Ok(MaterializeOutcome::ProductUnavailable { product_id: *product_id }),
      }
    }

    let now = draft.order.created_at;
    for (product_id, requested) in &reservations {
      if let Some(p) = tables.products.get_mut(product_id) {
        p.stock -= requested;
        p.updated_at = now;
      }
    }
    tables.orders.insert(draft.order.id, draft.order.clone());
    tables.order_items.extend(draft.items.iter().cloned());
    tables.order_addresses.extend(draft.addresses.iter().cloned());
    if let Some(payment) = &draft.payment {
      tables.payments.push(payment.clone());
    }
    if let Some(s) = tables.sessions.get_mut(&session_id) {
      s.status = SessionStatus::Completed;
      s.order_id = Some(draft.order.id);
      s.updated_at = now;
    }

    Ok(MaterializeOutcome::Created(draft.order.clone()))
  }

  async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
    let mut tables = self.tables.lock();
    let mut expired = 0;
    for s in tables.sessions.values_mut() {
      if s.status == SessionStatus::Pending && s.expires_at <= now {
        s.status = SessionStatus::Expired;
        s.updated_at = now;
        expired += 1;
      }
    }
    Ok(expired)
  }

  async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let mut tables = self.tables.lock();
    let mut released = 0;
    for s in tables.sessions.values_mut() {
      if s.status == SessionStatus::Claimed && s.claimed_at.map_or(true, |at| at < cutoff) {
        s.status = SessionStatus::Pending;
        s.claim_token = None;
        s.claimed_at = None;
        released += 1;
      }
    }
    Ok(released)
  }

  async fn find_order(&self, scope: TenantScope, order_id: Uuid) -> Result<Option<Order>> {
    Ok(
      self
        .tables
        .lock()
        .orders
        .get(&order_id)
        .filter(|o| in_scope(scope, o.tenant_id, o.shop_id))
        .cloned(),
    )
  }

  async fn find_order_items(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<OrderItem>> {
    let tables = self.tables.lock();
    if !tables.orders.get(&order_id).map_or(false, |o| in_scope(scope, o.tenant_id, o.shop_id)) {
      return Ok(vec![]);
    }
    Ok(tables.order_items.iter().filter(|i| i.order_id == order_id).cloned().collect())
  }

  async fn find_order_addresses(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<OrderAddress>> {
    let tables = self.tables.lock();
    if !tables.orders.get(&order_id).map_or(false, |o| in_scope(scope, o.tenant_id, o.shop_id)) {
      return Ok(vec![]);
    }
    Ok(
      tables
        .order_addresses
        .iter()
        .filter(|a| a.order_id == order_id)
        .cloned()
        .collect(),
    )
  }

  async fn find_payments_for_order(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<Payment>> {
    let tables = self.tables.lock();
    if !tables.orders.get(&order_id).map_or(false, |o| in_scope(scope, o.tenant_id, o.shop_id)) {
      return Ok(vec![]);
    }
    let mut payments: Vec<Payment> = tables.payments.iter().filter(|p| p.order_id == order_id).cloned().collect();
    payments.sort_by_key(|p| p.created_at);
    Ok(payments)
  }

  async fn find_payments_by_order_no(
    &self,
    tenant_id: Uuid,
    provider_kind: ProviderKind,
    order_no: &str,
  ) -> Result<Vec<Payment>> {
    let mut payments: Vec<Payment> = self
      .tables
      .lock()
      .payments
      .iter()
      .filter(|p| p.tenant_id == tenant_id && p.provider_kind == provider_kind && p.order_no == order_no)
      .cloned()
      .collect();
    payments.sort_by_key(|p| p.created_at);
    Ok(payments)
  }

  async fn find_shipments_for_order(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<ShippingOrder>> {
    let tables = self.tables.lock();
    if !tables.orders.get(&order_id).map_or(false, |o| in_scope(scope, o.tenant_id, o.shop_id)) {
      return Ok(vec![]);
    }
    Ok(tables.shipments.iter().filter(|s| s.order_id == order_id).cloned().collect())
  }

  async fn find_shipment_by_tracking(
    &self,
    tenant_id: Uuid,
    provider_id: &str,
    tracking_number: &str,
  ) -> Result<Option<ShippingOrder>> {
    Ok(
      self
        .tables
        .lock()
        .shipments
        .iter()
        .find(|s| s.tenant_id == tenant_id && s.provider_id == provider_id && s.tracking_number == tracking_number)
        .cloned(),
    )
  }

  async fn find_order_in_tenant(&self, tenant_id: Uuid, order_id: Uuid) -> Result<Option<Order>> {
    Ok(
      self
        .tables
        .lock()
        .orders
        .get(&order_id)
        .filter(|o| o.tenant_id == tenant_id)
        .cloned(),
    )
  }

  async fn apply_transition(&self, tenant_id: Uuid, transition: &Transition) -> Result<bool> {
    let mut tables = self.tables.lock();
    if !tables.transition_applies(tenant_id, transition) {
      return Ok(false);
    }
    let now = Utc::now();

    if let Some(update) = &transition.order {
      if let Some(order) = tables.orders.get_mut(&update.order_id) {
        order.status = update.next.status;
        order.payment_status = update.next.payment_status;
        order.shipping_status = update.next.shipping_status;
        order.updated_at = now;
      }
    }
    if let Some(update) = &transition.payment {
      if let Some(payment) = tables.payments.iter_mut().find(|p| p.id == update.payment_id) {
        payment.status = update.next;
        if update.transaction_no.is_some() {
          payment.transaction_no = update.transaction_no.clone();
        }
        payment.updated_at = now;
      }
    }
    if let Some(update) = &transition.shipment {
      if let Some(shipment) = tables.shipments.iter_mut().find(|s| s.id == update.shipment_id) {
        shipment.status = update.next;
        shipment.updated_at = now;
      }
    }
    if let Some(new_payment) = &transition.new_payment {
      tables.payments.push(new_payment.clone());
    }
    if let Some(new_shipment) = &transition.new_shipment {
      tables.shipments.push(new_shipment.clone());
    }
    Ok(true)
  }
}
