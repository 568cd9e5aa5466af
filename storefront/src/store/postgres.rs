// storefront/src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{CommerceStore, MaterializeOutcome, OrderDraft, Transition};
use crate::errors::{AppError, Result};
use crate::models::{
  CheckoutSession, MerchantCredential, Order, OrderAddress, OrderItem, Payment, Product, ProviderAccount,
  ShippingOrder, Shop, TenantScope,
};
use crate::providers::ProviderKind;

const SCHEMA: &str = include_str!("../../schema.sql");

const ORDER_COLUMNS: &str = "id, tenant_id, shop_id, order_no, status, payment_status, shipping_status, currency, \
   subtotal, shipping_fee, tax, total_amount, checkout_session_id, buyer_email, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, tenant_id, order_id, provider_id, provider_kind, order_no, amount, currency, \
   status, transaction_no, created_at, updated_at";

const SHIPMENT_COLUMNS: &str =
  "id, tenant_id, order_id, provider_id, tracking_number, status, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn connect(database_url: &str) -> Result<Self> {
    let pool = PgPool::connect(database_url).await?;
    Ok(Self::new(pool))
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }

  pub async fn run_migrations(&self) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
    info!("Database schema is up to date.");
    Ok(())
  }
}

async fn insert_payment(tx: &mut Transaction<'_, Postgres>, payment: &Payment) -> Result<bool> {
  let inserted = sqlx::query(
    "INSERT INTO payments (id, tenant_id, order_id, provider_id, provider_kind, order_no, amount, currency, status, \
     transaction_no, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) ON CONFLICT DO NOTHING",
  )
  .bind(payment.id)
  .bind(payment.tenant_id)
  .bind(payment.order_id)
  .bind(&payment.provider_id)
  .bind(payment.provider_kind)
  .bind(&payment.order_no)
  .bind(payment.amount)
  .bind(&payment.currency)
  .bind(payment.status)
  .bind(&payment.transaction_no)
  .bind(payment.created_at)
  .bind(payment.updated_at)
  .execute(&mut **tx)
  .await?
  .rows_affected();
  Ok(inserted == 1)
}

#[async_trait]
impl CommerceStore for PgStore {
  async fn find_shop(&self, shop_id: Uuid) -> Result<Option<Shop>> {
    sqlx::query_as::<_, Shop>(
      "SELECT id, tenant_id, name, currency, shipping_fee, free_shipping_threshold, tax_rate_bps \
       FROM shops WHERE id = $1",
    )
    .bind(shop_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_credential_by_key_hash(&self, key_hash: &str) -> Result<Option<MerchantCredential>> {
    sqlx::query_as::<_, MerchantCredential>(
      "SELECT id, tenant_id, shop_id, merchant_id, key_hash, role, allowed_platforms, active \
       FROM merchant_credentials WHERE key_hash = $1",
    )
    .bind(key_hash)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn list_provider_accounts(&self, scope: TenantScope) -> Result<Vec<ProviderAccount>> {
    sqlx::query_as::<_, ProviderAccount>(
      "SELECT tenant_id, shop_id, provider_id, config, created_at FROM provider_accounts \
       WHERE tenant_id = $1 AND shop_id = $2 ORDER BY created_at",
    )
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_provider_account(&self, scope: TenantScope, provider_id: &str) -> Result<Option<ProviderAccount>> {
    sqlx::query_as::<_, ProviderAccount>(
      "SELECT tenant_id, shop_id, provider_id, config, created_at FROM provider_accounts \
       WHERE tenant_id = $1 AND shop_id = $2 AND provider_id = $3",
    )
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .bind(provider_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_products(&self, scope: TenantScope, ids: &[Uuid]) -> Result<Vec<Product>> {
    sqlx::query_as::<_, Product>(
      "SELECT id, tenant_id, shop_id, sku, name, price, stock, published, created_at, updated_at \
       FROM products WHERE tenant_id = $1 AND shop_id = $2 AND id = ANY($3)",
    )
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .bind(ids)
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  #[instrument(name = "pg::insert_session", skip_all, fields(session_id = %session.id))]
  async fn insert_session(&self, session: &CheckoutSession) -> Result<()> {
    sqlx::query(
      "INSERT INTO checkout_sessions (id, tenant_id, shop_id, status, cart, currency, subtotal, shipping_fee, tax, \
       total, shipping_address, billing_address, buyer_email, expires_at, claim_token, claimed_at, order_id, \
       created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
    )
    .bind(session.id)
    .bind(session.tenant_id)
    .bind(session.shop_id)
    .bind(session.status)
    .bind(&session.cart)
    .bind(&session.currency)
    .bind(session.subtotal)
    .bind(session.shipping_fee)
    .bind(session.tax)
    .bind(session.total)
    .bind(&session.shipping_address)
    .bind(&session.billing_address)
    .bind(&session.buyer_email)
    .bind(session.expires_at)
    .bind(session.claim_token)
    .bind(session.claimed_at)
    .bind(session.order_id)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn find_session(&self, scope: TenantScope, session_id: Uuid) -> Result<Option<CheckoutSession>> {
    sqlx::query_as::<_, CheckoutSession>(
      "SELECT id, tenant_id, shop_id, status, cart, currency, subtotal, shipping_fee, tax, total, shipping_address, \
       billing_address, buyer_email, expires_at, claim_token, claimed_at, order_id, created_at, updated_at \
       FROM checkout_sessions WHERE id = $1 AND tenant_id = $2 AND shop_id = $3",
    )
    .bind(session_id)
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn claim_session(
    &self,
    scope: TenantScope,
    session_id: Uuid,
    token: Uuid,
    now: DateTime<Utc>,
  ) -> Result<bool> {
    let claimed = sqlx::query(
      "UPDATE checkout_sessions SET status = 'CLAIMED', claim_token = $1, claimed_at = $2, updated_at = $2 \
       WHERE id = $3 AND tenant_id = $4 AND shop_id = $5 AND status = 'PENDING' AND expires_at > $2",
    )
    .bind(token)
    .bind(now)
    .bind(session_id)
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .execute(&self.pool)
    .await?
    .rows_affected();
    Ok(claimed == 1)
  }

  async fn release_claim(&self, scope: TenantScope, session_id: Uuid, token: Uuid) -> Result<bool> {
    let released = sqlx::query(
      "UPDATE checkout_sessions SET status = 'PENDING', claim_token = NULL, claimed_at = NULL \
       WHERE id = $1 AND tenant_id = $2 AND shop_id = $3 AND status = 'CLAIMED' AND claim_token = $4",
    )
    .bind(session_id)
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .bind(token)
    .execute(&self.pool)
    .await?
    .rows_affected();
    Ok(released == 1)
  }

  #[instrument(name = "pg::materialize_order", skip_all, fields(%session_id, order_no = %draft.order.order_no))]
  async fn materialize_order(
    &self,
    scope: TenantScope,
    session_id: Uuid,
    token: Uuid,
    draft: &OrderDraft,
  ) -> Result<MaterializeOutcome> {
    let mut tx = self.pool.begin().await?;

    // Lock the claimed session row so a sweeper cannot release it mid-way.
    let held: Option<Uuid> = sqlx::query_scalar(
      "SELECT id FROM checkout_sessions \
       WHERE id = $1 AND tenant_id = $2 AND shop_id = $3 AND status = 'CLAIMED' AND claim_token = $4 FOR UPDATE",
    )
    .bind(session_id)
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .bind(token)
    .fetch_optional(&mut *tx)
    .await?;
    if held.is_none() {
      return Ok(MaterializeOutcome::ClaimLost);
    }

    for (product_id, requested) in draft.reservations() {
      let reserved = sqlx::query(
        "UPDATE products SET stock = stock - $1, updated_at = $2 \
         WHERE id = $3 AND tenant_id = $4 AND shop_id = $5 AND stock >= $1",
      )
      .bind(requested)
      .bind(draft.order.created_at)
      .bind(product_id)
      .bind(scope.tenant_id)
      .bind(scope.shop_id)
      .execute(&mut *tx)
      .await?
      .rows_affected();

      if reserved == 0 {
        let available: Option<i32> =
          sqlx::query_scalar("SELECT stock FROM products WHERE id = $1 AND tenant_id = $2 AND shop_id = $3")
            .bind(product_id)
            .bind(scope.tenant_id)
            .bind(scope.shop_id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.rollback().await?;
        debug!(%product_id, requested, ?available, "Stock reservation rejected.");
        return Ok(match available {
          Some(available) => MaterializeOutcome::InsufficientStock {
            product_id,
            requested,
            available,
          },
          None => MaterializeOutcome::ProductUnavailable { product_id },
        });
      }
    }

    let order = &draft.order;
    sqlx::query(
      "INSERT INTO orders (id, tenant_id, shop_id, order_no, status, payment_status, shipping_status, currency, \
       subtotal, shipping_fee, tax, total_amount, checkout_session_id, buyer_email, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(order.id)
    .bind(order.tenant_id)
    .bind(order.shop_id)
    .bind(&order.order_no)
    .bind(order.status)
    .bind(order.payment_status)
    .bind(order.shipping_status)
    .bind(&order.currency)
    .bind(order.subtotal)
    .bind(order.shipping_fee)
    .bind(order.tax)
    .bind(order.total_amount)
    .bind(order.checkout_session_id)
    .bind(&order.buyer_email)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *tx)
    .await?;

    for item in &draft.items {
      sqlx::query(
        "INSERT INTO order_items (id, tenant_id, order_id, product_id, sku, name, quantity, unit_price, line_total) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
      )
      .bind(item.id)
      .bind(item.tenant_id)
      .bind(item.order_id)
      .bind(item.product_id)
      .bind(&item.sku)
      .bind(&item.name)
      .bind(item.quantity)
      .bind(item.unit_price)
      .bind(item.line_total)
      .execute(&mut *tx)
      .await?;
    }

    for address in &draft.addresses {
      sqlx::query("INSERT INTO order_addresses (tenant_id, order_id, kind, address) VALUES ($1, $2, $3, $4)")
        .bind(address.tenant_id)
        .bind(address.order_id)
        .bind(&address.kind)
        .bind(&address.address)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(payment) = &draft.payment {
      if !insert_payment(&mut tx, payment).await? {
        return Err(AppError::Internal(format!("payment row for order {} was not written", order.id)));
      }
    }

    sqlx::query(
      "UPDATE checkout_sessions SET status = 'COMPLETED', order_id = $1, updated_at = $2 \
       WHERE id = $3 AND claim_token = $4",
    )
    .bind(order.id)
    .bind(order.created_at)
    .bind(session_id)
    .bind(token)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(MaterializeOutcome::Created(order.clone()))
  }

  async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
    let expired = sqlx::query(
      "UPDATE checkout_sessions SET status = 'EXPIRED', updated_at = $1 WHERE status = 'PENDING' AND expires_at <= $1",
    )
    .bind(now)
    .execute(&self.pool)
    .await?
    .rows_affected();
    Ok(expired)
  }

  async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let released = sqlx::query(
      "UPDATE checkout_sessions SET status = 'PENDING', claim_token = NULL, claimed_at = NULL \
       WHERE status = 'CLAIMED' AND (claimed_at IS NULL OR claimed_at < $1)",
    )
    .bind(cutoff)
    .execute(&self.pool)
    .await?
    .rows_affected();
    Ok(released)
  }

  async fn find_order(&self, scope: TenantScope, order_id: Uuid) -> Result<Option<Order>> {
    sqlx::query_as::<_, Order>(&format!(
      "SELECT {} FROM orders WHERE id = $1 AND tenant_id = $2 AND shop_id = $3",
      ORDER_COLUMNS
    ))
    .bind(order_id)
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_order_items(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<OrderItem>> {
    sqlx::query_as::<_, OrderItem>(
      "SELECT i.id, i.tenant_id, i.order_id, i.product_id, i.sku, i.name, i.quantity, i.unit_price, i.line_total \
       FROM order_items i JOIN orders o ON o.id = i.order_id \
       WHERE i.order_id = $1 AND o.tenant_id = $2 AND o.shop_id = $3",
    )
    .bind(order_id)
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_order_addresses(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<OrderAddress>> {
    sqlx::query_as::<_, OrderAddress>(
      "SELECT a.tenant_id, a.order_id, a.kind, a.address \
       FROM order_addresses a JOIN orders o ON o.id = a.order_id \
       WHERE a.order_id = $1 AND o.tenant_id = $2 AND o.shop_id = $3",
    )
    .bind(order_id)
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_payments_for_order(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<Payment>> {
    sqlx::query_as::<_, Payment>(&format!(
      "SELECT {} FROM payments p WHERE order_id = $1 AND tenant_id = $2 \
       AND EXISTS (SELECT 1 FROM orders o WHERE o.id = p.order_id AND o.shop_id = $3) ORDER BY created_at",
      PAYMENT_COLUMNS
    ))
    .bind(order_id)
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_payments_by_order_no(
    &self,
    tenant_id: Uuid,
    provider_kind: ProviderKind,
    order_no: &str,
  ) -> Result<Vec<Payment>> {
    sqlx::query_as::<_, Payment>(&format!(
      "SELECT {} FROM payments WHERE tenant_id = $1 AND provider_kind = $2 AND order_no = $3 ORDER BY created_at",
      PAYMENT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(provider_kind)
    .bind(order_no)
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_shipments_for_order(&self, scope: TenantScope, order_id: Uuid) -> Result<Vec<ShippingOrder>> {
    sqlx::query_as::<_, ShippingOrder>(&format!(
      "SELECT {} FROM shipping_orders s WHERE order_id = $1 AND tenant_id = $2 \
       AND EXISTS (SELECT 1 FROM orders o WHERE o.id = s.order_id AND o.shop_id = $3) ORDER BY created_at",
      SHIPMENT_COLUMNS
    ))
    .bind(order_id)
    .bind(scope.tenant_id)
    .bind(scope.shop_id)
    .fetch_all(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_shipment_by_tracking(
    &self,
    tenant_id: Uuid,
    provider_id: &str,
    tracking_number: &str,
  ) -> Result<Option<ShippingOrder>> {
    sqlx::query_as::<_, ShippingOrder>(&format!(
      "SELECT {} FROM shipping_orders WHERE tenant_id = $1 AND provider_id = $2 AND tracking_number = $3",
      SHIPMENT_COLUMNS
    ))
    .bind(tenant_id)
    .bind(provider_id)
    .bind(tracking_number)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  async fn find_order_in_tenant(&self, tenant_id: Uuid, order_id: Uuid) -> Result<Option<Order>> {
    sqlx::query_as::<_, Order>(&format!(
      "SELECT {} FROM orders WHERE id = $1 AND tenant_id = $2",
      ORDER_COLUMNS
    ))
    .bind(order_id)
    .bind(tenant_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(AppError::Sqlx)
  }

  #[instrument(name = "pg::apply_transition", skip_all, fields(%tenant_id))]
  async fn apply_transition(&self, tenant_id: Uuid, transition: &Transition) -> Result<bool> {
    let mut tx = self.pool.begin().await?;
    let now = Utc::now();

    if let Some(update) = &transition.order {
      let applied = sqlx::query(
        "UPDATE orders SET status = $1, payment_status = $2, shipping_status = $3, updated_at = $4 \
         WHERE id = $5 AND tenant_id = $6 AND status = $7 AND payment_status = $8 AND shipping_status = $9",
      )
      .bind(update.next.status)
      .bind(update.next.payment_status)
      .bind(update.next.shipping_status)
      .bind(now)
      .bind(update.order_id)
      .bind(tenant_id)
      .bind(update.expected.status)
      .bind(update.expected.payment_status)
      .bind(update.expected.shipping_status)
      .execute(&mut *tx)
      .await?
      .rows_affected();
      if applied == 0 {
        return Ok(false);
      }
    }

    if let Some(update) = &transition.payment {
      let applied = sqlx::query(
        "UPDATE payments SET status = $1, transaction_no = COALESCE($2, transaction_no), updated_at = $3 \
         WHERE id = $4 AND tenant_id = $5 AND status = $6",
      )
      .bind(update.next)
      .bind(&update.transaction_no)
      .bind(now)
      .bind(update.payment_id)
      .bind(tenant_id)
      .bind(update.expected)
      .execute(&mut *tx)
      .await?
      .rows_affected();
      if applied == 0 {
        return Ok(false);
      }
    }

    if let Some(update) = &transition.shipment {
      let applied = sqlx::query(
        "UPDATE shipping_orders SET status = $1, updated_at = $2 WHERE id = $3 AND tenant_id = $4 AND status = $5",
      )
      .bind(update.next)
      .bind(now)
      .bind(update.shipment_id)
      .bind(tenant_id)
      .bind(update.expected)
      .execute(&mut *tx)
      .await?
      .rows_affected();
      if applied == 0 {
        return Ok(false);
      }
    }

    if let Some(payment) = &transition.new_payment {
      if payment.tenant_id != tenant_id || !insert_payment(&mut tx, payment).await? {
        return Ok(false);
      }
    }

    if let Some(shipment) = &transition.new_shipment {
      if shipment.tenant_id != tenant_id {
        return Ok(false);
      }
      let inserted = sqlx::query(
        "INSERT INTO shipping_orders (id, tenant_id, order_id, provider_id, tracking_number, status, created_at, \
         updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT DO NOTHING",
      )
      .bind(shipment.id)
      .bind(shipment.tenant_id)
      .bind(shipment.order_id)
      .bind(&shipment.provider_id)
      .bind(&shipment.tracking_number)
      .bind(shipment.status)
      .bind(shipment.created_at)
      .bind(shipment.updated_at)
      .execute(&mut *tx)
      .await?
      .rows_affected();
      if inserted == 0 {
        return Ok(false);
      }
    }

    tx.commit().await?;
    Ok(true)
  }
}
