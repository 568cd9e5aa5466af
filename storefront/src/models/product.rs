// storefront/src/models/product.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
  pub id: Uuid,
  pub tenant_id: Uuid,
  pub shop_id: Uuid,
  pub sku: String,
  pub name: String,
  /// Minor units of the shop currency.
  pub price: i64,
  /// Never negative; mutated only through the conditional decrement.
  pub stock: i32,
  pub published: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
