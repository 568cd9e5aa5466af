// storefront/src/models/shop.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

use crate::providers::ProviderConfig;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
  pub id: Uuid,
  pub tenant_id: Uuid,
  pub name: String,
  pub currency: String,
  /// Flat shipping fee in minor units.
  pub shipping_fee: i64,
  pub free_shipping_threshold: Option<i64>,
  pub tax_rate_bps: i32,
}

/// A configured payment or logistics provider of a shop. `provider_id` is the
/// shop-local handle used in callback URLs and as the payment handler id.
#[derive(Debug, Clone, FromRow)]
pub struct ProviderAccount {
  pub tenant_id: Uuid,
  pub shop_id: Uuid,
  pub provider_id: String,
  pub config: Json<ProviderConfig>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "merchant_role", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
  Viewer,
  Staff,
  Owner,
}

/// Merchant API credential. Only the SHA-256 digest of the key is stored.
#[derive(Clone, FromRow)]
pub struct MerchantCredential {
  pub id: Uuid,
  pub tenant_id: Uuid,
  pub shop_id: Uuid,
  pub merchant_id: String,
  pub key_hash: String,
  pub role: Role,
  /// Empty means any calling platform is accepted.
  pub allowed_platforms: Vec<String>,
  pub active: bool,
}

impl std::fmt::Debug for MerchantCredential {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MerchantCredential")
      .field("id", &self.id)
      .field("tenant_id", &self.tenant_id)
      .field("shop_id", &self.shop_id)
      .field("merchant_id", &self.merchant_id)
      .field("role", &self.role)
      .field("allowed_platforms", &self.allowed_platforms)
      .field("active", &self.active)
      .finish_non_exhaustive()
  }
}
