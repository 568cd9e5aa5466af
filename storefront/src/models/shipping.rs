// storefront/src/models/shipping.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "shipping_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingStatus {
  Pending,
  Preparing,
  Delivering,
  Delivered,
  Returned,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ShippingOrder {
  pub id: Uuid,
  #[serde(skip)]
  pub tenant_id: Uuid,
  pub order_id: Uuid,
  pub provider_id: String,
  pub tracking_number: String,
  pub status: ShippingStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
