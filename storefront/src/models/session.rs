// storefront/src/models/session.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "session_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
  Pending,
  /// Held by exactly one completion attempt.
  Claimed,
  Completed,
  Expired,
  Cancelled,
}

impl SessionStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, SessionStatus::Completed | SessionStatus::Expired | SessionStatus::Cancelled)
  }
}

/// Cart line frozen at session creation. Later catalog price changes never
/// reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
  pub offer_id: Uuid,
  pub sku: String,
  pub name: String,
  pub quantity: i32,
  pub unit_price: i64,
  pub line_total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
  pub name: String,
  pub line1: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub line2: Option<String>,
  pub city: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub postal_code: Option<String>,
  pub country: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CheckoutSession {
  pub id: Uuid,
  pub tenant_id: Uuid,
  pub shop_id: Uuid,
  pub status: SessionStatus,
  pub cart: Json<Vec<CartLine>>,
  pub currency: String,
  pub subtotal: i64,
  pub shipping_fee: i64,
  pub tax: i64,
  pub total: i64,
  pub shipping_address: Option<Json<Address>>,
  pub billing_address: Option<Json<Address>>,
  pub buyer_email: Option<String>,
  pub expires_at: DateTime<Utc>,
  pub claim_token: Option<Uuid>,
  pub claimed_at: Option<DateTime<Utc>>,
  pub order_id: Option<Uuid>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl CheckoutSession {
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at <= now
  }

  /// Status as observed at `now`: a pending session past its expiry reads as
  /// `Expired` even though nothing was written.
  pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
    match self.status {
      SessionStatus::Pending if self.is_expired_at(now) => SessionStatus::Expired,
      other => other,
    }
  }
}
