// storefront/src/models/payment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

use crate::providers::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
  Initiated,
  Pending,
  Paid,
  Failed,
  Cancelled,
  Refunded,
}

impl PaymentStatus {
  /// At most one payment per order may be open at a time.
  pub fn is_open(self) -> bool {
    matches!(self, PaymentStatus::Initiated | PaymentStatus::Pending)
  }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
  pub id: Uuid,
  #[serde(skip)]
  pub tenant_id: Uuid,
  pub order_id: Uuid,
  pub provider_id: String,
  pub provider_kind: ProviderKind,
  /// Merchant trade number sent to the gateway; equals the order number.
  pub order_no: String,
  pub amount: i64,
  pub currency: String,
  pub status: PaymentStatus,
  pub transaction_no: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
