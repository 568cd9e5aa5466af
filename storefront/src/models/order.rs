// storefront/src/models/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

use super::session::Address;
use super::shipping::ShippingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
  Pending,
  Paid,
  Processing,
  Shipped,
  Completed,
  Cancelled,
  Refunding,
}

/// Payment progress as seen from the order. The per-attempt detail lives on
/// [`super::Payment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "order_payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPaymentStatus {
  Pending,
  Paid,
  Failed,
  Refunded,
}

/// The three status columns of an order, read and written together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderState {
  pub status: OrderStatus,
  pub payment_status: OrderPaymentStatus,
  pub shipping_status: ShippingStatus,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  pub id: Uuid,
  #[serde(skip)]
  pub tenant_id: Uuid,
  pub shop_id: Uuid,
  pub order_no: String,
  pub status: OrderStatus,
  pub payment_status: OrderPaymentStatus,
  pub shipping_status: ShippingStatus,
  pub currency: String,
  pub subtotal: i64,
  pub shipping_fee: i64,
  pub tax: i64,
  pub total_amount: i64,
  pub checkout_session_id: Option<Uuid>,
  pub buyer_email: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Order {
  pub fn state(&self) -> OrderState {
    OrderState {
      status: self.status,
      payment_status: self.payment_status,
      shipping_status: self.shipping_status,
    }
  }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
  pub id: Uuid,
  #[serde(skip)]
  pub tenant_id: Uuid,
  pub order_id: Uuid,
  pub product_id: Uuid,
  pub sku: String,
  pub name: String,
  pub quantity: i32,
  pub unit_price: i64,
  pub line_total: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderAddress {
  #[serde(skip)]
  pub tenant_id: Uuid,
  pub order_id: Uuid,
  /// `SHIPPING` or `BILLING`.
  pub kind: String,
  pub address: Json<Address>,
}
