// storefront/src/providers/mod.rs

//! Payment and logistics provider adapters.
//!
//! Each provider family has its own configuration variant, outbound request
//! builder and inbound callback verifier. Verifiers fail closed: a callback is
//! only turned into a [`NormalizedEvent`] after its signature checks out against
//! configured key material.

pub mod ecpay;
pub mod hmac_webhook;
pub mod newebpay;
pub mod paypal;

use actix_web::web::Bytes;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::Type as SqlxType;
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::errors::AppError;

/// Key material. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn expose(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Debug for Secret {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("Secret(****)")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "provider_kind")]
pub enum ProviderKind {
  #[sqlx(rename = "NEWEBPAY")]
  #[serde(rename = "NEWEBPAY")]
  NewebPay,
  #[sqlx(rename = "ECPAY")]
  #[serde(rename = "ECPAY")]
  EcPay,
  #[sqlx(rename = "HMAC_WEBHOOK")]
  #[serde(rename = "HMAC_WEBHOOK")]
  HmacWebhook,
  #[sqlx(rename = "PAYPAL")]
  #[serde(rename = "PAYPAL")]
  PayPal,
}

impl ProviderKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ProviderKind::NewebPay => "NEWEBPAY",
      ProviderKind::EcPay => "ECPAY",
      ProviderKind::HmacWebhook => "HMAC_WEBHOOK",
      ProviderKind::PayPal => "PAYPAL",
    }
  }
}

impl std::fmt::Display for ProviderKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Per-shop provider configuration, selected by its `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderConfig {
  #[serde(rename = "NEWEBPAY")]
  NewebPay(newebpay::NewebPayConfig),
  #[serde(rename = "ECPAY")]
  EcPay(ecpay::EcPayConfig),
  #[serde(rename = "HMAC_WEBHOOK")]
  HmacWebhook(hmac_webhook::HmacWebhookConfig),
  #[serde(rename = "PAYPAL")]
  PayPal(paypal::PayPalConfig),
}

impl ProviderConfig {
  pub fn kind(&self) -> ProviderKind {
    match self {
      ProviderConfig::NewebPay(_) => ProviderKind::NewebPay,
      ProviderConfig::EcPay(_) => ProviderKind::EcPay,
      ProviderConfig::HmacWebhook(_) => ProviderKind::HmacWebhook,
      ProviderConfig::PayPal(_) => ProviderKind::PayPal,
    }
  }

  /// Logistics-only providers cannot be chosen as a payment handler.
  pub fn supports_payments(&self) -> bool {
    !matches!(self, ProviderConfig::HmacWebhook(_))
  }

  pub fn adapter(&self, http: &reqwest::Client) -> Box<dyn ProviderAdapter> {
    match self {
      ProviderConfig::NewebPay(c) => Box::new(newebpay::NewebPayAdapter::new(c.clone())),
      ProviderConfig::EcPay(c) => Box::new(ecpay::EcPayAdapter::new(c.clone())),
      ProviderConfig::HmacWebhook(c) => Box::new(hmac_webhook::HmacWebhookAdapter::new(c.clone())),
      ProviderConfig::PayPal(c) => Box::new(paypal::PayPalAdapter::new(c.clone(), http.clone())),
    }
  }
}

/// Raw provider callback as received. Header names are lower-cased.
#[derive(Debug, Clone)]
pub struct InboundCallback {
  pub headers: HashMap<String, String>,
  pub body: Bytes,
}

impl InboundCallback {
  pub fn new(headers: impl IntoIterator<Item = (String, String)>, body: Bytes) -> Self {
    Self {
      headers: headers
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect(),
      body,
    }
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
      .filter(|v| !v.is_empty())
  }

  /// Body parsed as `application/x-www-form-urlencoded` pairs, in wire order.
  pub fn form_pairs(&self) -> Result<Vec<(String, String)>, ProviderError> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(&self.body)
      .map_err(|e| ProviderError::Malformed(format!("form body: {}", e)))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEventStatus {
  Pending,
  Paid,
  Failed,
  Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipmentEventStatus {
  Preparing,
  Delivering,
  Delivered,
  Returned,
  /// Carrier status with no internal counterpart. Acknowledged, never applied.
  Unknown(String),
}

/// Provider callback mapped to the internal vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
  Payment {
    order_no: String,
    status: PaymentEventStatus,
    transaction_no: Option<String>,
    /// Amount in major units exactly as the gateway reported it.
    amount: Option<String>,
  },
  Shipment {
    tracking_number: String,
    status: ShipmentEventStatus,
  },
  /// Authentic notification of a kind this service does not act on.
  Ignored { event_type: String },
}

/// Input for building an outbound payment request.
#[derive(Debug, Clone)]
pub struct PaymentOrder {
  pub order_no: String,
  /// Minor units.
  pub amount: i64,
  pub currency: String,
  pub description: String,
  pub buyer_email: Option<String>,
  pub created_at: chrono::DateTime<chrono::Utc>,
  /// Server-to-server callback URL.
  pub notify_url: String,
  /// Where the buyer's browser returns after paying.
  pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PaymentRequest {
  /// Auto-submitting form the buyer's browser posts to the gateway.
  #[serde(rename_all = "camelCase")]
  Form {
    action: String,
    method: &'static str,
    fields: Vec<(String, String)>,
  },
  #[serde(rename_all = "camelCase")]
  Redirect {
    url: String,
    provider_reference: Option<String>,
  },
}

#[derive(Debug, Error)]
pub enum ProviderError {
  #[error("provider configuration is missing {0}")]
  MissingConfig(&'static str),

  #[error("required header '{0}' is missing")]
  MissingHeader(String),

  #[error("required field '{0}' is missing")]
  MissingField(String),

  #[error("signature does not match")]
  SignatureMismatch,

  #[error("merchant id does not match the configured merchant")]
  MerchantMismatch,

  #[error("malformed callback: {0}")]
  Malformed(String),

  #[error("{0} does not support this operation")]
  Unsupported(&'static str),

  #[error("amount cannot be sent to the gateway: {0}")]
  Amount(String),

  #[error("remote provider call failed: {0}")]
  Remote(String),
}

impl ProviderError {
  /// Authentication failures, as opposed to malformed input or transport errors.
  pub fn is_auth_failure(&self) -> bool {
    matches!(
      self,
      ProviderError::MissingConfig(_)
        | ProviderError::MissingHeader(_)
        | ProviderError::SignatureMismatch
        | ProviderError::MerchantMismatch
    )
  }
}

impl From<ProviderError> for AppError {
  fn from(err: ProviderError) -> Self {
    match err {
      e if e.is_auth_failure() => AppError::Unauthorized(e.to_string()),
      ProviderError::Remote(m) => AppError::Provider(m),
      e => AppError::InvalidRequest(e.to_string()),
    }
  }
}

/// Uniform contract every provider family implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
  fn kind(&self) -> ProviderKind;

  async fn build_payment_request(&self, order: &PaymentOrder) -> Result<PaymentRequest, ProviderError>;

  async fn verify_callback(&self, callback: &InboundCallback) -> Result<NormalizedEvent, ProviderError>;
}

pub(crate) fn require<'a>(value: &'a Option<String>, what: &'static str) -> Result<&'a str, ProviderError> {
  value
    .as_deref()
    .filter(|v| !v.is_empty())
    .ok_or(ProviderError::MissingConfig(what))
}

pub(crate) fn require_secret<'a>(value: &'a Option<Secret>, what: &'static str) -> Result<&'a str, ProviderError> {
  value
    .as_ref()
    .map(Secret::expose)
    .filter(|v| !v.is_empty())
    .ok_or(ProviderError::MissingConfig(what))
}

pub(crate) fn field<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
  pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

pub(crate) fn sha256_hex_upper(data: &[u8]) -> String {
  hex::encode_upper(Sha256::digest(data))
}

/// Constant-time comparison of two ASCII digests, ignoring hex case.
pub(crate) fn digest_eq(expected: &str, received: &str) -> bool {
  let expected = expected.to_ascii_uppercase();
  let received = received.trim().to_ascii_uppercase();
  expected.as_bytes().ct_eq(received.as_bytes()).into()
}
