// storefront/src/providers/hmac_webhook.rs

//! Generic logistics webhook signed with `HMAC-SHA256(secret, raw_body)`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::instrument;

use super::{
  require_secret, InboundCallback, NormalizedEvent, PaymentOrder, PaymentRequest, ProviderAdapter, ProviderError,
  ProviderKind, Secret, ShipmentEventStatus,
};

fn default_signature_header() -> String {
  "X-Signature".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmacWebhookConfig {
  #[serde(default)]
  pub secret: Option<Secret>,
  #[serde(default = "default_signature_header")]
  pub signature_header: String,
}

pub fn sign(secret: &str, body: &[u8]) -> Result<String, ProviderError> {
  let mut mac =
    Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| ProviderError::MissingConfig("secret"))?;
  mac.update(body);
  Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Accepts the bare hex digest or a `sha256=`-prefixed one.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> Result<bool, ProviderError> {
  let expected = sign(secret, body)?;
  let received = signature.trim();
  let received = received.strip_prefix("sha256=").unwrap_or(received).to_ascii_lowercase();
  Ok(expected.as_bytes().ct_eq(received.as_bytes()).into())
}

#[derive(Debug, Deserialize)]
struct TrackingUpdate {
  tracking_number: String,
  status: String,
}

fn map_carrier_status(status: &str) -> ShipmentEventStatus {
  match status.to_ascii_lowercase().as_str() {
    "label_created" | "preparing" | "pending_pickup" => ShipmentEventStatus::Preparing,
    "picked_up" | "in_transit" | "out_for_delivery" => ShipmentEventStatus::Delivering,
    "delivered" => ShipmentEventStatus::Delivered,
    "returned" | "return_to_sender" => ShipmentEventStatus::Returned,
    other => ShipmentEventStatus::Unknown(other.to_string()),
  }
}

pub struct HmacWebhookAdapter {
  config: HmacWebhookConfig,
}

impl HmacWebhookAdapter {
  pub fn new(config: HmacWebhookConfig) -> Self {
    Self { config }
  }
}

#[async_trait]
impl ProviderAdapter for HmacWebhookAdapter {
  fn kind(&self) -> ProviderKind {
    ProviderKind::HmacWebhook
  }

  async fn build_payment_request(&self, _order: &PaymentOrder) -> Result<PaymentRequest, ProviderError> {
    Err(ProviderError::Unsupported("HMAC_WEBHOOK"))
  }

  #[instrument(name = "hmac_webhook::verify_callback", skip_all)]
  async fn verify_callback(&self, callback: &InboundCallback) -> Result<NormalizedEvent, ProviderError> {
    let secret = require_secret(&self.config.secret, "secret")?;
    let signature = callback
      .header(&self.config.signature_header)
      .ok_or_else(|| ProviderError::MissingHeader(self.config.signature_header.clone()))?;

    if !verify(secret, &callback.body, signature)? {
      return Err(ProviderError::SignatureMismatch);
    }

    let update: TrackingUpdate =
      serde_json::from_slice(&callback.body).map_err(|e| ProviderError::Malformed(format!("JSON body: {}", e)))?;
    if update.tracking_number.trim().is_empty() {
      return Err(ProviderError::MissingField("tracking_number".into()));
    }

    Ok(NormalizedEvent::Shipment {
      tracking_number: update.tracking_number,
      status: map_carrier_status(&update.status),
    })
  }
}
