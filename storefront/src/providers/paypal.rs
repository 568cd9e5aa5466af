// storefront/src/providers/paypal.rs

//! PayPal REST: order creation for the outbound side, hosted signature
//! verification (`/v1/notifications/verify-webhook-signature`) for callbacks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::{
  require, require_secret, InboundCallback, NormalizedEvent, PaymentEventStatus, PaymentOrder, PaymentRequest,
  ProviderAdapter, ProviderError, ProviderKind, Secret,
};
use crate::models::money;

/// Transmission headers forwarded to the verification endpoint, in the order of
/// the fields they fill.
pub const TRANSMISSION_HEADERS: [&str; 5] = [
  "paypal-transmission-id",
  "paypal-transmission-time",
  "paypal-cert-url",
  "paypal-auth-algo",
  "paypal-transmission-sig",
];

fn default_api_base() -> String {
  "https://api-m.sandbox.paypal.com".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayPalConfig {
  #[serde(default)]
  pub client_id: Option<String>,
  #[serde(default)]
  pub client_secret: Option<Secret>,
  #[serde(default)]
  pub webhook_id: Option<String>,
  #[serde(default = "default_api_base")]
  pub api_base: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
  access_token: String,
}

#[derive(Debug, Deserialize)]
struct VerificationResponse {
  verification_status: String,
}

#[derive(Debug, Deserialize)]
struct Link {
  href: String,
  rel: String,
}

#[derive(Debug, Deserialize)]
struct CreatedOrder {
  id: String,
  #[serde(default)]
  links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
  event_type: String,
  #[serde(default)]
  resource: WebhookResource,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookResource {
  id: Option<String>,
  custom_id: Option<String>,
  invoice_id: Option<String>,
  amount: Option<ResourceAmount>,
}

#[derive(Debug, Deserialize)]
struct ResourceAmount {
  value: String,
}

fn map_event_type(event_type: &str) -> Option<PaymentEventStatus> {
  match event_type {
    "PAYMENT.CAPTURE.COMPLETED" => Some(PaymentEventStatus::Paid),
    "PAYMENT.CAPTURE.PENDING" => Some(PaymentEventStatus::Pending),
    "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => Some(PaymentEventStatus::Failed),
    "PAYMENT.CAPTURE.REFUNDED" => Some(PaymentEventStatus::Refunded),
    _ => None,
  }
}

pub struct PayPalAdapter {
  config: PayPalConfig,
  http: reqwest::Client,
}

impl PayPalAdapter {
  pub fn new(config: PayPalConfig, http: reqwest::Client) -> Self {
    Self { config, http }
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
  }

  async fn access_token(&self) -> Result<String, ProviderError> {
    let client_id = require(&self.config.client_id, "client_id")?;
    let client_secret = require_secret(&self.config.client_secret, "client_secret")?;

    let response = self
      .http
      .post(self.url("/v1/oauth2/token"))
      .basic_auth(client_id, Some(client_secret))
      .form(&[("grant_type", "client_credentials")])
      .send()
      .await
      .map_err(|e| ProviderError::Remote(format!("token request: {}", e)))?;
    if !response.status().is_success() {
      return Err(ProviderError::Remote(format!("token request returned {}", response.status())));
    }
    let token: AccessToken = response
      .json()
      .await
      .map_err(|e| ProviderError::Remote(format!("token response: {}", e)))?;
    Ok(token.access_token)
  }
}

#[async_trait]
impl ProviderAdapter for PayPalAdapter {
  fn kind(&self) -> ProviderKind {
    ProviderKind::PayPal
  }

  #[instrument(name = "paypal::build_payment_request", skip_all, fields(order_no = %order.order_no))]
  async fn build_payment_request(&self, order: &PaymentOrder) -> Result<PaymentRequest, ProviderError> {
    let token = self.access_token().await?;
    let body = json!({
      "intent": "CAPTURE",
      "purchase_units": [{
        "reference_id": order.order_no,
        "custom_id": order.order_no,
        "invoice_id": order.order_no,
        "description": order.description,
        "amount": {
          "currency_code": order.currency.to_ascii_uppercase(),
          "value": money::to_decimal_string(order.amount, &order.currency),
        },
      }],
      "application_context": {
        "return_url": order.return_url,
        "cancel_url": order.return_url,
      },
    });

    let response = self
      .http
      .post(self.url("/v2/checkout/orders"))
      .bearer_auth(token)
      .json(&body)
      .send()
      .await
      .map_err(|e| ProviderError::Remote(format!("order creation: {}", e)))?;
    if !response.status().is_success() {
      return Err(ProviderError::Remote(format!("order creation returned {}", response.status())));
    }
    let created: CreatedOrder = response
      .json()
      .await
      .map_err(|e| ProviderError::Remote(format!("order creation response: {}", e)))?;

    let approve = created
      .links
      .iter()
      .find(|l| l.rel == "approve" || l.rel == "payer-action")
      .ok_or_else(|| ProviderError::Remote("order creation response has no approve link".to_string()))?;

    Ok(PaymentRequest::Redirect {
      url: approve.href.clone(),
      provider_reference: Some(created.id),
    })
  }

  #[instrument(name = "paypal::verify_callback", skip_all)]
  async fn verify_callback(&self, callback: &InboundCallback) -> Result<NormalizedEvent, ProviderError> {
    let webhook_id = require(&self.config.webhook_id, "webhook_id")?;
    require(&self.config.client_id, "client_id")?;
    require_secret(&self.config.client_secret, "client_secret")?;

    // Every transmission header must be present before anything leaves the process.
    let mut transmission = Vec::with_capacity(TRANSMISSION_HEADERS.len());
    for name in TRANSMISSION_HEADERS {
      let value = callback
        .header(name)
        .ok_or_else(|| ProviderError::MissingHeader(name.to_string()))?;
      transmission.push(value);
    }
    let &[transmission_id, transmission_time, cert_url, auth_algo, transmission_sig] = transmission.as_slice() else {
      return Err(ProviderError::Malformed("transmission headers".to_string()));
    };

    let body_str =
      std::str::from_utf8(&callback.body).map_err(|_| ProviderError::Malformed("body is not UTF-8".to_string()))?;
    let webhook_event: &RawValue =
      serde_json::from_str(body_str).map_err(|e| ProviderError::Malformed(format!("JSON body: {}", e)))?;

    let token = self.access_token().await?;
    let response = self
      .http
      .post(self.url("/v1/notifications/verify-webhook-signature"))
      .bearer_auth(token)
      .json(&json!({
        "auth_algo": auth_algo,
        "cert_url": cert_url,
        "transmission_id": transmission_id,
        "transmission_sig": transmission_sig,
        "transmission_time": transmission_time,
        "webhook_id": webhook_id,
        "webhook_event": webhook_event,
      }))
      .send()
      .await
      .map_err(|e| ProviderError::Remote(format!("verification request: {}", e)))?;
    if !response.status().is_success() {
      return Err(ProviderError::Remote(format!("verification returned {}", response.status())));
    }
    let verdict: VerificationResponse = response
      .json()
      .await
      .map_err(|e| ProviderError::Remote(format!("verification response: {}", e)))?;
    if verdict.verification_status != "SUCCESS" {
      warn!(status = %verdict.verification_status, "PayPal rejected the webhook signature.");
      return Err(ProviderError::SignatureMismatch);
    }

    let event: WebhookEvent =
      serde_json::from_str(body_str).map_err(|e| ProviderError::Malformed(format!("event: {}", e)))?;
    debug!(event_type = %event.event_type, "PayPal webhook verified.");

    let Some(status) = map_event_type(&event.event_type) else {
      return Ok(NormalizedEvent::Ignored {
        event_type: event.event_type,
      });
    };
    let order_no = event
      .resource
      .custom_id
      .or(event.resource.invoice_id)
      .ok_or_else(|| ProviderError::MissingField("resource.custom_id".into()))?;

    Ok(NormalizedEvent::Payment {
      order_no,
      status,
      transaction_no: event.resource.id,
      amount: event.resource.amount.map(|a| a.value),
    })
  }
}
