// storefront/src/providers/ecpay.rs

//! ECPay AIO: sorted-parameter `CheckMacValue` (SHA-256).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::form_urlencoded;

use super::{
  digest_eq, field, require, require_secret, sha256_hex_upper, InboundCallback, NormalizedEvent, PaymentEventStatus,
  PaymentOrder, PaymentRequest, ProviderAdapter, ProviderError, ProviderKind, Secret,
};
use crate::models::money;

pub const CHECK_MAC_FIELD: &str = "CheckMacValue";

fn default_gateway_url() -> String {
  "https://payment-stage.ecpay.com.tw/Cashier/AioCheckOut/V5".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcPayConfig {
  #[serde(default)]
  pub merchant_id: Option<String>,
  #[serde(default)]
  pub hash_key: Option<Secret>,
  #[serde(default)]
  pub hash_iv: Option<Secret>,
  #[serde(default = "default_gateway_url")]
  pub gateway_url: String,
}

/// Computes `CheckMacValue` over every parameter except the MAC itself.
///
/// Parameters are sorted by key (case-insensitive), joined as `k=v&...`, wrapped
/// in `HashKey=...&` / `&HashIV=...`, URL-encoded the way .NET does it, then
/// lower-cased before hashing.
pub fn check_mac_value<K, V>(params: &[(K, V)], hash_key: &str, hash_iv: &str) -> String
where
  K: AsRef<str>,
  V: AsRef<str>,
{
  let mut sorted: Vec<(&str, &str)> = params
    .iter()
    .map(|(k, v)| (k.as_ref(), v.as_ref()))
    .filter(|(k, _)| *k != CHECK_MAC_FIELD)
    .collect();
  sorted.sort_by(|a, b| a.0.to_ascii_lowercase().cmp(&b.0.to_ascii_lowercase()));

  let joined = sorted
    .iter()
    .map(|(k, v)| format!("{}={}", k, v))
    .collect::<Vec<_>>()
    .join("&");
  let raw = format!("HashKey={}&{}&HashIV={}", hash_key, joined, hash_iv);

  let encoded = form_urlencoded::byte_serialize(raw.as_bytes())
    .collect::<String>()
    .to_lowercase()
    .replace("%21", "!")
    .replace("%28", "(")
    .replace("%29", ")");

  sha256_hex_upper(encoded.as_bytes())
}

fn map_rtn_code(code: &str) -> PaymentEventStatus {
  match code {
    "1" => PaymentEventStatus::Paid,
    // ATM / convenience-store payment codes issued, awaiting the buyer.
    "2" | "10100073" => PaymentEventStatus::Pending,
    _ => PaymentEventStatus::Failed,
  }
}

pub struct EcPayAdapter {
  config: EcPayConfig,
}

impl EcPayAdapter {
  pub fn new(config: EcPayConfig) -> Self {
    Self { config }
  }
}

#[async_trait]
impl ProviderAdapter for EcPayAdapter {
  fn kind(&self) -> ProviderKind {
    ProviderKind::EcPay
  }

  #[instrument(name = "ecpay::build_payment_request", skip_all, fields(order_no = %order.order_no))]
  async fn build_payment_request(&self, order: &PaymentOrder) -> Result<PaymentRequest, ProviderError> {
    let merchant_id = require(&self.config.merchant_id, "merchant_id")?;
    let hash_key = require_secret(&self.config.hash_key, "hash_key")?;
    let hash_iv = require_secret(&self.config.hash_iv, "hash_iv")?;
    let total = money::to_whole_major_units(order.amount, &order.currency)
      .ok_or_else(|| ProviderError::Amount(format!("{} {} is not a whole amount", order.amount, order.currency)))?;

    let mut fields: Vec<(String, String)> = vec![
      ("MerchantID".into(), merchant_id.to_string()),
      ("MerchantTradeNo".into(), order.order_no.clone()),
      (
        "MerchantTradeDate".into(),
        order.created_at.format("%Y/%m/%d %H:%M:%S").to_string(),
      ),
      ("PaymentType".into(), "aio".into()),
      ("TotalAmount".into(), total.to_string()),
      ("TradeDesc".into(), order.description.clone()),
      ("ItemName".into(), order.description.clone()),
      ("ReturnURL".into(), order.notify_url.clone()),
      ("ClientBackURL".into(), order.return_url.clone()),
      ("ChoosePayment".into(), "ALL".into()),
      ("EncryptType".into(), "1".into()),
    ];
    let mac = check_mac_value(&fields, hash_key, hash_iv);
    fields.push((CHECK_MAC_FIELD.into(), mac));

    Ok(PaymentRequest::Form {
      action: self.config.gateway_url.clone(),
      method: "POST",
      fields,
    })
  }

  #[instrument(name = "ecpay::verify_callback", skip_all)]
  async fn verify_callback(&self, callback: &InboundCallback) -> Result<NormalizedEvent, ProviderError> {
    let pairs = callback.form_pairs()?;

    // The merchant is matched before anything else is looked at.
    let merchant_id = require(&self.config.merchant_id, "merchant_id")?;
    match field(&pairs, "MerchantID") {
      Some(received) if received == merchant_id => {}
      Some(_) => return Err(ProviderError::MerchantMismatch),
      None => return Err(ProviderError::MissingField("MerchantID".into())),
    }

    let hash_key = require_secret(&self.config.hash_key, "hash_key")?;
    let hash_iv = require_secret(&self.config.hash_iv, "hash_iv")?;
    let received_mac =
      field(&pairs, CHECK_MAC_FIELD).ok_or_else(|| ProviderError::MissingField(CHECK_MAC_FIELD.into()))?;
    if !digest_eq(&check_mac_value(&pairs, hash_key, hash_iv), received_mac) {
      warn!("ECPay CheckMacValue mismatch.");
      return Err(ProviderError::SignatureMismatch);
    }

    let order_no = field(&pairs, "MerchantTradeNo")
      .ok_or_else(|| ProviderError::MissingField("MerchantTradeNo".into()))?
      .to_string();
    let rtn_code = field(&pairs, "RtnCode").ok_or_else(|| ProviderError::MissingField("RtnCode".into()))?;
    debug!(rtn_code, "ECPay callback verified.");

    Ok(NormalizedEvent::Payment {
      order_no,
      status: map_rtn_code(rtn_code),
      transaction_no: field(&pairs, "TradeNo").map(str::to_string),
      amount: field(&pairs, "TradeAmt").map(str::to_string),
    })
  }
}
