// storefront/src/providers/newebpay.rs

//! NewebPay MPG: AES-256-CBC encrypted `TradeInfo` with a SHA-256 `TradeSha`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
  digest_eq, field, require, require_secret, sha256_hex_upper, InboundCallback, NormalizedEvent, PaymentEventStatus,
  PaymentOrder, PaymentRequest, ProviderAdapter, ProviderError, ProviderKind, Secret,
};
use crate::models::money;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

fn default_gateway_url() -> String {
  "https://ccore.newebpay.com/MPG/mpg_gateway".to_string()
}

fn default_version() -> String {
  "2.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewebPayConfig {
  #[serde(default)]
  pub merchant_id: Option<String>,
  #[serde(default)]
  pub hash_key: Option<Secret>,
  #[serde(default)]
  pub hash_iv: Option<Secret>,
  #[serde(default = "default_gateway_url")]
  pub gateway_url: String,
  #[serde(default = "default_version")]
  pub version: String,
}

/// Key material is zero-padded or truncated to the AES-256 key and block sizes.
fn fit<const N: usize>(material: &str) -> [u8; N] {
  let mut out = [0u8; N];
  let bytes = material.as_bytes();
  let len = bytes.len().min(N);
  out[..len].copy_from_slice(&bytes[..len]);
  out
}

pub fn encrypt_trade_info(plain: &str, hash_key: &str, hash_iv: &str) -> String {
  let key = fit::<32>(hash_key);
  let iv = fit::<16>(hash_iv);
  let cipher = Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
  hex::encode(cipher)
}

pub fn decrypt_trade_info(trade_info: &str, hash_key: &str, hash_iv: &str) -> Result<String, ProviderError> {
  let key = fit::<32>(hash_key);
  let iv = fit::<16>(hash_iv);
  let cipher = hex::decode(trade_info.trim()).map_err(|e| ProviderError::Malformed(format!("TradeInfo hex: {}", e)))?;
  let plain = Aes256CbcDec::new(&key.into(), &iv.into())
    .decrypt_padded_vec_mut::<Pkcs7>(&cipher)
    .map_err(|_| ProviderError::Malformed("TradeInfo does not decrypt".to_string()))?;
  String::from_utf8(plain).map_err(|_| ProviderError::Malformed("TradeInfo is not UTF-8".to_string()))
}

pub fn trade_sha(trade_info: &str, hash_key: &str, hash_iv: &str) -> String {
  sha256_hex_upper(format!("HashKey={}&{}&HashIV={}", hash_key, trade_info, hash_iv).as_bytes())
}

#[derive(Debug, Deserialize)]
struct TradeResultEnvelope {
  #[serde(rename = "Status")]
  status: String,
  #[serde(rename = "Message", default)]
  message: String,
  #[serde(rename = "Result")]
  result: TradeResult,
}

#[derive(Debug, Deserialize)]
struct TradeResult {
  #[serde(rename = "MerchantID")]
  merchant_id: String,
  #[serde(rename = "MerchantOrderNo")]
  merchant_order_no: String,
  #[serde(rename = "TradeNo", default)]
  trade_no: Option<String>,
  #[serde(rename = "Amt", default)]
  amt: Option<i64>,
}

pub struct NewebPayAdapter {
  config: NewebPayConfig,
}

impl NewebPayAdapter {
  pub fn new(config: NewebPayConfig) -> Self {
    Self { config }
  }
}

#[async_trait]
impl ProviderAdapter for NewebPayAdapter {
  fn kind(&self) -> ProviderKind {
    ProviderKind::NewebPay
  }

  #[instrument(name = "newebpay::build_payment_request", skip_all, fields(order_no = %order.order_no))]
  async fn build_payment_request(&self, order: &PaymentOrder) -> Result<PaymentRequest, ProviderError> {
    let merchant_id = require(&self.config.merchant_id, "merchant_id")?;
    let hash_key = require_secret(&self.config.hash_key, "hash_key")?;
    let hash_iv = require_secret(&self.config.hash_iv, "hash_iv")?;
    let amt = money::to_whole_major_units(order.amount, &order.currency)
      .ok_or_else(|| ProviderError::Amount(format!("{} {} is not a whole amount", order.amount, order.currency)))?;

    let mut params = vec![
      ("MerchantID", merchant_id.to_string()),
      ("RespondType", "JSON".to_string()),
      ("TimeStamp", order.created_at.timestamp().to_string()),
      ("Version", self.config.version.clone()),
      ("MerchantOrderNo", order.order_no.clone()),
      ("Amt", amt.to_string()),
      ("ItemDesc", order.description.clone()),
      ("NotifyURL", order.notify_url.clone()),
      ("ReturnURL", order.return_url.clone()),
    ];
    if let Some(email) = &order.buyer_email {
      params.push(("Email", email.clone()));
    }
    let plain = serde_urlencoded::to_string(&params).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let trade_info = encrypt_trade_info(&plain, hash_key, hash_iv);
    let sha = trade_sha(&trade_info, hash_key, hash_iv);

    Ok(PaymentRequest::Form {
      action: self.config.gateway_url.clone(),
      method: "POST",
      fields: vec![
        ("MerchantID".to_string(), merchant_id.to_string()),
        ("TradeInfo".to_string(), trade_info),
        ("TradeSha".to_string(), sha),
        ("Version".to_string(), self.config.version.clone()),
      ],
    })
  }

  #[instrument(name = "newebpay::verify_callback", skip_all)]
  async fn verify_callback(&self, callback: &InboundCallback) -> Result<NormalizedEvent, ProviderError> {
    let merchant_id = require(&self.config.merchant_id, "merchant_id")?;
    let hash_key = require_secret(&self.config.hash_key, "hash_key")?;
    let hash_iv = require_secret(&self.config.hash_iv, "hash_iv")?;

    let pairs = callback.form_pairs()?;
    let trade_info = field(&pairs, "TradeInfo").ok_or_else(|| ProviderError::MissingField("TradeInfo".into()))?;
    let received_sha = field(&pairs, "TradeSha").ok_or_else(|| ProviderError::MissingField("TradeSha".into()))?;

    if !digest_eq(&trade_sha(trade_info, hash_key, hash_iv), received_sha) {
      return Err(ProviderError::SignatureMismatch);
    }

    let decrypted = decrypt_trade_info(trade_info, hash_key, hash_iv)?;
    let envelope: TradeResultEnvelope =
      serde_json::from_str(&decrypted).map_err(|e| ProviderError::Malformed(format!("TradeInfo JSON: {}", e)))?;

    if envelope.result.merchant_id != merchant_id {
      return Err(ProviderError::MerchantMismatch);
    }

    let status = if envelope.status == "SUCCESS" {
      PaymentEventStatus::Paid
    } else {
      PaymentEventStatus::Failed
    };
    debug!(gateway_status = %envelope.status, message = %envelope.message, "NewebPay callback decoded.");

    Ok(NormalizedEvent::Payment {
      order_no: envelope.result.merchant_order_no,
      status,
      transaction_no: envelope.result.trade_no,
      amount: envelope.result.amt.map(|a| a.to_string()),
    })
  }
}
