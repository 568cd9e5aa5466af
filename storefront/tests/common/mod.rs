// storefront/tests/common/mod.rs
#![allow(dead_code)]

use actix_web::web::Bytes;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use sqlx::types::Json;
use std::sync::{Arc, Once};
use uuid::Uuid;

use flowline::{ContextData, PipelineResult};
use storefront::clock::ManualClock;
use storefront::config::AppConfig;
use storefront::models::{
  CheckoutSession, MerchantCredential, Order, Payment, Product, ProviderAccount, Role, Shop, TenantScope,
};
use storefront::pipelines::contexts::{CompleteCtxData, SessionCtxData, WebhookCtxData};
use storefront::providers::ecpay::{self, EcPayConfig};
use storefront::providers::hmac_webhook::{self, HmacWebhookConfig};
use storefront::providers::{InboundCallback, PaymentRequest, ProviderConfig, Secret};
use storefront::services::auth_service::hash_api_key;
use storefront::services::notifier::{Notification, Notifier};
use storefront::store::MemoryStore;
use storefront::{AppError, AppState};

pub const ECPAY_MERCHANT: &str = "3002607";
pub const ECPAY_KEY: &str = "pwFHCqoQZGmho4w6";
pub const ECPAY_IV: &str = "EkRm7iFT261dpevs";
pub const CARRIER_SECRET: &str = "carrier-shared-secret";

static TRACING: Once = Once::new();

pub fn setup_tracing() {
  TRACING.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  });
}

pub fn start_time() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// Keeps every notification; can be switched to fail.
#[derive(Default)]
pub struct RecordingNotifier {
  pub sent: Mutex<Vec<Notification>>,
  pub fail: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn notify(&self, notification: &Notification) -> storefront::Result<()> {
    if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
      return Err(AppError::Internal("mail relay down".into()));
    }
    self.sent.lock().push(notification.clone());
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct ShopFixture {
  pub scope: TenantScope,
  pub merchant_id: String,
  pub api_key: String,
  pub viewer_key: String,
}

#[derive(Debug, Clone)]
pub struct Completed {
  pub order: Order,
  pub payment: Option<Payment>,
  pub payment_request: Option<PaymentRequest>,
  pub payment_error: Option<String>,
  pub confirmation_sent: bool,
}

pub struct TestApp {
  pub state: AppState,
  pub store: Arc<MemoryStore>,
  pub clock: Arc<ManualClock>,
  pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
  pub fn new() -> Self {
    Self::with_config(AppConfig::for_local("http://shop.test"))
  }

  pub fn with_config(config: AppConfig) -> Self {
    setup_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start_time()));
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::new(store.clone(), config, clock.clone(), notifier.clone()).unwrap();
    Self {
      state,
      store,
      clock,
      notifier,
    }
  }

  /// A TWD shop with a flat 60.00 shipping fee, no tax, an ECPay payment handler
  /// (`ecpay-main`) and an HMAC logistics provider (`carrier`).
  pub fn add_shop(&self, name: &str) -> ShopFixture {
    let scope = TenantScope {
      tenant_id: Uuid::new_v4(),
      shop_id: Uuid::new_v4(),
    };
    self.store.insert_shop(Shop {
      id: scope.shop_id,
      tenant_id: scope.tenant_id,
      name: name.to_string(),
      currency: "TWD".to_string(),
      shipping_fee: 6000,
      free_shipping_threshold: None,
      tax_rate_bps: 0,
    });

    let merchant_id = format!("merchant-{}", name);
    let api_key = format!("sk_staff_{}", Uuid::new_v4().simple());
    let viewer_key = format!("sk_viewer_{}", Uuid::new_v4().simple());
    for (key, role) in [(&api_key, Role::Staff), (&viewer_key, Role::Viewer)] {
      self.store.insert_credential(MerchantCredential {
        id: Uuid::new_v4(),
        tenant_id: scope.tenant_id,
        shop_id: scope.shop_id,
        merchant_id: merchant_id.clone(),
        key_hash: hash_api_key(key),
        role,
        allowed_platforms: vec![],
        active: true,
      });
    }

    self.add_provider(
      scope,
      "ecpay-main",
      ProviderConfig::EcPay(EcPayConfig {
        merchant_id: Some(ECPAY_MERCHANT.into()),
        hash_key: Some(Secret::new(ECPAY_KEY)),
        hash_iv: Some(Secret::new(ECPAY_IV)),
        gateway_url: "https://payment-stage.ecpay.com.tw/Cashier/AioCheckOut/V5".into(),
      }),
    );
    self.add_provider(
      scope,
      "carrier",
      ProviderConfig::HmacWebhook(HmacWebhookConfig {
        secret: Some(Secret::new(CARRIER_SECRET)),
        signature_header: "X-Signature".into(),
      }),
    );

    ShopFixture {
      scope,
      merchant_id,
      api_key,
      viewer_key,
    }
  }

  pub fn add_provider(&self, scope: TenantScope, provider_id: &str, config: ProviderConfig) {
    self.store.insert_provider_account(ProviderAccount {
      tenant_id: scope.tenant_id,
      shop_id: scope.shop_id,
      provider_id: provider_id.to_string(),
      config: Json(config),
      created_at: start_time(),
    });
  }

  pub fn add_product(&self, shop: &ShopFixture, sku: &str, price: i64, stock: i32) -> Uuid {
    let id = Uuid::new_v4();
    self.store.insert_product(Product {
      id,
      tenant_id: shop.scope.tenant_id,
      shop_id: shop.scope.shop_id,
      sku: sku.to_string(),
      name: format!("Product {}", sku),
      price,
      stock,
      published: true,
      created_at: start_time(),
      updated_at: start_time(),
    });
    id
  }

  pub fn stock(&self, product_id: Uuid) -> i32 {
    self.store.product_stock(product_id).unwrap()
  }

  pub async fn create_session(&self, shop: &ShopFixture, lines: &[(Uuid, i32)]) -> Result<CheckoutSession, AppError> {
    let ctx = ContextData::new(SessionCtxData::new(
      self.state.clone(),
      shop.scope,
      lines.to_vec(),
      None,
      None,
      Some("buyer@example.test".to_string()),
    ));
    match self.state.registry.run(ctx.clone()).await? {
      PipelineResult::Completed => Ok(ctx.read().session.clone().unwrap()),
      PipelineResult::Stopped => panic!("session pipeline stopped"),
    }
  }

  pub async fn complete(
    &self,
    shop: &ShopFixture,
    session_id: Uuid,
    handler_id: Option<&str>,
  ) -> Result<Completed, AppError> {
    let ctx = ContextData::new(CompleteCtxData::new(
      self.state.clone(),
      shop.scope,
      session_id,
      handler_id.map(str::to_string),
    ));
    match self.state.registry.run(ctx.clone()).await? {
      PipelineResult::Completed => {
        let guard = ctx.read();
        Ok(Completed {
          order: guard.order.clone().unwrap(),
          payment: guard.payment.clone(),
          payment_request: guard.payment_request.clone(),
          payment_error: guard.payment_error.clone(),
          confirmation_sent: guard.confirmation_sent,
        })
      }
      PipelineResult::Stopped => panic!("checkout pipeline stopped"),
    }
  }

  /// Runs the webhook pipeline; returns the run result and the final context.
  pub async fn deliver(
    &self,
    shop: &ShopFixture,
    provider_id: &str,
    callback: InboundCallback,
  ) -> (Result<PipelineResult, AppError>, ContextData<WebhookCtxData>) {
    let ctx = ContextData::new(WebhookCtxData::new(
      self.state.clone(),
      shop.scope.shop_id,
      provider_id.to_string(),
      callback,
    ));
    let result = self.state.registry.run(ctx.clone()).await;
    (result, ctx)
  }

  pub async fn order(&self, shop: &ShopFixture, order_id: Uuid) -> Order {
    self.state.store.find_order(shop.scope, order_id).await.unwrap().unwrap()
  }
}

/// ECPay payment result callback, signed with the fixture keys.
pub fn ecpay_callback(order_no: &str, rtn_code: &str, trade_amt: &str) -> InboundCallback {
  let mut params: Vec<(String, String)> = vec![
    ("MerchantID".into(), ECPAY_MERCHANT.into()),
    ("MerchantTradeNo".into(), order_no.into()),
    ("PaymentDate".into(), "2024/05/01 10:05:00".into()),
    ("PaymentType".into(), "Credit_CreditCard".into()),
    ("RtnCode".into(), rtn_code.into()),
    ("RtnMsg".into(), "交易成功".into()),
    ("TradeAmt".into(), trade_amt.into()),
    ("TradeNo".into(), "2405011005001234".into()),
  ];
  let mac = ecpay::check_mac_value(&params, ECPAY_KEY, ECPAY_IV);
  params.push((ecpay::CHECK_MAC_FIELD.into(), mac));
  form_callback(&params)
}

pub fn form_callback(params: &[(String, String)]) -> InboundCallback {
  let body = serde_urlencoded::to_string(params).unwrap();
  InboundCallback::new(
    vec![(
      "Content-Type".to_string(),
      "application/x-www-form-urlencoded".to_string(),
    )],
    Bytes::from(body),
  )
}

/// Carrier tracking update signed with `secret`.
pub fn carrier_callback(secret: &str, tracking_number: &str, status: &str) -> InboundCallback {
  let body = serde_json::json!({ "tracking_number": tracking_number, "status": status }).to_string();
  let signature = hmac_webhook::sign(secret, body.as_bytes()).unwrap();
  InboundCallback::new(
    vec![("X-Signature".to_string(), signature)],
    Bytes::from(body),
  )
}
