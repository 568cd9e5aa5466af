// storefront/tests/webhook_tests.rs
mod common;

use common::*;
use uuid::Uuid;

use flowline::PipelineResult;
use storefront::clock::Clock;
use storefront::models::{OrderPaymentStatus, OrderStatus, PaymentStatus, ShippingStatus};
use storefront::pipelines::contexts::WebhookCtxData;
use storefront::providers::hmac_webhook::HmacWebhookConfig;
use storefront::providers::ProviderConfig;
use storefront::services::notifier::Notification;
use storefront::services::order_service;
use storefront::services::payment_service;
use storefront::services::reconciliation::ReconcileOutcome;
use storefront::AppError;

async fn placed_order(app: &TestApp, shop: &ShopFixture) -> storefront::models::Order {
  let product = app.add_product(shop, &format!("SKU-{}", Uuid::new_v4().simple()), 15000, 10);
  let session = app.create_session(shop, &[(product, 2)]).await.unwrap();
  app.complete(shop, session.id, None).await.unwrap().order
}

fn outcome(ctx: &flowline::ContextData<WebhookCtxData>) -> Option<ReconcileOutcome> {
  ctx.read().outcome.clone()
}

#[tokio::test]
async fn paid_callback_applies_once_and_replays_are_acknowledged() {
  let app = TestApp::new();
  let shop = app.add_shop("pay");
  let order = placed_order(&app, &shop).await;

  let (result, ctx) = app
    .deliver(&shop, "ecpay-main", ecpay_callback(&order.order_no, "1", "360"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
  assert!(matches!(outcome(&ctx), Some(ReconcileOutcome::Applied { .. })));

  let stored = app.order(&shop, order.id).await;
  assert_eq!(stored.status, OrderStatus::Paid);
  assert_eq!(stored.payment_status, OrderPaymentStatus::Paid);
  let payments = app.state.store.find_payments_for_order(shop.scope, order.id).await.unwrap();
  assert_eq!(payments.len(), 1);
  assert_eq!(payments[0].status, PaymentStatus::Paid);
  assert_eq!(payments[0].transaction_no.as_deref(), Some("2405011005001234"));

  let (result, ctx) = app
    .deliver(&shop, "ecpay-main", ecpay_callback(&order.order_no, "1", "360"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
  assert_eq!(outcome(&ctx), Some(ReconcileOutcome::AlreadyApplied));
  assert_eq!(app.order(&shop, order.id).await.updated_at, stored.updated_at);

  let updates = app
    .notifier
    .sent
    .lock()
    .iter()
    .filter(|n| matches!(n, Notification::OrderUpdated { .. }))
    .count();
  assert_eq!(updates, 1);
}

#[tokio::test]
async fn tampered_callback_is_rejected_without_writes() {
  let app = TestApp::new();
  let shop = app.add_shop("tamper");
  let order = placed_order(&app, &shop).await;

  let signed = ecpay_callback(&order.order_no, "1", "360");
  let tampered = String::from_utf8(signed.body.to_vec())
    .unwrap()
    .replace("TradeAmt=360", "TradeAmt=1");
  let callback = storefront::providers::InboundCallback::new(vec![], tampered.into_bytes().into());

  let (result, ctx) = app.deliver(&shop, "ecpay-main", callback).await;
  assert_eq!(result.unwrap(), PipelineResult::Stopped);
  let rejection = ctx.read().rejection.clone().unwrap();
  assert!(rejection.auth_failure);
  assert!(outcome(&ctx).is_none());

  let stored = app.order(&shop, order.id).await;
  assert_eq!(stored.payment_status, OrderPaymentStatus::Pending);
}

#[tokio::test]
async fn foreign_merchant_id_is_rejected() {
  let app = TestApp::new();
  let shop = app.add_shop("merchant");
  let order = placed_order(&app, &shop).await;

  let mut params: Vec<(String, String)> = vec![
    ("MerchantID".into(), "2000132".into()),
    ("MerchantTradeNo".into(), order.order_no.clone()),
    ("RtnCode".into(), "1".into()),
    ("TradeAmt".into(), "360".into()),
  ];
  let mac = storefront::providers::ecpay::check_mac_value(&params, ECPAY_KEY, ECPAY_IV);
  params.push(("CheckMacValue".into(), mac));

  let (result, ctx) = app.deliver(&shop, "ecpay-main", form_callback(&params)).await;
  assert_eq!(result.unwrap(), PipelineResult::Stopped);
  assert!(ctx.read().rejection.as_ref().unwrap().auth_failure);
  assert_eq!(app.order(&shop, order.id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn missing_secret_fails_closed() {
  let app = TestApp::new();
  let shop = app.add_shop("unkeyed");
  app.add_provider(
    shop.scope,
    "carrier-unkeyed",
    ProviderConfig::HmacWebhook(HmacWebhookConfig {
      secret: None,
      signature_header: "X-Signature".into(),
    }),
  );

  let (result, ctx) = app
    .deliver(
      &shop,
      "carrier-unkeyed",
      carrier_callback("anything", "TRK-1", "delivered"),
    )
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Stopped);
  assert!(ctx.read().rejection.as_ref().unwrap().auth_failure);
}

#[tokio::test]
async fn wrong_secret_and_missing_header_are_rejected() {
  let app = TestApp::new();
  let shop = app.add_shop("carrier");

  let (result, ctx) = app
    .deliver(&shop, "carrier", carrier_callback("not-the-secret", "TRK-1", "delivered"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Stopped);
  assert!(ctx.read().rejection.as_ref().unwrap().auth_failure);

  let unsigned = storefront::providers::InboundCallback::new(
    vec![],
    r#"{"tracking_number":"TRK-1","status":"delivered"}"#.as_bytes().to_vec().into(),
  );
  let (result, ctx) = app.deliver(&shop, "carrier", unsigned).await;
  assert_eq!(result.unwrap(), PipelineResult::Stopped);
  assert!(ctx.read().rejection.as_ref().unwrap().auth_failure);
}

#[tokio::test]
async fn amount_mismatch_is_acknowledged_but_not_applied() {
  let app = TestApp::new();
  let shop = app.add_shop("short");
  let order = placed_order(&app, &shop).await;

  let (result, ctx) = app
    .deliver(&shop, "ecpay-main", ecpay_callback(&order.order_no, "1", "36"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
  assert!(matches!(outcome(&ctx), Some(ReconcileOutcome::Ignored(_))));
  assert_eq!(app.order(&shop, order.id).await.payment_status, OrderPaymentStatus::Pending);
}

#[tokio::test]
async fn unknown_order_number_and_provider() {
  let app = TestApp::new();
  let shop = app.add_shop("unknown");

  let (result, ctx) = app
    .deliver(&shop, "ecpay-main", ecpay_callback("240501100000DEADBEEF", "1", "360"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
  assert!(matches!(outcome(&ctx), Some(ReconcileOutcome::Ignored(_))));

  let (result, _) = app
    .deliver(&shop, "no-such-provider", ecpay_callback("X", "1", "360"))
    .await;
  assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn failed_payment_can_be_retried_with_a_new_attempt() {
  let app = TestApp::new();
  let shop = app.add_shop("retry");
  let order = placed_order(&app, &shop).await;

  let (result, _) = app
    .deliver(&shop, "ecpay-main", ecpay_callback(&order.order_no, "10200095", "360"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
  let stored = app.order(&shop, order.id).await;
  assert_eq!(stored.status, OrderStatus::Pending);
  assert_eq!(stored.payment_status, OrderPaymentStatus::Failed);

  let (payment, _request) = payment_service::initiate_for_order(&app.state, shop.scope, order.id, None)
    .await
    .unwrap();
  assert_eq!(payment.status, PaymentStatus::Initiated);
  assert_eq!(app.order(&shop, order.id).await.payment_status, OrderPaymentStatus::Pending);
  assert_eq!(app.store.payment_count(), 2);

  // The retry shares the order number; the callback lands on the open attempt.
  let (result, _) = app
    .deliver(&shop, "ecpay-main", ecpay_callback(&order.order_no, "1", "360"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
  let payments = app.state.store.find_payments_for_order(shop.scope, order.id).await.unwrap();
  let statuses: Vec<_> = payments.iter().map(|p| p.status).collect();
  assert!(statuses.contains(&PaymentStatus::Failed));
  assert!(statuses.contains(&PaymentStatus::Paid));
  assert_eq!(app.order(&shop, order.id).await.status, OrderStatus::Paid);
}

#[tokio::test]
async fn open_payment_blocks_a_second_attempt_on_another_handler() {
  let app = TestApp::new();
  let shop = app.add_shop("open");
  app.add_provider(
    shop.scope,
    "ecpay-backup",
    ProviderConfig::EcPay(storefront::providers::ecpay::EcPayConfig {
      merchant_id: Some(ECPAY_MERCHANT.into()),
      hash_key: Some(storefront::providers::Secret::new(ECPAY_KEY)),
      hash_iv: Some(storefront::providers::Secret::new(ECPAY_IV)),
      gateway_url: "https://payment-stage.ecpay.com.tw/Cashier/AioCheckOut/V5".into(),
    }),
  );
  let order = placed_order(&app, &shop).await;

  let (reused, _) = payment_service::initiate_for_order(&app.state, shop.scope, order.id, None)
    .await
    .unwrap();
  assert_eq!(reused.provider_id, "ecpay-main");
  assert_eq!(app.store.payment_count(), 1);

  assert!(matches!(
    payment_service::initiate_for_order(&app.state, shop.scope, order.id, Some("ecpay-backup")).await,
    Err(AppError::Conflict { .. })
  ));
}

#[tokio::test]
async fn carrier_events_walk_the_order_to_completion() {
  let app = TestApp::new();
  let shop = app.add_shop("ship");
  let order = placed_order(&app, &shop).await;
  app
    .deliver(&shop, "ecpay-main", ecpay_callback(&order.order_no, "1", "360"))
    .await
    .0
    .unwrap();

  let shipment = order_service::register_shipment(
    app.state.store.as_ref(),
    shop.scope,
    order.id,
    "carrier",
    "TRK-1001",
    app.clock.now(),
  )
  .await
  .unwrap();
  assert_eq!(shipment.status, ShippingStatus::Preparing);
  assert_eq!(app.order(&shop, order.id).await.shipping_status, ShippingStatus::Preparing);

  let (result, _) = app
    .deliver(&shop, "carrier", carrier_callback(CARRIER_SECRET, "TRK-1001", "in_transit"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
  let stored = app.order(&shop, order.id).await;
  assert_eq!(stored.shipping_status, ShippingStatus::Delivering);
  assert_eq!(stored.status, OrderStatus::Shipped);

  let (_, ctx) = app
    .deliver(&shop, "carrier", carrier_callback(CARRIER_SECRET, "TRK-1001", "delivered"))
    .await;
  assert!(matches!(outcome(&ctx), Some(ReconcileOutcome::Applied { .. })));
  let stored = app.order(&shop, order.id).await;
  assert_eq!(stored.shipping_status, ShippingStatus::Delivered);
  assert_eq!(stored.status, OrderStatus::Completed);

  let (_, ctx) = app
    .deliver(&shop, "carrier", carrier_callback(CARRIER_SECRET, "TRK-1001", "delivered"))
    .await;
  assert_eq!(outcome(&ctx), Some(ReconcileOutcome::AlreadyApplied));

  // Backwards carrier updates are acknowledged and dropped.
  let (_, ctx) = app
    .deliver(&shop, "carrier", carrier_callback(CARRIER_SECRET, "TRK-1001", "in_transit"))
    .await;
  assert!(matches!(outcome(&ctx), Some(ReconcileOutcome::Ignored(_))));
  assert_eq!(app.order(&shop, order.id).await.status, OrderStatus::Completed);
}

#[tokio::test]
async fn tracking_numbers_do_not_cross_tenants() {
  let app = TestApp::new();
  let shop_a = app.add_shop("a");
  let shop_b = app.add_shop("b");
  let order = placed_order(&app, &shop_a).await;
  order_service::register_shipment(
    app.state.store.as_ref(),
    shop_a.scope,
    order.id,
    "carrier",
    "TRK-SHARED",
    app.clock.now(),
  )
  .await
  .unwrap();

  let (result, ctx) = app
    .deliver(&shop_b, "carrier", carrier_callback(CARRIER_SECRET, "TRK-SHARED", "in_transit"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
  assert!(matches!(outcome(&ctx), Some(ReconcileOutcome::Ignored(_))));
  assert_eq!(
    app.order(&shop_a, order.id).await.shipping_status,
    ShippingStatus::Preparing
  );
}

#[tokio::test]
async fn manual_transitions_off_the_table_are_rejected() {
  let app = TestApp::new();
  let shop = app.add_shop("manual");
  let order = placed_order(&app, &shop).await;

  for to in [OrderStatus::Shipped, OrderStatus::Completed, OrderStatus::Processing, OrderStatus::Refunding] {
    assert!(
      matches!(
        order_service::change_status(app.state.store.as_ref(), shop.scope, order.id, to).await,
        Err(AppError::InvalidStateTransition { .. })
      ),
      "PENDING -> {:?} should be rejected",
      to
    );
  }
  assert_eq!(app.order(&shop, order.id).await.status, OrderStatus::Pending);

  let paid = order_service::change_status(app.state.store.as_ref(), shop.scope, order.id, OrderStatus::Paid)
    .await
    .unwrap();
  assert_eq!(paid.status, OrderStatus::Paid);
  assert_eq!(paid.payment_status, OrderPaymentStatus::Paid);
}

#[tokio::test]
async fn manual_paid_settles_the_open_payment() {
  let app = TestApp::new();
  let shop = app.add_shop("manual-paid");
  let order = placed_order(&app, &shop).await;

  order_service::change_status(app.state.store.as_ref(), shop.scope, order.id, OrderStatus::Paid)
    .await
    .unwrap();
  let payments = app.state.store.find_payments_for_order(shop.scope, order.id).await.unwrap();
  assert_eq!(payments.len(), 1);
  assert_eq!(payments[0].status, PaymentStatus::Paid);
  assert!(payments.iter().all(|p| !p.status.is_open()));

  let (result, ctx) = app
    .deliver(&shop, "ecpay-main", ecpay_callback(&order.order_no, "10200095", "360"))
    .await;
  assert_eq!(result.unwrap(), PipelineResult::Completed);
  assert!(matches!(outcome(&ctx), Some(ReconcileOutcome::Ignored(_))));
  let stored = app.order(&shop, order.id).await;
  assert_eq!(stored.payment_status, OrderPaymentStatus::Paid);
  let payments = app.state.store.find_payments_for_order(shop.scope, order.id).await.unwrap();
  assert_eq!(payments[0].status, PaymentStatus::Paid);
}
