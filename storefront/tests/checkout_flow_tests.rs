// storefront/tests/checkout_flow_tests.rs
mod common;

use chrono::Duration;
use common::*;
use std::sync::Arc;
use uuid::Uuid;

use storefront::models::{OrderPaymentStatus, OrderStatus, PaymentStatus, SessionStatus, ShippingStatus};
use storefront::providers::PaymentRequest;
use storefront::services::notifier::Notification;
use storefront::services::{order_service, sweeper};
use storefront::AppError;

#[tokio::test]
async fn two_lines_and_flat_shipping_price_to_36000() {
  let app = TestApp::new();
  let shop = app.add_shop("tea");
  let product = app.add_product(&shop, "X", 15000, 10);

  let session = app.create_session(&shop, &[(product, 2)]).await.unwrap();
  assert_eq!(session.status, SessionStatus::Pending);
  assert_eq!(session.subtotal, 30000);
  assert_eq!(session.shipping_fee, 6000);
  assert_eq!(session.total, 36000);
  assert_eq!(session.currency, "TWD");
  assert_eq!(session.expires_at, start_time() + Duration::minutes(30));

  let done = app.complete(&shop, session.id, None).await.unwrap();
  assert_eq!(done.order.total_amount, 36000);
  assert_eq!(done.order.status, OrderStatus::Pending);
  assert_eq!(done.order.payment_status, OrderPaymentStatus::Pending);
  assert_eq!(done.order.shipping_status, ShippingStatus::Pending);
  assert_eq!(done.order.order_no.len(), 20);
  assert_eq!(app.stock(product), 8);

  let payment = done.payment.unwrap();
  assert_eq!(payment.status, PaymentStatus::Initiated);
  assert_eq!(payment.amount, 36000);
  assert_eq!(payment.order_no, done.order.order_no);
  match done.payment_request.unwrap() {
    PaymentRequest::Form { fields, .. } => {
      assert!(fields.iter().any(|(k, v)| k == "TotalAmount" && v == "360"));
      assert!(fields.iter().any(|(k, v)| k == "MerchantTradeNo" && *v == done.order.order_no));
    }
    other => panic!("unexpected payment request {:?}", other),
  }
  assert!(done.confirmation_sent);
  assert!(matches!(
    app.notifier.sent.lock().first(),
    Some(Notification::OrderCreated { total_amount: 36000, .. })
  ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completion_creates_exactly_one_order() {
  let app = Arc::new(TestApp::new());
  let shop = app.add_shop("race");
  let first = app.add_product(&shop, "A", 15000, 5);
  let second = app.add_product(&shop, "B", 9900, 5);
  let session = app.create_session(&shop, &[(first, 2), (second, 1)]).await.unwrap();

  let mut handles = Vec::new();
  for _ in 0..8 {
    let app = app.clone();
    let shop = shop.clone();
    handles.push(tokio::spawn(async move { app.complete(&shop, session.id, None).await }));
  }

  let mut orders = Vec::new();
  for handle in handles {
    match handle.await.unwrap() {
      Ok(done) => orders.push(done.order.id),
      Err(AppError::Conflict { .. }) | Err(AppError::ConcurrentClaim) => {}
      Err(other) => panic!("unexpected error {:?}", other),
    }
  }

  assert_eq!(orders.len(), 1);
  assert_eq!(app.store.order_count(), 1);
  assert_eq!(app.store.payment_count(), 1);
  assert_eq!(app.stock(first), 3);
  assert_eq!(app.stock(second), 4);
}

#[tokio::test]
async fn repeat_completion_conflicts_with_original_order_id() {
  let app = TestApp::new();
  let shop = app.add_shop("repeat");
  let product = app.add_product(&shop, "X", 15000, 10);
  let session = app.create_session(&shop, &[(product, 1)]).await.unwrap();

  let done = app.complete(&shop, session.id, None).await.unwrap();
  match app.complete(&shop, session.id, None).await {
    Err(AppError::Conflict { order_id, .. }) => assert_eq!(order_id, Some(done.order.id)),
    other => panic!("expected conflict, got {:?}", other.map(|d| d.order.id)),
  }
  assert_eq!(app.stock(product), 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn competing_sessions_never_oversell() {
  let app = Arc::new(TestApp::new());
  let shop = app.add_shop("scarce");
  let product = app.add_product(&shop, "LAST", 15000, 3);
  let a = app.create_session(&shop, &[(product, 2)]).await.unwrap();
  let b = app.create_session(&shop, &[(product, 2)]).await.unwrap();

  let (ra, rb) = {
    let (app_a, shop_a) = (app.clone(), shop.clone());
    let (app_b, shop_b) = (app.clone(), shop.clone());
    tokio::join!(
      tokio::spawn(async move { app_a.complete(&shop_a, a.id, None).await }),
      tokio::spawn(async move { app_b.complete(&shop_b, b.id, None).await }),
    )
  };
  let results = [ra.unwrap(), rb.unwrap()];

  let successes = results.iter().filter(|r| r.is_ok()).count();
  assert_eq!(successes, 1);
  let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
  match failure {
    AppError::InsufficientStock {
      product_id,
      requested,
      available,
    } => {
      assert_eq!(*product_id, product);
      assert_eq!(*requested, 2);
      assert_eq!(*available, 1);
    }
    other => panic!("expected insufficient stock, got {:?}", other),
  }
  assert_eq!(app.stock(product), 1);
  assert_eq!(app.store.order_count(), 1);
}

#[tokio::test]
async fn stock_failure_releases_the_claim() {
  let app = TestApp::new();
  let shop = app.add_shop("release");
  let product = app.add_product(&shop, "X", 15000, 2);
  let first = app.create_session(&shop, &[(product, 2)]).await.unwrap();
  let second = app.create_session(&shop, &[(product, 2)]).await.unwrap();

  app.complete(&shop, first.id, None).await.unwrap();
  assert!(matches!(
    app.complete(&shop, second.id, None).await,
    Err(AppError::InsufficientStock { .. })
  ));

  let stored = app.state.store.find_session(shop.scope, second.id).await.unwrap().unwrap();
  assert_eq!(stored.status, SessionStatus::Pending);
  assert!(stored.claim_token.is_none());
  assert_eq!(app.stock(product), 0);
}

#[tokio::test]
async fn session_past_expiry_cannot_complete() {
  let app = TestApp::new();
  let shop = app.add_shop("late");
  let product = app.add_product(&shop, "X", 15000, 10);
  let session = app.create_session(&shop, &[(product, 1)]).await.unwrap();

  app.clock.advance(Duration::minutes(31));
  assert!(matches!(
    app.complete(&shop, session.id, None).await,
    Err(AppError::SessionExpired)
  ));
  assert_eq!(app.stock(product), 10);
  assert_eq!(app.store.order_count(), 0);
}

#[tokio::test]
async fn expiry_boundary_is_inclusive() {
  let app = TestApp::new();
  let shop = app.add_shop("edge");
  let product = app.add_product(&shop, "X", 15000, 10);
  let session = app.create_session(&shop, &[(product, 1)]).await.unwrap();

  app.clock.advance(Duration::minutes(30));
  assert!(matches!(
    app.complete(&shop, session.id, None).await,
    Err(AppError::SessionExpired)
  ));
}

#[tokio::test]
async fn sweeper_marks_lapsed_sessions_and_keeps_live_ones() {
  let app = TestApp::new();
  let shop = app.add_shop("sweep");
  let product = app.add_product(&shop, "X", 15000, 10);
  let old = app.create_session(&shop, &[(product, 1)]).await.unwrap();
  app.clock.advance(Duration::minutes(20));
  let fresh = app.create_session(&shop, &[(product, 1)]).await.unwrap();
  app.clock.advance(Duration::minutes(15));

  let report = sweeper::sweep_once(app.state.store.as_ref(), app.clock.as_ref(), 300)
    .await
    .unwrap();
  assert_eq!(report.expired, 1);

  let old = app.state.store.find_session(shop.scope, old.id).await.unwrap().unwrap();
  assert_eq!(old.status, SessionStatus::Expired);
  let fresh = app.state.store.find_session(shop.scope, fresh.id).await.unwrap().unwrap();
  assert_eq!(fresh.status, SessionStatus::Pending);
}

#[tokio::test]
async fn other_tenant_sees_nothing() {
  let app = TestApp::new();
  let shop_a = app.add_shop("alpha");
  let shop_b = app.add_shop("beta");
  let product = app.add_product(&shop_a, "X", 15000, 10);
  let session = app.create_session(&shop_a, &[(product, 1)]).await.unwrap();
  let done = app.complete(&shop_a, session.id, None).await.unwrap();

  assert!(matches!(
    order_service::load_view(app.state.store.as_ref(), shop_b.scope, done.order.id).await,
    Err(AppError::NotFound(_))
  ));
  assert!(matches!(
    app.complete(&shop_b, session.id, None).await,
    Err(AppError::NotFound(_))
  ));
  // Tenant B cannot buy tenant A's product either.
  assert!(matches!(
    app.create_session(&shop_b, &[(product, 1)]).await,
    Err(AppError::NotFound(_))
  ));
}

#[tokio::test]
async fn unknown_handler_is_rejected_before_claiming() {
  let app = TestApp::new();
  let shop = app.add_shop("handler");
  let product = app.add_product(&shop, "X", 15000, 10);
  let session = app.create_session(&shop, &[(product, 1)]).await.unwrap();

  assert!(matches!(
    app.complete(&shop, session.id, Some("stripe")).await,
    Err(AppError::InvalidRequest(_))
  ));
  // Logistics providers are not payment handlers.
  assert!(matches!(
    app.complete(&shop, session.id, Some("carrier")).await,
    Err(AppError::InvalidRequest(_))
  ));
  let stored = app.state.store.find_session(shop.scope, session.id).await.unwrap().unwrap();
  assert_eq!(stored.status, SessionStatus::Pending);
  assert!(app.complete(&shop, session.id, Some("ecpay-main")).await.is_ok());
}

#[tokio::test]
async fn invalid_carts_are_refused() {
  let app = TestApp::new();
  let shop = app.add_shop("carts");
  let product = app.add_product(&shop, "X", 15000, 1);

  assert!(matches!(app.create_session(&shop, &[]).await, Err(AppError::InvalidRequest(_))));
  assert!(matches!(
    app.create_session(&shop, &[(product, 0)]).await,
    Err(AppError::InvalidRequest(_))
  ));
  assert!(matches!(
    app.create_session(&shop, &[(Uuid::new_v4(), 1)]).await,
    Err(AppError::NotFound(_))
  ));
  assert!(matches!(
    app.create_session(&shop, &[(product, 2)]).await,
    Err(AppError::InsufficientStock { .. })
  ));
}

#[tokio::test]
async fn notifier_failure_keeps_the_order() {
  let app = TestApp::new();
  app.notifier.fail.store(true, std::sync::atomic::Ordering::SeqCst);
  let shop = app.add_shop("quiet");
  let product = app.add_product(&shop, "X", 15000, 10);
  let session = app.create_session(&shop, &[(product, 1)]).await.unwrap();

  let done = app.complete(&shop, session.id, None).await.unwrap();
  assert!(!done.confirmation_sent);
  assert_eq!(app.order(&shop, done.order.id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn provider_misconfiguration_leaves_order_for_retry() {
  let app = TestApp::new();
  let shop = app.add_shop("broken");
  app.add_provider(
    shop.scope,
    "ecpay-unkeyed",
    storefront::providers::ProviderConfig::EcPay(storefront::providers::ecpay::EcPayConfig {
      merchant_id: Some(ECPAY_MERCHANT.into()),
      hash_key: None,
      hash_iv: None,
      gateway_url: "https://payment-stage.ecpay.com.tw/Cashier/AioCheckOut/V5".into(),
    }),
  );
  let product = app.add_product(&shop, "X", 15000, 10);
  let session = app.create_session(&shop, &[(product, 1)]).await.unwrap();

  let done = app.complete(&shop, session.id, Some("ecpay-unkeyed")).await.unwrap();
  assert!(done.payment_request.is_none());
  assert!(done.payment_error.is_some());
  assert_eq!(done.order.status, OrderStatus::Pending);
  assert_eq!(app.stock(product), 9);
}

#[tokio::test]
async fn out_of_range_ttl_fails_session_creation_cleanly() {
  let mut config = storefront::config::AppConfig::for_local("http://shop.test");
  config.session_ttl_minutes = i64::MAX;
  let app = TestApp::with_config(config);
  let shop = app.add_shop("ttl");
  let product = app.add_product(&shop, "X", 15000, 10);

  assert!(matches!(
    app.create_session(&shop, &[(product, 1)]).await,
    Err(AppError::Config(_))
  ));
  assert_eq!(app.stock(product), 10);
}
