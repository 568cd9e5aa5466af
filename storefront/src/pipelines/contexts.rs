// storefront/src/pipelines/contexts.rs

//! Data carried through each pipeline. Handlers receive these wrapped in
//! `flowline::ContextData`.

use uuid::Uuid;

use crate::models::{Address, CheckoutSession, Order, Payment, ProviderAccount, Shop, TenantScope};
use crate::providers::{InboundCallback, NormalizedEvent, PaymentRequest, ProviderConfig, ProviderError, ProviderKind};
use crate::services::payment_service::PaymentHandlerView;
use crate::services::pricing::PricedCart;
use crate::services::reconciliation::ReconcileOutcome;
use crate::state::AppState;

/// Session creation.
#[derive(Clone)]
pub struct SessionCtxData {
  pub app_state: AppState,
  pub scope: TenantScope,
  /// `(offer_id, quantity)` exactly as requested.
  pub requested_lines: Vec<(Uuid, i32)>,
  pub shipping_address: Option<Address>,
  pub billing_address: Option<Address>,
  pub buyer_email: Option<String>,

  pub shop: Option<Shop>,
  pub priced: Option<PricedCart>,
  pub payment_handlers: Vec<PaymentHandlerView>,
  pub session: Option<CheckoutSession>,
}

impl SessionCtxData {
  pub fn new(
    app_state: AppState,
    scope: TenantScope,
    requested_lines: Vec<(Uuid, i32)>,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
    buyer_email: Option<String>,
  ) -> Self {
    Self {
      app_state,
      scope,
      requested_lines,
      shipping_address,
      billing_address,
      buyer_email,
      shop: None,
      priced: None,
      payment_handlers: Vec::new(),
      session: None,
    }
  }
}

/// Checkout completion.
#[derive(Clone)]
pub struct CompleteCtxData {
  pub app_state: AppState,
  pub scope: TenantScope,
  pub session_id: Uuid,
  pub handler_id: Option<String>,

  pub session: Option<CheckoutSession>,
  pub payment_account: Option<ProviderAccount>,
  pub claim_token: Option<Uuid>,
  pub order: Option<Order>,
  pub payment: Option<Payment>,
  pub payment_request: Option<PaymentRequest>,
  /// Why the payment request could not be built. The order stands regardless.
  pub payment_error: Option<String>,
  pub confirmation_sent: bool,
}

impl CompleteCtxData {
  pub fn new(app_state: AppState, scope: TenantScope, session_id: Uuid, handler_id: Option<String>) -> Self {
    Self {
      app_state,
      scope,
      session_id,
      handler_id,
      session: None,
      payment_account: None,
      claim_token: None,
      order: None,
      payment: None,
      payment_request: None,
      payment_error: None,
      confirmation_sent: false,
    }
  }
}

/// Provider callback reconciliation.
#[derive(Clone)]
pub struct WebhookCtxData {
  pub app_state: AppState,
  pub shop_id: Uuid,
  pub provider_id: String,
  pub callback: InboundCallback,

  pub scope: Option<TenantScope>,
  pub provider_kind: Option<ProviderKind>,
  pub provider_config: Option<ProviderConfig>,
  pub event: Option<NormalizedEvent>,
  /// Set when verification failed; the pipeline stops without any write.
  pub rejection: Option<RejectedCallback>,
  pub outcome: Option<ReconcileOutcome>,
}

#[derive(Debug, Clone)]
pub struct RejectedCallback {
  pub auth_failure: bool,
  pub reason: String,
}

impl From<&ProviderError> for RejectedCallback {
  fn from(err: &ProviderError) -> Self {
    Self {
      auth_failure: err.is_auth_failure(),
      reason: err.to_string(),
    }
  }
}

impl WebhookCtxData {
  pub fn new(app_state: AppState, shop_id: Uuid, provider_id: String, callback: InboundCallback) -> Self {
    Self {
      app_state,
      shop_id,
      provider_id,
      callback,
      scope: None,
      provider_kind: None,
      provider_config: None,
      event: None,
      rejection: None,
      outcome: None,
    }
  }
}
