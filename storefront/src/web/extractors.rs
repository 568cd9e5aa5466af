// storefront/src/web/extractors.rs

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use futures_util::future::LocalBoxFuture;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::errors::AppError;
use crate::services::auth_service::{self, MerchantIdentity};
use crate::state::AppState;

pub const MERCHANT_KEY_HEADER: &str = "X-Merchant-Key";
pub const PLATFORM_ID_HEADER: &str = "X-Platform-Id";

/// Merchant resolved from the API-key headers. Every merchant route takes one;
/// its scope is the only tenant the request may touch.
#[derive(Debug, Clone)]
pub struct AuthenticatedMerchant(pub MerchantIdentity);

impl std::ops::Deref for AuthenticatedMerchant {
  type Target = MerchantIdentity;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
  req
    .headers()
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
}

impl FromRequest for AuthenticatedMerchant {
  type Error = AppError;
  type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    let app_state = req.app_data::<web::Data<AppState>>().cloned();
    let api_key = header(req, MERCHANT_KEY_HEADER);
    let platform_id = header(req, PLATFORM_ID_HEADER);

    Box::pin(async move {
      let app_state = app_state.ok_or_else(|| {
        warn!("AuthenticatedMerchant extractor: application state is not configured.");
        AppError::Internal("application state missing".to_string())
      })?;
      let identity =
        auth_service::authenticate_merchant(app_state.store.as_ref(), api_key.as_deref(), platform_id.as_deref())
          .await?;
      Ok(AuthenticatedMerchant(identity))
    })
  }
}

/// JSON body that may be left out. An empty body yields `None`; any other body
/// must deserialize into `T` or the request is rejected as `INVALID_REQUEST`.
#[derive(Debug)]
pub struct OptionalJson<T>(pub Option<T>);

impl<T> OptionalJson<T> {
  pub fn into_inner(self) -> Option<T> {
    self.0
  }
}

impl<T: DeserializeOwned + 'static> FromRequest for OptionalJson<T> {
  type Error = AppError;
  type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
    let body = web::Bytes::from_request(req, payload);
    Box::pin(async move {
      let body = body.await.map_err(|e| AppError::InvalidRequest(e.to_string()))?;
      if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(OptionalJson(None));
      }
      serde_json::from_slice(&body)
        .map(|value| OptionalJson(Some(value)))
        .map_err(|e| AppError::InvalidRequest(format!("invalid JSON body: {}", e)))
    })
  }
}
