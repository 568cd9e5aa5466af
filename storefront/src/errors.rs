// storefront/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use flowline::FlowError;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  #[error("Unauthorized: {0}")]
  Unauthorized(String),

  #[error("Forbidden: {0}")]
  Forbidden(String),

  #[error("Resource not found: {0}")]
  NotFound(String),

  /// Repeat of an action that already completed. For checkout completion the
  /// original order id is carried so clients can retry safely.
  #[error("Conflict: {message}")]
  Conflict { message: String, order_id: Option<Uuid> },

  #[error("Checkout session has expired")]
  SessionExpired,

  #[error("Checkout session is being completed by another request")]
  ConcurrentClaim,

  #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
  InsufficientStock {
    product_id: Uuid,
    requested: i32,
    available: i32,
  },

  #[error("Invalid cart: {0}")]
  InvalidCart(String),

  #[error("Invalid {entity} status transition from {from} to {to}")]
  InvalidStateTransition {
    entity: &'static str,
    from: String,
    to: String,
  },

  #[error("Payment failed: {0}")]
  PaymentFailed(String),

  #[error("Configuration error: {0}")]
  Config(String),

  #[error("Database error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Payment provider error: {0}")]
  Provider(String),

  #[error("Workflow error: {source}")]
  Workflow {
    #[from]
    source: FlowError,
  },

  #[error("Internal server error: {0}")]
  Internal(String),
}

impl AppError {
  /// Stable wire code for the error taxonomy.
  pub fn code(&self) -> &'static str {
    match self {
      AppError::InvalidRequest(_) => "INVALID_REQUEST",
      AppError::Unauthorized(_) => "UNAUTHORIZED",
      AppError::Forbidden(_) => "FORBIDDEN",
      AppError::NotFound(_) => "NOT_FOUND",
      AppError::Conflict { .. } => "CONFLICT",
      AppError::SessionExpired => "SESSION_EXPIRED",
      AppError::ConcurrentClaim => "CONCURRENT_CLAIM",
      AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
      AppError::InvalidCart(_) => "INVALID_CART",
      AppError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
      AppError::PaymentFailed(_) => "PAYMENT_FAILED",
      AppError::Config(_)
      | AppError::Sqlx(_)
      | AppError::Provider(_)
      | AppError::Workflow { .. }
      | AppError::Internal(_) => "INTERNAL_ERROR",
    }
  }

  fn client_message(&self) -> String {
    match self {
      AppError::Config(_) | AppError::Sqlx(_) | AppError::Workflow { .. } | AppError::Internal(_) => {
        "An internal error occurred".to_string()
      }
      AppError::Provider(_) => "Payment provider unavailable".to_string(),
      other => other.to_string(),
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<AppError>() {
      Ok(app_err) => app_err,
      Err(err) => match err.downcast::<sqlx::Error>() {
        Ok(db_err) => AppError::Sqlx(db_err),
        Err(err) => AppError::Internal(err.to_string()),
      },
    }
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
      AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      AppError::Forbidden(_) => StatusCode::FORBIDDEN,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Conflict { .. } | AppError::ConcurrentClaim | AppError::InvalidStateTransition { .. } => {
        StatusCode::CONFLICT
      }
      AppError::SessionExpired => StatusCode::GONE,
      AppError::InsufficientStock { .. } | AppError::InvalidCart(_) => StatusCode::UNPROCESSABLE_ENTITY,
      AppError::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
      AppError::Config(_)
      | AppError::Sqlx(_)
      | AppError::Provider(_)
      | AppError::Workflow { .. }
      | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(application_error = %self, code = self.code(), "Responding with error");
    } else {
      tracing::info!(application_error = %self, code = self.code(), "Responding with error");
    }

    let mut body = Map::new();
    body.insert("code".into(), json!(self.code()));
    body.insert("message".into(), json!(self.client_message()));
    match self {
      AppError::Conflict {
        order_id: Some(order_id),
        ..
      } => {
        body.insert("orderId".into(), json!(order_id));
      }
      AppError::InsufficientStock {
        product_id,
        requested,
        available,
      } => {
        body.insert("productId".into(), json!(product_id));
        body.insert("requested".into(), json!(requested));
        body.insert("available".into(), json!(available));
      }
      _ => {}
    }

    HttpResponse::build(status).json(json!({ "error": Value::Object(body) }))
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
