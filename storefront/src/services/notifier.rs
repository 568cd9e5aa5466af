// storefront/src/services/notifier.rs

//! Best-effort outbound notifications. Delivery failures are logged by the
//! caller and never undo the state change that triggered them.

use async_trait::async_trait;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
  OrderCreated {
    order_id: Uuid,
    order_no: String,
    buyer_email: Option<String>,
    total_amount: i64,
    currency: String,
  },
  /// A provider callback changed an order, payment or shipment.
  OrderUpdated {
    order_id: Uuid,
    order_no: String,
    change: String,
  },
}

#[async_trait]
pub trait Notifier: Send + Sync {
  async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log instead of sending them anywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  #[instrument(name = "notifier::log", skip_all)]
  async fn notify(&self, notification: &Notification) -> Result<()> {
    match notification {
      Notification::OrderCreated {
        order_id,
        order_no,
        buyer_email,
        total_amount,
        currency,
      } => {
        info!(
          %order_id,
          %order_no,
          has_recipient = buyer_email.is_some(),
          total_amount,
          %currency,
          "Order confirmation queued."
        );
      }
      Notification::OrderUpdated {
        order_id,
        order_no,
        change,
      } => {
        info!(%order_id, %order_no, %change, "Order update notification queued.");
      }
    }
    Ok(())
  }
}
