// storefront/src/services/sweeper.rs

//! Housekeeping for checkout sessions. Expiry is always evaluated lazily, so
//! this only tidies stored statuses and recovers abandoned claims.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::errors::Result;
use crate::store::CommerceStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
  pub expired: u64,
  pub released: u64,
}

#[instrument(name = "sweeper::sweep_once", skip(store, clock))]
pub async fn sweep_once(store: &dyn CommerceStore, clock: &dyn Clock, stale_claim_secs: i64) -> Result<SweepReport> {
  let now = clock.now();
  let expired = store.expire_sessions(now).await?;
  let released = store
    .release_stale_claims(now - ChronoDuration::seconds(stale_claim_secs))
    .await?;
  if expired > 0 || released > 0 {
    info!(expired, released, "Checkout session sweep finished.");
  } else {
    debug!("Checkout session sweep found nothing to do.");
  }
  Ok(SweepReport { expired, released })
}

/// Runs [`sweep_once`] every `interval` until the returned handle is aborted.
pub fn spawn(
  store: Arc<dyn CommerceStore>,
  clock: Arc<dyn Clock>,
  interval: Duration,
  stale_claim_secs: i64,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      if let Err(e) = sweep_once(store.as_ref(), clock.as_ref(), stale_claim_secs).await {
        warn!(error = %e, "Checkout session sweep failed.");
      }
    }
  })
}
