// storefront/src/lib.rs

//! Checkout-to-order service: checkout sessions, exactly-once order
//! materialization and multi-provider payment and logistics reconciliation.

pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod pipelines;
pub mod providers;
pub mod services;
pub mod state;
pub mod store;
pub mod web;

pub use errors::{AppError, Result};
pub use state::AppState;
