// storefront/src/services/mod.rs

//! Business rules shared by the pipelines and the HTTP handlers.

pub mod auth_service;
pub mod notifier;
pub mod order_service;
pub mod payment_service;
pub mod pricing;
pub mod reconciliation;
pub mod state_machine;
pub mod sweeper;
