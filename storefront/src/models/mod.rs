// storefront/src/models/mod.rs

//! Data structures representing stored entities and their status vocabularies.

pub mod money;
pub mod order;
pub mod payment;
pub mod product;
pub mod session;
pub mod shipping;
pub mod shop;

pub use money::Money;
pub use order::{Order, OrderAddress, OrderItem, OrderPaymentStatus, OrderState, OrderStatus};
pub use payment::{Payment, PaymentStatus};
pub use product::Product;
pub use session::{Address, CartLine, CheckoutSession, SessionStatus};
pub use shipping::{ShippingOrder, ShippingStatus};
pub use shop::{MerchantCredential, ProviderAccount, Role, Shop};

/// Tenant and shop pair resolved before a request reaches the core. Every store
/// query is filtered on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TenantScope {
  pub tenant_id: uuid::Uuid,
  pub shop_id: uuid::Uuid,
}
