// storefront/src/services/pricing.rs

//! Cart validation and totals, computed from catalog prices only.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{money, CartLine, Product, Shop};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
  pub lines: Vec<CartLine>,
  pub subtotal: i64,
  pub shipping_fee: i64,
  pub tax: i64,
  pub total: i64,
}

/// Merges duplicate offers, keeping first-seen order. Every quantity must be
/// at least one.
pub fn merge_lines(lines: &[(Uuid, i32)]) -> Result<Vec<(Uuid, i32)>> {
  if lines.is_empty() {
    return Err(AppError::InvalidRequest("cart must contain at least one line".to_string()));
  }
  let mut merged: Vec<(Uuid, i32)> = Vec::with_capacity(lines.len());
  for &(offer_id, quantity) in lines {
    if quantity < 1 {
      return Err(AppError::InvalidRequest(format!(
        "quantity for offer {} must be at least 1",
        offer_id
      )));
    }
    match merged.iter_mut().find(|(id, _)| *id == offer_id) {
      Some((_, q)) => {
        *q = q
          .checked_add(quantity)
          .ok_or_else(|| AppError::InvalidCart(format!("quantity for offer {} is too large", offer_id)))?;
      }
      None => merged.push((offer_id, quantity)),
    }
  }
  Ok(merged)
}

/// Prices `lines` against `catalog`, which must already be scoped to the
/// shop. Unknown or unpublished products are `NOT_FOUND`; short stock is
/// `INSUFFICIENT_STOCK` for the first offending line.
pub fn price_cart(shop: &Shop, lines: &[(Uuid, i32)], catalog: &[Product]) -> Result<PricedCart> {
  let by_id: HashMap<Uuid, &Product> = catalog.iter().map(|p| (p.id, p)).collect();
  let overflow = || AppError::InvalidCart("cart total is out of range".to_string());

  let mut priced = Vec::with_capacity(lines.len());
  let mut subtotal: i64 = 0;
  for &(offer_id, quantity) in lines {
    let product = by_id
      .get(&offer_id)
      .filter(|p| p.published && p.tenant_id == shop.tenant_id && p.shop_id == shop.id)
      .ok_or_else(|| AppError::NotFound(format!("product {}", offer_id)))?;

    if product.stock < quantity {
      return Err(AppError::InsufficientStock {
        product_id: offer_id,
        requested: quantity,
        available: product.stock,
      });
    }

    let line_total = product.price.checked_mul(quantity as i64).ok_or_else(overflow)?;
    subtotal = subtotal.checked_add(line_total).ok_or_else(overflow)?;
    priced.push(CartLine {
      offer_id,
      sku: product.sku.clone(),
      name: product.name.clone(),
      quantity,
      unit_price: product.price,
      line_total,
    });
  }

  let shipping_fee = match shop.free_shipping_threshold {
    Some(threshold) if subtotal >= threshold => 0,
    _ => shop.shipping_fee,
  };
  let tax = money::apply_basis_points(subtotal, shop.tax_rate_bps);
  let total = subtotal
    .checked_add(shipping_fee)
    .and_then(|t| t.checked_add(tax))
    .ok_or_else(overflow)?;

  Ok(PricedCart {
    lines: priced,
    subtotal,
    shipping_fee,
    tax,
    total,
  })
}

/// `yyMMddHHmmss` followed by eight upper-case hex digits. Twenty characters
/// of `[0-9A-F]`, accepted as a merchant trade number by every gateway.
pub fn generate_order_no(now: DateTime<Utc>) -> String {
  let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
  format!("{}{}", now.format("%y%m%d%H%M%S"), suffix)
}
