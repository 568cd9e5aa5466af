// storefront/src/services/state_machine.rs

//! Transition tables for orders, payments and shipments, and the planners that
//! turn an event into a conditional [`Transition`].
//!
//! Planners are pure: they look at a snapshot and describe the write. The store
//! applies it only if the rows still match the snapshot.

use crate::errors::{AppError, Result};
use crate::models::{
  Order, OrderPaymentStatus, OrderState, OrderStatus, Payment, PaymentStatus, ShippingOrder, ShippingStatus,
};
use crate::providers::{PaymentEventStatus, ShipmentEventStatus};
use crate::store::{OrderUpdate, PaymentUpdate, ShipmentUpdate, Transition};

pub fn order_transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
  use OrderStatus::*;
  matches!(
    (from, to),
    (Pending, Paid)
      | (Pending, Cancelled)
      | (Paid, Processing)
      | (Paid, Refunding)
      | (Paid, Cancelled)
      | (Processing, Shipped)
      | (Processing, Refunding)
      | (Shipped, Completed)
      | (Shipped, Refunding)
      | (Completed, Refunding)
  )
}

pub fn shipping_transition_allowed(from: ShippingStatus, to: ShippingStatus) -> bool {
  use ShippingStatus::*;
  matches!(
    (from, to),
    (Pending, Preparing)
      | (Preparing, Delivering)
      | (Delivering, Delivered)
      | (Delivering, Returned)
      | (Delivered, Returned)
  )
}

pub fn payment_transition_allowed(from: PaymentStatus, to: PaymentStatus) -> bool {
  use PaymentStatus::*;
  matches!(
    (from, to),
    (Initiated, Pending)
      | (Initiated, Paid)
      | (Initiated, Failed)
      | (Initiated, Cancelled)
      | (Pending, Paid)
      | (Pending, Failed)
      | (Pending, Cancelled)
      | (Paid, Refunded)
  )
}

pub fn order_payment_transition_allowed(from: OrderPaymentStatus, to: OrderPaymentStatus) -> bool {
  use OrderPaymentStatus::*;
  matches!(
    (from, to),
    (Pending, Paid) | (Pending, Failed) | (Failed, Paid) | (Failed, Pending) | (Paid, Refunded)
  )
}

/// True when `to` can be reached from `from` through one or more forward edges.
pub fn shipping_reachable(from: ShippingStatus, to: ShippingStatus) -> bool {
  use ShippingStatus::*;
  const ALL: [ShippingStatus; 5] = [Pending, Preparing, Delivering, Delivered, Returned];
  let mut frontier = vec![from];
  let mut seen = vec![from];
  while let Some(current) = frontier.pop() {
    for next in ALL {
      if shipping_transition_allowed(current, next) && !seen.contains(&next) {
        if next == to {
          return true;
        }
        seen.push(next);
        frontier.push(next);
      }
    }
  }
  false
}

/// Outcome of planning an event against the current rows.
#[derive(Debug, Clone)]
pub enum Plan {
  Apply(Transition),
  /// The event's target state is already stored.
  AlreadyApplied,
  /// Authentic but not applicable. Acknowledged to the provider, never written.
  Ignored(String),
}

fn invalid(entity: &'static str, from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> AppError {
  AppError::InvalidStateTransition {
    entity,
    from: format!("{:?}", from).to_uppercase(),
    to: format!("{:?}", to).to_uppercase(),
  }
}

/// Single-edge status change requested by shop staff. A move to PAID also
/// settles the order's open payment, if any.
pub fn plan_manual_status(order: &Order, open_payment: Option<&Payment>, to: OrderStatus) -> Result<Transition> {
  if !order_transition_allowed(order.status, to) {
    return Err(invalid("order", order.status, to));
  }
  let mut next = order.state();
  next.status = to;
  let mut payment = None;
  match to {
    OrderStatus::Paid if order.payment_status != OrderPaymentStatus::Paid => {
      if !order_payment_transition_allowed(order.payment_status, OrderPaymentStatus::Paid) {
        return Err(invalid("order", order.status, to));
      }
      next.payment_status = OrderPaymentStatus::Paid;
      payment = open_payment
        .filter(|p| p.status.is_open())
        .map(|p| PaymentUpdate {
          payment_id: p.id,
          expected: p.status,
          next: PaymentStatus::Paid,
          transaction_no: p.transaction_no.clone(),
        });
    }
    OrderStatus::Completed if order.payment_status != OrderPaymentStatus::Paid => {
      return Err(invalid("order", order.status, to));
    }
    _ => {}
  }
  Ok(Transition {
    order: Some(OrderUpdate {
      order_id: order.id,
      expected: order.state(),
      next,
    }),
    payment,
    ..Transition::default()
  })
}

fn payment_target(status: PaymentEventStatus) -> PaymentStatus {
  match status {
    PaymentEventStatus::Pending => PaymentStatus::Pending,
    PaymentEventStatus::Paid => PaymentStatus::Paid,
    PaymentEventStatus::Failed => PaymentStatus::Failed,
    PaymentEventStatus::Refunded => PaymentStatus::Refunded,
  }
}

/// Order columns after a payment reaches `target`.
fn order_after_payment(current: OrderState, target: PaymentStatus) -> OrderState {
  let mut next = current;
  let wanted = match target {
    PaymentStatus::Paid => Some(OrderPaymentStatus::Paid),
    PaymentStatus::Failed => Some(OrderPaymentStatus::Failed),
    PaymentStatus::Pending => Some(OrderPaymentStatus::Pending),
    PaymentStatus::Refunded => Some(OrderPaymentStatus::Refunded),
    PaymentStatus::Initiated | PaymentStatus::Cancelled => None,
  };
  if let Some(wanted) = wanted {
    if order_payment_transition_allowed(current.payment_status, wanted) {
      next.payment_status = wanted;
    }
  }
  match target {
    PaymentStatus::Paid if order_transition_allowed(current.status, OrderStatus::Paid) => {
      next.status = OrderStatus::Paid;
    }
    PaymentStatus::Refunded if order_transition_allowed(current.status, OrderStatus::Refunding) => {
      next.status = OrderStatus::Refunding;
    }
    _ => {}
  }
  next
}

pub fn plan_payment_event(
  order: &Order,
  payment: &Payment,
  status: PaymentEventStatus,
  transaction_no: Option<String>,
) -> Plan {
  let target = payment_target(status);
  if payment.status == target {
    return Plan::AlreadyApplied;
  }
  if !payment_transition_allowed(payment.status, target) {
    return Plan::Ignored(format!(
      "payment {} cannot move from {:?} to {:?}",
      payment.id, payment.status, target
    ));
  }

  let current = order.state();
  let next = order_after_payment(current, target);
  Plan::Apply(Transition {
    order: (next != current).then_some(OrderUpdate {
      order_id: order.id,
      expected: current,
      next,
    }),
    payment: Some(PaymentUpdate {
      payment_id: payment.id,
      expected: payment.status,
      next: target,
      transaction_no,
    }),
    ..Transition::default()
  })
}

fn shipment_target(status: &ShipmentEventStatus) -> Option<ShippingStatus> {
  match status {
    ShipmentEventStatus::Preparing => Some(ShippingStatus::Preparing),
    ShipmentEventStatus::Delivering => Some(ShippingStatus::Delivering),
    ShipmentEventStatus::Delivered => Some(ShippingStatus::Delivered),
    ShipmentEventStatus::Returned => Some(ShippingStatus::Returned),
    ShipmentEventStatus::Unknown(_) => None,
  }
}

/// Order columns after its shipment reaches `target`. Carrier events may skip
/// intermediate statuses, so the order is walked forward edge by edge.
fn order_after_shipment(current: OrderState, target: ShippingStatus) -> OrderState {
  let mut next = current;
  if shipping_reachable(current.shipping_status, target) {
    next.shipping_status = target;
  }
  if matches!(target, ShippingStatus::Delivering | ShippingStatus::Delivered) {
    if next.status == OrderStatus::Paid {
      next.status = OrderStatus::Processing;
    }
    if next.status == OrderStatus::Processing {
      next.status = OrderStatus::Shipped;
    }
  }
  if target == ShippingStatus::Delivered
    && next.status == OrderStatus::Shipped
    && next.payment_status == OrderPaymentStatus::Paid
  {
    next.status = OrderStatus::Completed;
  }
  next
}

pub fn plan_shipment_event(order: &Order, shipment: &ShippingOrder, status: &ShipmentEventStatus) -> Plan {
  let Some(target) = shipment_target(status) else {
    return Plan::Ignored(format!("carrier status {:?} has no internal mapping", status));
  };
  if shipment.status == target {
    return Plan::AlreadyApplied;
  }
  if !shipping_reachable(shipment.status, target) {
    return Plan::Ignored(format!(
      "shipment {} cannot move from {:?} to {:?}",
      shipment.id, shipment.status, target
    ));
  }

  let current = order.state();
  let next = order_after_shipment(current, target);
  Plan::Apply(Transition {
    order: (next != current).then_some(OrderUpdate {
      order_id: order.id,
      expected: current,
      next,
    }),
    shipment: Some(ShipmentUpdate {
      shipment_id: shipment.id,
      expected: shipment.status,
      next: target,
    }),
    ..Transition::default()
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::providers::ProviderKind;
  use chrono::Utc;
  use uuid::Uuid;

  const ORDER_STATUSES: [OrderStatus; 7] = [
    OrderStatus::Pending,
    OrderStatus::Paid,
    OrderStatus::Processing,
    OrderStatus::Shipped,
    OrderStatus::Completed,
    OrderStatus::Cancelled,
    OrderStatus::Refunding,
  ];

  fn order(status: OrderStatus, payment_status: OrderPaymentStatus, shipping_status: ShippingStatus) -> Order {
    let now = Utc::now();
    Order {
      id: Uuid::new_v4(),
      tenant_id: Uuid::new_v4(),
      shop_id: Uuid::new_v4(),
      order_no: "240101000000ABCDEF01".into(),
      status,
      payment_status,
      shipping_status,
      currency: "TWD".into(),
      subtotal: 30_000,
      shipping_fee: 6_000,
      tax: 0,
      total_amount: 36_000,
      checkout_session_id: None,
      buyer_email: None,
      created_at: now,
      updated_at: now,
    }
  }

  fn payment(order: &Order, status: PaymentStatus) -> Payment {
    let now = Utc::now();
    Payment {
      id: Uuid::new_v4(),
      tenant_id: order.tenant_id,
      order_id: order.id,
      provider_id: "ecpay-main".into(),
      provider_kind: ProviderKind::EcPay,
      order_no: order.order_no.clone(),
      amount: order.total_amount,
      currency: order.currency.clone(),
      status,
      transaction_no: None,
      created_at: now,
      updated_at: now,
    }
  }

  fn shipment(order: &Order, status: ShippingStatus) -> ShippingOrder {
    let now = Utc::now();
    ShippingOrder {
      id: Uuid::new_v4(),
      tenant_id: order.tenant_id,
      order_id: order.id,
      provider_id: "carrier".into(),
      tracking_number: "TRK123".into(),
      status,
      created_at: now,
      updated_at: now,
    }
  }

  #[test]
  fn every_pair_outside_the_order_table_is_rejected() {
    let allowed = [
      (OrderStatus::Pending, OrderStatus::Paid),
      (OrderStatus::Pending, OrderStatus::Cancelled),
      (OrderStatus::Paid, OrderStatus::Processing),
      (OrderStatus::Paid, OrderStatus::Refunding),
      (OrderStatus::Paid, OrderStatus::Cancelled),
      (OrderStatus::Processing, OrderStatus::Shipped),
      (OrderStatus::Processing, OrderStatus::Refunding),
      (OrderStatus::Shipped, OrderStatus::Completed),
      (OrderStatus::Shipped, OrderStatus::Refunding),
      (OrderStatus::Completed, OrderStatus::Refunding),
    ];
    for from in ORDER_STATUSES {
      for to in ORDER_STATUSES {
        assert_eq!(
          order_transition_allowed(from, to),
          allowed.contains(&(from, to)),
          "{:?} -> {:?}",
          from,
          to
        );
        let o = order(from, OrderPaymentStatus::Paid, ShippingStatus::Pending);
        let planned = plan_manual_status(&o, None, to);
        if allowed.contains(&(from, to)) {
          assert_eq!(planned.unwrap().order.unwrap().next.status, to);
        } else {
          assert!(matches!(planned, Err(AppError::InvalidStateTransition { .. })));
        }
      }
    }
  }

  #[test]
  fn shipping_table_and_reachability() {
    use ShippingStatus::*;
    assert!(shipping_transition_allowed(Pending, Preparing));
    assert!(!shipping_transition_allowed(Preparing, Delivered));
    assert!(shipping_reachable(Preparing, Delivered));
    assert!(shipping_reachable(Preparing, Returned));
    assert!(!shipping_reachable(Delivered, Delivering));
    assert!(!shipping_reachable(Returned, Delivered));
    assert!(!shipping_reachable(Delivered, Delivered));
  }

  #[test]
  fn manual_completion_requires_payment() {
    let o = order(OrderStatus::Shipped, OrderPaymentStatus::Pending, ShippingStatus::Delivered);
    assert!(matches!(
      plan_manual_status(&o, None, OrderStatus::Completed),
      Err(AppError::InvalidStateTransition { .. })
    ));
  }

  #[test]
  fn manual_paid_marks_payment_paid() {
    let o = order(OrderStatus::Pending, OrderPaymentStatus::Pending, ShippingStatus::Pending);
    let p = payment(&o, PaymentStatus::Initiated);
    let t = plan_manual_status(&o, Some(&p), OrderStatus::Paid).unwrap();
    let update = t.order.unwrap();
    assert_eq!(update.next.payment_status, OrderPaymentStatus::Paid);
    assert_eq!(update.expected, o.state());
    let settled = t.payment.unwrap();
    assert_eq!(settled.payment_id, p.id);
    assert_eq!(settled.expected, PaymentStatus::Initiated);
    assert_eq!(settled.next, PaymentStatus::Paid);
  }

  #[test]
  fn manual_paid_leaves_closed_payments_alone() {
    let o = order(OrderStatus::Pending, OrderPaymentStatus::Failed, ShippingStatus::Pending);
    let p = payment(&o, PaymentStatus::Failed);
    let t = plan_manual_status(&o, Some(&p), OrderStatus::Paid).unwrap();
    assert!(t.payment.is_none());
    assert_eq!(t.order.unwrap().next.payment_status, OrderPaymentStatus::Paid);
  }

  #[test]
  fn paid_event_moves_order_and_payment() {
    let o = order(OrderStatus::Pending, OrderPaymentStatus::Pending, ShippingStatus::Pending);
    let p = payment(&o, PaymentStatus::Initiated);
    let Plan::Apply(t) = plan_payment_event(&o, &p, PaymentEventStatus::Paid, Some("TX1".into())) else {
      panic!("expected a transition");
    };
    let order_update = t.order.unwrap();
    assert_eq!(order_update.next.status, OrderStatus::Paid);
    assert_eq!(order_update.next.payment_status, OrderPaymentStatus::Paid);
    let payment_update = t.payment.unwrap();
    assert_eq!(payment_update.next, PaymentStatus::Paid);
    assert_eq!(payment_update.transaction_no.as_deref(), Some("TX1"));
  }

  #[test]
  fn repeated_or_stale_payment_events_do_not_write() {
    let o = order(OrderStatus::Paid, OrderPaymentStatus::Paid, ShippingStatus::Pending);
    let p = payment(&o, PaymentStatus::Paid);
    assert!(matches!(
      plan_payment_event(&o, &p, PaymentEventStatus::Paid, None),
      Plan::AlreadyApplied
    ));
    assert!(matches!(
      plan_payment_event(&o, &p, PaymentEventStatus::Failed, None),
      Plan::Ignored(_)
    ));
  }

  #[test]
  fn failed_payment_only_touches_payment_status() {
    let o = order(OrderStatus::Pending, OrderPaymentStatus::Pending, ShippingStatus::Pending);
    let p = payment(&o, PaymentStatus::Initiated);
    let Plan::Apply(t) = plan_payment_event(&o, &p, PaymentEventStatus::Failed, None) else {
      panic!("expected a transition");
    };
    let update = t.order.unwrap();
    assert_eq!(update.next.status, OrderStatus::Pending);
    assert_eq!(update.next.payment_status, OrderPaymentStatus::Failed);
  }

  #[test]
  fn refund_moves_order_to_refunding() {
    let o = order(OrderStatus::Completed, OrderPaymentStatus::Paid, ShippingStatus::Delivered);
    let p = payment(&o, PaymentStatus::Paid);
    let Plan::Apply(t) = plan_payment_event(&o, &p, PaymentEventStatus::Refunded, None) else {
      panic!("expected a transition");
    };
    let update = t.order.unwrap();
    assert_eq!(update.next.status, OrderStatus::Refunding);
    assert_eq!(update.next.payment_status, OrderPaymentStatus::Refunded);
  }

  #[test]
  fn delivery_advances_a_paid_order_to_completed() {
    let o = order(OrderStatus::Paid, OrderPaymentStatus::Paid, ShippingStatus::Preparing);
    let s = shipment(&o, ShippingStatus::Preparing);
    let Plan::Apply(t) = plan_shipment_event(&o, &s, &ShipmentEventStatus::Delivered) else {
      panic!("expected a transition");
    };
    let update = t.order.unwrap();
    assert_eq!(update.next.status, OrderStatus::Completed);
    assert_eq!(update.next.shipping_status, ShippingStatus::Delivered);
    assert_eq!(t.shipment.unwrap().next, ShippingStatus::Delivered);
  }

  #[test]
  fn delivery_of_unpaid_order_leaves_status_alone() {
    let o = order(OrderStatus::Pending, OrderPaymentStatus::Pending, ShippingStatus::Preparing);
    let s = shipment(&o, ShippingStatus::Preparing);
    let Plan::Apply(t) = plan_shipment_event(&o, &s, &ShipmentEventStatus::Delivering) else {
      panic!("expected a transition");
    };
    let update = t.order.unwrap();
    assert_eq!(update.next.status, OrderStatus::Pending);
    assert_eq!(update.next.shipping_status, ShippingStatus::Delivering);
  }

  #[test]
  fn backwards_or_unknown_carrier_events_are_ignored() {
    let o = order(OrderStatus::Shipped, OrderPaymentStatus::Paid, ShippingStatus::Delivered);
    let s = shipment(&o, ShippingStatus::Delivered);
    assert!(matches!(
      plan_shipment_event(&o, &s, &ShipmentEventStatus::Delivering),
      Plan::Ignored(_)
    ));
    assert!(matches!(
      plan_shipment_event(&o, &s, &ShipmentEventStatus::Unknown("exception".into())),
      Plan::Ignored(_)
    ));
    assert!(matches!(
      plan_shipment_event(&o, &s, &ShipmentEventStatus::Delivered),
      Plan::AlreadyApplied
    ));
  }
}
