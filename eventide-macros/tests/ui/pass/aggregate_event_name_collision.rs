extern crate self as eventide;

#[path = "../common.rs"]
mod support;

pub use support::{aggregate, codec, event, registry};

use aggregate::{AggregateRoot, Apply};
use event::EventSet;
use eventide_macros::Aggregate;

pub mod billing {
    use eventide_macros::DomainEvent;
    use serde::Serialize;

    #[derive(Clone, Debug, Serialize, DomainEvent)]
    #[event(reason = "billing-created")]
    pub struct Created;
}

pub mod shipping {
    use eventide_macros::DomainEvent;
    use serde::Serialize;

    #[derive(Clone, Debug, Serialize, DomainEvent)]
    #[event(reason = "shipping-created")]
    pub struct Created;
}

#[derive(Default, Aggregate)]
#[aggregate(events(billing::Created, shipping::Created))]
pub struct Order {
    root: AggregateRoot<OrderEvent>,
}

impl Apply<billing::Created> for Order {
    fn apply(&mut self, _event: &billing::Created) {}
}

impl Apply<shipping::Created> for Order {
    fn apply(&mut self, _event: &shipping::Created) {}
}

fn main() {
    let billing = OrderEvent::BillingCreated(billing::Created);
    let shipping = OrderEvent::ShippingCreated(shipping::Created);
    assert_eq!(billing.reason(), "billing-created");
    assert_eq!(shipping.reason(), "shipping-created");
}
