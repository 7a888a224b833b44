extern crate self as eventide;

#[path = "../common.rs"]
mod support;

pub use support::{aggregate, codec, event, registry};

use aggregate::{AggregateRoot, Apply};
use eventide_macros::{Aggregate, DomainEvent};
use serde::Serialize;

#[derive(Clone, Debug, Serialize, DomainEvent)]
pub struct ItemAdded {
    pub sku: String,
}

#[derive(Aggregate)]
#[aggregate(kind = "basket", events(ItemAdded), root = "state")]
pub struct Basket<'a, T>
where
    T: Send,
{
    state: AggregateRoot<BasketEvent>,
    marker: std::marker::PhantomData<&'a T>,
}

impl<'a, T: Send> Apply<ItemAdded> for Basket<'a, T> {
    fn apply(&mut self, _event: &ItemAdded) {}
}

fn main() {
    assert_eq!(<Basket<'static, u8> as aggregate::Aggregate>::TYPE, "basket");
}
