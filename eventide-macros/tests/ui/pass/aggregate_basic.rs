extern crate self as eventide;

#[path = "../common.rs"]
mod support;

pub use support::{aggregate, codec, event, registry};

use aggregate::{Aggregate, AggregateRoot, Apply};
use event::{Event, EventSet};
use eventide_macros::{Aggregate, DomainEvent};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize, DomainEvent)]
pub struct FundsDeposited {
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, DomainEvent)]
#[event(reason = "withdrawn")]
pub struct FundsWithdrawn {
    pub amount: i64,
}

#[derive(Default, Aggregate)]
#[aggregate(events(FundsDeposited, FundsWithdrawn), derives(PartialEq))]
pub struct Account {
    root: AggregateRoot<AccountEvent>,
    balance: i64,
}

impl Apply<FundsDeposited> for Account {
    fn apply(&mut self, event: &FundsDeposited) {
        self.balance += event.amount;
    }
}

impl Apply<FundsWithdrawn> for Account {
    fn apply(&mut self, event: &FundsWithdrawn) {
        self.balance -= event.amount;
    }
}

fn main() {
    assert_eq!(Account::TYPE, "account");

    let deposited: AccountEvent = FundsDeposited { amount: 10 }.into();
    assert_eq!(deposited.reason(), "funds-deposited");
    let withdrawn = AccountEvent::from(FundsWithdrawn { amount: 3 });
    assert_eq!(withdrawn.reason(), "withdrawn");

    let mut account = Account::default();
    account.transition(&Event { data: deposited.clone() });
    account.transition(&Event { data: withdrawn });
    assert_eq!(account.balance, 7);
    assert!(account.root().pending.is_empty());

    let payload = deposited.to_payload();
    assert_eq!(payload.reason(), "funds-deposited");
    assert_eq!(AccountEvent::from_payload(payload).ok(), Some(deposited));

    let mut registrar = registry::Registrar::<'_, AccountEvent, codec::Json>::new();
    AccountEvent::register(&mut registrar);
    assert_eq!(registrar.reasons, vec!["funds-deposited", "withdrawn"]);
}
