#![allow(dead_code)]

use eventide_macros::DomainEvent;

#[derive(DomainEvent)]
#[event(reason = "")]
pub struct Opened;

fn main() {}
