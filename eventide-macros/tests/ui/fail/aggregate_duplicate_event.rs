#![allow(dead_code)]

use eventide_macros::Aggregate;

#[derive(Aggregate)]
#[aggregate(events(Opened, Opened))]
pub struct Account {}

fn main() {}
