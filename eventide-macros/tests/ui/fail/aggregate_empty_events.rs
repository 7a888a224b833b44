#![allow(dead_code)]

use eventide_macros::Aggregate;

#[derive(Aggregate)]
#[aggregate(events())]
pub struct Account {}

fn main() {}
