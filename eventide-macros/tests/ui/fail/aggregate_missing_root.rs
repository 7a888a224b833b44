#![allow(dead_code)]

use eventide_macros::Aggregate;

#[derive(Aggregate)]
#[aggregate(events(Opened), root = "state")]
pub struct Account {
    root: u8,
}

fn main() {}
