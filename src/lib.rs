#[macro_use] extern crate rust_decimal_macros;

#[macro_use] pub mod core;
#[macro_use] pub mod types;
pub mod analysis;
pub mod calendar;
pub mod config;
pub mod formatting;
pub mod portfolio;
pub mod quotes;
pub mod rebalancing;
pub mod simulation;
pub mod taxes;
pub mod time;
pub mod util;
