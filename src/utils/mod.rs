//! Helper functions

pub mod helpers;

pub use helpers::{current_timestamp_millis, short_address};
