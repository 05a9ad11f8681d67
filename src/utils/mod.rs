//! Binary-side helpers.

pub mod logger;
