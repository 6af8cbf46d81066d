//! Utilities Module
//!
//! Common utilities used across the crate.

mod cache;
pub mod logging;

pub use cache::*;
