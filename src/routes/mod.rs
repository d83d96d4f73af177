//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group.

pub mod health;
pub mod terminal;
