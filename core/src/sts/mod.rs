//! Security token service
//!
//! Turns a verified workflow identity into an installation access token.

pub mod exchange;
pub mod trust;

pub use exchange::{ExchangeRequest, ExchangeResponse, Handler};
