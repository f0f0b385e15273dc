//! HTTP request handlers.

pub mod health;
pub mod imagery;

pub use health::*;
pub use imagery::*;
