//! Photo source backends.

pub mod http;
pub mod scripted;
