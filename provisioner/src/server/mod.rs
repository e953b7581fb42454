//! HTTP control surface

pub mod handlers;
pub mod serve;

pub use serve::router;
