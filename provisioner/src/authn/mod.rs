//! Cloud API credentials

pub mod token;

pub use token::{AccessTokenSource, StaticToken, TokenFile};
