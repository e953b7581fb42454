//! Integration tests for clawctl

mod common;
mod test_lifecycle;
mod test_pipeline;
mod test_server;
