//! Deployment module

pub mod fsm;
pub mod health;
pub mod locks;
pub mod pipeline;
pub mod steps;

pub use fsm::{StatusEvent, StatusFsm};
pub use health::{ConsoleHealthProbe, HealthProbe};
pub use locks::KeyedLocks;
pub use pipeline::{DeployReport, Pipeline, PipelineSettings};
pub use steps::{Step, StepOutcome, StepReport};
