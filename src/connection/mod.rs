//! Connection workflow execution
//!
//! This module handles:
//! - Delivering platform events to a workflow in arrival order
//! - The optional overall timeout and the post-result dismiss delay

mod runner;

pub use runner::{RunOutcome, RunnerConfig, WorkflowRunner};
