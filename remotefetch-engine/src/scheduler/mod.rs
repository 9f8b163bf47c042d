//! Scheduler layer for the engine
//!
//! Keeps one fetch task per configuration, decides when each is due and
//! dispatches pipeline runs to a bounded pool of workers. Runs of the same
//! configuration never overlap.

pub mod executor;
mod task;

pub use executor::{FetchTaskExecutor, TriggerOutcome};
