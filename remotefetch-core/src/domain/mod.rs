//! Core domain types
//!
//! These types are shared between the engine (which schedules and executes
//! fetch runs) and the service layer (which persists configurations and
//! audit history).

pub mod artifact;
pub mod component;
pub mod configuration;
pub mod report;
pub mod task;
