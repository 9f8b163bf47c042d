//! Remote fetch engine
//!
//! Periodically pulls configuration artifacts from remote sources and
//! applies the changes to a running server. Each fetch configuration names
//! a repository manager, a config deployer and optional action listeners;
//! the engine resolves them from a [`CapabilityRegistry`](service::CapabilityRegistry),
//! schedules runs with a [`FetchTaskExecutor`](scheduler::FetchTaskExecutor)
//! and reports every run to a [`ReportSink`](service::ReportSink).

pub mod component;
pub mod components;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;
