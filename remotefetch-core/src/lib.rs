//! Remote Fetch Core
//!
//! Core types shared by every layer of the remote fetch system.
//!
//! This crate contains:
//! - Domain types: fetch configurations, artifact changes, run reports
//!   and task snapshots
//!
//! Note: Scheduling and plugin execution live in `remotefetch-engine`.

pub mod domain;
