//! Service layer
//!
//! Services hold the business logic of the engine: resolving plugins by
//! identifier, running the fetch pipeline and delivering run reports.
//!
//! Services are trait-based so the executor can be driven with alternative
//! pipelines and sinks.

mod capabilities;
mod pipeline;
mod reports;

pub use capabilities::CapabilityRegistry;

// Re-export traits
pub use pipeline::PipelineService;
pub use reports::ReportSink;

// Re-export implementations
pub use pipeline::StandardPipelineService;
pub use reports::{ChannelReportSink, JsonLinesReportSink};
