pub mod pipeline;
pub mod scheduler;

pub use pipeline::{EventPipeline, IngestOutcome, PipelineReport, SamplerTriggers};
pub use scheduler::{SamplerScheduler, SchedulerError, SessionStatus};
