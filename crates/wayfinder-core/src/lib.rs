pub mod dedup;
pub mod error;
pub mod ingest;
pub mod job;
pub mod mapping;
pub mod models;
pub mod pipeline;
pub mod quality;
pub mod store;
pub mod throttle;
pub mod traits;
pub mod validate;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use dedup::{DedupConfig, DedupEngine, DedupIndex, DedupReport};
pub use error::AppError;
pub use job::{ExtractConfig, Job, JobFilters, JobOutput, JobResult, JobSpec, JobStatus};
pub use mapping::{Field, FieldMapping, SourceDescriptor, normalize_record};
pub use models::{DuplicatePair, RawRecord, Service, ServiceStatus, compute_hash};
pub use pipeline::{
    AdapterRegistry, JobHandle, JobOutcome, PipelineConfig, PipelineEvent, PipelineManager,
    PipelineStats,
};
pub use quality::{QualityAssessment, QualityScorer, QualityWeights};
pub use store::MemoryStore;
pub use traits::{Fetcher, NullStore, ServiceStore, SourceAdapter};
pub use validate::{ValidationReport, validate};
