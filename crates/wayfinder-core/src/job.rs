use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{DuplicatePair, Service};

/// Status of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Adapter-specific extraction options carried by a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Records requested per upstream page. Adapters fall back to their own default.
    pub page_size: Option<usize>,
    /// Free-text query, for sources that support one.
    pub query: Option<String>,
    /// Extra query parameters appended to every upstream request.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ExtractConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Post-normalization record filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilters {
    /// Matches any category or service type, case-insensitively.
    pub category: Option<String>,
    /// Matches state, city or suburb, case-insensitively.
    pub region: Option<String>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
}

impl JobFilters {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.region.is_none()
            && self.min_age.is_none()
            && self.max_age.is_none()
    }

    pub fn matches(&self, service: &Service) -> bool {
        if let Some(category) = self.category.as_deref().map(str::trim)
            && !category.is_empty()
        {
            let hit = service
                .categories
                .iter()
                .chain(service.service_types.iter())
                .any(|c| c.eq_ignore_ascii_case(category));
            if !hit {
                return false;
            }
        }

        if let Some(region) = self.region.as_deref().map(str::trim)
            && !region.is_empty()
        {
            let location = &service.location;
            let hit = [&location.state, &location.city, &location.suburb]
                .into_iter()
                .flatten()
                .any(|v| v.trim().eq_ignore_ascii_case(region));
            if !hit {
                return false;
            }
        }

        if (self.min_age.is_some() || self.max_age.is_some())
            && !service.age_range.overlaps(self.min_age, self.max_age)
        {
            return false;
        }

        true
    }
}

/// Everything needed to run one ingestion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub source: String,
    pub limit: usize,
    pub enable_deduplication: bool,
    pub enable_quality_assessment: bool,
    pub store_results: bool,
    /// Records scoring below this are dropped. Setting it forces scoring.
    pub min_quality_score: Option<f64>,
    pub config: ExtractConfig,
    pub filters: JobFilters,
}

impl JobSpec {
    pub fn new(source: impl Into<String>, limit: usize) -> Self {
        Self {
            source: source.into(),
            limit,
            enable_deduplication: false,
            enable_quality_assessment: false,
            store_results: false,
            min_quality_score: None,
            config: ExtractConfig::default(),
            filters: JobFilters::default(),
        }
    }

    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.enable_deduplication = enabled;
        self
    }

    pub fn with_quality_assessment(mut self, enabled: bool) -> Self {
        self.enable_quality_assessment = enabled;
        self
    }

    pub fn with_store_results(mut self, enabled: bool) -> Self {
        self.store_results = enabled;
        self
    }

    pub fn with_min_quality_score(mut self, score: f64) -> Self {
        self.min_quality_score = Some(score);
        self
    }

    pub fn with_config(mut self, config: ExtractConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_filters(mut self, filters: JobFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Whether records need a quality score for this job.
    pub fn needs_scoring(&self) -> bool {
        self.enable_quality_assessment || self.min_quality_score.is_some()
    }

    /// Check the parts of the spec that don't depend on the adapter registry.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.source.trim().is_empty() {
            return Err(AppError::ConfigError("source is required".into()));
        }
        if self.limit == 0 {
            return Err(AppError::ConfigError("limit must be at least 1".into()));
        }
        if let Some(score) = self.min_quality_score
            && !(0.0..=1.0).contains(&score)
        {
            return Err(AppError::ConfigError(format!(
                "min_quality_score must be within [0, 1], got {score}"
            )));
        }
        if self.config.page_size == Some(0) {
            return Err(AppError::ConfigError("page_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Summary counts for a finished job. This is what the job table keeps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Raw records returned by the adapter.
    pub records_extracted: usize,
    /// Records that survived every stage and were handed to the caller.
    pub services_processed: usize,
    /// Unmappable or schema-invalid records.
    pub invalid_dropped: usize,
    pub filtered_out: usize,
    /// Records whose id was already emitted earlier in the run.
    pub repeated_dropped: usize,
    pub below_quality_dropped: usize,
    pub duplicates_found: usize,
    pub services_stored: usize,
    pub average_quality_score: Option<f64>,
    pub duration_ms: u64,
}

/// Full output of a job, delivered once to the caller that created it.
#[derive(Debug, Clone, Default)]
pub struct JobOutput {
    pub result: JobResult,
    pub services: Vec<Service>,
    pub duplicate_pairs: Vec<DuplicatePair>,
}

/// A job as tracked by the pipeline manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source_name: String,
    pub status: JobStatus,
    pub limit: usize,
    pub config: ExtractConfig,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(spec: &JobSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_name: spec.source.clone(),
            status: JobStatus::Queued,
            limit: spec.limit,
            config: spec.config.clone(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub(crate) fn mark_running(&mut self) {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Move to `completed`. A terminal job is never changed again.
    pub(crate) fn mark_completed(&mut self, result: JobResult) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Move to `failed`. A terminal job is never changed again.
    pub(crate) fn mark_failed(&mut self, error: &AppError) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
        true
    }
}
