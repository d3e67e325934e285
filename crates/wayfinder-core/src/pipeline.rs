//! Job orchestration: admission, bounded queueing, concurrency limits,
//! lifecycle events and shutdown.
//!
//! Every accepted job gets its own task. Tasks wait on a fair semaphore for
//! one of `max_concurrent_jobs` slots, so jobs start in admission order.
//! Callers await their own job through [`JobHandle::wait`] and can observe
//! every job through [`PipelineManager::subscribe`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{Semaphore, broadcast, oneshot};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::dedup::{DedupConfig, DedupEngine, DedupIndex};
use crate::error::AppError;
use crate::ingest::IngestService;
use crate::job::{Job, JobOutput, JobResult, JobSpec, JobStatus};
use crate::traits::{ServiceStore, SourceAdapter};

const EVENT_CAPACITY: usize = 256;

/// What a caller eventually receives for its job.
pub type JobOutcome = Result<JobOutput, AppError>;

/// Pipeline-wide limits.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub max_concurrent_jobs: usize,
    /// Records processed per step and written per store call.
    pub batch_size: usize,
    /// Jobs allowed to wait for a slot before `create_job` rejects.
    pub queue_capacity: usize,
    /// Applied to jobs that don't set their own threshold.
    pub min_quality_score: Option<f64>,
    /// Thresholds for the shared dedup engine.
    pub dedup: DedupConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            batch_size: 100,
            queue_capacity: 64,
            min_quality_score: None,
            dedup: DedupConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read configuration from environment variables.
    ///
    /// - `WAYFINDER_MAX_CONCURRENT_JOBS` (defaults to 3)
    /// - `WAYFINDER_BATCH_SIZE` (defaults to 100)
    /// - `WAYFINDER_QUEUE_CAPACITY` (defaults to 64)
    /// - `WAYFINDER_MIN_QUALITY_SCORE` (optional, within [0, 1])
    /// - `WAYFINDER_DEDUP_BLOCKING_ABOVE` (defaults to 5000)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let config = Self {
            max_concurrent_jobs: positive(
                &lookup,
                "WAYFINDER_MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
            )?,
            batch_size: positive(&lookup, "WAYFINDER_BATCH_SIZE", defaults.batch_size)?,
            queue_capacity: positive(&lookup, "WAYFINDER_QUEUE_CAPACITY", defaults.queue_capacity)?,
            min_quality_score: match lookup("WAYFINDER_MIN_QUALITY_SCORE") {
                None => None,
                Some(raw) => Some(raw.trim().parse::<f64>().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid WAYFINDER_MIN_QUALITY_SCORE '{raw}': must be a number"
                    ))
                })?),
            },
            dedup: defaults.dedup.with_initial_blocking_above(positive(
                &lookup,
                "WAYFINDER_DEDUP_BLOCKING_ABOVE",
                defaults.dedup.initial_blocking_above,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_min_quality_score(mut self, score: f64) -> Self {
        self.min_quality_score = Some(score);
        self
    }

    pub fn with_dedup_config(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_concurrent_jobs == 0 {
            return Err(AppError::ConfigError(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AppError::ConfigError("batch_size must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::ConfigError(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if let Some(score) = self.min_quality_score
            && !(0.0..=1.0).contains(&score)
        {
            return Err(AppError::ConfigError(format!(
                "min_quality_score must be within [0, 1], got {score}"
            )));
        }
        Ok(())
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: usize,
) -> Result<usize, AppError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let parsed: usize = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a positive integer"
        ))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(parsed)
}

/// Adapters by source name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn with(mut self, adapter: impl SourceAdapter + 'static) -> Self {
        self.register(Arc::new(adapter));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Registered source names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    fn all(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.adapters.values()
    }
}

/// Lifecycle notifications. Every event carries its job id.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    JobQueued { job_id: Uuid, source: String },
    JobStarted { job_id: Uuid, source: String },
    JobCompleted { job_id: Uuid, result: JobResult },
    JobFailed { job_id: Uuid, error: AppError },
}

impl PipelineEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            PipelineEvent::JobQueued { job_id, .. }
            | PipelineEvent::JobStarted { job_id, .. }
            | PipelineEvent::JobCompleted { job_id, .. }
            | PipelineEvent::JobFailed { job_id, .. } => *job_id,
        }
    }

    fn log(&self) {
        match self {
            PipelineEvent::JobQueued { job_id, source } => {
                tracing::info!(%job_id, %source, "Job queued");
            }
            PipelineEvent::JobStarted { job_id, source } => {
                tracing::info!(%job_id, %source, "Job started");
            }
            PipelineEvent::JobCompleted { job_id, result } => {
                tracing::info!(
                    %job_id,
                    processed = result.services_processed,
                    duplicates = result.duplicates_found,
                    duration_ms = result.duration_ms,
                    "Job completed"
                );
            }
            PipelineEvent::JobFailed { job_id, error } => {
                tracing::warn!(%job_id, %error, "Job failed");
            }
        }
    }
}

/// Cumulative counters since the manager was built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub services_processed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// Mean processing time of completed jobs.
    pub average_processing_time_ms: f64,
}

/// The caller's end of a job: its id and the one-shot result.
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> JobOutcome {
        self.rx.await.unwrap_or(Err(AppError::Cancelled))
    }
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

#[derive(Default)]
struct JobTable {
    entries: HashMap<Uuid, JobEntry>,
    /// Creation order, for listing.
    order: Vec<Uuid>,
    queued: usize,
}

#[derive(Default)]
struct StatsAccum {
    services_processed: u64,
    jobs_completed: u64,
    jobs_failed: u64,
    total_processing_ms: u64,
}

struct Shared<S> {
    config: PipelineConfig,
    adapters: AdapterRegistry,
    store: S,
    dedup: DedupEngine,
    index: Arc<tokio::sync::Mutex<DedupIndex>>,
    jobs: Mutex<JobTable>,
    stats: Mutex<StatsAccum>,
    events: broadcast::Sender<PipelineEvent>,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    /// Stops admission and fails queued jobs.
    shutdown: CancellationToken,
    /// Parent of every per-job token; cancelled when the manager is dropped.
    root: CancellationToken,
}

impl<S> Shared<S> {
    fn jobs(&self) -> MutexGuard<'_, JobTable> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stats(&self) -> MutexGuard<'_, StatsAccum> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: PipelineEvent) {
        event.log();
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Returns false if the job is already terminal.
    fn mark_running(&self, job_id: Uuid) -> bool {
        let mut table = self.jobs();
        let JobTable {
            entries, queued, ..
        } = &mut *table;
        match entries.get_mut(&job_id) {
            Some(entry) if entry.job.status == JobStatus::Queued => {
                entry.job.mark_running();
                *queued -= 1;
                true
            }
            _ => false,
        }
    }

    /// Record the terminal state, update stats, emit, and hand the outcome
    /// to the waiting caller. A job only ever finishes once.
    fn finish(&self, job_id: Uuid, outcome: JobOutcome, tx: oneshot::Sender<JobOutcome>) {
        let transitioned = {
            let mut table = self.jobs();
            let JobTable {
                entries, queued, ..
            } = &mut *table;
            match entries.get_mut(&job_id) {
                Some(entry) => {
                    let was_queued = entry.job.status == JobStatus::Queued;
                    let changed = match &outcome {
                        Ok(output) => entry.job.mark_completed(output.result.clone()),
                        Err(e) => entry.job.mark_failed(e),
                    };
                    if changed && was_queued {
                        *queued -= 1;
                    }
                    changed
                }
                None => false,
            }
        };
        if !transitioned {
            return;
        }

        {
            let mut stats = self.stats();
            match &outcome {
                Ok(output) => {
                    stats.jobs_completed += 1;
                    stats.services_processed += output.result.services_processed as u64;
                    stats.total_processing_ms += output.result.duration_ms;
                }
                Err(_) => stats.jobs_failed += 1,
            }
        }

        let event = match &outcome {
            Ok(output) => PipelineEvent::JobCompleted {
                job_id,
                result: output.result.clone(),
            },
            Err(error) => PipelineEvent::JobFailed {
                job_id,
                error: error.clone(),
            },
        };
        self.emit(event);

        // The caller may have dropped its handle.
        let _ = tx.send(outcome);
    }
}

/// Orchestrates ingestion jobs against registered source adapters.
pub struct PipelineManager<S: ServiceStore + 'static> {
    shared: Arc<Shared<S>>,
}

impl<S: ServiceStore + 'static> PipelineManager<S> {
    pub fn new(config: PipelineConfig, adapters: AdapterRegistry, store: S) -> Result<Self, AppError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Ok(Self {
            shared: Arc::new(Shared {
                dedup: DedupEngine::with_config(config.dedup),
                config,
                adapters,
                store,
                index: Arc::new(tokio::sync::Mutex::new(DedupIndex::new())),
                jobs: Mutex::new(JobTable::default()),
                stats: Mutex::new(StatsAccum::default()),
                events,
                slots,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                root: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn sources(&self) -> Vec<String> {
        self.shared.adapters.names()
    }

    /// Validate and enqueue a job. Must be called within a tokio runtime.
    ///
    /// Rejections happen here, synchronously: nothing is queued and no
    /// event is emitted.
    pub fn create_job(&self, mut spec: JobSpec) -> Result<JobHandle, AppError> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(AppError::ShuttingDown);
        }

        spec.validate()?;
        let adapter = shared.adapters.get(&spec.source).ok_or_else(|| {
            AppError::ConfigError(format!(
                "Unknown source '{}'. Available: {}",
                spec.source,
                shared.adapters.names().join(", ")
            ))
        })?;
        if spec.min_quality_score.is_none() {
            spec.min_quality_score = shared.config.min_quality_score;
        }

        let job = Job::new(&spec);
        let job_id = job.id;
        let cancel = shared.root.child_token();
        {
            let mut table = shared.jobs();
            if table.queued >= shared.config.queue_capacity {
                return Err(AppError::QueueFull(shared.config.queue_capacity));
            }
            table.queued += 1;
            table.order.push(job_id);
            table.entries.insert(
                job_id,
                JobEntry {
                    job,
                    cancel: cancel.clone(),
                },
            );
        }

        let (tx, rx) = oneshot::channel();
        shared.emit(PipelineEvent::JobQueued {
            job_id,
            source: spec.source.clone(),
        });
        shared
            .tracker
            .spawn(run_job(shared.clone(), job_id, spec, adapter, cancel, tx));

        Ok(JobHandle { id: job_id, rx })
    }

    /// Receive every lifecycle event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    pub fn get_stats(&self) -> PipelineStats {
        let stats = self.shared.stats();
        PipelineStats {
            services_processed: stats.services_processed,
            jobs_completed: stats.jobs_completed,
            jobs_failed: stats.jobs_failed,
            average_processing_time_ms: if stats.jobs_completed == 0 {
                0.0
            } else {
                stats.total_processing_ms as f64 / stats.jobs_completed as f64
            },
        }
    }

    pub fn get_job(&self, id: Uuid) -> Option<Job> {
        self.shared.jobs().entries.get(&id).map(|e| e.job.clone())
    }

    /// Snapshot of every job, oldest first.
    pub fn list_jobs(&self) -> Vec<Job> {
        let table = self.shared.jobs();
        table
            .order
            .iter()
            .filter_map(|id| table.entries.get(id))
            .map(|e| e.job.clone())
            .collect()
    }

    /// Cancel a queued or running job. Returns false if it had already
    /// finished. The job reports failure with [`AppError::Cancelled`].
    pub fn cancel_job(&self, id: Uuid) -> Result<bool, AppError> {
        let table = self.shared.jobs();
        let entry = table.entries.get(&id).ok_or(AppError::JobNotFound(id))?;
        if entry.job.status.is_terminal() {
            return Ok(false);
        }
        tracing::info!(job_id = %id, "Cancelling job");
        entry.cancel.cancel();
        Ok(true)
    }

    /// Number of services in the cross-job dedup index.
    pub async fn indexed_services(&self) -> usize {
        self.shared.index.lock().await.len()
    }

    /// Stop admitting jobs, fail every queued job, wait for running jobs,
    /// close all adapters and clear the dedup index.
    pub async fn cleanup(&self) {
        let shared = &self.shared;
        tracing::info!("Pipeline shutting down");
        shared.shutdown.cancel();
        shared.tracker.close();
        shared.tracker.wait().await;

        for adapter in shared.adapters.all() {
            if let Err(e) = adapter.close().await {
                tracing::warn!(source = %adapter.name(), error = %e, "Failed to close adapter");
            }
        }

        shared.index.lock().await.clear();
        tracing::info!("Pipeline stopped");
    }
}

impl<S: ServiceStore + 'static> Drop for PipelineManager<S> {
    fn drop(&mut self) {
        self.shared.root.cancel();
    }
}

async fn run_job<S: ServiceStore + 'static>(
    shared: Arc<Shared<S>>,
    job_id: Uuid,
    spec: JobSpec,
    adapter: Arc<dyn SourceAdapter>,
    cancel: CancellationToken,
    tx: oneshot::Sender<JobOutcome>,
) {
    let permit = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            shared.finish(job_id, Err(AppError::Cancelled), tx);
            return;
        }
        () = shared.shutdown.cancelled() => {
            shared.finish(job_id, Err(AppError::ShuttingDown), tx);
            return;
        }
        permit = shared.slots.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                shared.finish(job_id, Err(AppError::ShuttingDown), tx);
                return;
            }
        },
    };

    if !shared.mark_running(job_id) {
        return;
    }
    shared.emit(PipelineEvent::JobStarted {
        job_id,
        source: spec.source.clone(),
    });

    let service = IngestService::new(
        adapter,
        shared.store.clone(),
        shared.index.clone(),
        shared.config.batch_size,
    )
    .with_dedup_engine(shared.dedup.clone());

    // A separate task, so a panicking adapter fails its job instead of
    // unwinding past `finish`.
    let source = spec.source.clone();
    let mut task = tokio::spawn(async move { service.run(&spec).await });
    let joined = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        joined = &mut task => Some(joined),
    };
    let outcome = match joined {
        Some(Ok(outcome)) => outcome,
        Some(Err(e)) => Err(task_failure(&source, e)),
        None => {
            task.abort();
            // The job must not hold the index or write to the store once
            // it has reported.
            let _ = task.await;
            Err(AppError::Cancelled)
        }
    };
    drop(permit);

    shared.finish(job_id, outcome, tx);
}

fn task_failure(source: &str, err: JoinError) -> AppError {
    if !err.is_panic() {
        return AppError::Cancelled;
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    tracing::error!(%source, panic = %detail, "Job task panicked");
    AppError::AdapterError {
        source_name: source.to_string(),
        message: format!("job task panicked: {detail}"),
    }
}
