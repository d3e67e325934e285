use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dedup::{DedupEngine, DedupIndex};
use crate::error::AppError;
use crate::job::{JobOutput, JobResult, JobSpec};
use crate::quality::QualityScorer;
use crate::traits::{ServiceStore, SourceAdapter};
use crate::validate::validate;

/// Runs one job end to end: extract → normalize → validate → filter →
/// score → dedup → persist → commit dedup keys.
///
/// Generic over the store so tests can inject mocks without a database.
pub struct IngestService<S: ServiceStore> {
    adapter: Arc<dyn SourceAdapter>,
    store: S,
    scorer: QualityScorer,
    dedup: DedupEngine,
    index: Arc<Mutex<DedupIndex>>,
    batch_size: usize,
}

impl<S: ServiceStore> IngestService<S> {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        store: S,
        index: Arc<Mutex<DedupIndex>>,
        batch_size: usize,
    ) -> Self {
        Self {
            adapter,
            store,
            scorer: QualityScorer::new(),
            dedup: DedupEngine::new(),
            index,
            batch_size: batch_size.max(1),
        }
    }

    pub fn with_dedup_engine(mut self, engine: DedupEngine) -> Self {
        self.dedup = engine;
        self
    }

    pub async fn run(&self, spec: &JobSpec) -> Result<JobOutput, AppError> {
        let started = Instant::now();
        let source = self.adapter.name().to_string();
        let mut result = JobResult::default();

        // 1. Extract
        let mut raw = self.adapter.extract(spec.limit, &spec.config).await?;
        raw.truncate(spec.limit);
        result.records_extracted = raw.len();
        tracing::info!(%source, records = raw.len(), "Extracted raw records");

        // 2. Normalize, validate, filter, score
        let mut services = Vec::with_capacity(raw.len());
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut score_sum = 0.0;
        let mut scored = 0usize;

        for batch in raw.chunks(self.batch_size) {
            for record in batch {
                let Some(mut service) = self.adapter.normalize(record) else {
                    result.invalid_dropped += 1;
                    continue;
                };

                let report = validate(&service);
                if !report.valid {
                    tracing::debug!(
                        %source,
                        external_id = %service.external_id,
                        errors = ?report.errors,
                        "Dropping invalid record"
                    );
                    result.invalid_dropped += 1;
                    continue;
                }

                if !spec.filters.matches(&service) {
                    result.filtered_out += 1;
                    continue;
                }

                if !seen.insert(service.id) {
                    result.repeated_dropped += 1;
                    continue;
                }

                if spec.needs_scoring() {
                    let score = self.scorer.score(&service);
                    service.data_source.set_quality_score(score);
                    if let Some(min) = spec.min_quality_score
                        && score < min
                    {
                        result.below_quality_dropped += 1;
                        continue;
                    }
                    score_sum += score;
                    scored += 1;
                }

                services.push(service);
            }
        }

        if scored > 0 {
            result.average_quality_score = Some(score_sum / scored as f64);
        }

        // 3. Dedup. The index stays locked until the job's keys are
        // committed, so a job that fails to persist leaves nothing behind.
        let mut index = if spec.enable_deduplication {
            Some(self.index.lock().await)
        } else {
            None
        };
        let duplicate_pairs = match &index {
            Some(index) => {
                let report = index.find_duplicates(&self.dedup, &services);
                tracing::debug!(%source, comparisons = report.comparisons, "Dedup pass");
                report.duplicate_pairs
            }
            None => Vec::new(),
        };
        result.duplicates_found = duplicate_pairs.len();

        // 4. Persist
        if spec.store_results {
            for batch in services.chunks(self.batch_size) {
                result.services_stored += self.store.upsert_services(batch).await?;
            }
            if !duplicate_pairs.is_empty() {
                self.store.save_duplicate_pairs(&duplicate_pairs).await?;
            }
        }

        // 5. Commit
        if let Some(index) = index.as_mut() {
            index.insert(&services);
        }
        drop(index);

        result.services_processed = services.len();
        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            %source,
            processed = result.services_processed,
            invalid = result.invalid_dropped,
            filtered = result.filtered_out,
            low_quality = result.below_quality_dropped,
            duplicates = result.duplicates_found,
            stored = result.services_stored,
            "Ingestion complete"
        );

        Ok(JobOutput {
            result,
            services,
            duplicate_pairs,
        })
    }
}
