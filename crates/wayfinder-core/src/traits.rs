use std::future::Future;

use async_trait::async_trait;

use crate::error::AppError;
use crate::job::ExtractConfig;
use crate::mapping::SourceDescriptor;
use crate::models::{DuplicatePair, RawRecord, Service};

/// Fetches a response body from a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// A per-source plugin that extracts raw records and maps them into the
/// canonical schema.
///
/// Adapters are held by the pipeline as `Arc<dyn SourceAdapter>`, so the
/// trait stays object safe.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key, e.g. `"acnc"`.
    fn name(&self) -> &str;

    fn descriptor(&self) -> &SourceDescriptor;

    /// Pull up to `limit` raw records from upstream.
    ///
    /// Transient upstream failures shorten the result instead of failing it.
    /// A response that cannot be parsed is an error.
    async fn extract(&self, limit: usize, config: &ExtractConfig)
    -> Result<Vec<RawRecord>, AppError>;

    /// Map one raw record. `None` means the record is unmappable.
    fn normalize(&self, raw: &RawRecord) -> Option<Service>;

    /// Release any held resources. Called once on pipeline cleanup.
    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Persists processed services and duplicate signals.
pub trait ServiceStore: Send + Sync + Clone {
    /// Insert or update services by id. Returns the number written.
    fn upsert_services(
        &self,
        services: &[Service],
    ) -> impl Future<Output = Result<usize, AppError>> + Send;

    /// Record duplicate pairs. Returns the number written.
    fn save_duplicate_pairs(
        &self,
        pairs: &[DuplicatePair],
    ) -> impl Future<Output = Result<usize, AppError>> + Send;
}

/// A no-op ServiceStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl ServiceStore for NullStore {
    async fn upsert_services(&self, _services: &[Service]) -> Result<usize, AppError> {
        Ok(0)
    }

    async fn save_duplicate_pairs(&self, _pairs: &[DuplicatePair]) -> Result<usize, AppError> {
        Ok(0)
    }
}
