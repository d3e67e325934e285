//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks use
//! `Arc<Mutex<_>>` for interior mutability so tests can assert on recorded
//! calls. Enabled for downstream crates through the `testutil` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::AppError;
use crate::job::ExtractConfig;
use crate::mapping::{FieldMapping, SourceDescriptor, normalize_record};
use crate::models::{DuplicatePair, RawRecord, Service};
use crate::traits::{Fetcher, ServiceStore, SourceAdapter};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that pops queued responses and records requested URLs.
#[derive(Clone)]
pub struct MockFetcher {
    /// Each call pops the first element. When empty, returns `{}`.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(body: &str) -> Self {
        Self::with_responses(vec![Ok(body.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// URLs fetched so far, in call order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.requested.lock().unwrap().push(url.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("{}".to_string())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockAdapter
// ---------------------------------------------------------------------------

/// Adapter that serves canned raw records through the standard mapping.
#[derive(Clone)]
pub struct MockAdapter {
    descriptor: SourceDescriptor,
    mapping: FieldMapping,
    records: Arc<Mutex<Vec<RawRecord>>>,
    error: Arc<Mutex<Option<AppError>>>,
    delay: Duration,
    panics: bool,
    pub extract_calls: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

impl MockAdapter {
    pub fn new(name: &str, records: Vec<RawRecord>) -> Self {
        Self {
            descriptor: SourceDescriptor::new(name, "api", "mock"),
            mapping: FieldMapping::standard(),
            records: Arc::new(Mutex::new(records)),
            error: Arc::new(Mutex::new(None)),
            delay: Duration::ZERO,
            panics: false,
            extract_calls: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every extract call fails with `error`.
    pub fn with_error(name: &str, error: AppError) -> Self {
        let adapter = Self::new(name, Vec::new());
        *adapter.error.lock().unwrap() = Some(error);
        adapter
    }

    /// Every extract call panics.
    pub fn panicking(name: &str) -> Self {
        Self {
            panics: true,
            ..Self::new(name, Vec::new())
        }
    }

    /// Sleep before returning from extract, to keep a job in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.descriptor.source_name
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn extract(
        &self,
        limit: usize,
        _config: &ExtractConfig,
    ) -> Result<Vec<RawRecord>, AppError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panics {
            panic!("{} adapter lost its upstream", self.name());
        }
        if let Some(e) = self.error.lock().unwrap().clone() {
            return Err(e);
        }
        let records = self.records.lock().unwrap();
        Ok(records.iter().take(limit).cloned().collect())
    }

    fn normalize(&self, raw: &RawRecord) -> Option<Service> {
        normalize_record(raw, &self.mapping, &self.descriptor)
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// Mock store that records writes and can be told to fail.
#[derive(Clone, Default)]
pub struct MockStore {
    pub saved: Arc<Mutex<Vec<Service>>>,
    pub pairs: Arc<Mutex<Vec<DuplicatePair>>>,
    /// Sizes of each `upsert_services` call.
    pub batches: Arc<Mutex<Vec<usize>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_error(error: AppError) -> Self {
        let store = Self::default();
        *store.error.lock().unwrap() = Some(error);
        store
    }
}

impl ServiceStore for MockStore {
    async fn upsert_services(&self, services: &[Service]) -> Result<usize, AppError> {
        if let Some(e) = self.error.lock().unwrap().clone() {
            return Err(e);
        }
        self.batches.lock().unwrap().push(services.len());
        self.saved.lock().unwrap().extend_from_slice(services);
        Ok(services.len())
    }

    async fn save_duplicate_pairs(&self, pairs: &[DuplicatePair]) -> Result<usize, AppError> {
        if let Some(e) = self.error.lock().unwrap().clone() {
            return Err(e);
        }
        self.pairs.lock().unwrap().extend_from_slice(pairs);
        Ok(pairs.len())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A raw record that maps to a valid service.
pub fn raw_service(id: &str, name: &str, org: &str, city: &str, state: &str) -> RawRecord {
    let value = json!({
        "id": id,
        "name": name,
        "organisation": org,
        "city": city,
        "state": state,
        "status": "active",
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => RawRecord::new(),
    }
}

/// `count` distinct, valid raw records.
pub fn raw_services(count: usize) -> Vec<RawRecord> {
    (0..count)
        .map(|i| {
            raw_service(
                &format!("svc-{i}"),
                &format!("Service Number {i:04}"),
                &format!("Provider {i:04}"),
                "Brisbane",
                "QLD",
            )
        })
        .collect()
}
