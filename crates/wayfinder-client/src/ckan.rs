//! CKAN `datastore_search` adapter (data.gov.au, data.qld.gov.au and other
//! CKAN portals).

use async_trait::async_trait;
use serde_json::Value;
use url::Url;
use wayfinder_core::error::AppError;
use wayfinder_core::job::ExtractConfig;
use wayfinder_core::mapping::{FieldMapping, SourceDescriptor, normalize_record};
use wayfinder_core::models::{RawRecord, Service};
use wayfinder_core::throttle::RetryPolicy;
use wayfinder_core::traits::{Fetcher, SourceAdapter};

use crate::page::{fetch_json_page, object_records};

/// CKAN base URL of the Australian federal open-data portal.
pub const DATA_GOV_AU: &str = "https://data.gov.au/data";

/// Rows requested per page unless the job overrides it.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Reads rows from one CKAN datastore resource with offset pagination.
#[derive(Clone)]
pub struct CkanAdapter<F: Fetcher> {
    fetcher: F,
    base_url: String,
    resource_id: String,
    descriptor: SourceDescriptor,
    mapping: FieldMapping,
    retry: RetryPolicy,
    page_size: usize,
}

impl<F: Fetcher> CkanAdapter<F> {
    pub fn new(
        name: impl Into<String>,
        fetcher: F,
        base_url: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            resource_id: resource_id.into(),
            descriptor: SourceDescriptor::new(name, "government", "ckan_api"),
            mapping: FieldMapping::standard(),
            retry: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_descriptor(mut self, descriptor: SourceDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn page_url(
        &self,
        offset: usize,
        limit: usize,
        config: &ExtractConfig,
    ) -> Result<String, AppError> {
        let endpoint = format!(
            "{}/api/3/action/datastore_search",
            self.base_url.trim_end_matches('/')
        );
        let mut url = Url::parse(&endpoint).map_err(|e| {
            AppError::ConfigError(format!("Invalid CKAN base URL '{}': {e}", self.base_url))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("resource_id", &self.resource_id)
                .append_pair("limit", &limit.to_string())
                .append_pair("offset", &offset.to_string());
            if let Some(q) = config.query.as_deref() {
                query.append_pair("q", q);
            }
            for (key, value) in &config.params {
                query.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    /// Split a `datastore_search` response into its rows and reported total.
    fn parse_page(&self, mut page: Value) -> Result<(Vec<Value>, Option<u64>), AppError> {
        let source_name = &self.descriptor.source_name;
        if page.get("success").and_then(Value::as_bool) == Some(false) {
            let message = page
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("request was not successful")
                .to_string();
            return Err(AppError::AdapterError {
                source_name: source_name.clone(),
                message,
            });
        }

        let total = page.pointer("/result/total").and_then(Value::as_u64);
        match page.pointer_mut("/result/records").map(Value::take) {
            Some(Value::Array(rows)) => Ok((rows, total)),
            _ => Err(AppError::MalformedResponse {
                source_name: source_name.clone(),
                message: "response has no result.records array".into(),
            }),
        }
    }
}

#[async_trait]
impl<F: Fetcher + 'static> SourceAdapter for CkanAdapter<F> {
    fn name(&self) -> &str {
        &self.descriptor.source_name
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn extract(
        &self,
        limit: usize,
        config: &ExtractConfig,
    ) -> Result<Vec<RawRecord>, AppError> {
        let page_size = config.page_size.unwrap_or(self.page_size).max(1);
        let mut records = Vec::new();
        let mut offset = 0;

        while records.len() < limit {
            let want = page_size.min(limit - records.len());
            let url = self.page_url(offset, want, config)?;
            tracing::debug!(source = %self.name(), %url, "Fetching CKAN page");

            let Some(page) = fetch_json_page(&self.fetcher, &url, &self.retry, self.name()).await?
            else {
                break;
            };
            let (rows, total) = self.parse_page(page)?;
            let returned = rows.len();
            records.extend(object_records(rows, self.name()));
            offset += returned;

            if returned < want || total.is_some_and(|t| offset as u64 >= t) {
                break;
            }
        }

        Ok(records)
    }

    fn normalize(&self, raw: &RawRecord) -> Option<Service> {
        normalize_record(raw, &self.mapping, &self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wayfinder_core::testutil::MockFetcher;

    use super::*;

    fn page(rows: Vec<Value>, total: u64) -> Result<String, AppError> {
        Ok(json!({"success": true, "result": {"records": rows, "total": total}}).to_string())
    }

    fn row(id: u64, name: &str) -> Value {
        json!({"_id": id, "name": name, "organisation": "Brisbane City Council", "suburb": "Fortitude Valley"})
    }

    fn adapter(fetcher: MockFetcher) -> CkanAdapter<MockFetcher> {
        CkanAdapter::new("ckan", fetcher, DATA_GOV_AU, "abc-123")
            .with_page_size(2)
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn paginates_with_offsets_until_limit() {
        let fetcher = MockFetcher::with_responses(vec![
            page(vec![row(1, "Youth Hub"), row(2, "Food Hub")], 10),
            page(vec![row(3, "Legal Hub"), row(4, "Health Hub")], 10),
            page(vec![row(5, "Housing Hub")], 10),
        ]);
        let ckan = adapter(fetcher.clone());

        let records = ckan.extract(5, &ExtractConfig::default()).await.unwrap();

        assert_eq!(records.len(), 5);
        let urls = fetcher.requested();
        assert_eq!(urls.len(), 3);
        assert!(urls[0].starts_with("https://data.gov.au/data/api/3/action/datastore_search?"));
        assert!(urls[0].contains("resource_id=abc-123"));
        assert!(urls[0].contains("offset=0"));
        assert!(urls[1].contains("offset=2"));
        assert!(urls[2].contains("offset=4") && urls[2].contains("limit=1"));
    }

    #[tokio::test]
    async fn stops_at_reported_total() {
        let fetcher = MockFetcher::with_responses(vec![page(
            vec![row(1, "Youth Hub"), row(2, "Food Hub")],
            2,
        )]);
        let ckan = adapter(fetcher.clone());

        let records = ckan.extract(50, &ExtractConfig::default()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(fetcher.requested().len(), 1);
    }

    #[tokio::test]
    async fn query_and_params_are_forwarded() {
        let fetcher = MockFetcher::with_responses(vec![page(vec![], 0)]);
        let ckan = adapter(fetcher.clone());
        let config = ExtractConfig::default()
            .with_query("youth")
            .with_param("distinct", "true");

        ckan.extract(10, &config).await.unwrap();
        let url = &fetcher.requested()[0];
        assert!(url.contains("q=youth"));
        assert!(url.contains("distinct=true"));
    }

    #[tokio::test]
    async fn exhausted_retries_return_partial_records() {
        let fetcher = MockFetcher::with_responses(vec![
            page(vec![row(1, "Youth Hub"), row(2, "Food Hub")], 10),
            Err(AppError::Timeout(30)),
            Err(AppError::Timeout(30)),
        ]);
        let ckan = adapter(fetcher.clone());

        let records = ckan.extract(10, &ExtractConfig::default()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(fetcher.requested().len(), 3);
    }

    #[tokio::test]
    async fn first_page_failure_yields_no_records() {
        let fetcher = MockFetcher::with_error(AppError::HttpError("HTTP 404 for x".into()));
        let records = adapter(fetcher).extract(10, &ExtractConfig::default()).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn invalid_json_is_malformed() {
        let fetcher = MockFetcher::new("<html>maintenance</html>");
        let err = adapter(fetcher)
            .extract(10, &ExtractConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn missing_records_array_is_malformed() {
        let fetcher = MockFetcher::new(r#"{"success": true, "result": {"total": 3}}"#);
        let err = adapter(fetcher)
            .extract(10, &ExtractConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn unsuccessful_response_is_adapter_error() {
        let fetcher = MockFetcher::new(
            r#"{"success": false, "error": {"message": "Resource not found", "__type": "Not Found Error"}}"#,
        );
        let err = adapter(fetcher)
            .extract(10, &ExtractConfig::default())
            .await
            .unwrap_err();
        match err {
            AppError::AdapterError { message, .. } => assert_eq!(message, "Resource not found"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn normalizes_with_standard_mapping() {
        let ckan = adapter(MockFetcher::new("{}"));
        let raw = match row(7, "Valley Youth Hub") {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let service = ckan.normalize(&raw).unwrap();
        assert_eq!(service.external_id, "7");
        assert_eq!(service.source_name, "ckan");
        assert_eq!(service.data_source.extraction_method, "ckan_api");
        assert_eq!(service.location.suburb.as_deref(), Some("Fortitude Valley"));
    }
}
