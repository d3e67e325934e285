//! Generic paginated JSON API adapter for council and community directories.

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

/// How the API pages its results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paging {
    /// Query parameter carrying the page number.
    pub page_param: String,
    /// Query parameter carrying the page size, if the API accepts one.
    pub size_param: Option<String>,
    pub first_page: u32,
    pub page_size: usize,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page_param: "page".into(),
            size_param: Some("per_page".into()),
            first_page: 1,
            page_size: 50,
        }
    }
}

/// Reads records from a JSON endpoint.
///
/// Records live at `records_path` (dot separated, empty for a top-level
/// array). Without [`Paging`] the endpoint is fetched once.
#[derive(Clone)]
pub struct JsonApiAdapter<F: Fetcher> {
    fetcher: F,
    url: String,
    records_path: Vec<String>,
    paging: Option<Paging>,
    descriptor: SourceDescriptor,
    mapping: FieldMapping,
    retry: RetryPolicy,
}

impl<F: Fetcher> JsonApiAdapter<F> {
    pub fn new(name: impl Into<String>, fetcher: F, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
            records_path: Vec::new(),
            paging: None,
            descriptor: SourceDescriptor::new(name, "api", "json_api"),
            mapping: FieldMapping::standard(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_records_path(mut self, path: &str) -> Self {
        self.records_path = path
            .split('.')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = Some(paging);
        self
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn page_url(&self, page: Option<(u32, usize)>, config: &ExtractConfig) -> Result<String, AppError> {
        let mut url = Url::parse(&self.url).map_err(|e| {
            AppError::ConfigError(format!("Invalid JSON API URL '{}': {e}", self.url))
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let (Some(paging), Some((number, size))) = (&self.paging, page) {
                query.append_pair(&paging.page_param, &number.to_string());
                if let Some(size_param) = &paging.size_param {
                    query.append_pair(size_param, &size.to_string());
                }
            }
            if let Some(q) = config.query.as_deref() {
                query.append_pair("q", q);
            }
            for (key, value) in &config.params {
                query.append_pair(key, value);
            }
        }
        // Don't leave a dangling `?` on endpoints without parameters.
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url.into())
    }

    fn records_at_path(&self, mut body: Value) -> Result<Vec<Value>, AppError> {
        let mut node = &mut body;
        for segment in &self.records_path {
            node = node.get_mut(segment.as_str()).ok_or_else(|| self.malformed(format!(
                "missing '{}' in response",
                self.records_path.join(".")
            )))?;
        }
        match node.take() {
            Value::Array(items) => Ok(items),
            _ => Err(self.malformed(format!(
                "'{}' is not an array",
                if self.records_path.is_empty() {
                    "<root>".to_string()
                } else {
                    self.records_path.join(".")
                }
            ))),
        }
    }

    fn malformed(&self, message: String) -> AppError {
        AppError::MalformedResponse {
            source_name: self.descriptor.source_name.clone(),
            message,
        }
    }
}

#[async_trait]
impl<F: Fetcher + 'static> SourceAdapter for JsonApiAdapter<F> {
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
        let Some(paging) = &self.paging else {
            let url = self.page_url(None, config)?;
            let Some(body) = fetch_json_page(&self.fetcher, &url, &self.retry, self.name()).await?
            else {
                return Ok(Vec::new());
            };
            let mut records = object_records(self.records_at_path(body)?, self.name());
            records.truncate(limit);
            return Ok(records);
        };

        let page_size = config.page_size.unwrap_or(paging.page_size).max(1);
        let mut records = Vec::new();
        let mut page = paging.first_page;

        while records.len() < limit {
            let url = self.page_url(Some((page, page_size)), config)?;
            tracing::debug!(source = %self.name(), %url, "Fetching JSON API page");

            let Some(body) = fetch_json_page(&self.fetcher, &url, &self.retry, self.name()).await?
            else {
                break;
            };
            let items = self.records_at_path(body)?;
            let returned = items.len();
            records.extend(object_records(items, self.name()));

            if returned < page_size {
                break;
            }
            page += 1;
        }

        records.truncate(limit);
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

    fn services(start: usize, count: usize) -> Vec<Value> {
        (start..start + count)
            .map(|i| json!({"service_id": i, "service_name": format!("Community Service {i}")}))
            .collect()
    }

    #[tokio::test]
    async fn single_request_with_top_level_array() {
        let fetcher = MockFetcher::new(&Value::Array(services(0, 3)).to_string());
        let api = JsonApiAdapter::new("council", fetcher.clone(), "https://api.council.example/services");

        let records = api.extract(2, &ExtractConfig::default()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(fetcher.requested(), vec!["https://api.council.example/services".to_string()]);
    }

    #[tokio::test]
    async fn follows_records_path_and_pages() {
        let fetcher = MockFetcher::with_responses(vec![
            Ok(json!({"data": {"items": services(0, 2)}}).to_string()),
            Ok(json!({"data": {"items": services(2, 1)}}).to_string()),
        ]);
        let api = JsonApiAdapter::new("council", fetcher.clone(), "https://api.council.example/v2/services")
            .with_records_path("data.items")
            .with_paging(Paging {
                page_size: 2,
                ..Paging::default()
            });

        let records = api.extract(10, &ExtractConfig::default()).await.unwrap();

        assert_eq!(records.len(), 3);
        let urls = fetcher.requested();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("page=1") && urls[0].contains("per_page=2"));
        assert!(urls[1].contains("page=2"));
    }

    #[tokio::test]
    async fn missing_records_path_is_malformed() {
        let fetcher = MockFetcher::new(r#"{"meta": {"count": 0}}"#);
        let api = JsonApiAdapter::new("council", fetcher, "https://api.council.example/services")
            .with_records_path("data");

        let err = api.extract(10, &ExtractConfig::default()).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn failed_page_keeps_earlier_records() {
        let fetcher = MockFetcher::with_responses(vec![
            Ok(json!({"results": services(0, 2)}).to_string()),
            Err(AppError::HttpError("HTTP 502 for x".into())),
            Err(AppError::HttpError("HTTP 502 for x".into())),
        ]);
        let api = JsonApiAdapter::new("community", fetcher, "https://directory.example.org/api")
            .with_records_path("results")
            .with_paging(Paging {
                page_size: 2,
                ..Paging::default()
            })
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));

        let records = api.extract(10, &ExtractConfig::default()).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn normalizes_alternate_key_spellings() {
        let api = JsonApiAdapter::new("council", MockFetcher::new("{}"), "https://api.council.example");
        let raw = match json!({
            "service_id": 12,
            "service_name": "Men's Shed",
            "organisation": "Rotary",
            "latitude": "not a number",
            "longitude": 153.0,
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let service = api.normalize(&raw).unwrap();
        assert_eq!(service.external_id, "12");
        assert_eq!(service.name, "Men's Shed");
        assert!(service.location.coordinates.is_none());
    }
}
