//! Builds the adapter registry from runtime settings.

use std::path::PathBuf;
use std::time::Duration;

use wayfinder_core::pipeline::AdapterRegistry;
use wayfinder_core::throttle::{RetryPolicy, ThrottleConfig, ThrottledFetcher};
use wayfinder_core::traits::Fetcher;

use crate::acnc::{ACNC_RESOURCE_ID, AcncAdapter};
use crate::ckan::{CkanAdapter, DATA_GOV_AU};
use crate::csv_file::CsvFileAdapter;
use crate::json_api::{JsonApiAdapter, Paging};

/// Which sources to register and how to reach them.
///
/// `acnc` is always available. `ckan`, `json-api` and `csv` are only
/// registered when their location is configured.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub ckan_base_url: String,
    pub ckan_resource_id: Option<String>,
    pub acnc_resource_id: String,
    pub json_api_url: Option<String>,
    pub json_api_records_path: String,
    /// Page query parameter; unset means the endpoint is not paginated.
    pub json_api_page_param: Option<String>,
    pub csv_path: Option<PathBuf>,
    pub request_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            ckan_base_url: DATA_GOV_AU.to_string(),
            ckan_resource_id: None,
            acnc_resource_id: ACNC_RESOURCE_ID.to_string(),
            json_api_url: None,
            json_api_records_path: String::new(),
            json_api_page_param: None,
            csv_path: None,
            request_delay: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

impl SourceSettings {
    pub fn with_ckan_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.ckan_resource_id = Some(resource_id.into());
        self
    }

    pub fn with_json_api(mut self, url: impl Into<String>, records_path: impl Into<String>) -> Self {
        self.json_api_url = Some(url.into());
        self.json_api_records_path = records_path.into();
        self
    }

    pub fn with_csv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.csv_path = Some(path.into());
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }
}

/// Register every configured adapter. All HTTP adapters share one
/// throttled fetcher, so the per-host gap holds across sources.
pub fn build_registry<F: Fetcher + 'static>(fetcher: F, settings: &SourceSettings) -> AdapterRegistry {
    let fetcher = ThrottledFetcher::new(fetcher, ThrottleConfig::new(settings.request_delay));
    let mut registry = AdapterRegistry::new().with(
        AcncAdapter::with_resource(
            fetcher.clone(),
            settings.ckan_base_url.clone(),
            settings.acnc_resource_id.clone(),
        )
        .with_retry(settings.retry.clone()),
    );

    if let Some(resource_id) = &settings.ckan_resource_id {
        registry = registry.with(
            CkanAdapter::new("ckan", fetcher.clone(), settings.ckan_base_url.clone(), resource_id.clone())
                .with_retry(settings.retry.clone()),
        );
    }

    if let Some(url) = &settings.json_api_url {
        let mut adapter = JsonApiAdapter::new("json-api", fetcher.clone(), url.clone())
            .with_records_path(&settings.json_api_records_path)
            .with_retry(settings.retry.clone());
        if let Some(page_param) = &settings.json_api_page_param {
            adapter = adapter.with_paging(Paging {
                page_param: page_param.clone(),
                ..Paging::default()
            });
        }
        registry = registry.with(adapter);
    }

    if let Some(path) = &settings.csv_path {
        registry = registry.with(CsvFileAdapter::new("csv", path.clone()));
    }

    registry
}
