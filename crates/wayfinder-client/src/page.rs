use serde_json::Value;
use wayfinder_core::error::AppError;
use wayfinder_core::throttle::{RetryPolicy, fetch_with_retry};
use wayfinder_core::traits::Fetcher;

/// Fetch and parse one page of JSON.
///
/// `Ok(None)` means the page could not be fetched after retrying; callers
/// stop paginating and keep what they have. A body that isn't JSON is a
/// [`AppError::MalformedResponse`].
pub(crate) async fn fetch_json_page<F: Fetcher>(
    fetcher: &F,
    url: &str,
    retry: &RetryPolicy,
    source_name: &str,
) -> Result<Option<Value>, AppError> {
    let body = match fetch_with_retry(fetcher, url, retry).await {
        Ok(body) => body,
        Err(e) if e.is_extraction_error() => {
            tracing::warn!(source = %source_name, %url, error = %e, "Giving up on page");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    serde_json::from_str(&body)
        .map(Some)
        .map_err(|e| AppError::MalformedResponse {
            source_name: source_name.to_string(),
            message: format!("invalid JSON from {url}: {e}"),
        })
}

/// Keep object records, skipping anything else an upstream array contains.
pub(crate) fn object_records(items: Vec<Value>, source_name: &str) -> Vec<serde_json::Map<String, Value>> {
    let total = items.len();
    let records: Vec<_> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();
    if records.len() < total {
        tracing::debug!(
            source = %source_name,
            skipped = total - records.len(),
            "Skipped non-object records"
        );
    }
    records
}
