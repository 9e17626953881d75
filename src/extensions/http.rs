//! `download_url`: fetches and caches the bytes at a URL, deduplicating
//! concurrent requests for the same resource (SPEC_FULL.md §5.10).

use std::time::SystemTime;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;

use crate::cache_trait::TypedKeyAccess;
use crate::error::{CacheError, CacheResult};
use crate::primitives::RequestCache;

const URL_BYTES_TYPE_TAG: &str = "UrlBytes";

/// Fetches `url` and caches the raw response bytes, acting like
/// `get_or_fetch_object` with the key defaulting to the URL itself.
/// `method` defaults to `GET`. `fetch_always` bypasses the cache lookup (but
/// still populates it, and still dedupes concurrent callers through
/// `request_cache`).
pub async fn download_url<B: TypedKeyAccess>(
    store: &B,
    request_cache: &RequestCache<Option<String>, Vec<u8>>,
    client: &reqwest::Client,
    key: Option<&str>,
    url: &str,
    method: Option<Method>,
    headers: Vec<(String, String)>,
    fetch_always: bool,
    expiration: Option<SystemTime>,
) -> CacheResult<Vec<u8>> {
    let cache_key = key.unwrap_or(url).to_string();

    if !fetch_always {
        if let Ok(bytes) = store.get_typed(URL_BYTES_TYPE_TAG, &cache_key).await {
            return Ok(bytes);
        }
    }

    let client = client.clone();
    let url = url.to_string();
    let method = method.unwrap_or(Method::GET);
    let bytes = request_cache
        .get_or_create(Some(cache_key.clone()), move || async move {
            let header_map = build_header_map(&headers)?;
            let response = client
                .request(method, &url)
                .headers(header_map)
                .send()
                .await
                .map_err(|e| CacheError::NetworkFailed(e.to_string()))?;
            if !response.status().is_success() {
                return Err(CacheError::NetworkFailed(format!("unexpected status: {}", response.status())));
            }
            let bytes = response.bytes().await.map_err(|e| CacheError::NetworkFailed(e.to_string()))?;
            Ok(bytes.to_vec())
        })
        .await?;

    store.insert_typed(URL_BYTES_TYPE_TAG, &cache_key, bytes.clone(), expiration).await?;
    Ok(bytes)
}

fn build_header_map(headers: &[(String, String)]) -> CacheResult<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| CacheError::InvalidArgument(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| CacheError::InvalidArgument(e.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}
