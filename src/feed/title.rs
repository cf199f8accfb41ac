use std::time::Duration;

use super::fetcher::{read_limited_bytes, FetchError};
use super::parser::parse_feed_title;

const MAX_TITLE_FETCH_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Resolve a display name for a feed by reading its declared title.
///
/// One request, bounded by `timeout`, with no retries. Any failure (network,
/// status, not a feed, blank title) falls back to the URL itself, so
/// registration never fails because the feed is slow or down.
pub async fn resolve_feed_title(client: &reqwest::Client, url: &str, timeout: Duration) -> String {
    match tokio::time::timeout(timeout, fetch_title(client, url)).await {
        Ok(Ok(title)) if !title.trim().is_empty() => title.trim().to_string(),
        Ok(Ok(_)) => {
            tracing::debug!(feed = %url, "Feed declares no title, using URL");
            url.to_string()
        }
        Ok(Err(e)) => {
            tracing::warn!(feed = %url, error = %e, "Could not read feed title, using URL");
            url.to_string()
        }
        Err(_) => {
            tracing::warn!(feed = %url, timeout_secs = timeout.as_secs_f64(), "Feed title lookup timed out, using URL");
            url.to_string()
        }
    }
}

async fn fetch_title(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let bytes = read_limited_bytes(response, MAX_TITLE_FETCH_SIZE).await?;
    Ok(parse_feed_title(&bytes)?)
}
