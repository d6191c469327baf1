//! External platform listing
//!
//! The degraded scheduler rebuilds its occupancy from the platform's own list
//! of future-dated publishes. The listing is a trait so tests and alternate
//! platforms can supply their own source.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::Client;
use serde::Deserialize;

use super::error::{SchedulerError, SchedulerResult};
use crate::config::DegradedConfig;

/// Upper bound on pages followed in one listing
const MAX_PAGES: usize = 50;

/// Source of publish times already booked on the platform
#[async_trait]
pub trait PlatformListing: Send + Sync {
    /// Publish times of every item the platform holds as scheduled
    async fn scheduled_publish_times(&self) -> SchedulerResult<Vec<DateTime<FixedOffset>>>;
}

// ============================================================================
// Response Types
// ============================================================================

/// One page of the scheduled-items listing
#[derive(Debug, Deserialize)]
struct ListingPage {
    #[serde(default)]
    items: Vec<ListedItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    publish_at: Option<String>,
}

// ============================================================================
// HTTP Listing
// ============================================================================

/// Paginated JSON listing over HTTP
///
/// `GET {url}?page_token=...` returning
/// `{"items": [{"id": "...", "publish_at": "RFC3339"}], "next_page_token": "..."}`.
pub struct HttpPlatformListing {
    url: String,
    token: Option<String>,
    http_client: Client,
}

impl HttpPlatformListing {
    /// Create a listing client from the degraded-mode config
    pub fn new(config: &DegradedConfig) -> SchedulerResult<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SchedulerError::platform("init_client", e.to_string()))?;

        Ok(Self {
            url: config.platform_url.clone(),
            token: config.platform_token.clone(),
            http_client,
        })
    }

    async fn fetch_page(&self, page_token: Option<&str>) -> SchedulerResult<ListingPage> {
        let mut request = self.http_client.get(&self.url);
        if let Some(token) = page_token {
            request = request.query(&[("page_token", token)]);
        }
        if let Some(ref bearer) = self.token {
            request = request.bearer_auth(bearer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SchedulerError::platform("list_scheduled", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SchedulerError::platform(
                "list_scheduled",
                format!("HTTP {}: {}", status.as_u16(), body.trim()),
            ));
        }

        response
            .json::<ListingPage>()
            .await
            .map_err(|e| SchedulerError::platform("list_scheduled", format!("invalid response: {e}")))
    }
}

#[async_trait]
impl PlatformListing for HttpPlatformListing {
    async fn scheduled_publish_times(&self) -> SchedulerResult<Vec<DateTime<FixedOffset>>> {
        let mut times = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(page_token.as_deref()).await?;

            for item in page.items {
                let Some(raw) = item.publish_at else {
                    continue;
                };
                match DateTime::parse_from_rfc3339(&raw) {
                    Ok(time) => times.push(time),
                    Err(e) => tracing::warn!(
                        id = ?item.id,
                        publish_at = %raw,
                        error = %e,
                        "Skipping listed item with unparseable publish time"
                    ),
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => {
                    tracing::debug!(count = times.len(), "Platform listing complete");
                    return Ok(times);
                }
            }
        }

        tracing::warn!(
            pages = MAX_PAGES,
            count = times.len(),
            "Platform listing truncated at page limit"
        );
        Ok(times)
    }
}
