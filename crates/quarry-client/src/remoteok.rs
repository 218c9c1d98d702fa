use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::error::{AppError, SourceFailure};
use quarry_core::models::{RawListing, SearchCriteria};
use quarry_core::rate_limit::RateLimiter;
use quarry_core::traits::Connector;
use serde_json::Value;

use crate::cleaner::HtmlCleaner;
use crate::http::HttpClient;

pub const SOURCE_ID: &str = "remoteok";
pub const DEFAULT_FEED_URL: &str = "https://remoteok.com/api";

/// Connector for the RemoteOK public job feed.
///
/// The feed is one JSON array: a legal notice followed by job objects.
/// Every listing is remote, so the location filter always sees "remote".
pub struct RemoteOkConnector {
    http: HttpClient,
    cleaner: HtmlCleaner,
    limiter: Arc<RateLimiter>,
    feed_url: String,
}

impl RemoteOkConnector {
    pub fn new(http: HttpClient, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http,
            cleaner: HtmlCleaner::new(),
            limiter,
            feed_url: DEFAULT_FEED_URL.to_string(),
        }
    }

    pub fn with_feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed_url = url.into();
        self
    }

    /// Map a feed document into listings admitted by `criteria`.
    pub fn parse_feed(
        &self,
        feed: &Value,
        criteria: &SearchCriteria,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<RawListing>, AppError> {
        let entries = feed
            .as_array()
            .ok_or_else(|| AppError::ParseError("RemoteOK feed is not a JSON array".into()))?;

        let listings = entries
            .iter()
            // The legal notice (and anything else that is not a job) has no position.
            .filter_map(|entry| {
                let title = str_field(entry, "position")?;
                Some((entry, title))
            })
            .filter_map(|(entry, title)| {
                let company = str_field(entry, "company").unwrap_or_default();
                let location = str_field(entry, "location")
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| "Remote".to_string());
                let description = str_field(entry, "description")
                    .map(|html| self.cleaner.clean_or_raw(&html))
                    .unwrap_or_default();
                let tags = entry
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .unwrap_or_default();

                let body = format!("{description} {tags}");
                if !criteria.admits(&title, &format!("remote {location}"), &body) {
                    return None;
                }

                let url = str_field(entry, "apply_url")
                    .filter(|u| !u.is_empty())
                    .or_else(|| str_field(entry, "url"))
                    .unwrap_or_default();
                let posted_at = entry
                    .get("epoch")
                    .and_then(Value::as_i64)
                    .and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0));

                Some(RawListing {
                    source_id: SOURCE_ID.to_string(),
                    title,
                    company,
                    description,
                    location,
                    posted_at,
                    url,
                    fetched_at,
                })
            })
            .collect();

        Ok(listings)
    }
}

fn str_field(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl Connector for RemoteOkConnector {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<RawListing>, SourceFailure> {
        self.limiter.acquire(SOURCE_ID).await;

        let feed = self
            .http
            .get_json(&self.feed_url)
            .await
            .map_err(|e| SourceFailure::new(SOURCE_ID, e))?;
        let listings = self
            .parse_feed(&feed, criteria, Utc::now())
            .map_err(|e| SourceFailure::new(SOURCE_ID, e))?;

        tracing::info!(source_id = %SOURCE_ID, listings = %listings.len(), "Parsed RemoteOK feed");
        Ok(listings)
    }
}
