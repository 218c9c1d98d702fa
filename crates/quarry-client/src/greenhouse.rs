use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::error::{AppError, SourceFailure};
use quarry_core::models::{RawListing, SearchCriteria};
use quarry_core::rate_limit::RateLimiter;
use quarry_core::traits::Connector;
use serde::Deserialize;
use url::Url;

use crate::cleaner::HtmlCleaner;
use crate::http::HttpClient;

pub const SOURCE_ID: &str = "greenhouse";
pub const DEFAULT_BOARDS_URL: &str = "https://boards-api.greenhouse.io/v1/boards/";

#[derive(Debug, Deserialize)]
struct Board {
    jobs: Vec<BoardJob>,
}

#[derive(Debug, Deserialize)]
struct BoardJob {
    title: String,
    absolute_url: String,
    #[serde(default)]
    location: Option<BoardLocation>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    company_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoardLocation {
    name: String,
}

/// Company career-page connector backed by public Greenhouse job boards.
///
/// Only runs when the criteria names target companies. Each company is one
/// request and takes its own rate-limit permit; any company failing fails
/// the whole fetch.
pub struct GreenhouseConnector {
    http: HttpClient,
    cleaner: HtmlCleaner,
    limiter: Arc<RateLimiter>,
    boards_url: String,
}

impl GreenhouseConnector {
    pub fn new(http: HttpClient, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http,
            cleaner: HtmlCleaner::new(),
            limiter,
            boards_url: DEFAULT_BOARDS_URL.to_string(),
        }
    }

    /// Override the boards API base; it must end with a slash.
    pub fn with_boards_url(mut self, url: impl Into<String>) -> Self {
        self.boards_url = url.into();
        self
    }

    /// Board token for a company name: lower-case alphanumerics only.
    pub fn board_token(company: &str) -> String {
        company
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }

    fn board_url(&self, token: &str) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.boards_url)
            .and_then(|base| base.join(&format!("{token}/jobs")))
            .map_err(|e| AppError::HttpError(format!("Invalid board URL: {e}")))?;
        url.query_pairs_mut().append_pair("content", "true");
        Ok(url)
    }

    /// Map one board document into listings admitted by `criteria`.
    pub fn parse_board(
        &self,
        board: serde_json::Value,
        company: &str,
        criteria: &SearchCriteria,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<RawListing>, AppError> {
        let board: Board = serde_json::from_value(board)
            .map_err(|e| AppError::ParseError(format!("Unexpected board for '{company}': {e}")))?;

        Ok(board
            .jobs
            .into_iter()
            .filter_map(|job| {
                let location = job.location.map(|l| l.name).unwrap_or_default();
                let description = job
                    .content
                    .map(|html| {
                        self.cleaner
                            .clean_or_raw(&html_escape::decode_html_entities(&html))
                    })
                    .unwrap_or_default();
                if !criteria.admits(&job.title, &location, &description) {
                    return None;
                }

                Some(RawListing {
                    source_id: SOURCE_ID.to_string(),
                    title: job.title,
                    company: job.company_name.unwrap_or_else(|| company.to_string()),
                    description,
                    location,
                    posted_at: job
                        .updated_at
                        .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
                        .map(|ts| ts.with_timezone(&Utc)),
                    url: job.absolute_url,
                    fetched_at,
                })
            })
            .collect())
    }
}

#[async_trait]
impl Connector for GreenhouseConnector {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn should_run(&self, criteria: &SearchCriteria) -> bool {
        !criteria.companies.is_empty()
    }

    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<RawListing>, SourceFailure> {
        let fail = |e: AppError| SourceFailure::new(SOURCE_ID, e);
        let mut listings = Vec::new();

        for company in &criteria.companies {
            let token = Self::board_token(company);
            if token.is_empty() {
                continue;
            }
            let url = self.board_url(&token).map_err(fail)?;

            self.limiter.acquire(SOURCE_ID).await;
            let board = self.http.get_json(url.as_str()).await.map_err(fail)?;
            let found = self
                .parse_board(board, company, criteria, Utc::now())
                .map_err(fail)?;

            tracing::debug!(source_id = %SOURCE_ID, %company, listings = %found.len(), "Parsed board");
            listings.extend(found);
        }

        Ok(listings)
    }
}
