use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use report_core::{PipelineError, RawReport, ReportSource};
use reqwest::Client;

/// HTTP client for the report crawler service.
#[derive(Clone)]
pub struct CrawlerClient {
    base_url: String,
    client: Client,
}

impl CrawlerClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl ReportSource for CrawlerClient {
    async fn fetch_reports(&self, date: NaiveDate) -> Result<Vec<RawReport>, PipelineError> {
        let url = format!("{}/reports", self.base_url);
        let date_str = date.format("%Y-%m-%d").to_string();

        let response = self
            .client
            .get(&url)
            .query(&[("date", date_str.as_str())])
            .send()
            .await
            .map_err(|e| PipelineError::SourceFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::SourceFetch(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::SourceFetch(e.to_string()))
    }
}
