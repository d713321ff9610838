use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use report_core::{MarketData, PipelineError};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            // A zero budget would make acquire() wait on an empty window.
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            // Remove timestamps outside the window
            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            let oldest = *ts.front().expect("non-empty at capacity");
            let sleep_dur =
                self.window.saturating_sub(now.duration_since(oldest)) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "Rate limiter: waiting {:.1}s for quote API slot",
                sleep_dur.as_secs_f64()
            );
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// HTTP client for the daily-quote service used to evaluate report metrics.
#[derive(Clone)]
pub struct QuoteClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
    rate_limiter: RateLimiter,
}

#[derive(Debug, Deserialize)]
struct DailyPriceResponse {
    /// Closing price; null when the market was closed or the ticker is
    /// unknown to the quote service.
    close: Option<f64>,
}

impl QuoteClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let rate_limit: usize = std::env::var("QUOTE_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
        }
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PipelineError> {
        let request = builder
            .build()
            .map_err(|e| PipelineError::MarketDataUnavailable(e.to_string()))?;

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let req_clone = request.try_clone().ok_or_else(|| {
                PipelineError::MarketDataUnavailable("Cannot clone request".to_string())
            })?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| PipelineError::MarketDataUnavailable(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 10u64;
            tracing::warn!(
                "Quote API 429 rate limited, waiting {}s before retry {}/3",
                wait_secs,
                attempt + 1
            );
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(PipelineError::MarketDataUnavailable(
            "Rate limited by quote API after 3 retries".to_string(),
        ))
    }
}

#[async_trait]
impl MarketData for QuoteClient {
    async fn price_on(&self, ticker: &str, date: NaiveDate) -> Result<f64, PipelineError> {
        let url = format!("{}/v1/daily-price/{}", self.base_url, ticker);
        let date_str = date.format("%Y-%m-%d").to_string();

        let mut builder = self.client.get(&url).query(&[("date", date_str.as_str())]);
        if let Some(key) = &self.api_key {
            builder = builder.query(&[("apiKey", key.as_str())]);
        }

        let response = self.send_request(builder).await?;

        if response.status().as_u16() == 404 {
            return Err(PipelineError::MarketDataUnavailable(format!(
                "no price for {ticker} on {date}"
            )));
        }
        if !response.status().is_success() {
            return Err(PipelineError::MarketDataUnavailable(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body: DailyPriceResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::MarketDataUnavailable(e.to_string()))?;

        body.close.ok_or_else(|| {
            PipelineError::MarketDataUnavailable(format!("no close for {ticker} on {date}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_price_response_parses_null_close() {
        let body: DailyPriceResponse = serde_json::from_str(r#"{"close": null}"#).unwrap();
        assert!(body.close.is_none());

        let body: DailyPriceResponse = serde_json::from_str(r#"{"close": 71500.0}"#).unwrap();
        assert_eq!(body.close, Some(71500.0));
    }

    #[tokio::test]
    async fn zero_rate_limit_is_clamped_to_one() {
        // QUOTE_RATE_LIMIT=0 must not panic or stall the first acquire.
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        tokio::time::timeout(Duration::from_millis(100), limiter.acquire())
            .await
            .expect("first acquire should proceed");
    }

    #[tokio::test]
    async fn rate_limiter_allows_burst_under_limit() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            // Must not block.
            tokio::time::timeout(Duration::from_millis(100), limiter.acquire())
                .await
                .expect("acquire under limit should not wait");
        }
    }
}
