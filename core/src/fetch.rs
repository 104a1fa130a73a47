//! HTTP fetcher: one GET per URL with a timeout, a body size ceiling, and
//! retry-with-backoff for transient failures. No shared mutable state beyond
//! the reqwest connection pool.

use crate::config::{CrawlConfig, FetchConfig};
use crate::error::FetchError;
use rand::Rng;
use reqwest::{header, redirect, Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Build the shared client used by the fetcher and the robots cache.
pub fn build_client(cfg: &CrawlConfig) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(cfg.user_agent.clone())
        .redirect(redirect::Policy::limited(5))
        .timeout(cfg.fetch.timeout)
        .build()
        .map_err(|e| FetchError::Invalid(e.to_string()))
}

pub struct Fetcher {
    client: Client,
    cfg: FetchConfig,
}

impl Fetcher {
    pub fn new(client: Client, cfg: FetchConfig) -> Self {
        Self { client, cfg }
    }

    /// Fetch with retries. Transient errors (timeout, connection-level) back
    /// off exponentially with jitter; HTTP status errors return immediately.
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(url).await {
                Err(err) if err.is_transient() && attempt < self.cfg.max_retries => {
                    let delay = backoff_delay(self.cfg.backoff_base, attempt) + jitter();
                    debug!(%url, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying fetch");
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify)?;

        let status: StatusCode = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }
        if let Some(len) = resp.content_length() {
            if len as usize > self.cfg.max_body_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.cfg.max_body_bytes,
                });
            }
        }
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let final_url = resp.url().clone();
        let body = resp.bytes().await.map_err(classify)?;
        if body.len() > self.cfg.max_body_bytes {
            return Err(FetchError::TooLarge {
                limit: self.cfg.max_body_bytes,
            });
        }
        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
        })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_connect() {
        FetchError::ConnectionRefused
    } else {
        FetchError::Invalid(err.to_string())
    }
}

/// Deterministic part of the backoff schedule: base * 2^attempt, capped.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(6))
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..250))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 20), backoff_delay(base, 6));
    }

    #[test]
    fn http_errors_are_not_transient() {
        assert!(!FetchError::Http(404).is_transient());
        assert!(!FetchError::Http(503).is_transient());
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::ConnectionRefused.is_transient());
    }
}
