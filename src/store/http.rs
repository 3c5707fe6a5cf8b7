use super::{CircuitBreaker, CounterStore};
use crate::error::{StoreError, StoreResult, TallyError, TallyResult};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::{instrument, trace, warn};

#[derive(Debug, Serialize)]
struct IncrementBody {
    delta: i64,
}

/// Counter store reached over HTTP.
///
/// Each increment is `POST {base_url}/counters/{key}/increment` with a JSON
/// body `{"delta": n}`; the server performs the upsert.
pub struct HttpStore {
    client: Client,
    base_url: Url,
    breaker: CircuitBreaker,
}

impl HttpStore {
    pub fn new(base_url: &str, timeout: Duration, breaker: CircuitBreaker) -> TallyResult<Self> {
        // Validate URL at construction time
        let base_url = Url::parse(base_url)
            .map_err(|e| TallyError::InvalidConfig(format!("Invalid store URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(TallyError::InvalidConfig(format!(
                "Store URL cannot be a base: {}",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| TallyError::IoError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            breaker,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn counter_url(&self, key: &str) -> StoreResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidKey(key.to_string()))?
            .pop_if_empty()
            .extend(["counters", key, "increment"]);
        Ok(url)
    }

    async fn send(&self, key: &str, delta: i64) -> StoreResult<()> {
        let url = self.counter_url(key)?;
        trace!(url = %url, delta, "Sending increment");

        let response = self
            .client
            .post(url)
            .json(&IncrementBody { delta })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CounterStore for HttpStore {
    #[instrument(skip(self), level = "trace")]
    async fn increment_counter(&self, key: &str, delta: i64) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }
        if !self.breaker.can_execute() {
            return Err(StoreError::Unavailable("circuit breaker open".to_string()));
        }

        match self.send(key, delta).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                if e.is_transient() {
                    self.breaker.record_failure();
                } else {
                    warn!(key, error = %e, "Store rejected increment");
                }
                Err(e)
            }
        }
    }
}
