// The only path from the attack engines to the target.
//
// An `OracleCaller` wraps a `Transport` (normally `HttpTransport`) and adds
// what every probe needs on top of a bare request: a bound on the number of
// calls in flight, a per-call timeout, bounded retries with backoff, a
// per-run response cache keyed on the raw payload bytes, and running network
// statistics. It hands back the raw response; judging it is left to a
// `Predicate`.
pub mod http;

use crate::TransportError;

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::{OnceCell, Semaphore};
use tracing::{trace, warn};

/// One observed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub elapsed: Duration,
}

impl OracleResult {
    /// Headers as `name: value` lines.
    pub fn serialized_headers(&self) -> String {
        self.headers
            .iter()
            .map(|(name, value)| format!("{name}: {value}\n"))
            .collect()
    }
}

/// Sends one payload to the target.
pub trait Transport {
    fn send(
        &self,
        payload: &[u8],
    ) -> impl Future<Output = Result<OracleResult, TransportError>> + Send;
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Maximum number of oracle calls in flight at once.
    pub concurrency: usize,
    pub cache_enabled: bool,
    pub timeout: Duration,
    /// Attempts after the first one before a call is given up.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every retry after it.
    pub retry_backoff: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            concurrency: 128,
            cache_enabled: true,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Requests that reached the transport, retries included.
    pub request_count: usize,
    /// Requests that ended in a transport error or timeout.
    pub failed_count: usize,
    pub cache_hits: usize,
    /// Raw payload bytes handed to the transport.
    pub bytes_sent: usize,
    pub total_time: Duration,
    pub min_time: Option<Duration>,
    pub max_time: Option<Duration>,
}

impl NetworkStats {
    pub fn average_time(&self) -> Option<Duration> {
        let completed = u32::try_from(self.request_count - self.failed_count).ok()?;
        (completed > 0).then(|| self.total_time / completed)
    }

    fn record(&mut self, payload_len: usize, elapsed: Duration) {
        self.request_count += 1;
        self.bytes_sent += payload_len;
        self.total_time += elapsed;
        self.min_time = Some(self.min_time.map_or(elapsed, |t| t.min(elapsed)));
        self.max_time = Some(self.max_time.map_or(elapsed, |t| t.max(elapsed)));
    }

    fn record_failure(&mut self, payload_len: usize) {
        self.request_count += 1;
        self.failed_count += 1;
        self.bytes_sent += payload_len;
    }
}

pub struct OracleCaller<T> {
    transport: T,
    config: OracleConfig,
    permits: Semaphore,
    cache: Mutex<HashMap<Vec<u8>, Arc<OnceCell<OracleResult>>>>,
    stats: Mutex<NetworkStats>,
}

impl<T: Transport + Sync> OracleCaller<T> {
    pub fn new(transport: T, mut config: OracleConfig) -> Self {
        config.concurrency = config.concurrency.max(1);
        Self {
            transport,
            permits: Semaphore::new(config.concurrency),
            config,
            cache: Mutex::new(HashMap::new()),
            stats: Mutex::new(NetworkStats::default()),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> NetworkStats {
        lock(&self.stats).clone()
    }

    /// Send `payload` through the transport, or answer it from the cache.
    ///
    /// Identical payloads share one request even while it is in flight: later
    /// callers wait on the first one's response. A failed request is not
    /// cached, so the next caller for that payload tries again.
    pub async fn call_oracle(&self, payload: &[u8]) -> Result<OracleResult, TransportError> {
        if !self.config.cache_enabled {
            return self.send(payload).await;
        }

        let entry = lock(&self.cache)
            .entry(payload.to_vec())
            .or_default()
            .clone();
        let mut sent = false;
        let result = entry
            .get_or_try_init(|| {
                sent = true;
                self.send(payload)
            })
            .await?;
        if !sent {
            lock(&self.stats).cache_hits += 1;
            trace!(payload = %hex::encode(payload), "cache hit");
        }
        Ok(result.clone())
    }

    async fn send(&self, payload: &[u8]) -> Result<OracleResult, TransportError> {
        // The semaphore is owned here and never closed.
        let _permit = self.permits.acquire().await.ok();
        self.send_with_retries(payload).await
    }

    async fn send_with_retries(&self, payload: &[u8]) -> Result<OracleResult, TransportError> {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(self.config.timeout, self.transport.send(payload))
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout(self.config.timeout)));
            match outcome {
                Ok(result) => {
                    lock(&self.stats).record(payload.len(), result.elapsed);
                    return Ok(result);
                }
                Err(e) => {
                    lock(&self.stats).record_failure(payload.len());
                    if attempt >= self.config.max_retries {
                        return Err(e);
                    }
                    attempt += 1;
                    warn!(
                        "oracle call failed ({e}), retry {attempt}/{} in {backoff:?}",
                        self.config.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

// A poisoned lock only means another probe panicked mid-update; the cache
// and counters are still usable.
fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
