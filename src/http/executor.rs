//! Resilient request executor.
//!
//! Performs one logical fetch with bounded retries, mandatory inter-request
//! pacing, exponential backoff on transient failures, and identity rotation
//! on hard blocks. Every sleep is cancellable through the run-level token,
//! and the HTTP call itself carries a hard per-request timeout, so nothing
//! here can block unboundedly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};
use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{HttpTransport, RequestSpec};
use crate::classify::{Outcome, classify};
use crate::config::ScraperConfig;
use crate::identity::{IdentityPool, PoolError, ReportSignal};

/// Result of one logical fetch: the final classification after all retry
/// budgets were applied. Immutable; consumed by the pagination controller.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub outcome: Outcome,
    pub http_status: Option<u16>,
    pub body: Option<Bytes>,
    pub elapsed: Duration,
    /// Transport calls actually made.
    pub attempts: u32,
    /// The identifying signal behind the classification (status code,
    /// challenge marker), surfaced so callers can decide to pause a run.
    pub signal: String,
}

impl RequestOutcome {
    /// Body as UTF-8 text, when a body was captured.
    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Failures that abort a fetch without producing a classified outcome.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every proxy is banned. Fatal for the run: retrying without any
    /// usable identity cannot succeed.
    #[error("identity pool exhausted ({banned} proxies banned)")]
    PoolExhausted { banned: usize },
    #[error("fetch cancelled")]
    Cancelled,
}

/// Executes logical fetches against the transport with the configured
/// retry discipline.
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    pool: Arc<IdentityPool>,
    config: ScraperConfig,
    /// Requests issued over this executor's lifetime; pacing is skipped
    /// before the very first one.
    request_count: AtomicU64,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        pool: Arc<IdentityPool>,
        config: ScraperConfig,
    ) -> Self {
        Self {
            transport,
            pool,
            config,
            request_count: AtomicU64::new(0),
        }
    }

    /// Perform one logical fetch.
    ///
    /// Transient failures retry with `backoff_factor^attempt` sleeps up to
    /// `max_attempts`; hard blocks rotate identity under a separate budget
    /// without consuming a transient slot; `NotFound` and `PrivateAccount`
    /// return immediately, since retrying cannot change them.
    pub async fn execute(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome, FetchError> {
        let started = Instant::now();
        let mut transient_attempts: u32 = 0;
        let mut hard_blocks: u32 = 0;
        let mut calls: u32 = 0;

        loop {
            let identity = match self.pool.select() {
                Ok(identity) => identity,
                Err(PoolError::Exhausted { banned }) => {
                    warn!("aborting fetch of {}: identity pool exhausted", spec.url);
                    return Err(FetchError::PoolExhausted { banned });
                }
                Err(PoolError::CoolingDown { next_available }) => {
                    // Recoverable: treat like a transient failure and back
                    // off, a cooldown may elapse in the meantime.
                    transient_attempts += 1;
                    if transient_attempts >= self.config.max_attempts {
                        return Ok(self.outcome(
                            Outcome::TransientFailure,
                            None,
                            None,
                            started,
                            calls,
                            format!("all proxies cooling down for {next_available:?}"),
                        ));
                    }
                    self.backoff(transient_attempts, cancel).await?;
                    continue;
                }
            };

            self.pace(cancel).await?;
            calls += 1;

            let send = self
                .transport
                .send(spec, &identity, self.config.request_timeout);
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = send => result,
            };

            let (classification, status, body) = match result {
                Ok(raw) => {
                    let text = raw.text();
                    let classification = classify(raw.status, raw.location(), &text);
                    (classification, Some(raw.status), Some(raw.body))
                }
                Err(error) => {
                    debug!("transport error for {}: {error}", spec.url);
                    (
                        crate::classify::Classification {
                            outcome: Outcome::TransientFailure,
                            signal: error.to_string(),
                        },
                        None,
                        None,
                    )
                }
            };

            match classification.outcome {
                Outcome::Success => {
                    if let Some(proxy) = identity.proxy.as_deref() {
                        self.pool.report(proxy, ReportSignal::Success);
                    }
                    debug!("fetch of {} succeeded after {calls} attempt(s)", spec.url);
                    return Ok(self.outcome(
                        Outcome::Success,
                        status,
                        body,
                        started,
                        calls,
                        classification.signal,
                    ));
                }
                Outcome::NotFound | Outcome::PrivateAccount => {
                    // Terminal, expected outcomes; the proxy itself worked.
                    if let Some(proxy) = identity.proxy.as_deref() {
                        self.pool.report(proxy, ReportSignal::Success);
                    }
                    return Ok(self.outcome(
                        classification.outcome,
                        status,
                        body,
                        started,
                        calls,
                        classification.signal,
                    ));
                }
                Outcome::HardBlock => {
                    if let Some(proxy) = identity.proxy.as_deref() {
                        self.pool.report(proxy, ReportSignal::HardBlock);
                    }
                    hard_blocks += 1;
                    if hard_blocks > self.config.hard_block_retries {
                        warn!(
                            "hard block persists for {} after {hard_blocks} rotations: {}",
                            spec.url, classification.signal
                        );
                        return Ok(self.outcome(
                            Outcome::HardBlock,
                            status,
                            body,
                            started,
                            calls,
                            classification.signal,
                        ));
                    }
                    info!(
                        "hard block on {} ({}), rotating identity",
                        spec.url, classification.signal
                    );
                    // Separate budget: this sleep does not consume a
                    // transient backoff slot.
                    self.backoff(hard_blocks, cancel).await?;
                }
                Outcome::TransientFailure => {
                    if let Some(proxy) = identity.proxy.as_deref() {
                        self.pool.report(proxy, ReportSignal::TransientFailure);
                    }
                    transient_attempts += 1;
                    if transient_attempts >= self.config.max_attempts {
                        warn!(
                            "fetch of {} failed after {calls} attempts: {}",
                            spec.url, classification.signal
                        );
                        return Ok(self.outcome(
                            Outcome::TransientFailure,
                            status,
                            body,
                            started,
                            calls,
                            classification.signal,
                        ));
                    }
                    debug!(
                        "transient failure on {} ({}), attempt {transient_attempts}",
                        spec.url, classification.signal
                    );
                    self.backoff(transient_attempts, cancel).await?;
                }
            }
        }
    }

    fn outcome(
        &self,
        outcome: Outcome,
        http_status: Option<u16>,
        body: Option<Bytes>,
        started: Instant,
        attempts: u32,
        signal: String,
    ) -> RequestOutcome {
        RequestOutcome {
            outcome,
            http_status,
            body,
            elapsed: started.elapsed(),
            attempts,
            signal,
        }
    }

    /// Randomized inter-request delay, skipped before the first request of
    /// this executor's lifetime.
    async fn pace(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        if self.request_count.fetch_add(1, Ordering::Relaxed) == 0 {
            return Ok(());
        }
        let min = self.config.min_delay;
        let max = self.config.max_delay;
        let delay = if max > min {
            let span = (max - min).as_secs_f64();
            min + Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..span))
        } else {
            min
        };
        cancellable_sleep(delay, cancel).await
    }

    /// `backoff_factor^attempt` seconds.
    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), FetchError> {
        let secs = self.config.backoff_factor.powi(attempt as i32);
        cancellable_sleep(Duration::from_secs_f64(secs.max(0.0)), cancel).await
    }
}

async fn cancellable_sleep(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{RawResponse, TransportError};
    use crate::identity::Identity;
    use async_trait::async_trait;
    use http::HeaderMap;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Transport that replays a scripted sequence of responses.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<RawResponse, TransportError>>>,
        calls: AtomicU64,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicU64::new(0),
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(
            &self,
            _spec: &RequestSpec,
            _identity: &Identity,
            _timeout: Duration,
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(TransportError::Connection("script exhausted".into()));
            }
            script.remove(0)
        }
    }

    fn ok(status: u16, body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        })
    }

    fn fast_config() -> ScraperConfig {
        ScraperConfig {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 0.0,
            ..Default::default()
        }
    }

    fn executor_with(
        script: Vec<Result<RawResponse, TransportError>>,
        config: ScraperConfig,
    ) -> (RequestExecutor, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let pool = Arc::new(IdentityPool::new(
            Vec::new(),
            Vec::new(),
            HashMap::new(),
            config.proxy_cooldown,
            config.proxy_ban_threshold,
        ));
        (
            RequestExecutor::new(transport.clone(), pool, config),
            transport,
        )
    }

    const PROFILE_OK: &str = r#"{"data":{"user":{"id":"1","username":"x","is_private":false}}}"#;

    #[tokio::test]
    async fn success_after_transient_failures() {
        let (executor, transport) = executor_with(
            vec![
                Err(TransportError::Timeout),
                ok(503, "oops"),
                ok(200, PROFILE_OK),
            ],
            fast_config(),
        );
        let outcome = executor
            .execute(&RequestSpec::get("https://x/"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.outcome, Outcome::Success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn transient_exhaustion_returns_last_outcome() {
        let script = (0..10).map(|_| ok(502, "bad")).collect();
        let (executor, transport) = executor_with(script, fast_config());
        let outcome = executor
            .execute(&RequestSpec::get("https://x/"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.outcome, Outcome::TransientFailure);
        // max_attempts transport calls, no more.
        assert_eq!(transport.calls(), 5);
        assert_eq!(outcome.http_status, Some(502));
        assert_eq!(outcome.attempts, 5);
    }

    #[tokio::test]
    async fn not_found_makes_exactly_one_call() {
        let (executor, transport) = executor_with(vec![ok(404, "nope")], fast_config());
        let outcome = executor
            .execute(&RequestSpec::get("https://x/"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.outcome, Outcome::NotFound);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn private_account_makes_exactly_one_call() {
        let private = r#"{"data":{"user":{"id":"1","username":"x","is_private":true,
            "edge_owner_to_timeline_media":{"count":3,"edges":[]}}}}"#;
        let (executor, transport) = executor_with(vec![ok(200, private)], fast_config());
        let outcome = executor
            .execute(&RequestSpec::get("https://x/"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.outcome, Outcome::PrivateAccount);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn hard_block_budget_is_separate_from_transient_budget() {
        // 3 rate limits (within the hard-block budget) then success; none of
        // them consume a transient attempt.
        let (executor, transport) = executor_with(
            vec![
                ok(429, ""),
                ok(429, ""),
                ok(429, ""),
                ok(200, PROFILE_OK),
            ],
            fast_config(),
        );
        let outcome = executor
            .execute(&RequestSpec::get("https://x/"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.outcome, Outcome::Success);
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn hard_block_exhaustion_surfaces_signal() {
        let script = (0..6).map(|_| ok(429, "")).collect();
        let (executor, transport) = executor_with(script, fast_config());
        let outcome = executor
            .execute(&RequestSpec::get("https://x/"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.outcome, Outcome::HardBlock);
        // Initial attempt plus the hard-block retry budget.
        assert_eq!(transport.calls(), 4);
        assert!(outcome.signal.contains("429"));
    }

    #[tokio::test]
    async fn rate_limited_then_success_records_attempt_count() {
        // 429 on attempts 1-2, success on attempt 3.
        let (executor, _) = executor_with(
            vec![ok(429, ""), ok(429, ""), ok(200, PROFILE_OK)],
            fast_config(),
        );
        let outcome = executor
            .execute(&RequestSpec::get("https://x/"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.outcome, Outcome::Success);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let config = ScraperConfig {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 60.0,
            ..Default::default()
        };
        let (executor, _) = executor_with(vec![ok(503, "oops"), ok(200, PROFILE_OK)], config);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        let error = executor
            .execute(&RequestSpec::get("https://x/"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::Cancelled));
    }

    #[tokio::test]
    async fn banned_pool_is_fatal() {
        let config = fast_config();
        let transport = Arc::new(ScriptedTransport::new(vec![ok(200, PROFILE_OK)]));
        let pool = Arc::new(IdentityPool::new(
            vec!["http://a:1".into()],
            Vec::new(),
            HashMap::new(),
            Duration::from_secs(3600),
            3,
        ));
        for _ in 0..3 {
            pool.report("http://a:1", ReportSignal::HardBlock);
        }
        let executor = RequestExecutor::new(transport, pool, config);
        let error = executor
            .execute(&RequestSpec::get("https://x/"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::PoolExhausted { banned: 1 }));
    }
}
