//! Cached, coalescing boot configuration lookups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::cache::TtlCache;
use super::types::{BootConfigRequest, BootConfigResponse};
use super::upstream::BootDecisionClient;
use crate::error::ResolveError;

/// How long a successful decision is reused.
pub const CACHE_TTL: Duration = Duration::from_secs(30);

/// Upper bound on one upstream exchange.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(1);

type Outcome = Result<Arc<BootConfigResponse>, ResolveError>;

/// A cached decision and the architecture it was made for.
#[derive(Debug, Clone)]
struct CachedConfig {
    response: Arc<BootConfigResponse>,
    arch: String,
}

struct Inner {
    client: Arc<dyn BootDecisionClient>,
    cache: TtlCache<String, CachedConfig>,
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<Outcome>>>>,
    ttl: Duration,
    timeout: Duration,
}

/// Resolves boot configurations by MAC.
///
/// Successful answers are cached for [`CACHE_TTL`]. Concurrent lookups for
/// the same MAC share a single upstream call and all observe its outcome.
/// Failures are never cached.
#[derive(Clone)]
pub struct BootConfigRetriever {
    inner: Arc<Inner>,
}

impl BootConfigRetriever {
    pub fn new(client: Arc<dyn BootDecisionClient>) -> Self {
        Self::with_timings(client, CACHE_TTL, UPSTREAM_TIMEOUT)
    }

    pub fn with_timings(client: Arc<dyn BootDecisionClient>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                cache: TtlCache::new(),
                in_flight: Mutex::new(HashMap::new()),
                ttl,
                timeout,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.inner.client.endpoint()
    }

    /// Resolve the boot configuration for `request.mac`.
    ///
    /// The upstream call runs in its own task, so it completes (and fills
    /// the cache) even if every caller goes away.
    pub async fn resolve(&self, request: BootConfigRequest) -> Outcome {
        if let Some(hit) = self.inner.cached(&request) {
            return Ok(hit);
        }

        let mut rx = self.join_or_start(request);

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(ResolveError::Abandoned))
    }

    /// Attach to the flight for this MAC, starting one if none is running.
    fn join_or_start(&self, request: BootConfigRequest) -> watch::Receiver<Option<Outcome>> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // A closed channel means the flight's task died without publishing.
        if let Some(rx) = in_flight
            .get(&request.mac)
            .filter(|rx| rx.has_changed().is_ok())
        {
            debug!(mac = %request.mac, "Joining in-flight boot config lookup");
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(request.mac.clone(), rx.clone());
        drop(in_flight);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mac = request.mac.clone();
            let outcome = inner.fetch_and_cache(request).await;

            // Leave the in-flight map before publishing so a caller that
            // saw the result and retries starts a fresh lookup.
            inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&mac);
            let _ = tx.send(Some(outcome));
        });

        rx
    }
}

impl Inner {
    fn cached(&self, request: &BootConfigRequest) -> Option<Arc<BootConfigResponse>> {
        let hit = self.cache.get(&request.mac)?;
        if hit.arch != request.arch {
            debug!(
                mac = %request.mac,
                cached_arch = %hit.arch,
                requested_arch = %request.arch,
                "Serving cached boot config made for another architecture"
            );
        }
        Some(hit.response)
    }

    async fn fetch_and_cache(&self, request: BootConfigRequest) -> Outcome {
        // A flight that just finished may have filled the cache between
        // the caller's lookup and this one.
        if let Some(hit) = self.cached(&request) {
            return Ok(hit);
        }

        let result = match tokio::time::timeout(self.timeout, self.client.fetch(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout),
        };

        match result {
            Ok(response) => {
                let response = Arc::new(response);
                self.cache.insert(
                    request.mac,
                    CachedConfig {
                        response: Arc::clone(&response),
                        arch: request.arch,
                    },
                    self.ttl,
                );
                Ok(response)
            }
            Err(e) => {
                warn!(
                    mac = %request.mac,
                    endpoint = %self.client.endpoint(),
                    error = %e,
                    "Boot decision lookup failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Upstream stand-in that counts calls and can be held closed.
    pub struct StubClient {
        pub calls: AtomicUsize,
        pub gate: Option<Semaphore>,
        pub fail_with: Mutex<Option<ResolveError>>,
    }

    impl StubClient {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: None,
                fail_with: Mutex::new(None),
            }
        }

        /// Calls block until a permit is added to the gate.
        pub fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::new()
            }
        }

        pub fn failing(error: ResolveError) -> Self {
            Self {
                fail_with: Mutex::new(Some(error)),
                ..Self::new()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BootDecisionClient for StubClient {
        async fn fetch(&self, request: &BootConfigRequest) -> Result<BootConfigResponse, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let permit = gate.acquire().await.map_err(|_| ResolveError::Abandoned)?;
                // Keep the gate open for whoever comes next.
                drop(permit);
            }
            if let Some(e) = self.fail_with.lock().unwrap().clone() {
                return Err(e);
            }
            Ok(BootConfigResponse {
                kernel: format!("vmlinuz-{}", request.arch),
                kernel_args: format!("mac={}", request.mac),
                initrd: "initrd.img".to_string(),
            })
        }

        fn endpoint(&self) -> &str {
            "stub://decide"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubClient;
    use super::*;

    fn req(mac: &str) -> BootConfigRequest {
        BootConfigRequest::new(mac, "arm64", "serial-1")
    }

    mod cache_tests {
        use super::*;

        #[tokio::test]
        async fn test_second_resolve_within_ttl_is_cached() {
            let stub = Arc::new(StubClient::new());
            let retriever = BootConfigRetriever::new(stub.clone());

            let first = retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await.unwrap();
            let second = retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await.unwrap();

            assert_eq!(stub.calls(), 1);
            assert_eq!(first, second);
            assert_eq!(first.render_script(), second.render_script());
        }

        #[tokio::test(start_paused = true)]
        async fn test_expired_entry_refetches() {
            let stub = Arc::new(StubClient::new());
            let retriever = BootConfigRetriever::new(stub.clone());

            retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await.unwrap();
            tokio::time::advance(Duration::from_secs(29)).await;
            retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await.unwrap();
            assert_eq!(stub.calls(), 1);

            tokio::time::advance(Duration::from_secs(2)).await;
            retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await.unwrap();
            assert_eq!(stub.calls(), 2);
        }

        #[tokio::test]
        async fn test_keys_are_independent() {
            let stub = Arc::new(StubClient::new());
            let retriever = BootConfigRetriever::new(stub.clone());

            retriever.resolve(req("aa:bb:cc:dd:ee:01")).await.unwrap();
            retriever.resolve(req("aa:bb:cc:dd:ee:02")).await.unwrap();
            assert_eq!(stub.calls(), 2);
        }

        #[tokio::test]
        async fn test_cache_key_is_mac_only() {
            let stub = Arc::new(StubClient::new());
            let retriever = BootConfigRetriever::new(stub.clone());

            let arm = retriever
                .resolve(BootConfigRequest::new("aa:bb:cc:dd:ee:ff", "arm64", "s"))
                .await
                .unwrap();
            let other = retriever
                .resolve(BootConfigRequest::new("aa:bb:cc:dd:ee:ff", "x86_64", "s"))
                .await
                .unwrap();

            assert_eq!(stub.calls(), 1);
            assert_eq!(other.kernel, "vmlinuz-arm64");
            assert_eq!(arm, other);
        }

        #[tokio::test]
        async fn test_failure_is_not_cached() {
            let stub = Arc::new(StubClient::failing(ResolveError::Status(500)));
            let retriever = BootConfigRetriever::new(stub.clone());

            let first = retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await;
            assert_eq!(first, Err(ResolveError::Status(500)));

            let second = retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await;
            assert_eq!(second, Err(ResolveError::Status(500)));
            assert_eq!(stub.calls(), 2);

            // Upstream recovers: the next call goes through and is cached.
            *stub.fail_with.lock().unwrap() = None;
            retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await.unwrap();
            retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await.unwrap();
            assert_eq!(stub.calls(), 3);
        }
    }

    mod coalescing_tests {
        use super::*;

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_callers_share_one_fetch() {
            let stub = Arc::new(StubClient::gated());
            let retriever = BootConfigRetriever::new(stub.clone());

            let mut handles = Vec::new();
            for _ in 0..10 {
                let retriever = retriever.clone();
                handles.push(tokio::spawn(async move {
                    retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await
                }));
            }

            // Let every caller reach the flight before releasing upstream.
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(stub.calls(), 1);
            if let Some(gate) = &stub.gate {
                gate.add_permits(1);
            }

            let mut results = Vec::new();
            for handle in handles {
                results.push(handle.await.unwrap().unwrap());
            }

            assert_eq!(stub.calls(), 1);
            assert_eq!(results.len(), 10);
            assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_callers_share_failure() {
            let mut stub = StubClient::failing(ResolveError::Status(503));
            stub.gate = Some(tokio::sync::Semaphore::new(0));
            let stub = Arc::new(stub);
            let retriever = BootConfigRetriever::new(stub.clone());

            let mut handles = Vec::new();
            for _ in 0..10 {
                let retriever = retriever.clone();
                handles.push(tokio::spawn(async move {
                    retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await
                }));
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Some(gate) = &stub.gate {
                gate.add_permits(1);
            }

            for handle in handles {
                assert_eq!(handle.await.unwrap(), Err(ResolveError::Status(503)));
            }
            assert_eq!(stub.calls(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_upstream_timeout_is_enforced() {
            // Gate never opens: the fetch would hang forever.
            let stub = Arc::new(StubClient::gated());
            let retriever = BootConfigRetriever::new(stub.clone());

            let result = retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await;
            assert_eq!(result, Err(ResolveError::Timeout));
            assert_eq!(stub.calls(), 1);
        }

        #[tokio::test]
        async fn test_dropped_caller_does_not_cancel_fetch() {
            let stub = Arc::new(StubClient::gated());
            let retriever = BootConfigRetriever::new(stub.clone());

            let caller = {
                let retriever = retriever.clone();
                tokio::spawn(async move { retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await })
            };
            tokio::time::sleep(Duration::from_millis(50)).await;
            caller.abort();

            if let Some(gate) = &stub.gate {
                gate.add_permits(1);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;

            // The orphaned fetch still populated the cache.
            retriever.resolve(req("aa:bb:cc:dd:ee:ff")).await.unwrap();
            assert_eq!(stub.calls(), 1);
        }
    }
}
