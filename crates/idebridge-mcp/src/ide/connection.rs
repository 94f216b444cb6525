//! Discovery state machine for the IDE endpoint.
//!
//! Responsibilities:
//! - Run the discovery algorithm: explicit override port, then the cached
//!   endpoint, then a concurrent scan of the profile's port range.
//! - Deduplicate concurrent discovery requests into one in-flight attempt.
//! - Track the retry budget and whether the IDE was ever reachable.
//! - Detect tool-list changes between successful probes and fire the
//!   registered notification callback.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use super::endpoint::IdeEndpoint;
use super::error::DiscoveryError;
use super::probe::probe;
use crate::config::BridgeConfig;

/// Zero-argument signal fired when the IDE's tool list changed.
pub type NotificationCallback = Box<dyn Fn() + Send + Sync>;

type DiscoveryFuture = Shared<BoxFuture<'static, Result<IdeEndpoint, DiscoveryError>>>;

/// Did the tool list response change between two successful probes of the
/// same endpoint? The first observation is never a change; that would fire a
/// spurious notification on first connect.
fn list_changed(previous: Option<&str>, current: &str) -> bool {
    matches!(previous, Some(previous) if previous != current)
}

/// Mutable discovery state. Only mutated from within the single in-flight
/// discovery attempt (or the probes it runs), so a plain mutex locked in
/// short non-await sections is enough.
#[derive(Default)]
struct DiscoveryState {
    /// Last known-good endpoint; never set speculatively.
    cached_endpoint: Option<IdeEndpoint>,
    /// Last successful probe body, keyed by endpoint identity, so moving
    /// between endpoints does not itself register as a tool-list change.
    last_bodies: HashMap<IdeEndpoint, String>,
    retry_count: u32,
    /// Sticky: once true, stays true for the rest of the process.
    ever_connected: bool,
}

struct Inner {
    config: BridgeConfig,
    http: reqwest::Client,
    state: Mutex<DiscoveryState>,
    in_flight: Mutex<Option<DiscoveryFuture>>,
    notification: Mutex<Option<NotificationCallback>>,
}

/// Owns endpoint discovery and caching for one IDE instance. Cheap to clone;
/// clones share the same discovery state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                http: reqwest::Client::new(),
                state: Mutex::new(DiscoveryState::default()),
                in_flight: Mutex::new(None),
                notification: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// HTTP client shared with the forwarding layer, so forwarded calls reuse
    /// the connection pool the probes warmed up.
    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Register the callback fired on tool-list changes. One slot; a second
    /// registration replaces the first.
    pub fn set_notification_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        tracing::debug!("setting notification callback");
        *self.inner.notification.lock().unwrap() = Some(Box::new(callback));
    }

    /// Current best-known endpoint. Never triggers discovery.
    pub fn cached_endpoint(&self) -> Option<IdeEndpoint> {
        self.inner.state.lock().unwrap().cached_endpoint.clone()
    }

    /// Find a live IDE endpoint, joining the in-flight attempt when one exists.
    ///
    /// At most one discovery algorithm runs at a time; every caller arriving
    /// while it runs awaits the same shared future and observes the same
    /// outcome.
    pub async fn find_working_ide_endpoint(&self) -> Result<IdeEndpoint, DiscoveryError> {
        let attempt = {
            let mut in_flight = self.inner.in_flight.lock().unwrap();
            if let Some(pending) = in_flight.as_ref() {
                tracing::info!("discovery already in progress, joining the existing attempt");
                pending.clone()
            } else {
                let this = self.clone();
                let fut: BoxFuture<'static, _> = async move {
                    let outcome = this.perform_discovery().await;
                    this.inner.in_flight.lock().unwrap().take();
                    outcome
                }
                .boxed();
                let shared = fut.shared();
                *in_flight = Some(shared.clone());
                shared
            }
        };
        attempt.await
    }

    /// Refresh the cached endpoint, swallowing discovery failures.
    ///
    /// Fire-and-forget entry point for the periodic scheduler and the
    /// cache-miss path; the cache is left untouched when discovery fails.
    pub async fn update_ide_endpoint(&self) {
        match self.find_working_ide_endpoint().await {
            Ok(endpoint) => {
                self.inner.state.lock().unwrap().cached_endpoint = Some(endpoint);
            }
            Err(e) => {
                tracing::warn!("failed to update the IDE endpoint: {e}");
            }
        }
    }

    async fn perform_discovery(&self) -> Result<IdeEndpoint, DiscoveryError> {
        let config = &self.inner.config;
        let max = config.max_retries;
        {
            let state = self.inner.state.lock().unwrap();
            tracing::info!(
                "looking for a working {} endpoint (attempt {}/{})",
                config.ide,
                state.retry_count + 1,
                max
            );
        }

        // 1. An explicit override port short-circuits the scan.
        if let Some(port) = config.override_port {
            let endpoint = IdeEndpoint::new(&config.host, port);
            if self.probe_endpoint(&endpoint).await {
                tracing::info!("configured port {port} is working, using {endpoint}");
                return Ok(endpoint);
            }
            tracing::warn!("configured IDE_PORT={port} is not responding, will retry later");
        }

        // 2. Re-check the cached endpoint before paying for a full scan.
        if let Some(endpoint) = self.cached_endpoint()
            && self.probe_endpoint(&endpoint).await
        {
            tracing::debug!("cached endpoint {endpoint} is still working");
            return Ok(endpoint);
        }

        // 3. Scan the profile's port range with all ports probed concurrently.
        // The first successful probe wins; dropping the set abandons the rest.
        let range = config.port_range;
        tracing::info!("scanning port range {}-{}", range.start, range.end);
        let mut scan = tokio::task::JoinSet::new();
        for port in range.start..=range.end {
            let this = self.clone();
            let endpoint = IdeEndpoint::new(&config.host, port);
            scan.spawn(async move { this.probe_endpoint(&endpoint).await.then_some(endpoint) });
        }
        while let Some(joined) = scan.join_next().await {
            match joined {
                Ok(Some(endpoint)) => {
                    {
                        let mut state = self.inner.state.lock().unwrap();
                        state.cached_endpoint = Some(endpoint.clone());
                        state.retry_count = 0;
                    }
                    tracing::info!("found working endpoint at {endpoint}");
                    return Ok(endpoint);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("scan task failed: {e}"),
            }
        }

        // 4. Nothing answered: spend one retry and classify the failure.
        let mut state = self.inner.state.lock().unwrap();
        state.retry_count += 1;
        if state.retry_count >= max {
            state.retry_count = 0;
            tracing::error!("reached maximum retry count ({max}), no working endpoint found");
            Err(DiscoveryError::RetriesExhausted { max })
        } else if state.ever_connected {
            tracing::warn!("connection lost, previously connected but nothing is responding");
            Err(DiscoveryError::ConnectionLost)
        } else {
            tracing::warn!(
                "no working endpoint in range {}-{}, waiting for the IDE to start",
                range.start,
                range.end
            );
            Err(DiscoveryError::WaitingForIde {
                attempt: state.retry_count,
                max,
            })
        }
    }

    /// Probe one endpoint and fold the outcome into discovery state.
    ///
    /// Success resets the retry budget, marks the process as having connected
    /// at least once, and runs change detection against the last body seen
    /// for this endpoint.
    async fn probe_endpoint(&self, endpoint: &IdeEndpoint) -> bool {
        let Some(body) = probe(&self.inner.http, endpoint, self.inner.config.probe_timeout).await
        else {
            return false;
        };
        let (first_connect, changed) = {
            let mut state = self.inner.state.lock().unwrap();
            let changed = list_changed(state.last_bodies.get(endpoint).map(String::as_str), &body);
            state.last_bodies.insert(endpoint.clone(), body);
            state.retry_count = 0;
            let first_connect = !state.ever_connected;
            state.ever_connected = true;
            (first_connect, changed)
        };
        if first_connect {
            tracing::info!("first successful connection to {endpoint}");
        }
        if changed {
            tracing::info!("tool list changed since the last check");
            self.send_tools_changed();
        }
        true
    }

    /// Fire the registered notification callback, isolating panics so a
    /// misbehaving consumer cannot break discovery.
    fn send_tools_changed(&self) {
        let notification = self.inner.notification.lock().unwrap();
        match notification.as_ref() {
            Some(callback) => {
                if std::panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                    tracing::error!("tool list change callback panicked");
                } else {
                    tracing::debug!("tool list change notification delivered");
                }
            }
            None => {
                tracing::warn!("no notification callback set, tool list change not delivered");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn retry_count(&self) -> u32 {
        self.inner.state.lock().unwrap().retry_count
    }

    #[cfg(test)]
    pub(crate) fn set_retry_count(&self, retry_count: u32) {
        self.inner.state.lock().unwrap().retry_count = retry_count;
    }

    #[cfg(test)]
    pub(crate) fn ever_connected(&self) -> bool {
        self.inner.state.lock().unwrap().ever_connected
    }

    #[cfg(test)]
    pub(crate) fn seed_cached_endpoint(&self, endpoint: IdeEndpoint) {
        self.inner.state.lock().unwrap().cached_endpoint = Some(endpoint);
    }
}
