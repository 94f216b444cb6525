//! Single-endpoint liveness probe.
//!
//! Sends one `tools/list` request with a short timeout and reports the raw
//! response body on success. Failures never propagate; the connection manager
//! consumes the outcome as a plain signal.

use std::time::Duration;

use super::endpoint::IdeEndpoint;
use super::protocol::RpcRequest;

/// Probe `endpoint` for a live IDE plugin.
///
/// Returns the raw `tools/list` response body on success, `None` on timeout,
/// connection failure, or a non-success status. The per-request deadline makes
/// reqwest tear down the pending request, so a hung port cannot leak a
/// connection attempt.
pub async fn probe(
    http: &reqwest::Client,
    endpoint: &IdeEndpoint,
    timeout: Duration,
) -> Option<String> {
    tracing::debug!("probing {endpoint} for availability");
    let response = match http
        .post(endpoint.url())
        .timeout(timeout)
        .json(&RpcRequest::discovery_probe())
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("probe of {endpoint} failed: {e}");
            return None;
        }
    };
    if !response.status().is_success() {
        tracing::debug!("probe of {endpoint} answered status {}", response.status());
        return None;
    }
    match response.text().await {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::debug!("probe of {endpoint} failed while reading the body: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ide::testutil::{StubResponse, free_port, spawn_stub};

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let stub = spawn_stub(vec![StubResponse::ok(r#"{"result":{"tools":[]}}"#)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let body = probe(&client(), &ep, Duration::from_secs(1)).await;
        assert_eq!(body.as_deref(), Some(r#"{"result":{"tools":[]}}"#));
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let stub = spawn_stub(vec![StubResponse::status(404)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        assert!(probe(&client(), &ep, Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn refused_connection_is_a_failure() {
        let ep = IdeEndpoint::new("127.0.0.1", free_port().await);
        assert!(probe(&client(), &ep, Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let stub = spawn_stub(vec![
            StubResponse::ok("{}").delayed(Duration::from_secs(5)),
        ])
        .await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        assert!(probe(&client(), &ep, Duration::from_millis(100)).await.is_none());
    }
}
