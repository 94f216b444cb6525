//! Error types at the discovery and forwarding seams.

use thiserror::Error;

/// Discovery failure. `Clone` because concurrent discovery callers join one
/// in-flight attempt and each receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// No endpoint reachable and the IDE has never been seen this process.
    #[error("waiting for the IDE to start (attempt {attempt}/{max})")]
    WaitingForIde { attempt: u32, max: u32 },

    /// The IDE was reachable earlier in this process but is not right now.
    #[error("connection to the IDE lost, waiting for reconnection")]
    ConnectionLost,

    /// The retry budget is spent; the IDE is unlikely to appear soon.
    #[error(
        "no working IDE endpoint found after {max} attempts; \
         make sure the IDE is running with its MCP plugin installed"
    )]
    RetriesExhausted { max: u32 },
}

/// Failure forwarding a `tools/list` request to the IDE.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The HTTP layer rejected the request (timeout, refused, bad status).
    #[error("unable to list tools from {endpoint}: {reason}")]
    Http { endpoint: String, reason: String },

    /// The response body was not a JSON-RPC envelope.
    #[error("invalid tools list response: {reason}")]
    InvalidResponse { reason: String },

    /// The IDE answered with a JSON-RPC error object.
    #[error("IDE reported an error (code {code}): {message}")]
    Ide { code: i64, message: String },

    /// The success envelope did not carry a deserializable tools array.
    #[error("malformed tools list result: {reason}")]
    MalformedResult { reason: String },
}
