//! Candidate IDE endpoint value type.

use std::fmt;

/// An IDE plugin endpoint (host + port). Compared structurally; also used as
/// the key for per-endpoint change tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdeEndpoint {
    host: String,
    port: u16,
}

impl IdeEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL the IDE plugin serves JSON-RPC on.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for IdeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_as_http_url() {
        let ep = IdeEndpoint::new("127.0.0.1", 63342);
        assert_eq!(ep.url(), "http://127.0.0.1:63342");
        assert_eq!(ep.to_string(), "http://127.0.0.1:63342");
    }

    #[test]
    fn compared_structurally() {
        assert_eq!(
            IdeEndpoint::new("127.0.0.1", 9960),
            IdeEndpoint::new("127.0.0.1", 9960)
        );
        assert_ne!(
            IdeEndpoint::new("127.0.0.1", 9960),
            IdeEndpoint::new("127.0.0.1", 9961)
        );
    }
}
