use thiserror::Error;

/// Errors surfaced by a venue client while connecting or streaming.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("DNS resolution failed for {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TCP connect failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("subscription rejected by venue: {0}")]
    SubscribeRejected(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ClientError {
    /// Fatal errors transition the client to `Failed` instead of
    /// reconnecting. DNS failure is fatal: a host that does not resolve
    /// is a configuration problem, not a transient outage.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Resolve { .. }
                | ClientError::SubscribeRejected(_)
                | ClientError::Auth(_)
                | ClientError::Tls(_)
        )
    }
}

/// Errors from the REST snapshot path.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ClientError::SubscribeRejected("bad channel".into()).is_fatal());
        assert!(ClientError::Auth("invalid key".into()).is_fatal());
        assert!(ClientError::Resolve {
            host: "nosuch.example".into(),
            source: std::io::Error::other("not found"),
        }
        .is_fatal());
        assert!(!ClientError::Connect(std::io::Error::other("reset")).is_fatal());
    }
}
