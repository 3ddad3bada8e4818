#![forbid(unsafe_code)]

//! Relay to a second deployment of this API.
//!
//! Unlike the primary upstream calls, the relay carries an explicit timeout
//! and keeps timeouts, remote error responses, and other transport failures
//! apart so the HTTP layer can map them to 504 / relayed status / 500.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use ureq::{Agent, AgentBuilder};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Remote API responded with status {status}: {message}")]
    RemoteStatus { status: u16, message: String },
    #[error("Request to remote API timed out")]
    Timeout,
    #[error("Failed to reach remote API: {0}")]
    Network(String),
}

#[derive(Clone)]
pub struct ProxyClient {
    agent: Agent,
    target: String,
}

impl ProxyClient {
    pub fn new(target: impl Into<String>) -> Self {
        Self::with_timeout(target, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: AgentBuilder::new().timeout(timeout).build(),
            target: target.into().trim_end_matches('/').to_string(),
        }
    }

    /// Forwards a stats request to the remote deployment and returns its JSON
    /// body. The caller re-wraps the payload in its own envelope.
    pub fn relay_stats(
        &self,
        video_id: Option<&str>,
        url: Option<&str>,
    ) -> Result<Value, ProxyError> {
        let mut request = self
            .agent
            .get(&format!("{}/api/youtube/stats", self.target));
        if let Some(id) = video_id {
            request = request.query("videoId", id);
        }
        if let Some(url) = url {
            request = request.query("url", url);
        }

        match request.call() {
            Ok(response) => response
                .into_json()
                .map_err(|err| ProxyError::Network(err.to_string())),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(ProxyError::RemoteStatus {
                    status,
                    message: remote_message(&body),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                if is_timeout(&transport) {
                    Err(ProxyError::Timeout)
                } else {
                    Err(ProxyError::Network(transport.to_string()))
                }
            }
        }
    }
}

/// Prefers the remote envelope's `message` field; falls back to the raw body.
fn remote_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    if transport.kind() != ureq::ErrorKind::Io {
        return false;
    }
    let mut source = std::error::Error::source(transport);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            );
        }
        source = inner.source();
    }
    false
}
