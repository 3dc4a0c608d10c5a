//! Scripted transport for dispatcher tests.

use crate::application::ports::{OutboundRequest, Transport, TransportError, TransportResponse};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A request as seen by [`MockTransport`], with the tokio time it arrived.
#[derive(Debug, Clone)]
pub struct SentRequest {
    /// The request as handed to the transport
    pub request: OutboundRequest,
    /// Tokio time at which the transport received it
    pub at: tokio::time::Instant,
}

#[derive(Debug, Default)]
struct Script {
    sent: Vec<SentRequest>,
    replies: VecDeque<Result<TransportResponse, TransportError>>,
}

/// Transport that records requests and answers from a script.
///
/// Queued replies are consumed in order; once the script runs out every
/// request succeeds with an empty response. An optional latency is slept
/// with `tokio::time::sleep` before answering.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    latency: Duration,
}

impl MockTransport {
    /// Transport that accepts everything immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue the reply for the next unanswered request.
    pub fn push_reply(&self, reply: Result<TransportResponse, TransportError>) {
        self.script().replies.push_back(reply);
    }

    /// Queue a failure for the next unanswered request.
    pub fn push_error(&self, error: TransportError) {
        self.push_reply(Err(error));
    }

    /// Every request received so far.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.script().sent.clone()
    }

    /// Bodies of every request received so far.
    pub fn bodies(&self) -> Vec<String> {
        self.script()
            .sent
            .iter()
            .map(|s| s.request.body.clone())
            .collect()
    }

    /// Number of requests received so far.
    pub fn calls(&self) -> usize {
        self.script().sent.len()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .expect("MockTransport mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let reply = {
            let mut script = self.script();
            script.sent.push(SentRequest {
                request,
                at: tokio::time::Instant::now(),
            });
            script.replies.pop_front()
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        reply.unwrap_or_else(|| Ok(TransportResponse::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_follow_script() {
        let transport = MockTransport::new();
        transport.push_error(TransportError::new("boom").with_status(500));

        let first = transport.send(OutboundRequest::text("ep", "a")).await;
        let second = transport.send(OutboundRequest::text("ep", "b")).await;

        assert_eq!(first.unwrap_err().status, Some(500));
        assert!(second.is_ok());
        assert_eq!(transport.bodies(), vec!["a".to_string(), "b".to_string()]);
    }
}
