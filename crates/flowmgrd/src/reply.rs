//! Reply composition with exactly-once delivery per request.
//!
//! Every accepted request is paired with a [`Responder`]. Answering consumes
//! the responder, so a second answer does not compile; dropping it
//! unanswered sends an `INTERNAL_ERROR` reply instead of leaving the caller
//! waiting.

use crate::error::{ErrorKind, FlowError};
use crate::messaging::{ErrorData, FlowResponse, Reply, ReplyBody, StreamType};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Northbound reply channel.
pub type ReplySink = mpsc::UnboundedSender<Reply>;

/// Reply counters.
#[derive(Debug, Default)]
pub struct ReplyStats {
    successes: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`ReplyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyStatsSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub dropped: u64,
    pub malformed: u64,
}

impl ReplyStats {
    pub fn snapshot(&self) -> ReplyStatsSnapshot {
        ReplyStatsSnapshot {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Hands out responders bound to the reply channel.
#[derive(Debug, Clone)]
pub struct ReplyComposer {
    sink: ReplySink,
    stats: Arc<ReplyStats>,
}

impl ReplyComposer {
    pub fn new(sink: ReplySink) -> Self {
        Self {
            sink,
            stats: Arc::new(ReplyStats::default()),
        }
    }

    /// Responder for an external request.
    pub fn responder(
        &self,
        correlation_id: impl Into<String>,
        stream: StreamType,
        flow_id: Option<String>,
    ) -> Responder {
        Responder {
            inner: Some(ResponderInner {
                correlation_id: correlation_id.into(),
                stream,
                flow_id,
                sink: Some(self.sink.clone()),
                stats: Arc::clone(&self.stats),
            }),
        }
    }

    /// Answers a message that could not be turned into a request.
    pub fn reject_malformed(&self, correlation_id: &str, err: &FlowError) {
        warn!("Rejecting malformed message {}: {}", correlation_id, err);
        self.stats.malformed.fetch_add(1, Ordering::Relaxed);
        let reply = Reply::new(correlation_id, ReplyBody::Error(ErrorData::from(err)));
        if self.sink.send(reply).is_err() {
            error!("Reply channel closed, reply for {} lost", correlation_id);
        }
    }

    pub fn stats(&self) -> ReplyStatsSnapshot {
        self.stats.snapshot()
    }
}

#[derive(Debug)]
struct ResponderInner {
    correlation_id: String,
    stream: StreamType,
    flow_id: Option<String>,
    /// `None` for internal requests nobody waits on.
    sink: Option<ReplySink>,
    stats: Arc<ReplyStats>,
}

impl ResponderInner {
    fn deliver(self, body: ReplyBody) {
        let Some(sink) = self.sink else {
            match &body {
                ReplyBody::FlowResponse(_) => debug!(
                    "Internal {} request for {:?} completed",
                    self.stream, self.flow_id
                ),
                ReplyBody::Error(data) => warn!(
                    "Internal {} request for {:?} failed: {}",
                    self.stream, self.flow_id, data.description
                ),
            }
            return;
        };
        let reply = Reply::new(self.correlation_id, body);
        if let Err(err) = sink.send(reply) {
            error!(
                "Reply channel closed, reply for {} lost",
                err.0.correlation_id
            );
        }
    }
}

/// One-shot answer handle for a single request.
#[derive(Debug)]
pub struct Responder {
    inner: Option<ResponderInner>,
}

impl Responder {
    /// Responder for internal requests: answers are logged, not sent.
    pub fn silent(stream: StreamType, flow_id: impl Into<String>) -> Self {
        Responder {
            inner: Some(ResponderInner {
                correlation_id: String::new(),
                stream,
                flow_id: Some(flow_id.into()),
                sink: None,
                stats: Arc::new(ReplyStats::default()),
            }),
        }
    }

    pub fn correlation_id(&self) -> &str {
        self.inner
            .as_ref()
            .map_or("", |inner| inner.correlation_id.as_str())
    }

    pub fn stream(&self) -> Option<StreamType> {
        self.inner.as_ref().map(|inner| inner.stream)
    }

    pub fn is_silent(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.sink.is_none())
    }

    pub fn success(mut self, response: FlowResponse) {
        if let Some(inner) = self.inner.take() {
            inner.stats.successes.fetch_add(1, Ordering::Relaxed);
            inner.deliver(ReplyBody::FlowResponse(response));
        }
    }

    pub fn failure(mut self, err: &FlowError) {
        if let Some(inner) = self.inner.take() {
            info!(
                "{} request {} failed: {}",
                inner.stream, inner.correlation_id, err
            );
            inner.stats.failures.fetch_add(1, Ordering::Relaxed);
            let mut data = ErrorData::from(err);
            if data.flow_id.is_none() {
                data.flow_id = inner.flow_id.clone();
            }
            inner.deliver(ReplyBody::Error(data));
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            error!(
                "{} request {} dropped without a reply",
                inner.stream, inner.correlation_id
            );
            inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
            let data = ErrorData {
                error_type: ErrorKind::InternalError,
                description: format!("{} request was abandoned before completion", inner.stream),
                flow_id: inner.flow_id.clone(),
                switch_ids: Vec::new(),
            };
            inner.deliver(ReplyBody::Error(data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_types::FlowState;
    use pretty_assertions::assert_eq;

    fn composer() -> (ReplyComposer, mpsc::UnboundedReceiver<Reply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ReplyComposer::new(tx), rx)
    }

    fn status() -> FlowResponse {
        FlowResponse::Status {
            flow_id: "f1".to_string(),
            state: FlowState::Up,
            in_flight: None,
        }
    }

    #[test]
    fn test_success_sends_one_reply() {
        let (composer, mut rx) = composer();
        let responder = composer.responder("c-1", StreamType::Status, Some("f1".to_string()));
        responder.success(status());

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.correlation_id, "c-1");
        assert!(!reply.is_error());
        assert!(rx.try_recv().is_err());
        assert_eq!(composer.stats().successes, 1);
    }

    #[test]
    fn test_failure_fills_flow_id() {
        let (composer, mut rx) = composer();
        let responder = composer.responder("c-2", StreamType::Create, Some("f1".to_string()));
        responder.failure(&FlowError::Serialization("bad".to_string()));

        let reply = rx.try_recv().unwrap();
        let data = reply.error().unwrap();
        assert_eq!(data.error_type, ErrorKind::SerializationError);
        assert_eq!(data.flow_id.as_deref(), Some("f1"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_responder_reports_internal_error() {
        let (composer, mut rx) = composer();
        drop(composer.responder("c-3", StreamType::Delete, Some("f1".to_string())));

        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.error().unwrap().error_type, ErrorKind::InternalError);
        assert!(rx.try_recv().is_err());
        assert_eq!(composer.stats().dropped, 1);
    }

    #[test]
    fn test_silent_responder_sends_nothing() {
        let (composer, mut rx) = composer();
        let responder = Responder::silent(StreamType::Sync, "f1");
        assert!(responder.is_silent());
        responder.failure(&FlowError::not_found("f1"));
        drop(Responder::silent(StreamType::Sync, "f2"));
        assert!(rx.try_recv().is_err());
        assert_eq!(composer.stats(), ReplyStatsSnapshot::default());
    }

    #[test]
    fn test_reject_malformed() {
        let (composer, mut rx) = composer();
        composer.reject_malformed("unknown", &FlowError::Serialization("eof".to_string()));
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.correlation_id, "unknown");
        assert_eq!(reply.error().unwrap().error_type, ErrorKind::SerializationError);
        assert_eq!(composer.stats().malformed, 1);
    }
}
