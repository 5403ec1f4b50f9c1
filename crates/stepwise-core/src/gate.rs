//! Request gate - rate limit first, then talk to the paid upstream.
//!
//! Per request: `Received -> LimitChecked -> Rejected` or
//! `Admitted -> Streaming -> Completed | Aborted`. No state is revisited, and a
//! rejected request never reaches the inference provider.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::{Decision, RateLimitKey, WindowPolicy};
use crate::ports::{Incident, IncidentReporter, InferenceRequest, LogIncidents};
use crate::rate_limit::SlidingWindowLimiter;
use crate::relay::{StreamError, StreamRelay, join_relay};

/// How a streamed request ended.
#[derive(Debug)]
pub enum StreamOutcome {
    Completed { text: String },
    Aborted { error: StreamError },
}

impl StreamOutcome {
    /// Everything the provider produced, complete or not.
    pub fn text(&self) -> &str {
        match self {
            StreamOutcome::Completed { text } => text,
            StreamOutcome::Aborted { error } => error.partial(),
        }
    }
}

/// Persistence callback run once the stream has ended, successfully or not.
pub type CompletionHook = Box<dyn FnOnce(StreamOutcome) -> BoxFuture<'static, ()> + Send>;

/// Result of a streaming request.
pub enum GateResult {
    /// Live fragments for the transport, in arrival order.
    StreamingOk(ReceiverStream<String>),
    RateLimited { retry_after: Duration },
    UpstreamFailed { reason: String },
}

/// Failure of a single-shot request.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Upstream failed: {reason}")]
    UpstreamFailed { reason: String },
}

/// Orchestrates the limiter and the relay for one inbound request.
pub struct RequestGate {
    limiter: Arc<SlidingWindowLimiter>,
    relay: StreamRelay,
    incidents: Arc<dyn IncidentReporter>,
}

impl RequestGate {
    pub fn new(limiter: Arc<SlidingWindowLimiter>, relay: StreamRelay) -> Self {
        Self {
            limiter,
            relay,
            incidents: Arc::new(LogIncidents),
        }
    }

    pub fn with_incidents(mut self, incidents: Arc<dyn IncidentReporter>) -> Self {
        self.incidents = incidents;
        self
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    async fn admit(
        &self,
        action: &str,
        caller_id: &str,
        policy: &WindowPolicy,
    ) -> Result<(), Duration> {
        let key = RateLimitKey::new(action, caller_id);
        match self.limiter.check(&key, policy).await {
            Decision::Admitted => Ok(()),
            Decision::Rejected { retry_after } => {
                tracing::info!(
                    key = %key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Request rejected by rate limit"
                );
                Err(retry_after)
            }
        }
    }

    /// Check the limit and, if admitted, start streaming.
    ///
    /// `on_complete` runs after the stream ends, including when the client
    /// disconnects or the upstream fails part way through. It does not run
    /// for rejected requests or when the upstream could not be opened.
    pub async fn handle(
        &self,
        action: &str,
        caller_id: &str,
        policy: &WindowPolicy,
        request: InferenceRequest,
        on_complete: CompletionHook,
    ) -> GateResult {
        if let Err(retry_after) = self.admit(action, caller_id, policy).await {
            return GateResult::RateLimited { retry_after };
        }

        let stream = match self.relay.open(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                self.incidents.report(Incident::UpstreamStream {
                    action: action.to_string(),
                    caller_id: caller_id.to_string(),
                    error: e.to_string(),
                    partial_len: 0,
                });
                return GateResult::UpstreamFailed {
                    reason: e.to_string(),
                };
            }
        };

        tracing::debug!(action = %action, caller_id = %caller_id, "Streaming started");

        let (fragments, completion) = stream.into_parts();
        let incidents = self.incidents.clone();
        let action = action.to_string();
        let caller_id = caller_id.to_string();

        tokio::spawn(async move {
            let outcome = match join_relay(completion).await {
                Ok(text) => {
                    tracing::debug!(action = %action, caller_id = %caller_id, bytes = text.len(), "Stream completed");
                    StreamOutcome::Completed { text }
                }
                Err(error) if error.is_cancelled() => {
                    tracing::info!(action = %action, caller_id = %caller_id, "Client disconnected mid-stream");
                    StreamOutcome::Aborted { error }
                }
                Err(error) => {
                    incidents.report(Incident::UpstreamStream {
                        action,
                        caller_id,
                        error: error.to_string(),
                        partial_len: error.partial().len(),
                    });
                    StreamOutcome::Aborted { error }
                }
            };
            on_complete(outcome).await;
        });

        GateResult::StreamingOk(fragments)
    }

    /// Check the limit and, if admitted, run a single-shot completion.
    pub async fn complete(
        &self,
        action: &str,
        caller_id: &str,
        policy: &WindowPolicy,
        request: &InferenceRequest,
    ) -> Result<String, GateError> {
        self.admit(action, caller_id, policy)
            .await
            .map_err(|retry_after| GateError::RateLimited { retry_after })?;

        self.relay.provider().complete(request).await.map_err(|e| {
            self.incidents.report(Incident::UpstreamStream {
                action: action.to_string(),
                caller_id: caller_id.to_string(),
                error: e.to_string(),
                partial_len: 0,
            });
            GateError::UpstreamFailed {
                reason: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::{FutureExt, StreamExt};
    use tokio::sync::oneshot;

    use super::*;
    use crate::ports::InferenceError;
    use crate::relay::RelayConfig;
    use crate::testing::{RecordingIncidents, ScriptedProvider, Step, VecWindowStore};

    fn gate(provider: Arc<ScriptedProvider>, incidents: Arc<RecordingIncidents>) -> RequestGate {
        let limiter = Arc::new(
            SlidingWindowLimiter::new(Arc::new(VecWindowStore::default()))
                .with_incidents(incidents.clone()),
        );
        RequestGate::new(limiter, StreamRelay::new(provider, RelayConfig::default()))
            .with_incidents(incidents)
    }

    fn hook() -> (CompletionHook, oneshot::Receiver<StreamOutcome>) {
        let (tx, rx) = oneshot::channel();
        let hook: CompletionHook = Box::new(move |outcome| {
            async move {
                let _ = tx.send(outcome);
            }
            .boxed()
        });
        (hook, rx)
    }

    fn policy(limit: u32) -> WindowPolicy {
        WindowPolicy::new(limit, Duration::from_secs(300)).unwrap()
    }

    fn request() -> InferenceRequest {
        InferenceRequest::chat("tutor", &[], "help", 128)
    }

    #[tokio::test]
    async fn admitted_request_streams_and_reports_completion() {
        let provider = Arc::new(ScriptedProvider::fragments(&["The ", "answer ", "is 4."]));
        let gate = gate(provider, Arc::default());
        let (hook, done) = hook();

        let GateResult::StreamingOk(fragments) =
            gate.handle("chat", "u1", &policy(5), request(), hook).await
        else {
            panic!("expected a stream");
        };

        let received: Vec<String> = fragments.collect().await;
        assert_eq!(received, vec!["The ", "answer ", "is 4."]);

        match done.await.unwrap() {
            StreamOutcome::Completed { text } => assert_eq!(text, "The answer is 4."),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_request_never_reaches_the_provider() {
        let provider = Arc::new(ScriptedProvider::fragments(&["paid"]));
        let gate = gate(provider.clone(), Arc::default());

        let (first, _done) = hook();
        assert!(matches!(
            gate.handle("chat", "u1", &policy(1), request(), first).await,
            GateResult::StreamingOk(_)
        ));
        assert_eq!(provider.calls(), 1);

        let (second, _) = hook();
        match gate.handle("chat", "u1", &policy(1), request(), second).await {
            GateResult::RateLimited { retry_after } => {
                assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(300));
            }
            _ => panic!("expected rate limit"),
        }

        let err = gate
            .complete("chat", "u1", &policy(1), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::RateLimited { .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn mid_stream_failure_hands_partial_text_to_hook_and_reports() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![
            Step::fragment("half "),
            Step::Fail(InferenceError::Stream("connection reset".into())),
        ]));
        let incidents = Arc::new(RecordingIncidents::default());
        let gate = gate(provider, incidents.clone());
        let (hook, done) = hook();

        let GateResult::StreamingOk(fragments) =
            gate.handle("chat", "u1", &policy(5), request(), hook).await
        else {
            panic!("expected a stream");
        };
        let received: Vec<String> = fragments.collect().await;
        assert_eq!(received, vec!["half "]);

        let outcome = done.await.unwrap();
        assert!(matches!(outcome, StreamOutcome::Aborted { .. }));
        assert_eq!(outcome.text(), "half ");

        let reported = incidents.take();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].kind(), "upstream_stream");
    }

    #[tokio::test]
    async fn client_disconnect_hands_partial_text_to_hook_without_incident() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![
            Step::fragment("first "),
            Step::Hang,
        ]));
        let incidents = Arc::new(RecordingIncidents::default());
        let gate = gate(provider.clone(), incidents.clone());
        let (hook, done) = hook();

        let GateResult::StreamingOk(mut fragments) =
            gate.handle("chat", "u1", &policy(5), request(), hook).await
        else {
            panic!("expected a stream");
        };
        assert_eq!(fragments.next().await.as_deref(), Some("first "));
        drop(fragments);

        match done.await.unwrap() {
            StreamOutcome::Aborted { error } => {
                assert!(matches!(error, StreamError::Cancelled { .. }));
                assert_eq!(error.partial(), "first ");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(provider.upstream_closed());
        assert!(incidents.take().is_empty());
    }

    #[tokio::test]
    async fn open_failure_is_upstream_failed_without_hook() {
        let provider = Arc::new(ScriptedProvider::failing_open(InferenceError::Request(
            "dns failure".into(),
        )));
        let gate = gate(provider, Arc::default());
        let (hook, done) = hook();

        match gate.handle("chat", "u1", &policy(5), request(), hook).await {
            GateResult::UpstreamFailed { reason } => assert!(reason.contains("dns failure")),
            _ => panic!("expected upstream failure"),
        }
        assert!(done.await.is_err());
    }

    #[tokio::test]
    async fn single_shot_completion_returns_text() {
        let provider = Arc::new(ScriptedProvider::fragments(&[]).with_completion("{\"valid\":false}"));
        let gate = gate(provider, Arc::default());

        let text = gate
            .complete("parse", "u1", &policy(1), &request())
            .await
            .unwrap();
        assert_eq!(text, "{\"valid\":false}");
    }
}
