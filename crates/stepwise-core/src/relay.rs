//! Stream relay - forwards provider fragments as they arrive while keeping
//! the full text for persistence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;

use crate::ports::{FragmentStream, InferenceError, InferenceProvider, InferenceRequest};

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Capacity of the fragment channel between the upstream pump and the
    /// transport. A full channel stops the pump from reading the upstream.
    pub buffer: usize,
    /// Optional deadline for the whole stream.
    pub max_duration: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer: 16,
            max_duration: None,
        }
    }
}

/// Why a stream ended early. Always carries the text produced so far.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Upstream failed after {} bytes: {source}", .partial.len())]
    Upstream {
        source: InferenceError,
        partial: String,
    },

    #[error("Client disconnected after {} bytes", .partial.len())]
    Cancelled { partial: String },

    #[error("Stream exceeded {limit:?} after {} bytes", .partial.len())]
    TimedOut { limit: Duration, partial: String },
}

impl StreamError {
    pub fn partial(&self) -> &str {
        match self {
            StreamError::Upstream { partial, .. }
            | StreamError::Cancelled { partial }
            | StreamError::TimedOut { partial, .. } => partial,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled { .. })
    }
}

/// Opens streaming calls against an [`InferenceProvider`].
///
/// The relay never retries, never parses the generated text and never
/// reorders or batches fragments.
#[derive(Clone)]
pub struct StreamRelay {
    provider: Arc<dyn InferenceProvider>,
    config: RelayConfig,
}

impl StreamRelay {
    pub fn new(provider: Arc<dyn InferenceProvider>, config: RelayConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &Arc<dyn InferenceProvider> {
        &self.provider
    }

    /// Drive one streaming call to the end on the current task, invoking
    /// `on_fragment` for each fragment in arrival order.
    pub async fn run<F>(&self, request: &InferenceRequest, mut on_fragment: F) -> Result<String, StreamError>
    where
        F: FnMut(&str) + Send,
    {
        let upstream = self
            .provider
            .stream(request)
            .await
            .map_err(|source| StreamError::Upstream {
                source,
                partial: String::new(),
            })?;

        pump(
            upstream,
            self.config.max_duration,
            |fragment| {
                on_fragment(&fragment);
                std::future::ready(true)
            },
            std::future::pending::<()>(),
        )
        .await
    }

    /// Open a streaming call and pump it from a background task into a
    /// bounded channel.
    ///
    /// Fails only if the upstream cannot be opened. Dropping the fragment
    /// receiver cancels the pump and closes the upstream.
    pub async fn open(&self, request: &InferenceRequest) -> Result<RelayStream, InferenceError> {
        let upstream = self.provider.stream(request).await?;
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        let max_duration = self.config.max_duration;

        let completion = tokio::spawn(async move {
            let watcher = tx.clone();
            pump(
                upstream,
                max_duration,
                move |fragment| {
                    let tx = tx.clone();
                    async move { tx.send(fragment).await.is_ok() }
                },
                async move { watcher.closed().await },
            )
            .await
        });

        Ok(RelayStream {
            fragments: rx,
            completion,
        })
    }
}

/// A live relayed stream: fragments on one side, the final text on the other.
pub struct RelayStream {
    fragments: mpsc::Receiver<String>,
    completion: JoinHandle<Result<String, StreamError>>,
}

impl RelayStream {
    pub async fn next_fragment(&mut self) -> Option<String> {
        self.fragments.recv().await
    }

    /// Split into the fragment stream for the transport and the pump handle.
    pub fn into_parts(
        self,
    ) -> (
        ReceiverStream<String>,
        JoinHandle<Result<String, StreamError>>,
    ) {
        (ReceiverStream::new(self.fragments), self.completion)
    }

    /// Wait for the accumulated text. Fragments not yet consumed are discarded.
    pub async fn finish(self) -> Result<String, StreamError> {
        let RelayStream {
            mut fragments,
            completion,
        } = self;
        while fragments.recv().await.is_some() {}
        join_relay(completion).await
    }
}

/// Await a pump task, folding a panicked or aborted task into [`StreamError`].
pub async fn join_relay(
    completion: JoinHandle<Result<String, StreamError>>,
) -> Result<String, StreamError> {
    completion.await.unwrap_or_else(|e: JoinError| {
        Err(StreamError::Upstream {
            source: InferenceError::Stream(format!("relay task failed: {e}")),
            partial: String::new(),
        })
    })
}

enum Stop {
    Upstream(InferenceError),
    Cancelled,
    TimedOut(Duration),
}

/// Pull fragments from `upstream`, accumulating them and handing each to
/// `forward`. `forward` returning false, or `closed` resolving, means the
/// consumer is gone.
async fn pump<F, Fut, C>(
    mut upstream: FragmentStream,
    max_duration: Option<Duration>,
    mut forward: F,
    closed: C,
) -> Result<String, StreamError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
    C: Future<Output = ()>,
{
    let mut text = String::new();

    let pumping = async {
        tokio::pin!(closed);
        loop {
            let next = tokio::select! {
                next = upstream.next() => next,
                () = &mut closed => return Err(Stop::Cancelled),
            };

            match next {
                None => return Ok(()),
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    text.push_str(&fragment);
                    if !forward(fragment).await {
                        return Err(Stop::Cancelled);
                    }
                }
                Some(Err(e)) => return Err(Stop::Upstream(e)),
            }
        }
    };

    let outcome = match max_duration {
        Some(limit) => tokio::time::timeout(limit, pumping)
            .await
            .unwrap_or(Err(Stop::TimedOut(limit))),
        None => pumping.await,
    };

    // Close the upstream connection before handing the result back.
    drop(upstream);

    match outcome {
        Ok(()) => {
            tracing::debug!(bytes = text.len(), "Relay completed");
            Ok(text)
        }
        Err(Stop::Upstream(source)) => Err(StreamError::Upstream {
            source,
            partial: text,
        }),
        Err(Stop::Cancelled) => Err(StreamError::Cancelled { partial: text }),
        Err(Stop::TimedOut(limit)) => Err(StreamError::TimedOut {
            limit,
            partial: text,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::testing::{ScriptedProvider, Step};

    fn request() -> InferenceRequest {
        InferenceRequest::chat("system", &[], "what is 2+2?", 64)
    }

    #[tokio::test]
    async fn run_forwards_fragments_in_arrival_order() {
        let provider = Arc::new(ScriptedProvider::fragments(&["The ", "answer ", "is 4."]));
        let relay = StreamRelay::new(provider, RelayConfig::default());
        let seen = Mutex::new(Vec::new());

        let text = relay
            .run(&request(), |fragment| seen.lock().unwrap().push(fragment.to_string()))
            .await
            .unwrap();

        assert_eq!(seen.into_inner().unwrap(), vec!["The ", "answer ", "is 4."]);
        assert_eq!(text, "The answer is 4.");
    }

    #[tokio::test]
    async fn run_returns_partial_text_on_mid_stream_failure() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![
            Step::fragment("Once "),
            Step::fragment("upon "),
            Step::Fail(InferenceError::Provider {
                kind: "overloaded_error".into(),
                message: "Overloaded".into(),
            }),
            Step::fragment("never seen"),
        ]));
        let relay = StreamRelay::new(provider.clone(), RelayConfig::default());
        let mut count = 0;

        let err = relay.run(&request(), |_| count += 1).await.unwrap_err();

        assert!(matches!(err, StreamError::Upstream { .. }));
        assert_eq!(err.partial(), "Once upon ");
        assert_eq!(count, 2);
        assert!(provider.upstream_closed());
    }

    #[tokio::test]
    async fn open_failure_is_reported_before_any_fragment() {
        let provider = Arc::new(ScriptedProvider::failing_open(InferenceError::Status {
            status: 401,
            body: "bad key".into(),
        }));
        let relay = StreamRelay::new(provider, RelayConfig::default());

        assert!(relay.open(&request()).await.is_err());
        let err = relay.run(&request(), |_| {}).await.unwrap_err();
        assert_eq!(err.partial(), "");
    }

    #[tokio::test]
    async fn channel_delivers_fragments_then_final_text() {
        let provider = Arc::new(ScriptedProvider::fragments(&["a", "b", "c"]));
        let relay = StreamRelay::new(provider, RelayConfig::default());

        let mut stream = relay.open(&request()).await.unwrap();
        let mut received = Vec::new();
        while let Some(fragment) = stream.next_fragment().await {
            received.push(fragment);
        }

        assert_eq!(received, vec!["a", "b", "c"]);
        assert_eq!(stream.finish().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn slow_consumer_stops_the_upstream_pull() {
        let frags: Vec<String> = (0..50).map(|i| format!("{i},")).collect();
        let refs: Vec<&str> = frags.iter().map(String::as_str).collect();
        let provider = Arc::new(ScriptedProvider::fragments(&refs));
        let relay = StreamRelay::new(
            provider.clone(),
            RelayConfig {
                buffer: 2,
                max_duration: None,
            },
        );

        let mut stream = relay.open(&request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // channel capacity plus the one fragment the pump is blocked sending
        assert!(provider.pulled() <= 3, "pulled {}", provider.pulled());

        assert_eq!(stream.next_fragment().await.as_deref(), Some("0,"));
        let text = stream.finish().await.unwrap();
        assert_eq!(text, frags.concat());
    }

    #[tokio::test]
    async fn dropping_the_consumer_closes_an_idle_upstream() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![
            Step::fragment("thinking..."),
            Step::Hang,
        ]));
        let relay = StreamRelay::new(provider.clone(), RelayConfig::default());

        let mut stream = relay.open(&request()).await.unwrap();
        assert_eq!(stream.next_fragment().await.as_deref(), Some("thinking..."));

        let (fragments, completion) = stream.into_parts();
        drop(fragments);

        let err = tokio::time::timeout(Duration::from_secs(1), join_relay(completion))
            .await
            .expect("pump should stop once the consumer is gone")
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.partial(), "thinking...");
        assert!(provider.upstream_closed());
    }

    #[tokio::test]
    async fn max_duration_aborts_with_partial() {
        let provider = Arc::new(ScriptedProvider::with_script(vec![
            Step::fragment("slow "),
            Step::Hang,
        ]));
        let relay = StreamRelay::new(
            provider,
            RelayConfig {
                buffer: 4,
                max_duration: Some(Duration::from_millis(20)),
            },
        );

        let err = relay.run(&request(), |_| {}).await.unwrap_err();
        assert!(matches!(err, StreamError::TimedOut { .. }));
        assert_eq!(err.partial(), "slow ");
    }
}
