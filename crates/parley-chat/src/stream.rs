//! Streaming generation: turns a fragment stream into numbered token events
//! with latency stats.
//!
//! The generation runs on its own task and writes into a bounded channel.
//! Dropping the receiving end closes the channel; the producer sees this both
//! while waiting on the backend and while sending, drops the backend stream
//! and discards the partial response.

use std::sync::Arc;

use futures::StreamExt;
use parley_core::{Error, Message, Result};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::providers::{ChatModel, FragmentStream};
use crate::types::{GenerationStats, StreamEvent};

/// Options for one streaming run.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Emit a `Started` event and verbose telemetry.
    pub verbose: bool,
    /// Channel capacity between producer and consumer.
    pub buffer: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            buffer: 32,
        }
    }
}

/// Token counting and timing for a single run.
#[derive(Debug, Default)]
pub struct StatsTracker {
    tokens: u64,
    first_token_ms: Option<u64>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-empty fragment; returns its 1-based index.
    pub fn record_token(&mut self, elapsed_ms: u64) -> u64 {
        self.tokens += 1;
        self.first_token_ms.get_or_insert(elapsed_ms);
        self.tokens
    }

    pub fn finish(&self, total_time_ms: u64, model: &str) -> GenerationStats {
        let tokens_per_second = if total_time_ms == 0 {
            0.0
        } else {
            let rate = self.tokens as f64 * 1000.0 / total_time_ms as f64;
            (rate * 100.0).round() / 100.0
        };
        GenerationStats {
            total_tokens: self.tokens,
            total_time_ms,
            time_to_first_token_ms: self.first_token_ms.unwrap_or(0),
            tokens_per_second,
            model: model.to_string(),
        }
    }
}

/// Start a generation on a background task and return its event stream.
pub fn spawn_generation(
    model: Arc<dyn ChatModel>,
    messages: Vec<Message>,
    options: StreamOptions,
) -> ReceiverStream<StreamEvent> {
    let (tx, rx) = mpsc::channel(options.buffer.max(1));
    let model_name = model.config().model.clone();

    tokio::spawn(async move {
        let fragments = model.stream(&messages);
        match drive(fragments, &tx, options.verbose, &model_name).await {
            Ok(()) => {}
            Err(Error::StreamAborted) => {
                warn!("Client disconnected, abandoning generation on {}", model_name);
            }
            Err(e) => error!("Generation on {} failed: {}", model_name, e),
        }
    });

    ReceiverStream::new(rx)
}

async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<()> {
    tx.send(event).await.map_err(|_| Error::StreamAborted)
}

async fn drive(
    mut fragments: FragmentStream,
    tx: &mpsc::Sender<StreamEvent>,
    verbose: bool,
    model: &str,
) -> Result<()> {
    let start = Instant::now();
    let mut tracker = StatsTracker::new();
    let mut full_response = String::new();

    if verbose {
        emit(
            tx,
            StreamEvent::Started {
                model: model.to_string(),
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            },
        )
        .await?;
    }

    loop {
        let next = tokio::select! {
            _ = tx.closed() => return Err(Error::StreamAborted),
            next = fragments.next() => next,
        };

        match next {
            Some(Ok(fragment)) => {
                if fragment.is_empty() {
                    continue;
                }
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let index = tracker.record_token(elapsed_ms);
                full_response.push_str(&fragment);
                emit(
                    tx,
                    StreamEvent::Token {
                        content: fragment,
                        index,
                        elapsed_ms,
                    },
                )
                .await?;
            }
            Some(Err(e)) => {
                emit(tx, StreamEvent::Error { error: e.to_string() }).await?;
                return Err(e);
            }
            None => break,
        }
    }

    let stats = tracker.finish(start.elapsed().as_millis() as u64, model);
    debug!(
        "Generation done: {} tokens in {}ms (ttft {}ms, {} tok/s)",
        stats.total_tokens, stats.total_time_ms, stats.time_to_first_token_ms, stats.tokens_per_second
    );
    emit(
        tx,
        StreamEvent::Done {
            full_response,
            stats,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatModelConfig;
    use parley_core::ProviderKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    type Script = Vec<(u64, Result<String>)>;

    /// Replays fragments after fixed delays; optionally hangs at the end.
    struct ScriptedModel {
        config: ChatModelConfig,
        script: std::sync::Mutex<Option<Script>>,
        hang: bool,
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl ScriptedModel {
        fn new(script: Script, hang: bool) -> Arc<Self> {
            Arc::new(Self {
                config: ChatModelConfig {
                    backend: ProviderKind::LocalRuntime,
                    model: "scripted".into(),
                    base_url: "http://localhost:11434".into(),
                    temperature: 0.7,
                    max_tokens: 64,
                },
                script: std::sync::Mutex::new(Some(script)),
                hang,
                dropped: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedModel {
        fn stream(&self, _messages: &[Message]) -> FragmentStream {
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            let hang = self.hang;
            let flag = DropFlag(self.dropped.clone());
            Box::pin(async_stream::stream! {
                let _flag = flag;
                for (delay_ms, item) in script {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    yield item;
                }
                if hang {
                    futures::future::pending::<()>().await;
                }
            })
        }

        fn config(&self) -> &ChatModelConfig {
            &self.config
        }
    }

    async fn run(model: Arc<ScriptedModel>, verbose: bool) -> Vec<StreamEvent> {
        let options = StreamOptions {
            verbose,
            ..Default::default()
        };
        spawn_generation(model, vec![Message::user("hi")], options)
            .collect()
            .await
    }

    #[test]
    fn test_stats_tracker_rates() {
        let mut tracker = StatsTracker::new();
        assert_eq!(tracker.record_token(50), 1);
        assert_eq!(tracker.record_token(120), 2);
        assert_eq!(tracker.record_token(300), 3);
        let stats = tracker.finish(300, "m");
        assert_eq!(stats.time_to_first_token_ms, 50);
        assert_eq!(stats.total_tokens, 3);
        assert_eq!(stats.tokens_per_second, 10.0);

        let empty = StatsTracker::new().finish(0, "m");
        assert_eq!(empty.tokens_per_second, 0.0);
        assert_eq!(empty.time_to_first_token_ms, 0);

        let mut tracker = StatsTracker::new();
        tracker.record_token(1);
        assert_eq!(tracker.finish(3, "m").tokens_per_second, 333.33);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_tokens_produce_expected_stats() {
        let model = ScriptedModel::new(
            vec![
                (50, Ok("a".into())),
                (70, Ok("b".into())),
                (180, Ok("c".into())),
            ],
            false,
        );
        let events = run(model, false).await;
        assert_eq!(events.len(), 4);

        let elapsed: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token { elapsed_ms, .. } => Some(*elapsed_ms),
                _ => None,
            })
            .collect();
        assert_eq!(elapsed, vec![50, 120, 300]);

        match events.last().unwrap() {
            StreamEvent::Done { stats, .. } => {
                assert_eq!(stats.time_to_first_token_ms, 50);
                assert_eq!(stats.total_tokens, 3);
                assert_eq!(stats.total_time_ms, 300);
                assert_eq!(stats.tokens_per_second, 10.0);
                assert_eq!(stats.model, "scripted");
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_indices_are_contiguous_and_empty_fragments_dropped() {
        let model = ScriptedModel::new(
            vec![
                (0, Ok("Hel".into())),
                (0, Ok(String::new())),
                (0, Ok("lo".into())),
                (0, Ok(String::new())),
                (0, Ok(", world".into())),
            ],
            false,
        );
        let events = run(model, false).await;

        let tokens: Vec<(u64, String)> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token { index, content, .. } => Some((*index, content.clone())),
                _ => None,
            })
            .collect();
        let indices: Vec<u64> = tokens.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2, 3]);

        let done: Vec<&StreamEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(done.len(), 1);
        let concatenated: String = tokens.iter().map(|(_, c)| c.as_str()).collect();
        match done[0] {
            StreamEvent::Done { full_response, .. } => {
                assert_eq!(full_response, &concatenated);
                assert_eq!(full_response, "Hello, world");
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verbose_run_starts_with_started_event() {
        let model = ScriptedModel::new(vec![(0, Ok("x".into()))], false);
        let events = run(model, true).await;
        assert!(matches!(&events[0], StreamEvent::Started { model, .. } if model == "scripted"));
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_backend_failure_ends_with_error_event() {
        let model = ScriptedModel::new(
            vec![
                (0, Ok("partial".into())),
                (0, Err(Error::Backend("connection reset".into()))),
            ],
            false,
        );
        let events = run(model, false).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], StreamEvent::Error { error } if error.contains("connection reset")));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_dropping_receiver_abandons_backend_stream() {
        let model = ScriptedModel::new(vec![(0, Ok("first".into()))], true);
        let dropped = model.dropped.clone();

        let mut events = spawn_generation(model, vec![Message::user("hi")], StreamOptions::default());
        assert!(matches!(events.next().await, Some(StreamEvent::Token { index: 1, .. })));
        assert!(!dropped.load(Ordering::SeqCst));
        drop(events);

        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("backend stream was not dropped after the consumer went away");
    }
}
