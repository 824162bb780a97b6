//! Time-batched delivery of streamed tokens to a slow sink.

use std::time::Duration;

use talkrs_core::StreamSink;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, warn};

pub const DEFAULT_MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(300);

/// Drains a token channel into a [`StreamSink`].
///
/// Tokens are buffered and flushed as non-final updates at most once per
/// `min_interval`. Each update carries the whole visible text: the header
/// followed by everything received so far. When the channel closes a final
/// update is always sent, even with nothing left to flush.
#[derive(Debug, Clone)]
pub struct Coalescer {
    header: String,
    min_interval: Duration,
}

impl Coalescer {
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            min_interval: DEFAULT_MIN_UPDATE_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Consume `tokens` to the end and return the answer text (without the
    /// header). Sink failures are logged and never stop the loop.
    pub async fn run(&self, sink: &dyn StreamSink, mut tokens: mpsc::Receiver<String>) -> String {
        let mut visible = self.header.clone();
        let mut buffer = String::new();
        let mut last_flush = Instant::now();

        while let Some(token) = tokens.recv().await {
            buffer.push_str(&token);
            if last_flush.elapsed() >= self.min_interval {
                visible.push_str(&buffer);
                buffer.clear();
                if let Err(e) = sink.update(&visible, false).await {
                    warn!("Failed to push streaming update: {e}");
                }
                last_flush = Instant::now();
            }
        }

        visible.push_str(&buffer);
        if let Err(e) = sink.update(&visible, true).await {
            error!("Failed to push final update: {e}");
        }

        visible.split_off(self.header.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use talkrs_core::SinkError;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<(String, bool)>>,
        reject_non_final: bool,
    }

    impl RecordingSink {
        fn updates(&self) -> Vec<(String, bool)> {
            self.updates
                .lock()
                .map(|updates| updates.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl StreamSink for RecordingSink {
        async fn update(&self, content: &str, is_final: bool) -> Result<(), SinkError> {
            if let Ok(mut updates) = self.updates.lock() {
                updates.push((content.to_string(), is_final));
            }
            if self.reject_non_final && !is_final {
                return Err(SinkError::Rejected("card is locked".to_string()));
            }
            Ok(())
        }
    }

    fn paced(tokens: &[&'static str], gap: Duration) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(10);
        let tokens = tokens.to_vec();
        tokio::spawn(async move {
            for (i, token) in tokens.into_iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(gap).await;
                }
                if tx.send(token.to_string()).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn batches_by_interval_and_always_ends_final() {
        let sink = RecordingSink::default();
        let rx = paced(&["a", "b", "c", "d"], Duration::from_millis(200));

        let answer = Coalescer::new("**q**\n\n").run(&sink, rx).await;

        assert_eq!(answer, "abcd");
        assert_eq!(
            sink.updates(),
            vec![
                ("**q**\n\nabc".to_string(), false),
                ("**q**\n\nabcd".to_string(), true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fast_stream_gets_only_the_final_flush() {
        let sink = RecordingSink::default();
        let rx = paced(&["Hel", "lo"], Duration::ZERO);

        let answer = Coalescer::new("H: ").run(&sink, rx).await;

        assert_eq!(answer, "Hello");
        assert_eq!(sink.updates(), vec![("H: Hello".to_string(), true)]);
    }

    #[tokio::test]
    async fn empty_channel_still_sends_final() {
        let sink = RecordingSink::default();
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);

        let answer = Coalescer::new("header").run(&sink, rx).await;

        assert!(answer.is_empty());
        assert_eq!(sink.updates(), vec![("header".to_string(), true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failures_do_not_stop_the_loop() {
        let sink = RecordingSink {
            reject_non_final: true,
            ..RecordingSink::default()
        };
        let rx = paced(&["a", "b", "c"], Duration::from_millis(400));

        let answer = Coalescer::new("")
            .with_min_interval(Duration::from_millis(300))
            .run(&sink, rx)
            .await;

        assert_eq!(answer, "abc");
        let updates = sink.updates();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates.last(), Some(&("abc".to_string(), true)));
    }
}
