//! Streaming exchanges republished on a bounded token channel.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use futures_util::StreamExt;
use talkrs_core::{CompletionRequest, LLMProvider};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::ConversationContext;
use crate::error::ConversationError;
use crate::session::{ChatSession, ExchangeGuard, cancel_reason};

impl ChatSession {
    /// Answer `question` incrementally.
    ///
    /// Every non-empty fragment is sent on the returned channel in upstream
    /// order. The channel closing is the only completion signal; by then a
    /// complete answer has already been committed to the context.
    ///
    /// If upstream fails (or the session is cancelled) before any content,
    /// the error text is sent as a single token. After content has been
    /// sent, the channel just closes and the partial answer is discarded.
    pub async fn complete_stream(
        &self,
        question: &str,
    ) -> Result<mpsc::Receiver<String>, ConversationError> {
        let exchange = self.prepare(question).await?;
        let request = self.request_for(exchange.messages);
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let relay = Relay {
            provider: Arc::clone(&self.provider),
            context: Arc::clone(&self.context),
            token: self.cancellation(),
            closed: Arc::clone(&self.closed),
            question: question.to_string(),
            user_id: self.user_id.clone(),
            _guard: exchange.guard,
        };
        tokio::spawn(relay.run(request, tx));

        Ok(rx)
    }
}

struct Relay {
    provider: Arc<dyn LLMProvider>,
    context: Arc<Mutex<ConversationContext>>,
    token: CancellationToken,
    closed: Arc<AtomicBool>,
    question: String,
    user_id: String,
    _guard: ExchangeGuard,
}

impl Relay {
    async fn run(self, request: CompletionRequest, tx: mpsc::Sender<String>) {
        self.forward(request, &tx).await;
        // A reader woken by the channel closing must find the session idle.
        drop(self);
        drop(tx);
    }

    async fn forward(&self, request: CompletionRequest, tx: &mpsc::Sender<String>) {
        let opened = tokio::select! {
            result = self.provider.complete_stream(&request) => result,
            () = self.token.cancelled() => Err(cancel_reason(&self.closed).into()),
        };
        let mut deltas = match opened {
            Ok(deltas) => deltas,
            Err(e) => {
                warn!(user = %self.user_id, "Failed to open completion stream: {e}");
                let _ = tx.send(e.to_string()).await;
                return;
            }
        };

        let mut answer = String::new();
        loop {
            let next = tokio::select! {
                next = deltas.next() => next,
                () = self.token.cancelled() => Some(Err(cancel_reason(&self.closed).into())),
            };

            match next {
                None => break,
                Some(Ok(delta)) if delta.is_empty() => {}
                Some(Ok(delta)) => {
                    answer.push_str(&delta);
                    let sent = tokio::select! {
                        sent = tx.send(delta) => sent.is_ok(),
                        () = self.token.cancelled() => false,
                    };
                    if !sent {
                        debug!(user = %self.user_id, "Token channel abandoned, dropping answer");
                        return;
                    }
                }
                Some(Err(e)) if answer.is_empty() => {
                    warn!(user = %self.user_id, "Completion stream failed: {e}");
                    let _ = tx.send(e.to_string()).await;
                    return;
                }
                Some(Err(e)) => {
                    warn!(
                        user = %self.user_id,
                        received = answer.len(),
                        "Completion stream failed mid-answer, discarding partial answer: {e}"
                    );
                    return;
                }
            }
        }

        if answer.is_empty() {
            debug!(user = %self.user_id, "Completion stream ended without content");
        } else {
            self.context.lock().await.commit(&self.question, &answer);
            debug!(user = %self.user_id, chars = answer.len(), "Streamed answer committed");
        }
    }
}
