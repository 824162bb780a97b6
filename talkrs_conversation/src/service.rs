//! Single-shot and contextual question answering on top of [`ChatSession`].

use std::sync::Arc;

use talkrs_core::{LLMProvider, SessionStorage, TokenCounter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::ConversationContext;
use crate::error::ConversationError;
use crate::session::{ChatSession, SessionSettings};

/// Builds sessions from shared collaborators.
///
/// Single mode answers without any history. Contextual mode hydrates the
/// session from the store first and hands it back so the caller decides
/// when to save.
pub struct ConversationService {
    provider: Arc<dyn LLMProvider>,
    storage: Arc<dyn SessionStorage>,
    counter: Arc<dyn TokenCounter>,
    settings: SessionSettings,
}

impl ConversationService {
    #[must_use]
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        storage: Arc<dyn SessionStorage>,
        counter: Arc<dyn TokenCounter>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            provider,
            storage,
            counter,
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// A fresh session with empty history.
    #[must_use]
    pub fn open(&self, user_id: &str) -> ChatSession {
        ChatSession::create(
            user_id,
            &self.settings,
            Arc::clone(&self.provider),
            Arc::clone(&self.storage),
            Arc::clone(&self.counter),
        )
    }

    /// A session hydrated from the store when it holds history for `user_id`.
    pub async fn open_with_history(&self, user_id: &str) -> ChatSession {
        let session = self.open(user_id);
        match session.load().await {
            Ok(()) => debug!(user = %user_id, "Resumed stored conversation"),
            Err(ConversationError::Deserialization(e)) => {
                debug!(user = %user_id, "Starting without stored history: {e}");
            }
            Err(e) => warn!(user = %user_id, "Failed to load stored conversation: {e}"),
        }
        session
    }

    pub async fn single(&self, user_id: &str, question: &str) -> Result<String, ConversationError> {
        let session = self.open(user_id);
        let result = session.complete(question).await;
        session.close();
        result
    }

    /// Answer with the stored history. The returned session holds the new
    /// exchange and is still open.
    pub async fn contextual(
        &self,
        user_id: &str,
        question: &str,
    ) -> Result<(String, ChatSession), ConversationError> {
        let session = self.open_with_history(user_id).await;
        let answer = session.complete(question).await?;
        Ok((answer, session))
    }

    /// Stream an answer without history. The session closes once the
    /// returned channel has been drained.
    pub async fn single_stream(
        &self,
        user_id: &str,
        question: &str,
    ) -> Result<mpsc::Receiver<String>, ConversationError> {
        let session = self.open(user_id);
        let mut upstream = session.complete_stream(question).await?;
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));

        tokio::spawn(async move {
            while let Some(token) = upstream.recv().await {
                if tx.send(token).await.is_err() {
                    break;
                }
            }
            session.close();
        });

        Ok(rx)
    }

    /// Stream an answer with the stored history. Save the returned session
    /// after the channel closes to keep the new exchange.
    pub async fn contextual_stream(
        &self,
        user_id: &str,
        question: &str,
    ) -> Result<(mpsc::Receiver<String>, ChatSession), ConversationError> {
        let session = self.open_with_history(user_id).await;
        let rx = session.complete_stream(question).await?;
        Ok((rx, session))
    }

    /// Forget the stored history of `user_id`.
    pub async fn reset(&self, user_id: &str) -> Result<(), ConversationError> {
        ConversationContext::reset(self.storage.as_ref(), user_id).await?;
        info!(user = %user_id, "Stored conversation cleared");
        Ok(())
    }
}
