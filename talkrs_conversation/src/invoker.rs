use talkrs_core::{ChatMessage, CompletionRequest};
use tracing::{debug, warn};

use crate::error::ConversationError;
use crate::session::{ChatSession, cancel_reason};

pub const SAMPLING_TEMPERATURE: f32 = 0.6;

impl ChatSession {
    pub(crate) fn request_for(&self, messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: self.provider.get_default_model().to_string(),
            messages,
            max_tokens: self.max_answer_len,
            temperature: SAMPLING_TEMPERATURE,
            user: self
                .provider
                .attributes_user()
                .then(|| self.user_id.clone()),
        }
    }

    /// Answer `question` in one request, replaying the stored history.
    ///
    /// The exchange is appended to the context only on success.
    pub async fn complete(&self, question: &str) -> Result<String, ConversationError> {
        let exchange = self.prepare(question).await?;
        let request = self.request_for(exchange.messages);
        let token = self.cancellation();

        debug!(
            user = %self.user_id,
            messages = request.messages.len(),
            "Sending completion request"
        );
        let result = tokio::select! {
            result = self.provider.complete(&request) => result,
            () = token.cancelled() => return Err(cancel_reason(&self.closed)),
        };
        let response = result.map_err(|e| {
            warn!(user = %self.user_id, "Completion failed: {e}");
            ConversationError::Upstream(e)
        })?;

        if let Some(usage) = &response.usage {
            debug!(
                prompt = usage.prompt_tokens,
                completion = usage.completion_tokens,
                total = usage.total_tokens,
                "Completion usage"
            );
        }

        self.context
            .lock()
            .await
            .commit(question, &response.content);
        drop(exchange.guard);
        Ok(response.content)
    }
}
