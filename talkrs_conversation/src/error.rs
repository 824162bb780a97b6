use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("maximum question length exceeded ({tokens} > {limit} tokens)")]
    QuestionTooLong { tokens: usize, limit: usize },

    #[error("maximum answer length exceeded")]
    AnswerTooLong,

    #[error("maximum text length exceeded ({tokens} > {limit} tokens)")]
    TextBudgetExceeded { tokens: usize, limit: usize },

    #[error("maximum number of turns exceeded ({limit})")]
    TurnLimitExceeded { limit: usize },

    #[error(transparent)]
    Upstream(anyhow::Error),

    #[error("failed to encode conversation context: {0}")]
    Serialization(String),

    #[error("failed to decode conversation context: {0}")]
    Deserialization(String),

    #[error("session store error: {0}")]
    Storage(anyhow::Error),

    #[error("an exchange is already in flight on this session")]
    Busy,

    #[error("session deadline exceeded")]
    DeadlineExceeded,

    #[error("session closed")]
    Closed,
}

impl ConversationError {
    /// Budget violations after which the stored history is useless and
    /// should be dropped so the user can start over.
    #[must_use]
    pub const fn clears_context(&self) -> bool {
        matches!(
            self,
            Self::QuestionTooLong { .. }
                | Self::TextBudgetExceeded { .. }
                | Self::TurnLimitExceeded { .. }
        )
    }
}
