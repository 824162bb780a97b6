//! Session lifecycle: budgets, deadline, and the single-exchange guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use talkrs_core::{ChatMessage, LLMProvider, SessionStorage, TokenCounter};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::{ContextOptions, ConversationContext};
use crate::deadline::DeadlineWatcher;
use crate::error::ConversationError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_question_len: usize,
    pub max_answer_len: usize,
    pub max_text_len: usize,
    pub timeout: Duration,
    /// Capacity of the streamed token channel.
    pub channel_capacity: usize,
    /// Reject exchanges whose replayed history plus question would not
    /// leave `max_answer_len` tokens of room in `max_text_len`.
    pub enforce_text_budget: bool,
    pub context: ContextOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_question_len: 2048,
            max_answer_len: 2048,
            max_text_len: 4096,
            timeout: DEFAULT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            enforce_text_budget: false,
            context: ContextOptions::default(),
        }
    }
}

impl SessionSettings {
    #[must_use]
    pub const fn with_budgets(
        mut self,
        max_question_len: usize,
        max_answer_len: usize,
        max_text_len: usize,
    ) -> Self {
        self.max_question_len = max_question_len;
        self.max_answer_len = max_answer_len;
        self.max_text_len = max_text_len;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_enforce_text_budget(mut self, enforce: bool) -> Self {
        self.enforce_text_budget = enforce;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ContextOptions) -> Self {
        self.context = context;
        self
    }
}

pub(crate) const fn clamp_question_len(requested: usize, answer: usize, text: usize) -> usize {
    let room = text.saturating_sub(answer);
    if requested > room { room } else { requested }
}

/// Marks a session busy for as long as it is held.
pub(crate) struct ExchangeGuard {
    flag: Arc<AtomicBool>,
}

impl ExchangeGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// An exchange that passed every pre-flight check.
pub(crate) struct Exchange {
    pub guard: ExchangeGuard,
    pub messages: Vec<ChatMessage>,
}

/// One user's conversation for the lifetime of an interaction.
///
/// Closing (explicitly or by dropping) stops the deadline watcher and aborts
/// any exchange still in flight.
pub struct ChatSession {
    pub(crate) user_id: String,
    max_question_len: usize,
    pub(crate) max_answer_len: usize,
    max_text_len: usize,
    enforce_text_budget: bool,
    pub(crate) channel_capacity: usize,
    pub(crate) context: Arc<Mutex<ConversationContext>>,
    pub(crate) provider: Arc<dyn LLMProvider>,
    storage: Arc<dyn SessionStorage>,
    counter: Arc<dyn TokenCounter>,
    watcher: DeadlineWatcher,
    in_flight: Arc<AtomicBool>,
    pub(crate) closed: Arc<AtomicBool>,
}

impl ChatSession {
    /// Must be called within a Tokio runtime: the deadline starts now.
    #[must_use]
    pub fn create(
        user_id: impl Into<String>,
        settings: &SessionSettings,
        provider: Arc<dyn LLMProvider>,
        storage: Arc<dyn SessionStorage>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let user_id = user_id.into();
        let max_question_len = clamp_question_len(
            settings.max_question_len,
            settings.max_answer_len,
            settings.max_text_len,
        );
        debug!(
            user = %user_id,
            max_question_len,
            max_answer_len = settings.max_answer_len,
            max_text_len = settings.max_text_len,
            "Creating chat session"
        );

        Self {
            user_id,
            max_question_len,
            max_answer_len: settings.max_answer_len,
            max_text_len: settings.max_text_len,
            enforce_text_budget: settings.enforce_text_budget,
            channel_capacity: settings.channel_capacity.max(1),
            context: Arc::new(Mutex::new(ConversationContext::new(
                settings.context.clone(),
            ))),
            provider,
            storage,
            counter,
            watcher: DeadlineWatcher::start(settings.timeout),
            in_flight: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub const fn max_question_len(&self) -> usize {
        self.max_question_len
    }

    #[must_use]
    pub const fn max_answer_len(&self) -> usize {
        self.max_answer_len
    }

    #[must_use]
    pub const fn max_text_len(&self) -> usize {
        self.max_text_len
    }

    /// Returns the value actually applied, never above
    /// `max_text_len - max_answer_len`.
    pub const fn set_max_question_len(&mut self, requested: usize) -> usize {
        self.max_question_len =
            clamp_question_len(requested, self.max_answer_len, self.max_text_len);
        self.max_question_len
    }

    /// Shared handle to the live context.
    #[must_use]
    pub fn context(&self) -> Arc<Mutex<ConversationContext>> {
        Arc::clone(&self.context)
    }

    pub async fn turn_count(&self) -> usize {
        self.context.lock().await.turn_count()
    }

    pub async fn transcript(&self) -> String {
        self.context.lock().await.transcript()
    }

    pub async fn set_human_role(&self, name: &str) {
        self.context.lock().await.set_human_role(name);
    }

    pub async fn set_ai_role(&self, name: &str) {
        self.context.lock().await.set_ai_role(name);
    }

    /// Persist the context under this session's user id.
    pub async fn save(&self) -> Result<(), ConversationError> {
        let context = self.context.lock().await;
        context.save(self.storage.as_ref(), &self.user_id).await
    }

    pub async fn load(&self) -> Result<(), ConversationError> {
        let mut context = self.context.lock().await;
        context.load(self.storage.as_ref(), &self.user_id).await
    }

    /// Clear the stored history for this user. The live context is kept.
    pub async fn reset(&self) -> Result<(), ConversationError> {
        ConversationContext::reset(self.storage.as_ref(), &self.user_id).await
    }

    /// The deadline signal; `None` after the first call.
    pub const fn take_deadline_signal(&mut self) -> Option<oneshot::Receiver<()>> {
        self.watcher.take_signal()
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.watcher.stop();
            info!(user = %self.user_id, "Chat session closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.watcher.token()
    }

    /// Pre-flight: session state, single in-flight exchange, then the token
    /// budgets and turn cap. Nothing is mutated on failure.
    pub(crate) async fn prepare(&self, question: &str) -> Result<Exchange, ConversationError> {
        if self.watcher.is_cancelled() {
            return Err(cancel_reason(&self.closed));
        }
        let guard = ExchangeGuard::acquire(&self.in_flight).ok_or(ConversationError::Busy)?;

        let tokens = self.counter.estimate(question);
        if tokens > self.max_question_len {
            return Err(ConversationError::QuestionTooLong {
                tokens,
                limit: self.max_question_len,
            });
        }

        let context = self.context.lock().await;
        if context.at_turn_limit() && !context.options().maintain_turn_count {
            return Err(ConversationError::TurnLimitExceeded {
                limit: context.options().max_turn_count,
            });
        }
        let messages = context.messages_for(question);
        drop(context);

        if self.enforce_text_budget {
            let limit = self.max_text_len.saturating_sub(self.max_answer_len);
            let tokens: usize = messages
                .iter()
                .map(|message| self.counter.estimate(&message.content))
                .sum();
            if tokens > limit {
                return Err(ConversationError::TextBudgetExceeded { tokens, limit });
            }
        }

        Ok(Exchange { guard, messages })
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Error reported when the session token is found cancelled.
pub(crate) fn cancel_reason(closed: &AtomicBool) -> ConversationError {
    if closed.load(Ordering::Acquire) {
        ConversationError::Closed
    } else {
        ConversationError::DeadlineExceeded
    }
}
