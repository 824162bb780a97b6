//! Turn history, speaker labels and the context-window policy.

use std::fmt::Write as _;

use talkrs_core::{ChatMessage, SessionStorage, Speaker, Turn};
use tracing::debug;

use crate::error::ConversationError;

pub const DEFAULT_HUMAN_ROLE: &str = "Human";
pub const DEFAULT_AI_ROLE: &str = "AI";
pub const DEFAULT_MAX_TURN_COUNT: usize = 1000;

/// Construction options for a [`ConversationContext`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Soft cap on completed exchanges.
    pub max_turn_count: usize,
    /// Roll the oldest exchange off instead of rejecting once the cap is hit.
    pub maintain_turn_count: bool,
    /// Sent upstream as the system message when set.
    pub background: Option<String>,
    /// Printed ahead of the transcript when set.
    pub preset: Option<String>,
    pub human_role: String,
    pub ai_role: String,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_turn_count: DEFAULT_MAX_TURN_COUNT,
            maintain_turn_count: false,
            background: None,
            preset: None,
            human_role: DEFAULT_HUMAN_ROLE.to_string(),
            ai_role: DEFAULT_AI_ROLE.to_string(),
        }
    }
}

impl ContextOptions {
    #[must_use]
    pub const fn with_max_turn_count(mut self, max: usize) -> Self {
        self.max_turn_count = max;
        self
    }

    #[must_use]
    pub const fn with_maintain_turn_count(mut self, maintain: bool) -> Self {
        self.maintain_turn_count = maintain;
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = Some(background.into());
        self
    }

    #[must_use]
    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = Some(preset.into());
        self
    }
}

/// The conversation so far.
///
/// `history` always holds whole exchanges: a human turn followed by an ai
/// turn, oldest first, so `history.len() == 2 * turn_count`.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    history: Vec<Turn>,
    turn_count: usize,
    options: ContextOptions,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(ContextOptions::default())
    }
}

impl ConversationContext {
    #[must_use]
    pub const fn new(options: ContextOptions) -> Self {
        Self {
            history: Vec::new(),
            turn_count: 0,
            options,
        }
    }

    #[must_use]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    #[must_use]
    pub const fn turn_count(&self) -> usize {
        self.turn_count
    }

    #[must_use]
    pub const fn options(&self) -> &ContextOptions {
        &self.options
    }

    #[must_use]
    pub fn human_role(&self) -> &str {
        &self.options.human_role
    }

    #[must_use]
    pub fn ai_role(&self) -> &str {
        &self.options.ai_role
    }

    pub fn set_human_role(&mut self, name: impl Into<String>) {
        self.options.human_role = name.into();
    }

    pub fn set_ai_role(&mut self, name: impl Into<String>) {
        self.options.ai_role = name.into();
    }

    pub fn set_background(&mut self, background: Option<String>) {
        self.options.background = background;
    }

    /// Record one completed exchange.
    pub fn append(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.history.push(Turn::human(question));
        self.history.push(Turn::ai(answer));
        self.turn_count += 1;
    }

    /// Drop the oldest exchange. Returns it, or `None` on an empty history.
    pub fn poll(&mut self) -> Option<(Turn, Turn)> {
        if self.history.len() < 2 {
            return None;
        }
        let mut oldest = self.history.drain(..2);
        let pair = oldest.next().zip(oldest.next());
        drop(oldest);
        self.turn_count = self.turn_count.saturating_sub(1);
        pair
    }

    #[must_use]
    pub const fn at_turn_limit(&self) -> bool {
        self.turn_count >= self.options.max_turn_count
    }

    /// Append an exchange, then roll the oldest ones off while over the cap
    /// when `maintain_turn_count` is set.
    pub(crate) fn commit(&mut self, question: &str, answer: &str) {
        self.append(question, answer);
        if self.options.maintain_turn_count {
            while self.turn_count > self.options.max_turn_count && self.poll().is_some() {
                debug!("Rolled oldest exchange off the context");
            }
        }
    }

    /// Outbound message list: the background as system message, every stored
    /// turn oldest first, then the new question.
    #[must_use]
    pub fn messages_for(&self, question: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(background) = self.options.background.as_deref() {
            messages.push(ChatMessage::system(background));
        }
        messages.extend(self.history.iter().map(|turn| ChatMessage {
            role: turn.speaker.wire_role(),
            content: turn.text.clone(),
        }));
        messages.push(ChatMessage::user(question));
        messages
    }

    /// The history as labelled lines, e.g. `"\nHuman: hi\nAI: hello"`.
    #[must_use]
    pub fn transcript(&self) -> String {
        let mut out = self.options.preset.clone().unwrap_or_default();
        for turn in &self.history {
            let label = match turn.speaker {
                Speaker::Human => &self.options.human_role,
                Speaker::Ai => &self.options.ai_role,
            };
            let _ = write!(out, "\n{label}: {}", turn.text);
        }
        out
    }

    pub fn encode(&self) -> Result<Vec<u8>, ConversationError> {
        serde_json::to_vec(&self.history).map_err(|e| ConversationError::Serialization(e.to_string()))
    }

    /// Replace the history with a previously encoded one.
    ///
    /// On error the context is left untouched.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<(), ConversationError> {
        let history: Vec<Turn> = serde_json::from_slice(bytes)
            .map_err(|e| ConversationError::Deserialization(e.to_string()))?;

        let paired = history.len() % 2 == 0
            && history.chunks(2).all(|pair| {
                pair[0].speaker == Speaker::Human && pair[1].speaker == Speaker::Ai
            });
        if !paired {
            return Err(ConversationError::Deserialization(
                "history is not a sequence of human/ai pairs".to_string(),
            ));
        }

        self.turn_count = history.len() / 2;
        self.history = history;
        Ok(())
    }

    pub async fn save(
        &self,
        storage: &dyn SessionStorage,
        key: &str,
    ) -> Result<(), ConversationError> {
        let bytes = self.encode()?;
        storage
            .set(key, bytes)
            .await
            .map_err(ConversationError::Storage)?;
        debug!(turns = self.turn_count, "Saved context for {key}");
        Ok(())
    }

    /// Hydrate from the store. Missing data is a [`ConversationError::Deserialization`].
    pub async fn load(
        &mut self,
        storage: &dyn SessionStorage,
        key: &str,
    ) -> Result<(), ConversationError> {
        let bytes = storage
            .get(key)
            .await
            .map_err(ConversationError::Storage)?
            .ok_or_else(|| ConversationError::Deserialization(format!("no context stored for {key}")))?;
        self.restore(&bytes)?;
        debug!(turns = self.turn_count, "Loaded context for {key}");
        Ok(())
    }

    /// Clear the stored history for `key`. Live contexts are not affected.
    pub async fn reset(storage: &dyn SessionStorage, key: &str) -> Result<(), ConversationError> {
        storage.clear(key).await.map_err(ConversationError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use talkrs_core::Role;
    use talkrs_session::MemorySessionStore;

    use super::*;

    #[test]
    fn append_adds_one_pair() {
        let mut ctx = ConversationContext::default();
        ctx.append("q1", "a1");
        ctx.append("q2", "a2");

        assert_eq!(ctx.turn_count(), 2);
        assert_eq!(ctx.history().len(), 4);
        assert_eq!(ctx.history()[2], Turn::human("q2"));
        assert_eq!(ctx.history()[3], Turn::ai("a2"));
    }

    #[test]
    fn poll_drops_oldest_pair() {
        let mut ctx = ConversationContext::default();
        assert!(ctx.poll().is_none());

        ctx.append("q1", "a1");
        ctx.append("q2", "a2");
        let dropped = ctx.poll();

        assert_eq!(dropped, Some((Turn::human("q1"), Turn::ai("a1"))));
        assert_eq!(ctx.turn_count(), 1);
        assert_eq!(ctx.history(), &[Turn::human("q2"), Turn::ai("a2")]);
    }

    #[test]
    fn commit_rolls_when_maintaining() {
        let options = ContextOptions::default()
            .with_max_turn_count(2)
            .with_maintain_turn_count(true);
        let mut ctx = ConversationContext::new(options);
        ctx.commit("q1", "a1");
        ctx.commit("q2", "a2");
        ctx.commit("q3", "a3");

        assert_eq!(ctx.turn_count(), 2);
        assert_eq!(ctx.history()[0], Turn::human("q2"));
    }

    #[test]
    fn messages_replay_history_then_question() {
        let mut ctx = ConversationContext::new(ContextOptions::default().with_background("be brief"));
        ctx.append("hi", "hello");
        let messages = ctx.messages_for("how are you?");

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(messages[3].content, "how are you?");
    }

    #[test]
    fn renaming_roles_changes_labels_only() {
        let mut ctx = ConversationContext::default();
        ctx.append("hi", "hello");
        assert_eq!(ctx.transcript(), "\nHuman: hi\nAI: hello");

        ctx.set_human_role("Alice");
        ctx.set_ai_role("Bot");
        assert_eq!(ctx.transcript(), "\nAlice: hi\nBot: hello");
        assert_eq!(ctx.history()[0].speaker, Speaker::Human);
        assert_eq!(ctx.messages_for("x")[0].role, Role::User);
    }

    #[test]
    fn transcript_starts_with_preset() {
        let mut ctx = ConversationContext::new(ContextOptions::default().with_preset("Chat log"));
        ctx.append("hi", "hello");

        assert_eq!(ctx.transcript(), "Chat log\nHuman: hi\nAI: hello");
        assert_eq!(ctx.messages_for("x").len(), 3);
    }

    #[test]
    fn restore_rejects_unpaired_history() {
        let mut ctx = ConversationContext::default();
        ctx.append("q", "a");

        let lone = serde_json::to_vec(&vec![Turn::human("dangling")]).unwrap_or_default();
        assert!(matches!(
            ctx.restore(&lone),
            Err(ConversationError::Deserialization(_))
        ));
        assert!(matches!(
            ctx.restore(b"not json"),
            Err(ConversationError::Deserialization(_))
        ));
        assert_eq!(ctx.turn_count(), 1);
        assert_eq!(ctx.history().len(), 2);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() -> anyhow::Result<()> {
        let store = MemorySessionStore::new();
        let mut original = ConversationContext::default();
        original.append("q1", "a1");
        original.append("多轮", "对话");
        original.save(&store, "user-1").await?;

        let mut restored = ConversationContext::default();
        restored.load(&store, "user-1").await?;

        assert_eq!(restored.history(), original.history());
        assert_eq!(restored.turn_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn load_of_missing_key_keeps_state() {
        let store = MemorySessionStore::new();
        let mut ctx = ConversationContext::default();
        ctx.append("q", "a");

        let result = ctx.load(&store, "nobody").await;

        assert!(matches!(result, Err(ConversationError::Deserialization(_))));
        assert_eq!(ctx.turn_count(), 1);
    }

    #[tokio::test]
    async fn reset_clears_store_but_not_live_history() -> anyhow::Result<()> {
        let store = MemorySessionStore::new();
        let mut ctx = ConversationContext::default();
        ctx.append("q", "a");
        ctx.save(&store, "u").await?;

        ConversationContext::reset(&store, "u").await?;

        assert_eq!(store.get("u").await?, None);
        assert_eq!(ctx.turn_count(), 1);
        Ok(())
    }
}
