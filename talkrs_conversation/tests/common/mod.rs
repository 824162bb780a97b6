#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use talkrs_conversation::{ChatSession, SessionSettings};
use talkrs_core::{
    CompletionRequest, DeltaStream, LLMProvider, LLMResponse, SessionStorage, TokenCounter,
};
use talkrs_session::MemorySessionStore;

/// One item of a scripted upstream stream.
#[derive(Debug, Clone)]
pub enum Step {
    Delta(&'static str),
    Fail(&'static str),
}

/// Replays a fixed script and records every request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    answer: Option<String>,
    failure: Option<String>,
    steps: Vec<Step>,
    open_failure: Option<String>,
    stall: bool,
    no_user_attribution: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn streaming(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn failing_to_open(message: &str) -> Self {
        Self {
            open_failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Never finish: `complete` hangs and streams stall after their steps.
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn without_user_attribution(mut self) -> Self {
        self.no_user_attribution = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests
            .lock()
            .ok()
            .and_then(|requests| requests.last().cloned())
    }

    fn record(&self, request: &CompletionRequest) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<LLMResponse> {
        self.record(request);
        if self.stall {
            std::future::pending::<()>().await;
        }
        if let Some(message) = &self.failure {
            return Err(anyhow!("{message}"));
        }
        Ok(LLMResponse {
            content: self.answer.clone().unwrap_or_default(),
            usage: None,
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> anyhow::Result<DeltaStream> {
        self.record(request);
        if let Some(message) = &self.open_failure {
            return Err(anyhow!("{message}"));
        }

        let items: Vec<anyhow::Result<String>> = self
            .steps
            .iter()
            .map(|step| match step {
                Step::Delta(text) => Ok((*text).to_string()),
                Step::Fail(message) => Err(anyhow!("{message}")),
            })
            .collect();
        let scripted = stream::iter(items);

        if self.stall {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }

    fn get_default_model(&self) -> &str {
        "scripted-model"
    }

    fn attributes_user(&self) -> bool {
        !self.no_user_attribution
    }
}

/// One token per whitespace-separated word.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn estimate(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<MemorySessionStore>,
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self {
            provider: Arc::new(provider),
            store: Arc::new(MemorySessionStore::new()),
        }
    }

    pub fn session(&self, user_id: &str, settings: &SessionSettings) -> ChatSession {
        ChatSession::create(
            user_id,
            settings,
            self.provider.clone(),
            self.store.clone(),
            Arc::new(WordCounter),
        )
    }

    pub fn storage(&self) -> Arc<dyn SessionStorage> {
        self.store.clone()
    }
}

pub fn budgets(question: usize, answer: usize, text: usize) -> SessionSettings {
    SessionSettings::default().with_budgets(question, answer, text)
}

pub async fn drain(mut rx: tokio::sync::mpsc::Receiver<String>) -> Vec<String> {
    let mut tokens = Vec::new();
    while let Some(token) = rx.recv().await {
        tokens.push(token);
    }
    tokens
}
