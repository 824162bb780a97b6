mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, ScriptedProvider, WordCounter, budgets};
use talkrs_conversation::{
    ContextOptions, ConversationError, ConversationService, SAMPLING_TEMPERATURE,
    SessionSettings,
};
use talkrs_core::{Role, Turn};

#[tokio::test]
async fn hello_scenario_commits_one_turn() {
    let harness = Harness::new(ScriptedProvider::answering("Hi! How can I help?"));
    let session = harness.session("user-1", &budgets(100, 50, 150));

    let answer = session.complete("hello").await.expect("completion should succeed");

    assert_eq!(answer, "Hi! How can I help?");
    assert_eq!(session.turn_count().await, 1);
    let context = session.context();
    let context = context.lock().await;
    assert_eq!(
        context.history(),
        &[Turn::human("hello"), Turn::ai("Hi! How can I help?")]
    );
}

#[tokio::test]
async fn request_carries_history_budget_and_identity() {
    let harness = Harness::new(ScriptedProvider::answering("fine"));
    let session = harness.session("user-7", &budgets(100, 50, 150));
    session.complete("first").await.expect("first exchange");
    session.complete("second").await.expect("second exchange");

    let request = harness.provider.last_request().expect("a request was sent");
    let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    assert_eq!(request.messages[2].content, "second");
    assert_eq!(request.max_tokens, 50);
    assert!((request.temperature - SAMPLING_TEMPERATURE).abs() < f32::EPSILON);
    assert_eq!(request.model, "scripted-model");
    assert_eq!(request.user.as_deref(), Some("user-7"));
}

#[tokio::test]
async fn attribution_is_omitted_when_forbidden() {
    let harness = Harness::new(ScriptedProvider::answering("ok").without_user_attribution());
    let session = harness.session("user-7", &SessionSettings::default());
    session.complete("hi").await.expect("completion should succeed");

    let request = harness.provider.last_request().expect("a request was sent");
    assert_eq!(request.user, None);
}

#[tokio::test]
async fn long_question_never_reaches_upstream() {
    let harness = Harness::new(ScriptedProvider::answering("unused"));
    let session = harness.session("user-1", &budgets(3, 50, 150));

    let result = session.complete("one two three four").await;

    assert!(matches!(
        result,
        Err(ConversationError::QuestionTooLong { tokens: 4, limit: 3 })
    ));
    assert_eq!(harness.provider.calls(), 0);
    assert_eq!(session.turn_count().await, 0);
}

#[tokio::test]
async fn long_question_is_rejected_before_streaming() {
    let harness = Harness::new(ScriptedProvider::streaming(vec![]));
    let session = harness.session("user-1", &budgets(1, 50, 150));

    let result = session.complete_stream("two words").await;

    assert!(matches!(
        result,
        Err(ConversationError::QuestionTooLong { .. })
    ));
    assert_eq!(harness.provider.calls(), 0);
}

#[tokio::test]
async fn upstream_failure_is_verbatim_and_appends_nothing() {
    let harness = Harness::new(ScriptedProvider::failing("HTTP 503: overloaded"));
    let session = harness.session("user-1", &SessionSettings::default());

    let err = session.complete("hello").await.err();

    assert!(matches!(err, Some(ConversationError::Upstream(_))));
    assert_eq!(
        err.map(|e| e.to_string()).as_deref(),
        Some("HTTP 503: overloaded")
    );
    assert_eq!(session.turn_count().await, 0);
    assert_eq!(harness.provider.calls(), 1);
}

#[tokio::test]
async fn budget_clamp_holds_for_any_request() {
    let harness = Harness::new(ScriptedProvider::answering("x"));
    let mut session = harness.session("user-1", &budgets(10_000, 50, 150));
    assert_eq!(session.max_question_len(), 100);

    for requested in [0, 1, 99, 100, 101, 5_000, usize::MAX] {
        let applied = session.set_max_question_len(requested);
        assert!(applied <= session.max_text_len() - session.max_answer_len());
        assert_eq!(applied, requested.min(100));
        assert_eq!(session.max_question_len(), applied);
    }
}

#[tokio::test]
async fn turn_cap_rejects_without_maintain() {
    let harness = Harness::new(ScriptedProvider::answering("a"));
    let settings =
        SessionSettings::default().with_context(ContextOptions::default().with_max_turn_count(1));
    let session = harness.session("user-1", &settings);
    session.complete("q1").await.expect("first exchange fits");

    let result = session.complete("q2").await;

    assert!(matches!(
        result,
        Err(ConversationError::TurnLimitExceeded { limit: 1 })
    ));
    assert_eq!(harness.provider.calls(), 1);
}

#[tokio::test]
async fn turn_cap_rolls_oldest_with_maintain() {
    let harness = Harness::new(ScriptedProvider::answering("a"));
    let settings = SessionSettings::default().with_context(
        ContextOptions::default()
            .with_max_turn_count(2)
            .with_maintain_turn_count(true),
    );
    let session = harness.session("user-1", &settings);
    for question in ["q1", "q2", "q3"] {
        session.complete(question).await.expect("exchange succeeds");
    }

    let context = session.context();
    let context = context.lock().await;
    assert_eq!(context.turn_count(), 2);
    assert_eq!(context.history()[0], Turn::human("q2"));
}

#[tokio::test]
async fn text_budget_is_enforced_when_enabled() {
    let harness = Harness::new(ScriptedProvider::answering("one two three four five"));
    let settings = budgets(10, 5, 15).with_enforce_text_budget(true);
    let session = harness.session("user-1", &settings);
    session.complete("a b c").await.expect("first exchange fits");

    // 3 + 5 replayed + 3 new words > 15 - 5
    let result = session.complete("d e f").await;

    assert!(matches!(
        result,
        Err(ConversationError::TextBudgetExceeded { tokens: 11, limit: 10 })
    ));
    assert_eq!(harness.provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_aborts_a_hanging_completion() {
    let harness = Harness::new(ScriptedProvider::answering("late").stalling());
    let settings = SessionSettings::default().with_timeout(Duration::from_secs(600));
    let mut session = harness.session("user-1", &settings);
    let signal = session.take_deadline_signal();

    let result = session.complete("hello").await;

    assert!(matches!(result, Err(ConversationError::DeadlineExceeded)));
    assert!(signal.expect("signal is available once").await.is_ok());
    assert!(session.take_deadline_signal().is_none());
    assert_eq!(session.turn_count().await, 0);
}

#[tokio::test]
async fn close_is_idempotent_and_blocks_new_exchanges() {
    let harness = Harness::new(ScriptedProvider::answering("x"));
    let mut session = harness.session("user-1", &SessionSettings::default());
    let signal = session.take_deadline_signal();

    session.close();
    session.close();

    assert!(session.is_closed());
    assert!(matches!(
        session.complete("hello").await,
        Err(ConversationError::Closed)
    ));
    assert_eq!(harness.provider.calls(), 0);
    if let Some(signal) = signal {
        assert!(signal.await.is_err(), "closed sessions never fire");
    }
}

#[tokio::test]
async fn session_context_survives_save_and_load() {
    let harness = Harness::new(ScriptedProvider::answering("pong"));
    let settings = SessionSettings::default();

    let first = harness.session("user-9", &settings);
    first.complete("ping").await.expect("exchange");
    first.save().await.expect("save");
    first.close();

    let second = harness.session("user-9", &settings);
    second.load().await.expect("load");
    assert_eq!(second.turn_count().await, 1);
    assert_eq!(second.transcript().await, "\nHuman: ping\nAI: pong");

    second.reset().await.expect("reset");
    assert_eq!(second.turn_count().await, 1);
    assert!(matches!(
        second.load().await,
        Err(ConversationError::Deserialization(_))
    ));
}

#[tokio::test]
async fn service_modes_share_the_store() {
    let harness = Harness::new(ScriptedProvider::answering("noted"));
    let service = ConversationService::new(
        harness.provider.clone(),
        harness.storage(),
        Arc::new(WordCounter),
        SessionSettings::default(),
    );

    service.single("u", "forget me").await.expect("single");
    assert_eq!(harness.store.len().await, 0);

    let (_, session) = service.contextual("u", "remember").await.expect("contextual");
    session.save().await.expect("save");
    drop(session);

    let (_, session) = service.contextual("u", "again").await.expect("contextual");
    assert_eq!(session.turn_count().await, 2);
    let request = harness.provider.last_request().expect("a request was sent");
    assert_eq!(request.messages.len(), 3);

    service.reset("u").await.expect("reset");
    assert!(harness.store.is_empty().await);
}
