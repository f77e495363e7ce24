mod common;

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ai_lib_chat::i18n::{self, Localizer, Texts};
use ai_lib_chat::middleware::{GroupLimits, UsageLimits};
use ai_lib_chat::protocol::validate_sequence;
use ai_lib_chat::provider::{ScriptStep, ScriptedProvider};
use ai_lib_chat::store::{InMemoryMessageStore, InMemoryUsageStore, UsageRecord, UsageStore};
use ai_lib_chat::{ChatConfig, ChatUser, ProviderEvent, StartTurn, StreamEvent, TurnOrchestrator};
use ai_lib_chat::types::message::ChatInput;

use common::*;

fn fail(payload: serde_json::Value) -> ScriptStep {
    ScriptStep::Fail {
        message: "upstream rejected the request".into(),
        payload,
    }
}

#[tokio::test]
async fn failure_after_partial_output_persists_nothing() {
    let mut steps = script(&["Hel"]);
    steps.push(fail(serde_json::Value::Null));
    let provider = ScriptedProvider::new(steps);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;

    assert_eq!(kinds(&events), vec!["chunk", "error"]);
    assert_eq!(
        error_message(&events).unwrap(),
        Texts::new().t(i18n::ERROR_INTERNAL)
    );
    validate_sequence(&events).unwrap();
    assert!(store.is_empty());
}

#[tokio::test]
async fn provider_error_codes_map_to_localized_messages() {
    let cases = [
        (json!({"error": {"code": "content_filter"}}), i18n::ERROR_CONTENT_FILTER),
        (
            json!({"error": {"innererror": {"code": "context_length_exceeded"}}}),
            i18n::ERROR_CONTEXT_LENGTH_EXCEEDED,
        ),
        (json!({"code": "string_above_max_length"}), i18n::ERROR_STRING_ABOVE_MAX_LENGTH),
    ];

    for (payload, key) in cases {
        let provider = ScriptedProvider::new(vec![fail(payload)]);
        let store = InMemoryMessageStore::new();
        let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

        let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
        assert_eq!(kinds(&events), vec!["error"]);
        assert_eq!(error_message(&events).unwrap(), Texts::new().t(key));
    }
}

#[tokio::test]
async fn domain_errors_are_shown_verbatim() {
    let provider = ScriptedProvider::new(vec![ScriptStep::FailChat {
        message: "This assistant is read-only today.".into(),
    }]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
    assert_eq!(
        error_message(&events).as_deref(),
        Some("This assistant is read-only today.")
    );
}

#[tokio::test]
async fn configured_texts_override_builtin_messages() {
    let provider = ScriptedProvider::new(vec![fail(serde_json::Value::Null)]);
    let store = InMemoryMessageStore::new();
    let config = ChatConfig {
        texts: HashMap::from([(i18n::ERROR_INTERNAL.to_string(), "Kaputt.".to_string())]),
        ..ChatConfig::default()
    };
    let orchestrator = orchestrator(&provider, &store, config);

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
    assert_eq!(error_message(&events).as_deref(), Some("Kaputt."));
}

#[tokio::test]
async fn provider_timeout_fails_the_turn() {
    let provider = ScriptedProvider::new(vec![ScriptStep::chunk("thinking"), ScriptStep::Hang]);
    let store = InMemoryMessageStore::new();
    let config = ChatConfig {
        provider_timeout_secs: 1,
        ..ChatConfig::default()
    };
    let orchestrator = orchestrator(&provider, &store, config);

    let started = Instant::now();
    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;

    assert!(started.elapsed().as_millis() >= 900);
    assert_eq!(kinds(&events), vec!["chunk", "error"]);
    assert!(store.is_empty());
}

#[tokio::test]
async fn persistence_failure_still_completes_without_saved() {
    let provider = ScriptedProvider::new(script(&["Hello"]));
    let store = InMemoryMessageStore::new();
    store.fail_writes(true);
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;

    assert_eq!(kinds(&events), vec!["chunk", "completed"]);
    validate_sequence(&events).unwrap();
    assert!(store.is_empty());
}

#[tokio::test]
async fn missing_model_is_reported_before_the_provider_runs() {
    let provider = ScriptedProvider::new(script(&["never"])).with_llms(vec![]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;

    assert_eq!(
        events,
        vec![StreamEvent::error(Texts::new().t(i18n::ERROR_MISSING_LLM))]
    );
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn exhausted_group_quota_rejects_the_turn() {
    let provider = ScriptedProvider::new(script(&["never"]));
    let store = InMemoryMessageStore::new();
    let usage = InMemoryUsageStore::new();
    usage
        .increment(UsageRecord {
            user_id: "bob".into(),
            user_group: Some("students".into()),
            llm: "scripted".into(),
            model: "m".into(),
            count: 1_000,
            at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_millis() as u64,
        })
        .await
        .unwrap();

    let limits = UsageLimits::default().with_group(
        "students",
        GroupLimits {
            tokens: Some(1_000),
            user_tokens: None,
        },
    );
    let orchestrator = TurnOrchestrator::builder(Arc::new(provider.clone()), Arc::new(store.clone()))
        .with_usage(Arc::new(usage), limits)
        .build()
        .unwrap();

    let user = ChatUser::new("alice").with_group("students");
    let events = collect(
        orchestrator
            .start_turn(StartTurn::new(CONVERSATION, user, ChatInput::human("Hi")))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(
        error_message(&events).unwrap(),
        Texts::new().t(i18n::ERROR_TOKEN_LIMIT_GROUP)
    );
    assert!(provider.requests().is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn successful_turn_records_usage() {
    let provider = ScriptedProvider::new(vec![
        ScriptStep::chunk("ok"),
        ScriptStep::emit(ai_lib_chat::ProviderEvent::Usage {
            usage: ai_lib_chat::types::message::TokenUsage {
                token_count: 9,
                llm: "scripted".into(),
                model: "m1".into(),
            },
        }),
    ]);
    let store = InMemoryMessageStore::new();
    let usage = InMemoryUsageStore::new();
    let orchestrator = TurnOrchestrator::builder(Arc::new(provider), Arc::new(store))
        .with_usage(Arc::new(usage.clone()), UsageLimits::default())
        .build()
        .unwrap();

    let user = ChatUser::new("alice").with_group("staff");
    collect(
        orchestrator
            .start_turn(StartTurn::new(CONVERSATION, user, ChatInput::human("Hi")))
            .await
            .unwrap(),
    )
    .await;

    let records = usage.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].count, 9);
    assert_eq!(records[0].user_group.as_deref(), Some("staff"));
    assert_eq!(records[0].model, "m1");
}

#[tokio::test]
async fn tool_left_running_fails_the_turn() {
    let provider = ScriptedProvider::new(vec![
        ScriptStep::emit(ProviderEvent::ToolStart {
            id: "t1".into(),
            name: "search".into(),
            input: json!({}),
        }),
        ScriptStep::chunk("half"),
    ]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;

    assert_eq!(kinds(&events), vec!["tool_start", "chunk", "error"]);
    assert_eq!(
        error_message(&events).unwrap(),
        Texts::new().t(i18n::ERROR_INTERNAL)
    );
    assert!(store.is_empty());
}
