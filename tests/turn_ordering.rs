mod common;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_lib_chat::context::{ChatContext, TurnHandle};

use ai_lib_chat::normalize::C4_JSON_MIME_TYPE;
use ai_lib_chat::protocol::{validate_sequence, SseEventDecoder};
use ai_lib_chat::provider::{ScriptStep, ScriptedProvider};
use ai_lib_chat::store::InMemoryMessageStore;
use ai_lib_chat::types::message::{MessageRole, TokenUsage};
use ai_lib_chat::types::tool::{ToolBlock, ToolCallResult};
use ai_lib_chat::{ChatConfig, ChatMiddleware, Next, ProviderEvent, Result, StreamEvent};

use common::*;

fn citation(id: &str, text: &str) -> String {
    json!({
        "kind": "chunk",
        "version": "1",
        "data": {
            "text": text,
            "id": id,
            "region": {"pages": "2-3"},
            "metadata": {"uri": format!("files/{id}"), "title": "Handbook"}
        }
    })
    .to_string()
}

#[tokio::test]
async fn streamed_answer_is_saved_before_completion() {
    let provider = ScriptedProvider::new(script(&["Hel", "lo"]));
    let store = InMemoryMessageStore::with_next_id(41);
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;

    assert_eq!(kinds(&events), vec!["chunk", "chunk", "saved", "completed"]);
    assert_eq!(events[0], StreamEvent::chunk("Hel"));
    assert_eq!(events[1], StreamEvent::chunk("lo"));
    match &events[2] {
        StreamEvent::Saved {
            message_id,
            message_type,
            parent_id,
            ..
        } => {
            assert_eq!(*message_id, 42);
            assert_eq!(*message_type, MessageRole::Ai);
            assert_eq!(*parent_id, Some(41));
        }
        other => panic!("expected saved, got {:?}", other),
    }
    validate_sequence(&events).unwrap();

    let rows = store.messages(CONVERSATION);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].role, MessageRole::Human);
    assert_eq!(rows[0].text(), "Hi");
    assert_eq!(rows[0].parent_id, None);
    assert_eq!(rows[1].text(), "Hello");
}

#[tokio::test]
async fn sources_follow_their_tool_and_keep_content_only_in_storage() {
    let result = ToolCallResult::text("found one passage")
        .with_block(ToolBlock::resource(C4_JSON_MIME_TYPE, citation("c1", "the passage")));
    let provider = ScriptedProvider::new(vec![
        ScriptStep::emit(ProviderEvent::ToolStart {
            id: "t1".into(),
            name: "search".into(),
            input: json!({"query": "handbook"}),
        }),
        ScriptStep::emit(ProviderEvent::ToolEnd {
            id: "t1".into(),
            result,
        }),
        ScriptStep::chunk("See the handbook."),
    ]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Where?")).await.unwrap()).await;

    assert_eq!(
        kinds(&events),
        vec!["tool_start", "tool_end", "sources", "chunk", "saved", "completed"]
    );
    validate_sequence(&events).unwrap();

    match &events[1] {
        StreamEvent::ToolEnd { tool, output } => {
            assert_eq!(tool.name, "search");
            assert_eq!(tool.invocation_id, "t1");
            assert!(output.as_deref().unwrap_or_default().starts_with("found one passage"));
        }
        other => panic!("expected tool_end, got {:?}", other),
    }
    match &events[2] {
        StreamEvent::Sources { content } => {
            assert_eq!(content.len(), 1);
            assert_eq!(content[0].chunk.content, None);
            assert_eq!(content[0].chunk.pages, vec![2, 3]);
        }
        other => panic!("expected sources, got {:?}", other),
    }

    let answer = store.messages(CONVERSATION).pop().unwrap();
    assert_eq!(answer.tools, vec!["search".to_string()]);
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].chunk.content.as_deref(), Some("the passage"));
}

#[tokio::test]
async fn rag_logging_is_opt_in() {
    let result = ToolCallResult::default()
        .with_block(ToolBlock::resource(C4_JSON_MIME_TYPE, citation("c1", "chunk body")));
    let steps = vec![
        ScriptStep::emit(ProviderEvent::ToolStart {
            id: "t1".into(),
            name: "search".into(),
            input: serde_json::Value::Null,
        }),
        ScriptStep::emit(ProviderEvent::ToolEnd {
            id: "t1".into(),
            result,
        }),
    ];
    let provider = ScriptedProvider::new(steps);
    let store = InMemoryMessageStore::new();
    let config = ChatConfig {
        log_rag_chunks: true,
        ..ChatConfig::default()
    };
    let orchestrator = orchestrator(&provider, &store, config);

    let events = collect(orchestrator.start_turn(start("Where?")).await.unwrap()).await;
    let logging = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::Logging { content } => Some(content.clone()),
            _ => None,
        })
        .expect("logging event");
    assert!(logging.contains("***Number of chunks*** 1"));
    assert!(logging.contains("chunk body"));
    validate_sequence(&events).unwrap();
}

#[tokio::test]
async fn final_answer_is_emitted_when_nothing_was_streamed() {
    let provider = ScriptedProvider::new(vec![ScriptStep::emit(ProviderEvent::Final {
        content: "Done.".into(),
    })]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Go")).await.unwrap()).await;
    assert_eq!(kinds(&events), vec!["chunk", "saved", "completed"]);
    assert_eq!(chunk_text(&events), "Done.");
}

#[tokio::test]
async fn completion_reports_usage_and_model() {
    let provider = ScriptedProvider::new(vec![
        ScriptStep::chunk("ok"),
        ScriptStep::emit(ProviderEvent::Usage {
            usage: TokenUsage {
                token_count: 7,
                llm: "azure".into(),
                model: "gpt-4o".into(),
            },
        }),
        ScriptStep::emit(ProviderEvent::Usage {
            usage: TokenUsage {
                token_count: 5,
                ..TokenUsage::default()
            },
        }),
    ]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
    match events.last() {
        Some(StreamEvent::Completed { metadata }) => {
            assert_eq!(metadata.token_count, 12);
            assert_eq!(metadata.llm.as_deref(), Some("azure"));
            assert_eq!(metadata.model.as_deref(), Some("gpt-4o"));
        }
        other => panic!("expected completed, got {:?}", other),
    }
}

#[tokio::test]
async fn follow_up_turn_sees_history_and_default_prompt() {
    let provider = ScriptedProvider::with_scripts(vec![script(&["Hello"]), script(&["Fine"])]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
    collect(orchestrator.start_turn(start("How are you?")).await.unwrap()).await;

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].history.is_empty());
    let history: Vec<_> = requests[1].history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(history, vec!["Hi", "Hello"]);
    assert_eq!(
        requests[1].system_messages,
        vec![ChatConfig::default().default_system_prompt]
    );
    assert_eq!(requests[1].llm.as_deref(), Some("scripted"));

    let rows = store.messages(CONVERSATION);
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[2].parent_id, Some(rows[1].id));
}

#[tokio::test]
async fn debug_events_from_the_provider_are_recorded() {
    let provider = ScriptedProvider::new(vec![
        ScriptStep::Debug {
            content: "prompt tokens: 3".into(),
        },
        ScriptStep::chunk("ok"),
    ]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
    assert_eq!(kinds(&events), vec!["debug", "chunk", "saved", "completed"]);

    let answer = store.messages(CONVERSATION).pop().unwrap();
    assert_eq!(answer.debug, vec!["prompt tokens: 3".to_string()]);
}

#[tokio::test]
async fn sse_frames_decode_back_to_the_turn() {
    let provider = ScriptedProvider::new(script(&["Grüß", " dich"]));
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    let stream = orchestrator.start_turn(start("Hi")).await.unwrap();
    let frames: Vec<String> = stream
        .into_sse()
        .map(Result::unwrap)
        .collect::<Vec<_>>()
        .await;

    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(|f| f.starts_with("data: ") && f.ends_with("\n\n")));

    // Replay the wire in small pieces, as a client would receive it.
    let wire = frames.concat().into_bytes();
    let pieces: Vec<ai_lib_chat::Result<Bytes>> = wire
        .chunks(5)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let decoded: Vec<StreamEvent> =
        SseEventDecoder::decode(Box::pin(tokio_stream::iter(pieces)))
            .map(Result::unwrap)
            .collect()
            .await;

    assert_eq!(kinds(&decoded), vec!["chunk", "chunk", "saved", "completed"]);
    assert_eq!(chunk_text(&decoded), "Grüß dich");
    validate_sequence(&decoded).unwrap();
}

/// Keeps a handle to every turn it sees.
struct HoldsTurn(Arc<Mutex<Vec<TurnHandle>>>);

#[async_trait]
impl ChatMiddleware for HoldsTurn {
    fn order(&self) -> i32 {
        10
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()> {
        self.0.lock().unwrap().push(ctx.handle());
        next.run(ctx).await
    }
}

#[tokio::test]
async fn stream_ends_after_completion_while_turn_handles_are_alive() {
    let provider = ScriptedProvider::new(script(&["Hel", "lo"]));
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());
    let held = Arc::new(Mutex::new(Vec::new()));

    let mut stream = orchestrator
        .start_turn(
            start("Hi")
                .with_extensions(vec![Arc::new(HoldsTurn(held.clone())) as Arc<dyn ChatMiddleware>]),
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = stream.next().await {
            seen.push(event);
        }
    })
    .await;

    assert!(ended.is_ok(), "stream still open after {:?}", kinds(&seen));
    assert_eq!(kinds(&seen), vec!["chunk", "chunk", "saved", "completed"]);
    // Both the recorded provider request and the middleware still reference the turn.
    assert!(provider.requests()[0].ui.is_some());
    assert_eq!(held.lock().unwrap().len(), 1);
    assert_eq!(stream.next().await, None);
}
