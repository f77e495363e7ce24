//! Shared fixtures for the turn integration tests.

#![allow(dead_code)]

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use ai_lib_chat::provider::{ScriptStep, ScriptedProvider};
use ai_lib_chat::store::InMemoryMessageStore;
use ai_lib_chat::{
    ChatConfig, ChatInput, ChatUser, StartTurn, StreamEvent, TurnOrchestrator, TurnStream,
};

pub const CONVERSATION: i64 = 1;

pub fn orchestrator(
    provider: &ScriptedProvider,
    store: &InMemoryMessageStore,
    config: ChatConfig,
) -> TurnOrchestrator {
    TurnOrchestrator::builder(Arc::new(provider.clone()), Arc::new(store.clone()))
        .with_config(config)
        .build()
        .unwrap()
}

pub fn start(input: &str) -> StartTurn {
    StartTurn::new(CONVERSATION, ChatUser::new("alice"), ChatInput::human(input))
}

pub fn script(chunks: &[&str]) -> Vec<ScriptStep> {
    chunks.iter().map(|c| ScriptStep::chunk(*c)).collect()
}

/// Drain a turn. Panics if it does not finish in time.
pub async fn collect(stream: TurnStream) -> Vec<StreamEvent> {
    tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
        .await
        .expect("turn did not finish")
}

pub fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::kind).collect()
}

pub fn chunk_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content } => Some(ai_lib_chat::types::message::joined_text(content)),
            _ => None,
        })
        .collect()
}

pub fn error_message(events: &[StreamEvent]) -> Option<String> {
    events.iter().find_map(|e| match e {
        StreamEvent::Error { message } => Some(message.clone()),
        _ => None,
    })
}

/// Wait until the conversation has no turn in flight.
pub async fn until_idle(orchestrator: &TurnOrchestrator, conversation_id: i64) {
    for _ in 0..200 {
        if !orchestrator.is_busy(conversation_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("conversation {} still busy", conversation_id);
}
