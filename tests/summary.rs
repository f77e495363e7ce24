mod common;

use std::sync::Arc;

use ai_lib_chat::protocol::validate_sequence;
use ai_lib_chat::provider::ScriptedProvider;
use ai_lib_chat::store::{Conversation, InMemoryConversationStore, InMemoryMessageStore};
use ai_lib_chat::{StreamEvent, TurnOrchestrator};

use common::*;

fn naming_orchestrator(
    provider: &ScriptedProvider,
    store: &InMemoryMessageStore,
    conversations: &InMemoryConversationStore,
) -> TurnOrchestrator {
    TurnOrchestrator::builder(Arc::new(provider.clone()), Arc::new(store.clone()))
        .with_conversations(Arc::new(conversations.clone()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn turn_announces_the_generated_conversation_name() {
    let provider = ScriptedProvider::new(script(&["Hello"])).with_completion("Greetings");
    let store = InMemoryMessageStore::new();
    let conversations = InMemoryConversationStore::new();
    conversations.insert(Conversation::new(CONVERSATION));
    let orchestrator = naming_orchestrator(&provider, &store, &conversations);

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;

    let summary_at = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Summary { .. }))
        .expect("summary event");
    assert_eq!(
        events[summary_at],
        StreamEvent::Summary {
            content: "Greetings".into()
        }
    );
    let answer: Vec<_> = kinds(&events)
        .into_iter()
        .filter(|k| *k != "summary")
        .collect();
    assert_eq!(answer, vec!["chunk", "saved", "completed"]);
    validate_sequence(&events).unwrap();

    assert_eq!(
        conversations.get(CONVERSATION).unwrap().name.as_deref(),
        Some("Greetings")
    );
}

#[tokio::test]
async fn names_follow_the_most_recent_user_messages() {
    let provider = ScriptedProvider::with_scripts(vec![script(&["Hello"]), script(&["Fine"])])
        .with_completion("Smalltalk");
    let store = InMemoryMessageStore::new();
    let conversations = InMemoryConversationStore::new();
    conversations.insert(Conversation::new(CONVERSATION));
    let orchestrator = naming_orchestrator(&provider, &store, &conversations);

    collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
    collect(orchestrator.start_turn(start("How are you?")).await.unwrap()).await;

    let prompts = provider.completion_prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("<CONTENT>Hi</CONTENT>"));
    assert!(prompts[1].contains("<CONTENT>How are you? Hi</CONTENT>"));
}

#[tokio::test]
async fn user_chosen_name_is_never_replaced() {
    let provider = ScriptedProvider::new(script(&["Hello"])).with_completion("Greetings");
    let store = InMemoryMessageStore::new();
    let conversations = InMemoryConversationStore::new();
    conversations.insert(Conversation::new(CONVERSATION).named_by_user("Project X"));
    let orchestrator = naming_orchestrator(&provider, &store, &conversations);

    let events = collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;

    assert_eq!(kinds(&events), vec!["chunk", "saved", "completed"]);
    assert_eq!(
        conversations.get(CONVERSATION).unwrap().name.as_deref(),
        Some("Project X")
    );
}
