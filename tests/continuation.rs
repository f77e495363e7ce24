mod common;

use ai_lib_chat::protocol::validate_sequence;
use ai_lib_chat::provider::{ScriptStep, ScriptedProvider};
use ai_lib_chat::store::InMemoryMessageStore;
use ai_lib_chat::{ChatConfig, ChatUser, ContinueTurn, Error, MessageRole, StreamEvent};

use common::*;

fn regenerate(message_id: i64) -> ContinueTurn {
    ContinueTurn::new(CONVERSATION, message_id, ChatUser::new("alice"))
}

#[tokio::test]
async fn continuation_replaces_the_answer_in_place() {
    let provider = ScriptedProvider::with_scripts(vec![
        script(&["Hello"]),
        script(&["Hola"]),
        script(&["Bonjour"]),
    ]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
    let rows = store.messages(CONVERSATION);
    let (human, answer) = (rows[0].clone(), rows[1].clone());

    for expected in ["Hola", "Bonjour"] {
        let events = collect(orchestrator.continue_turn(regenerate(answer.id)).await.unwrap()).await;
        validate_sequence(&events).unwrap();
        match &events[events.len() - 2] {
            StreamEvent::Saved {
                message_id,
                parent_id,
                ..
            } => {
                assert_eq!(*message_id, answer.id);
                assert_eq!(*parent_id, Some(human.id));
            }
            other => panic!("expected saved, got {:?}", other),
        }

        let rows = store.messages(CONVERSATION);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, answer.id);
        assert_eq!(rows[1].text(), expected);
    }

    // The regenerated answer is produced for the same question, without the old answer.
    let request = provider.requests().pop().unwrap();
    assert_eq!(request.input.content, "Hi");
    assert!(request.history.is_empty());
}

#[tokio::test]
async fn failed_continuation_keeps_the_previous_answer() {
    let provider = ScriptedProvider::with_scripts(vec![
        script(&["Hello"]),
        vec![
            ScriptStep::chunk("Ho"),
            ScriptStep::Fail {
                message: "boom".into(),
                payload: serde_json::Value::Null,
            },
        ],
    ]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
    let answer = store.messages(CONVERSATION)[1].clone();

    let events = collect(orchestrator.continue_turn(regenerate(answer.id)).await.unwrap()).await;
    assert_eq!(kinds(&events), vec!["chunk", "error"]);
    assert_eq!(store.messages(CONVERSATION)[1].text(), "Hello");
}

#[tokio::test]
async fn continuation_of_a_deeper_answer_restores_earlier_history() {
    let provider = ScriptedProvider::with_scripts(vec![
        script(&["A1"]),
        script(&["A2"]),
        script(&["A2 again"]),
    ]);
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    collect(orchestrator.start_turn(start("Q1")).await.unwrap()).await;
    collect(orchestrator.start_turn(start("Q2")).await.unwrap()).await;
    let second_answer = store.messages(CONVERSATION)[3].clone();

    collect(orchestrator.continue_turn(regenerate(second_answer.id)).await.unwrap()).await;

    let request = provider.requests().pop().unwrap();
    assert_eq!(request.input.content, "Q2");
    let history: Vec<_> = request.history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(history, vec!["Q1", "A1"]);
    assert_eq!(store.messages(CONVERSATION)[3].text(), "A2 again");
}

#[tokio::test]
async fn only_assistant_messages_of_the_conversation_can_be_continued() {
    let provider = ScriptedProvider::new(script(&["Hello"]));
    let store = InMemoryMessageStore::new();
    let orchestrator = orchestrator(&provider, &store, ChatConfig::default());

    collect(orchestrator.start_turn(start("Hi")).await.unwrap()).await;
    let human = store.messages(CONVERSATION)[0].clone();
    assert_eq!(human.role, MessageRole::Human);

    assert!(matches!(
        orchestrator.continue_turn(regenerate(human.id)).await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        orchestrator.continue_turn(regenerate(999)).await,
        Err(Error::NotFound(_))
    ));

    let other_conversation = ContinueTurn::new(CONVERSATION + 1, 2, ChatUser::new("alice"));
    assert!(matches!(
        orchestrator.continue_turn(other_conversation).await,
        Err(Error::NotFound(_))
    ));
}
