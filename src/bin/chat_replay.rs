//! chat-replay — 回放脚本化的对话轮次并输出 SSE 帧
//!
//! Usage:
//!   chat-replay <scenario.yaml>     Replay every turn of the scenario
//!   chat-replay help                Show this help message
//!
//! A scenario is YAML:
//!
//! ```yaml
//! config:            # optional, same keys as ChatConfig
//!   busy_policy: reject
//! conversation_id: 1 # optional
//! turns:
//!   - input: "Hi"
//!     script:
//!       - step: emit
//!         event: { type: chunk, text: "Hel" }
//!       - step: emit
//!         event: { type: chunk, text: "lo" }
//!   - continue: true # regenerate the previous answer
//!     script:
//!       - step: fail
//!         message: "boom"
//! ```

use anyhow::{bail, Context};
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

use ai_lib_chat::provider::{ScriptStep, ScriptedProvider};
use ai_lib_chat::store::{InMemoryMessageStore, MessageStore};
use ai_lib_chat::{
    ChatConfig, ChatInput, ChatUser, ContinueTurn, MessageRole, StartTurn, TurnOrchestrator,
};

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    config: Option<ChatConfig>,
    #[serde(default = "default_conversation")]
    conversation_id: i64,
    #[serde(default = "default_user")]
    user: String,
    turns: Vec<ScenarioTurn>,
}

#[derive(Debug, Deserialize)]
struct ScenarioTurn {
    #[serde(default)]
    input: String,
    #[serde(default, rename = "continue")]
    continuation: bool,
    #[serde(default)]
    keep_partial: bool,
    script: Vec<ScriptStep>,
}

fn default_conversation() -> i64 {
    1
}

fn default_user() -> String {
    "replay".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        None | Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some(path) => replay(PathBuf::from(path)).await,
    }
}

fn print_usage() {
    println!(
        r#"chat-replay — replay scripted chat turns

USAGE:
    chat-replay <scenario.yaml>

ENVIRONMENT:
    RUST_LOG                    Log filter (logs go to stderr)
    AI_CHAT_*                   Configuration overrides"#
    );
}

async fn replay(path: PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    let scenario: Scenario = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing scenario {}", path.display()))?;
    if scenario.turns.is_empty() {
        bail!("scenario {} has no turns", path.display());
    }

    let config = scenario
        .config
        .unwrap_or_default()
        .with_env_overrides()?;
    let provider = Arc::new(ScriptedProvider::with_scripts(
        scenario.turns.iter().map(|t| t.script.clone()).collect(),
    ));
    let messages = Arc::new(InMemoryMessageStore::new());
    let orchestrator = TurnOrchestrator::builder(provider, messages.clone())
        .with_config(config)
        .build()?;

    let user = ChatUser::new(scenario.user);
    for (index, turn) in scenario.turns.into_iter().enumerate() {
        println!(": turn {}", index + 1);

        let stream = if turn.continuation {
            let last_ai = messages
                .find_latest(scenario.conversation_id)
                .await?
                .filter(|m| m.role == MessageRole::Ai)
                .context("continue requested but the conversation has no answer yet")?;
            orchestrator
                .continue_turn(
                    ContinueTurn::new(scenario.conversation_id, last_ai.id, user.clone())
                        .keep_partial(turn.keep_partial),
                )
                .await?
        } else {
            orchestrator
                .start_turn(
                    StartTurn::new(
                        scenario.conversation_id,
                        user.clone(),
                        ChatInput::human(turn.input),
                    )
                    .keep_partial(turn.keep_partial),
                )
                .await?
        };

        let mut frames = stream.into_sse();
        while let Some(frame) = frames.next().await {
            print!("{}", frame?);
        }
    }

    Ok(())
}
