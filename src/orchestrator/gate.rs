//! Per-conversation serialization of turns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::BusyPolicy;
use crate::types::message::ConversationId;
use crate::{Error, ErrorContext, Result};

type Slot = Arc<AsyncMutex<()>>;

/// Admits at most one turn per conversation at a time.
#[derive(Clone, Default)]
pub struct TurnGate {
    slots: Arc<Mutex<HashMap<ConversationId, Slot>>>,
}

impl std::fmt::Debug for TurnGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.slots.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("TurnGate").field("active", &active).finish()
    }
}

impl TurnGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the conversation. With [`BusyPolicy::Reject`] a running turn yields
    /// [`Error::ConversationBusy`]; with [`BusyPolicy::Queue`] this waits for it to finish.
    pub async fn acquire(
        &self,
        conversation_id: ConversationId,
        policy: BusyPolicy,
    ) -> Result<TurnPermit> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| {
                Error::runtime_with_context(
                    "turn gate lock poisoned",
                    ErrorContext::new().with_source("turn_gate"),
                )
            })?;
            slots.entry(conversation_id).or_default().clone()
        };

        let guard = match policy {
            BusyPolicy::Reject => slot
                .try_lock_owned()
                .map_err(|_| Error::ConversationBusy(conversation_id))?,
            BusyPolicy::Queue => slot.lock_owned().await,
        };

        Ok(TurnPermit {
            gate: self.clone(),
            conversation_id,
            guard: Some(guard),
        })
    }

    /// Whether a turn is running for the conversation.
    pub fn is_busy(&self, conversation_id: ConversationId) -> bool {
        self.slots
            .lock()
            .ok()
            .and_then(|slots| slots.get(&conversation_id).map(|s| s.try_lock().is_err()))
            .unwrap_or(false)
    }
}

/// Held for the lifetime of a turn.
pub struct TurnPermit {
    gate: TurnGate,
    conversation_id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnPermit {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut slots) = self.gate.slots.lock() {
            let idle = slots
                .get(&self.conversation_id)
                .map(|slot| Arc::strong_count(slot) == 1)
                .unwrap_or(false);
            if idle {
                slots.remove(&self.conversation_id);
            }
        }
    }
}
