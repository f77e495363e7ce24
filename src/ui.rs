//! Client-side UI requests answered out of band.
//!
//! A turn can ask the user to confirm something or to type a value. The request is pushed as
//! a `ui` event; the answer arrives through a separate call ([`CallbackService::complete`])
//! carrying the request id. Unanswered requests resolve to `false` / an empty string once the
//! timeout expires.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::context::ResultSink;
use crate::types::events::{StreamEvent, UiRequest, UiRequestType};
use crate::{Error, ErrorContext, Result};

struct Pending {
    request_type: UiRequestType,
    tx: oneshot::Sender<Value>,
}

/// Registry of open UI requests, shared by all turns of a process.
#[derive(Clone, Default)]
pub struct CallbackService {
    pending: Arc<Mutex<HashMap<String, Pending>>>,
}

impl std::fmt::Debug for CallbackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackService")
            .field("pending", &self.len())
            .finish()
    }
}

impl CallbackService {
    pub fn new() -> Self {
        Self::default()
    }

    fn request(&self, request_type: UiRequestType) -> Result<(String, oneshot::Receiver<Value>)> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().map_err(|_| {
            Error::runtime_with_context(
                "ui callback registry lock poisoned",
                ErrorContext::new()
                    .with_details("no further ui requests can be registered")
                    .with_source("callback_service"),
            )
        })?;
        pending.insert(id.clone(), Pending { request_type, tx });
        Ok((id, rx))
    }

    /// Deliver an answer. Returns `false` for unknown ids and answers of the wrong type,
    /// which leave the request open.
    pub fn complete(&self, id: &str, value: Value) -> bool {
        let Ok(mut pending) = self.pending.lock() else {
            return false;
        };
        let matches = match pending.get(id) {
            Some(p) => match p.request_type {
                UiRequestType::Boolean => value.is_boolean(),
                UiRequestType::String => value.is_string(),
            },
            None => false,
        };
        if !matches {
            return false;
        }
        match pending.remove(id) {
            Some(p) => p.tx.send(value).is_ok(),
            None => false,
        }
    }

    fn forget(&self, id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }

    /// Number of open requests.
    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// UI access of one turn.
#[derive(Debug, Clone)]
pub struct ChatUi {
    callbacks: CallbackService,
    result: ResultSink,
    timeout: Duration,
}

impl ChatUi {
    pub fn new(callbacks: CallbackService, result: ResultSink, timeout: Duration) -> Self {
        Self {
            callbacks,
            result,
            timeout,
        }
    }

    /// Ask a yes/no question. Resolves to `false` on timeout.
    pub async fn confirm(&self, text: impl Into<String>) -> Result<bool> {
        let answer = self.ask(UiRequestType::Boolean, text.into()).await?;
        Ok(answer.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    /// Ask for free text. Resolves to an empty string on timeout.
    pub async fn input(&self, text: impl Into<String>) -> Result<String> {
        let answer = self.ask(UiRequestType::String, text.into()).await?;
        Ok(answer
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    async fn ask(&self, request_type: UiRequestType, text: String) -> Result<Option<Value>> {
        let (id, rx) = self.callbacks.request(request_type)?;
        self.result
            .emit(StreamEvent::Ui {
                request: UiRequest {
                    id: id.clone(),
                    text,
                    request_type,
                },
            })
            .await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                tracing::debug!(request_id = %id, "ui request timed out");
                self.callbacks.forget(&id);
                Ok(None)
            }
        }
    }
}
