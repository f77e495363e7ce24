//! Ordering rules of the event stream.
//!
//! - nothing follows a terminal event (`completed` / `error`)
//! - `tool_end` requires an open `tool_start` with the same invocation id
//! - `sources` never appear while tools are running unless one of them already ended
//!   (sources belong to a finished tool or to the provider itself)
//! - `saved` appears at most once, before the terminal event; no `chunk` / `tool_*` /
//!   `sources` follow it
//! - `completed` requires every started tool to have ended
//! - `debug` / `logging` / `ui` / `summary` are unconstrained until the stream terminates

use std::collections::HashSet;

use crate::types::events::StreamEvent;

/// What the guard decided about one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Arrived after the terminal event; must be dropped.
    AfterTerminal,
    Reject(OrderViolation),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderViolation {
    #[error("event '{0}' emitted after the terminal event")]
    AfterTerminal(&'static str),
    #[error("tool_end for '{0}' without a matching tool_start")]
    UnmatchedToolEnd(String),
    #[error("tool_start for '{0}' emitted twice")]
    DuplicateToolStart(String),
    #[error("sources emitted while tool '{0}' is still running")]
    SourcesBeforeToolEnd(String),
    #[error("event '{0}' emitted after saved")]
    AfterSaved(&'static str),
    #[error("saved emitted twice")]
    DuplicateSaved,
    #[error("completed while tool '{0}' is still running")]
    CompletedWithOpenTool(String),
    #[error("stream ended without a terminal event")]
    MissingTerminal,
}

/// Incremental checker for one turn's event stream.
#[derive(Debug, Default)]
pub struct OrderGuard {
    open_tools: Vec<String>,
    seen_tools: HashSet<String>,
    ended_tools: usize,
    saved: bool,
    terminated: bool,
}

impl OrderGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Check `event` against the events admitted so far and record it when accepted.
    pub fn admit(&mut self, event: &StreamEvent) -> Admission {
        if self.terminated {
            return Admission::AfterTerminal;
        }
        if self.saved && is_content(event) {
            return Admission::Reject(OrderViolation::AfterSaved(event.kind()));
        }

        match event {
            StreamEvent::ToolStart { tool, .. } => {
                if !self.seen_tools.insert(tool.invocation_id.clone()) {
                    return Admission::Reject(OrderViolation::DuplicateToolStart(
                        tool.invocation_id.clone(),
                    ));
                }
                self.open_tools.push(tool.invocation_id.clone());
            }
            StreamEvent::ToolEnd { tool, .. } => {
                match self
                    .open_tools
                    .iter()
                    .position(|id| *id == tool.invocation_id)
                {
                    Some(idx) => {
                        self.open_tools.remove(idx);
                        self.ended_tools += 1;
                    }
                    None => {
                        return Admission::Reject(OrderViolation::UnmatchedToolEnd(
                            tool.invocation_id.clone(),
                        ))
                    }
                }
            }
            StreamEvent::Sources { .. } => {
                if self.ended_tools == 0 {
                    if let Some(open) = self.open_tools.last() {
                        return Admission::Reject(OrderViolation::SourcesBeforeToolEnd(
                            open.clone(),
                        ));
                    }
                }
            }
            StreamEvent::Saved { .. } => {
                if self.saved {
                    return Admission::Reject(OrderViolation::DuplicateSaved);
                }
                self.saved = true;
            }
            StreamEvent::Completed { .. } => {
                if let Some(open) = self.open_tools.first() {
                    return Admission::Reject(OrderViolation::CompletedWithOpenTool(open.clone()));
                }
                self.terminated = true;
            }
            e if e.is_terminal() => {
                self.terminated = true;
            }
            _ => {}
        }

        Admission::Accept
    }
}

fn is_content(event: &StreamEvent) -> bool {
    matches!(
        event,
        StreamEvent::Chunk { .. }
            | StreamEvent::ToolStart { .. }
            | StreamEvent::ToolEnd { .. }
            | StreamEvent::Sources { .. }
    )
}

/// Validate a complete event sequence as observed by a caller.
///
/// The first terminal event is authoritative; the sequence must end with it.
pub fn validate_sequence(events: &[StreamEvent]) -> Result<(), OrderViolation> {
    let mut guard = OrderGuard::new();

    for event in events {
        match guard.admit(event) {
            Admission::Accept => {}
            Admission::AfterTerminal => return Err(OrderViolation::AfterTerminal(event.kind())),
            Admission::Reject(violation) => return Err(violation),
        }
    }

    if guard.is_terminated() {
        Ok(())
    } else {
        Err(OrderViolation::MissingTerminal)
    }
}
