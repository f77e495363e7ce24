//! The caller's end of a turn.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::context::EventReceiver;
use crate::protocol::sse;
use crate::types::events::StreamEvent;
use crate::BoxStream;

/// Events of one turn, in order. Dropping the stream cancels the turn.
///
/// The stream ends right after the terminal event (`completed` or `error`), whoever else still
/// holds a handle to the turn.
pub struct TurnStream {
    events: EventReceiver,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl TurnStream {
    pub(crate) fn new(events: EventReceiver, cancel: CancellationToken) -> Self {
        Self {
            events,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    /// Cancel the turn without dropping the stream; remaining events can still be drained.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Encode every event as an SSE frame.
    pub fn into_sse(self) -> BoxStream<'static, String> {
        Box::pin(self.map(|event| sse::encode(&event)))
    }
}

impl Stream for TurnStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}
