//! Streaming event protocol.
//!
//! A turn produces a single forward-only, ordered channel of [`StreamEvent`]s terminated by
//! exactly one `completed` or `error`. Each frame is self-contained; ordering across frames
//! carries meaning.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`order`] | Ordering rules, incremental guard and a sequence oracle |
//! | [`sse`] | SSE framing (encode) and incremental decoding |
//!
//! [`StreamEvent`]: crate::types::StreamEvent

pub mod order;
pub mod sse;

pub use order::{validate_sequence, Admission, OrderGuard, OrderViolation};
pub use sse::{encode, SseEventDecoder};
