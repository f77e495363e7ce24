//! Server-Sent Events framing for [`StreamEvent`]s.
//!
//! Each frame is `data: <json>\n\n` carrying one self-contained event. The decoder is the
//! inverse and is what clients and developer tooling use to read a turn back.

use bytes::Bytes;
use futures::{stream, StreamExt};

use crate::types::events::StreamEvent;
use crate::{BoxStream, Error, Result};

const DELIMITER: &str = "\n\n";
const PREFIX: &str = "data:";

/// Encode one event as an SSE frame.
pub fn encode(event: &StreamEvent) -> Result<String> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {}\n\n", json))
}

/// Parse one SSE frame. Comment frames and frames without a `data:` field yield `None`.
pub fn decode_frame(frame: &str) -> Option<Result<StreamEvent>> {
    let mut payload = String::new();
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(data) = line.strip_prefix(PREFIX) {
            if !payload.is_empty() {
                payload.push('\n');
            }
            payload.push_str(data.strip_prefix(' ').unwrap_or(data));
        }
    }

    if payload.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(&payload).map_err(Error::from))
}

/// Incremental SSE decoder (bytes -> events).
///
/// Frames may be split across byte chunks arbitrarily; a trailing frame without the final
/// delimiter is still decoded at end of input.
pub struct SseEventDecoder;

impl SseEventDecoder {
    pub fn decode(input: BoxStream<'static, Bytes>) -> BoxStream<'static, StreamEvent> {
        let stream = stream::unfold(
            (input, Vec::<u8>::new(), false),
            |(mut input, mut buf, mut done)| async move {
                loop {
                    if let Some(idx) = find_delimiter(&buf) {
                        let frame: Vec<u8> = buf.drain(..idx + DELIMITER.len()).collect();
                        match decode_frame(&String::from_utf8_lossy(&frame[..idx])) {
                            Some(item) => return Some((item, (input, buf, done))),
                            None => continue,
                        }
                    }

                    if done {
                        let rest = std::mem::take(&mut buf);
                        return decode_frame(&String::from_utf8_lossy(&rest))
                            .map(|item| (item, (input, buf, done)));
                    }

                    match input.next().await {
                        Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                        Some(Err(e)) => return Some((Err(e), (input, buf, done))),
                        None => done = true,
                    }
                }
            },
        );

        Box::pin(stream)
    }
}

// Frames are split on raw bytes so multi-byte characters may straddle chunks.
fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(DELIMITER.len())
        .position(|w| w == DELIMITER.as_bytes())
}
