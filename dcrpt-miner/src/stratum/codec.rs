//! Wire framing for the pool protocol.
//!
//! Outbound, each command's JSON text is base64-encoded four times and
//! terminated with `\n`. Inbound, each `\n`-terminated frame is base64-decoded
//! three times and the result split into `\n`-separated JSON messages. The
//! pool's frames carry one layer less than ours.
//!
//! Some pools omit the trailing newline. Buffered bytes without one are
//! taken as a frame as soon as they decode to complete JSON messages.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{BufMut, BytesMut};
use serde::de::IgnoredAny;
use tokio_util::codec::{Decoder, Encoder};

use super::messages::Request;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Base64 layers applied to outbound JSON.
pub const ENCODE_PASSES: usize = 4;

/// Base64 layers removed from inbound frames.
pub const DECODE_PASSES: usize = 3;

/// Longest inbound frame accepted before the connection is failed.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Apply `passes` layers of base64 to `data`. `passes` must be at least one.
pub fn wrap(data: &[u8], passes: usize) -> String {
    let mut text = STANDARD.encode(data);
    for _ in 1..passes {
        text = STANDARD.encode(text.as_bytes());
    }
    text
}

/// Strip `passes` layers of base64 from `data`, ignoring whitespace between
/// characters at every layer.
pub fn unwrap(data: &[u8], passes: usize) -> Result<Vec<u8>> {
    let mut bytes = data.to_vec();
    for _ in 0..passes {
        bytes.retain(|b| !b.is_ascii_whitespace());
        bytes = STANDARD.decode(&bytes)?;
    }
    Ok(bytes)
}

/// Split a fully decoded frame into its JSON messages.
fn split_messages(payload: Vec<u8>) -> Result<Vec<String>> {
    let text = String::from_utf8(payload)
        .map_err(|e| Error::Protocol(format!("frame is not UTF-8: {e}")))?;
    Ok(text
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Codec for [`Request`]s out and batches of JSON message text in.
///
/// A frame that fails to decode is logged and skipped; only I/O errors and
/// oversized frames end the stream.
#[derive(Debug, Default)]
pub struct StratumCodec;

impl Encoder<Request> for StratumCodec {
    type Error = Error;

    fn encode(&mut self, request: Request, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&request)?;
        let frame = wrap(&json, ENCODE_PASSES);
        dst.reserve(frame.len() + 1);
        dst.put_slice(frame.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl Decoder for StratumCodec {
    type Item = Vec<String>;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(end) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_FRAME_LEN {
                    return Err(Error::Protocol(format!(
                        "frame exceeds {MAX_FRAME_LEN} bytes"
                    )));
                }
                return Ok(decode_unterminated(src));
            };

            let line = src.split_to(end + 1);
            if let Some(messages) = decode_frame(&line[..end]) {
                return Ok(Some(messages));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(messages) = self.decode(src)? {
            return Ok(Some(messages));
        }
        let rest = src.split();
        Ok(decode_frame(&rest))
    }
}

/// Take the whole buffer as a frame if it already decodes to complete JSON
/// messages; otherwise leave it for more bytes.
fn decode_unterminated(src: &mut BytesMut) -> Option<Vec<String>> {
    if src.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let messages = unwrap(src, DECODE_PASSES).and_then(split_messages).ok()?;
    let complete = !messages.is_empty()
        && messages
            .iter()
            .all(|message| serde_json::from_str::<IgnoredAny>(message).is_ok());
    if !complete {
        return None;
    }

    src.clear();
    Some(messages)
}

/// Decode one frame, returning `None` for blank or malformed frames.
fn decode_frame(frame: &[u8]) -> Option<Vec<String>> {
    if frame.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    match unwrap(frame, DECODE_PASSES).and_then(split_messages) {
        Ok(messages) if messages.is_empty() => None,
        Ok(messages) => Some(messages),
        Err(e) => {
            warn!(error = %e, len = frame.len(), "Dropping undecodable frame");
            None
        }
    }
}
