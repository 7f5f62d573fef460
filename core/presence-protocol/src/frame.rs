//! Native-messaging framing for the upstream stdio channel.
//!
//! Each frame is a 4-byte little-endian length followed by that many bytes of
//! UTF-8 JSON. A zero length is a heartbeat and decodes to an empty object.

use crate::FrameError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{ErrorKind, Read, Write};

/// Largest frame accepted from the browser. Anything bigger is treated as a
/// corrupt stream rather than allocated.
pub const MAX_INBOUND_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Browsers refuse host-to-extension messages above 1 MiB.
pub const MAX_OUTBOUND_FRAME_BYTES: usize = 1024 * 1024;

/// Reads one frame.
///
/// Returns `Ok(None)` when the stream ends, including a short read of the
/// prefix or the body. Returns an error only for a real I/O failure, an
/// oversized length, or a body that is not valid JSON.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Value>, FrameError> {
    let mut prefix = [0u8; 4];
    if !read_exact_or_eof(reader, &mut prefix)? {
        return Ok(None);
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len == 0 {
        return Ok(Some(Value::Object(Map::new())));
    }
    if len > MAX_INBOUND_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_INBOUND_FRAME_BYTES,
        });
    }

    let mut body = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut body)? {
        return Ok(None);
    }

    Ok(Some(serde_json::from_slice(&body)?))
}

/// Writes one frame and flushes it.
///
/// Prefix and body go out in a single `write_all` so the reader never sees a
/// prefix without its body from this side.
pub fn write_frame<W: Write + ?Sized, T: Serialize + ?Sized>(
    writer: &mut W,
    message: &T,
) -> Result<(), FrameError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_OUTBOUND_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len: body.len(),
            max: MAX_OUTBOUND_FRAME_BYTES,
        });
    }

    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);

    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Fills `buf` completely, or reports `false` if the stream ended first.
pub(crate) fn read_exact_or_eof<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err),
    }
}
