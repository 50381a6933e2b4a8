//! Length-prefixed frame codec.
//!
//! Frame format: `[4-byte BE u32 length][body bytes]`. The decoder accepts
//! whatever chunking the transport delivers and hands back whole bodies.

use crate::config::WireConfig;
use crate::error::{Result, RpcError};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncWriteExt;

/// Frame a body for transmission.
pub fn encode_frame(body: &[u8]) -> Result<Bytes> {
    if body.len() > WireConfig::MAX_FRAME_SIZE {
        return Err(RpcError::protocol(format!(
            "frame body of {} bytes exceeds maximum {}",
            body.len(),
            WireConfig::MAX_FRAME_SIZE
        )));
    }

    let mut frame = BytesMut::with_capacity(WireConfig::LENGTH_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    Ok(frame.freeze())
}

/// Write an already-encoded frame and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Incremental frame decoder.
///
/// Bytes go in through [`extend`](Self::extend) as they arrive; complete
/// bodies come out of [`next_frame`](Self::next_frame) or the
/// [`frames`](Self::frames) iterator. Partial frames stay buffered until the
/// rest arrives, so draining can be restarted after every delivery.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
    failed: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(WireConfig::MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(WireConfig::READ_CHUNK_SIZE),
            max_frame_size,
            failed: false,
        }
    }

    /// Append one transport delivery.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame body, if one is buffered.
    ///
    /// A length prefix above the configured maximum is a protocol violation.
    /// The decoder stays failed afterwards: there is no resynchronization.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.failed {
            return Err(RpcError::protocol("decoder already failed"));
        }

        let prefix = WireConfig::LENGTH_PREFIX_BYTES;
        if self.buf.len() < prefix {
            return Ok(None);
        }

        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&self.buf[..prefix]);
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > self.max_frame_size {
            self.failed = true;
            return Err(RpcError::protocol(format!(
                "frame length {} exceeds maximum {}",
                len, self.max_frame_size
            )));
        }

        if self.buf.len() < prefix + len {
            // Reserve up front so large bodies don't regrow repeatedly.
            self.buf.reserve(prefix + len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(prefix);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Iterate over every complete frame currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            decoder: self,
            done: false,
        }
    }
}

/// Draining iterator returned by [`FrameDecoder::frames`].
///
/// Yields at most one error, then ends.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decoder.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
