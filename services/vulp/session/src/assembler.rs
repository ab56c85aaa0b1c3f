//! Reassembly of arbitrarily chunked stream reads into frames.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;
use vulp_wire::{Frame, FrameDecoder, WireError};

/// Per-connection receive buffer plus decoder.
///
/// After every pass over [`ReceiveAssembler::frames`] the buffer holds only
/// the bytes of a frame that has not fully arrived yet.
#[derive(Debug)]
pub struct ReceiveAssembler {
    buffer: BytesMut,
    decoder: FrameDecoder,
    read_chunk: usize,
    closed: bool,
}

impl ReceiveAssembler {
    /// Create an assembler with the given payload ceiling and read size
    pub fn new(max_payload: usize, read_chunk: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(read_chunk),
            decoder: FrameDecoder::with_max_payload(max_payload),
            read_chunk,
            closed: false,
        }
    }

    /// Append a chunk received from the transport
    pub fn push(&mut self, chunk: &[u8]) {
        if self.closed {
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Read one chunk from `reader` straight into the buffer.
    ///
    /// A zero-length read means the stream ended; the assembler is closed and
    /// yields nothing further.
    pub async fn fill<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> std::io::Result<usize> {
        if self.closed {
            return Ok(0);
        }
        self.buffer.reserve(self.read_chunk);
        let n = reader.read_buf(&mut self.buffer).await?;
        if n == 0 {
            self.close();
        } else {
            trace!("Read {} bytes, buffer now has {} bytes", n, self.buffer.len());
        }
        Ok(n)
    }

    /// Mark the stream as ended and drop any partial frame
    pub fn close(&mut self) {
        self.closed = true;
        self.buffer.clear();
    }

    /// Whether the stream has ended
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes of the incomplete trailing frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Lazily decode every complete frame currently buffered
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { assembler: self }
    }
}

/// Iterator over the complete frames in a [`ReceiveAssembler`].
///
/// Stops at the first incomplete frame. A framing error is yielded once and
/// closes the assembler.
pub struct Frames<'a> {
    assembler: &'a mut ReceiveAssembler,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        let assembler = &mut *self.assembler;
        if assembler.closed {
            return None;
        }
        match assembler.decoder.decode(&mut assembler.buffer) {
            Ok(frame) => frame.map(Ok),
            Err(e) => {
                assembler.close();
                Some(Err(e))
            }
        }
    }
}
