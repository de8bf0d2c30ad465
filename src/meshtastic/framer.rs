//! Stream framing for the Meshtastic device API.
//!
//! Serial and TCP links carry protobuf messages as:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <protobuf bytes>`
//!
//! Serial consoles interleave plain debug text with frames, so the decoder
//! drops bytes until it sees the start marker again.
use bytes::{Buf, BytesMut};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
/// Largest protobuf payload the firmware emits.
pub const MAX_FRAME_SIZE: usize = 512;

/// Incremental frame decoder. Feed arbitrary chunks with [`push`](Self::push)
/// and pull whole frames with [`next_frame`](Self::next_frame).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete payload, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Realign to header
            match self.buf.iter().position(|&b| b == START1) {
                Some(pos) if pos > 0 => self.buf.advance(pos),
                Some(_) => {}
                None => {
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 4 {
                return None;
            }
            if self.buf[1] != START2 {
                self.buf.advance(1);
                continue;
            }
            let declared = ((self.buf[2] as usize) << 8) | (self.buf[3] as usize);
            if declared == 0 || declared > MAX_FRAME_SIZE {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < 4 + declared {
                return None;
            }
            self.buf.advance(4);
            return Some(self.buf.split_to(declared).to_vec());
        }
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Wrap a protobuf payload in the stream header.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(START1);
    out.push(START2);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    out
}
