//! Chunking and reassembly for payloads exceeding the link MTU.
//!
//! Radio writes are bounded by the negotiated MTU, so an encoded message is
//! split into ordered chunks before transmission and concatenated on the
//! receiving side before the codec ever sees it. Every chunk carries a small
//! reassembly envelope (total payload length, chunk sequence, chunk count)
//! so the receiver can detect gaps, duplicates, and interleaving instead of
//! silently concatenating unrelated payloads.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// Reassembly envelope length prepended to every chunk
pub const CHUNK_ENVELOPE_LEN: usize = 8;

/// Default maximum transmission unit per radio write
pub const DEFAULT_MTU: usize = 512;

/// Per-chunk reassembly envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEnvelope {
    /// Total reassembled payload length in bytes
    pub total_len: u32,
    /// 0-based chunk sequence within the payload
    pub seq: u16,
    /// Total number of chunks for the payload
    pub total: u16,
}

impl ChunkEnvelope {
    /// Encode the envelope into a buffer (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.total_len);
        buf.put_u16(self.seq);
        buf.put_u16(self.total);
    }

    /// Decode an envelope from the front of a chunk
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.len() < CHUNK_ENVELOPE_LEN {
            return Err(WireError::Truncated);
        }
        Ok(Self {
            total_len: buf.get_u32(),
            seq: buf.get_u16(),
            total: buf.get_u16(),
        })
    }
}

/// Splits an encoded payload into MTU-sized chunks
pub struct Chunker {
    mtu: usize,
}

impl Chunker {
    /// Create a chunker for the given MTU.
    ///
    /// The MTU must leave room for the envelope plus at least one data byte.
    pub fn new(mtu: usize) -> Self {
        assert!(mtu > CHUNK_ENVELOPE_LEN, "mtu must exceed envelope length");
        Self { mtu }
    }

    /// Bytes of payload carried per chunk
    pub fn data_per_chunk(&self) -> usize {
        self.mtu - CHUNK_ENVELOPE_LEN
    }

    /// Split a payload into ordered chunks, each at most one MTU long.
    ///
    /// A payload that fits in a single chunk still gets an envelope; the
    /// receiver expects uniform framing on every write.
    pub fn split(&self, payload: &[u8]) -> Result<Vec<Bytes>, WireError> {
        if payload.is_empty() {
            return Err(WireError::Truncated);
        }
        if payload.len() > u32::MAX as usize {
            return Err(WireError::Oversize(payload.len()));
        }

        let per = self.data_per_chunk();
        let total = payload.len().div_ceil(per);
        if total > u16::MAX as usize {
            return Err(WireError::Oversize(payload.len()));
        }

        let mut chunks = Vec::with_capacity(total);
        for (seq, piece) in payload.chunks(per).enumerate() {
            let mut buf = BytesMut::with_capacity(CHUNK_ENVELOPE_LEN + piece.len());
            ChunkEnvelope {
                total_len: payload.len() as u32,
                seq: seq as u16,
                total: total as u16,
            }
            .encode(&mut buf);
            buf.put_slice(piece);
            chunks.push(buf.freeze());
        }

        Ok(chunks)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_MTU)
    }
}

struct Partial {
    total_len: u32,
    total: u16,
    next_seq: u16,
    buf: BytesMut,
}

/// Collects chunks received on one link back into complete payloads.
///
/// Chunks must arrive in sequence; a gap, duplicate, or envelope
/// disagreement discards the partial payload and surfaces
/// [`WireError::ChunkMismatch`]. One reassembler per link.
#[derive(Default)]
pub struct Reassembler {
    partial: Option<Partial>,
}

impl Reassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received chunk.
    ///
    /// Returns the complete payload once the final chunk lands, `None` while
    /// more chunks are outstanding. A chunk with sequence 0 always starts a
    /// fresh payload, abandoning any incomplete one.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Bytes>, WireError> {
        let mut data = Bytes::copy_from_slice(chunk);
        let envelope = ChunkEnvelope::decode(&mut data)?;

        if envelope.total == 0 || envelope.seq >= envelope.total {
            self.partial = None;
            return Err(WireError::ChunkMismatch);
        }

        if envelope.seq == 0 {
            let mut buf = BytesMut::with_capacity(envelope.total_len as usize);
            buf.put_slice(&data);
            self.partial = Some(Partial {
                total_len: envelope.total_len,
                total: envelope.total,
                next_seq: 1,
                buf,
            });
        } else {
            let partial = match self.partial.as_mut() {
                Some(p) => p,
                None => return Err(WireError::ChunkMismatch),
            };
            if envelope.seq != partial.next_seq
                || envelope.total != partial.total
                || envelope.total_len != partial.total_len
            {
                self.partial = None;
                return Err(WireError::ChunkMismatch);
            }
            partial.buf.put_slice(&data);
            partial.next_seq += 1;
        }

        let done = self
            .partial
            .as_ref()
            .map(|p| p.next_seq == p.total)
            .unwrap_or(false);
        if !done {
            return Ok(None);
        }

        let partial = self.partial.take().expect("partial present when done");
        if partial.buf.len() != partial.total_len as usize {
            return Err(WireError::ChunkMismatch);
        }
        Ok(Some(partial.buf.freeze()))
    }

    /// Whether a partial payload is in progress
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk_round_trip() {
        let chunker = Chunker::new(64);
        let payload = b"short payload".to_vec();
        let chunks = chunker.split(&payload).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].len() <= 64);

        let mut reassembler = Reassembler::new();
        let out = reassembler.push(&chunks[0]).unwrap().unwrap();
        assert_eq!(out.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_multi_chunk_round_trip() {
        let chunker = Chunker::new(32);
        let payload: Vec<u8> = (0..200u16).map(|i| (i % 251) as u8).collect();
        let chunks = chunker.split(&payload).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 32));

        let mut reassembler = Reassembler::new();
        let mut out = None;
        for chunk in &chunks {
            out = reassembler.push(chunk).unwrap();
        }
        assert_eq!(out.unwrap().as_ref(), payload.as_slice());
        assert!(!reassembler.in_progress());
    }

    #[test]
    fn test_gap_resets_and_errors() {
        let chunker = Chunker::new(32);
        let payload: Vec<u8> = vec![7; 100];
        let chunks = chunker.split(&payload).unwrap();

        let mut reassembler = Reassembler::new();
        assert!(reassembler.push(&chunks[0]).unwrap().is_none());
        // Skip chunk 1
        assert_eq!(
            reassembler.push(&chunks[2]).unwrap_err(),
            WireError::ChunkMismatch
        );
        assert!(!reassembler.in_progress());
    }

    #[test]
    fn test_restart_abandons_stale_partial() {
        let chunker = Chunker::new(32);
        let first: Vec<u8> = vec![1; 100];
        let second: Vec<u8> = vec![2; 40];
        let first_chunks = chunker.split(&first).unwrap();
        let second_chunks = chunker.split(&second).unwrap();

        let mut reassembler = Reassembler::new();
        assert!(reassembler.push(&first_chunks[0]).unwrap().is_none());
        // A fresh payload begins mid-stream; the stale partial is dropped.
        for chunk in &second_chunks {
            if let Some(out) = reassembler.push(chunk).unwrap() {
                assert_eq!(out.as_ref(), second.as_slice());
                return;
            }
        }
        panic!("second payload never completed");
    }

    #[test]
    fn test_mid_stream_chunk_without_start() {
        let chunker = Chunker::new(32);
        let chunks = chunker.split(&vec![9u8; 100]).unwrap();

        let mut reassembler = Reassembler::new();
        assert_eq!(
            reassembler.push(&chunks[1]).unwrap_err(),
            WireError::ChunkMismatch
        );
    }

    #[test]
    fn test_truncated_envelope() {
        let mut reassembler = Reassembler::new();
        assert_eq!(
            reassembler.push(&[0u8; 4]).unwrap_err(),
            WireError::Truncated
        );
    }

    #[test]
    fn test_chunked_message_decodes_like_unchunked() {
        use crate::codec;
        use crate::message::{MeshMessage, MessageType};
        use uuid::Uuid;

        let mut msg = MeshMessage::new(
            MessageType::Text,
            Uuid::new_v4(),
            "alice",
            None,
            "x".repeat(1500),
            1_700_000_000,
        );
        msg.route_path = vec![msg.sender];
        let encoded = codec::encode(&msg).unwrap();

        let chunks = Chunker::new(DEFAULT_MTU).split(&encoded).unwrap();
        assert!(chunks.len() > 1);

        let mut reassembler = Reassembler::new();
        let mut out = None;
        for chunk in &chunks {
            out = reassembler.push(chunk).unwrap();
        }
        let reassembled = out.unwrap();
        assert_eq!(reassembled, encoded);
        let decoded = codec::decode(&reassembled).unwrap();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.content, msg.content);
        assert_eq!(decoded.route_path, msg.route_path);
    }
}
