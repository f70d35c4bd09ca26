//! Byte-stream to frame decoder.
//!
//! USB bulk reads hand back arbitrary slices of the device's output:
//! frames torn across transfer boundaries, leading garbage after a
//! reset, duplicated bytes after a firmware hiccup. This state machine
//! absorbs all of that. It scans for a valid header with a sliding
//! 8-byte window, accumulates the payload, checks the optional trailing
//! CRC-32 and hands complete frames to a sink, in arrival order.
//!
//! Malformed input is never an error. A corrupted stream must heal
//! itself without tearing down the session, so anomalies only show up
//! in [`ParserStats`].
//!
//! One parser instance serves one byte stream and is owned by the
//! single thread feeding it (normally the transport's inbound pump).

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::crc::{CRC8_INITIAL, crc32, crc8_accumulate};
use crate::protocol::constants::{HEADER_SIZE, MAX_PAYLOAD_BYTES, PREAMBLE};
use crate::protocol::header::Header;

/// Framing policy, fixed per stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// Expect a little-endian CRC-32 after every non-empty payload.
    pub include_data_crc: bool,
}

/// Cumulative link-quality counters.
///
/// Readable at any time; callers watch these to spot a degrading link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// Transitions from "in sync" to discarding, one per contiguous run
    /// of discarded bytes.
    pub sync_loss: u64,
    /// Bytes dropped while hunting for a valid header.
    pub bytes_discarded: u64,
    /// Payloads dropped because the trailing CRC-32 did not match.
    pub data_crc_errors: u64,
}

/// One fully-validated frame, borrowed from the parser's buffers.
///
/// `payload` is exactly `4 * header.data_length` bytes; the trailing
/// CRC-32, when present, has already been verified and stripped.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub header: Header,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingHeader,
    ReadingPayload,
}

/// The frame decoder state machine.
pub struct Parser {
    opts: ParserOptions,
    state: State,
    index: usize,
    remaining: usize,
    window: [u8; HEADER_SIZE],
    header: Header,
    payload: Box<[u8; MAX_PAYLOAD_BYTES + 4]>,
    synced: bool,
    stats: ParserStats,
}

impl Parser {
    pub fn new(opts: ParserOptions) -> Self {
        Self {
            opts,
            state: State::SeekingHeader,
            index: 0,
            remaining: 0,
            window: [0; HEADER_SIZE],
            header: Header::default(),
            payload: Box::new([0; MAX_PAYLOAD_BYTES + 4]),
            // A fresh stream counts as synchronized, so garbage ahead
            // of the first frame is accounted as one sync loss.
            synced: true,
            stats: ParserStats::default(),
        }
    }

    /// Current counters. Does not disturb parser state.
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Consume a chunk of the byte stream.
    ///
    /// `sink` runs synchronously, once per completed frame. Chunking is
    /// purely an efficiency concern: any split of the same byte
    /// sequence produces the same frames and the same statistics.
    pub fn feed<F>(&mut self, mut bytes: &[u8], mut sink: F)
    where
        F: FnMut(&Frame<'_>),
    {
        while !bytes.is_empty() {
            match self.state {
                State::SeekingHeader => {
                    if self.index == HEADER_SIZE {
                        // Window is full but did not validate: slide
                        // out the oldest byte and keep scanning.
                        if self.synced {
                            self.synced = false;
                            self.stats.sync_loss += 1;
                            trace!(discarded = self.stats.bytes_discarded, "sync lost");
                        }
                        self.stats.bytes_discarded += 1;
                        self.window.copy_within(1.., 0);
                        self.index -= 1;
                    }
                    self.window[self.index] = bytes[0];
                    self.index += 1;
                    bytes = &bytes[1..];
                    if self.index == HEADER_SIZE
                        && self.window[0] == PREAMBLE
                        && crc8_accumulate(CRC8_INITIAL, &self.window[1..7]) == self.window[7]
                    {
                        self.synced = true;
                        self.header = Header::from_wire(&self.window);
                        self.index = 0;
                        let len = self.header.payload_len();
                        if len == 0 {
                            // Header-only frame; nothing further to
                            // wait for, even in data-CRC mode.
                            sink(&Frame {
                                header: self.header,
                                payload: &[],
                            });
                        } else {
                            self.remaining =
                                len + if self.opts.include_data_crc { 4 } else { 0 };
                            self.state = State::ReadingPayload;
                        }
                    }
                }
                State::ReadingPayload => {
                    let n = bytes.len().min(self.remaining);
                    self.payload[self.index..self.index + n].copy_from_slice(&bytes[..n]);
                    self.index += n;
                    self.remaining -= n;
                    bytes = &bytes[n..];
                    if self.remaining == 0 {
                        let len = self.header.payload_len();
                        let crc_ok = if self.opts.include_data_crc {
                            let wire = LittleEndian::read_u32(&self.payload[len..len + 4]);
                            wire == crc32(&self.payload[..len])
                        } else {
                            true
                        };
                        if crc_ok {
                            sink(&Frame {
                                header: self.header,
                                payload: &self.payload[..len],
                            });
                        } else {
                            self.stats.data_crc_errors += 1;
                            trace!(
                                op = self.header.operation_code,
                                len, "payload CRC mismatch, frame dropped"
                            );
                        }
                        self.index = 0;
                        self.state = State::SeekingHeader;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::opcode::Opcode;

    fn encode_frame(header: Header, payload: &[u8], with_crc: bool) -> Vec<u8> {
        assert_eq!(payload.len(), header.payload_len());
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        if with_crc && !payload.is_empty() {
            bytes.extend_from_slice(&crc32(payload).to_le_bytes());
        }
        bytes
    }

    fn collect(parser: &mut Parser, bytes: &[u8]) -> Vec<(Header, Vec<u8>)> {
        let mut out = Vec::new();
        parser.feed(bytes, |f| out.push((f.header, f.payload.to_vec())));
        out
    }

    #[test]
    fn header_only_frame_is_delivered_immediately() {
        // AA 8D 00 00 00 00 00 <crc8>
        let wire = Header::new(Opcode::GetTrace, 0, 0, 0, 0).encode();
        assert_eq!(wire[0], 0xAA);
        assert_eq!(wire[1], 0x8D);

        let mut parser = Parser::new(ParserOptions::default());
        let frames = collect(&mut parser, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.operation_code, 0x8D);
        assert!(frames[0].1.is_empty());
        assert_eq!(parser.stats(), ParserStats::default());
    }

    #[test]
    fn payload_frame_roundtrip() {
        let payload = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        let header = Header::new(Opcode::Nonce, 1, 2, 0x1234, 2);
        let wire = encode_frame(header, &payload, false);

        let mut parser = Parser::new(ParserOptions::default());
        let frames = collect(&mut parser, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, header);
        assert_eq!(frames[0].1, payload);
    }

    #[test]
    fn chunking_is_semantics_free() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(
            Header::new(Opcode::Status, 0, 0, 42, 2),
            &[1, 2, 3, 4, 5, 6, 7, 8],
            true,
        ));
        wire.extend_from_slice(&encode_frame(Header::new(Opcode::Ping, 0, 0, 0, 0), &[], true));
        wire.extend_from_slice(&encode_frame(
            Header::new(Opcode::Nonce, 3, 4, 7, 1),
            &[9, 10, 11, 12],
            true,
        ));

        let opts = ParserOptions {
            include_data_crc: true,
        };

        let mut whole = Parser::new(opts);
        let expected = collect(&mut whole, &wire);
        assert_eq!(expected.len(), 3);

        // One byte at a time.
        let mut bytewise = Parser::new(opts);
        let mut got = Vec::new();
        for b in &wire {
            bytewise.feed(std::slice::from_ref(b), |f| {
                got.push((f.header, f.payload.to_vec()))
            });
        }
        assert_eq!(got, expected);
        assert_eq!(bytewise.stats(), whole.stats());

        // Ragged chunks.
        let mut ragged = Parser::new(opts);
        let mut got = Vec::new();
        let mut rest = &wire[..];
        for size in [1usize, 3, 5, 7, 11, 13].iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let n = (*size).min(rest.len());
            ragged.feed(&rest[..n], |f| got.push((f.header, f.payload.to_vec())));
            rest = &rest[n..];
        }
        assert_eq!(got, expected);
        assert_eq!(ragged.stats(), whole.stats());
    }

    #[test]
    fn resyncs_after_garbage_run() {
        // 20 copies of the preamble byte are not a valid header; the
        // parser must discard exactly 20 bytes, record one sync loss
        // and still decode the frame that follows.
        let mut wire = vec![0xAA; 20];
        wire.extend_from_slice(&Header::new(Opcode::GetTrace, 0, 0, 0, 0).encode());

        let mut parser = Parser::new(ParserOptions::default());
        let frames = collect(&mut parser, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.opcode(), Some(Opcode::GetTrace));
        let stats = parser.stats();
        assert_eq!(stats.bytes_discarded, 20);
        assert_eq!(stats.sync_loss, 1);
        assert_eq!(stats.data_crc_errors, 0);
    }

    #[test]
    fn garbage_between_frames_counts_one_sync_loss_per_run() {
        let frame = encode_frame(Header::new(Opcode::Ping, 0, 0, 0, 0), &[], false);
        let mut wire = frame.clone();
        wire.extend_from_slice(&[0x00; 5]);
        wire.extend_from_slice(&frame);

        let mut parser = Parser::new(ParserOptions::default());
        let frames = collect(&mut parser, &wire);
        assert_eq!(frames.len(), 2);
        let stats = parser.stats();
        assert_eq!(stats.bytes_discarded, 5);
        assert_eq!(stats.sync_loss, 1);
    }

    #[test]
    fn bad_payload_crc_drops_frame_and_recovers() {
        let opts = ParserOptions {
            include_data_crc: true,
        };
        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut bad = encode_frame(Header::new(Opcode::Hash, 0, 0, 0, 1), &payload, true);
        let tail = bad.len() - 1;
        bad[tail] ^= 0xFF;
        let good = encode_frame(Header::new(Opcode::Nonce, 0, 0, 0, 1), &[1, 2, 3, 4], true);
        let mut wire = bad;
        wire.extend_from_slice(&good);

        let mut parser = Parser::new(opts);
        let frames = collect(&mut parser, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.opcode(), Some(Opcode::Nonce));
        let stats = parser.stats();
        assert_eq!(stats.data_crc_errors, 1);
        assert_eq!(stats.sync_loss, 0);
        assert_eq!(stats.bytes_discarded, 0);
    }

    #[test]
    fn maximum_length_payload() {
        let payload = vec![0x5A; 4 * 255];
        let header = Header::new(Opcode::UsbDebug, 0, 0, 0, 255);
        let wire = encode_frame(header, &payload, true);

        let mut parser = Parser::new(ParserOptions {
            include_data_crc: true,
        });
        let frames = collect(&mut parser, &wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1.len(), 4 * 255);
    }

    #[test]
    fn frames_are_delivered_in_arrival_order() {
        let mut wire = Vec::new();
        for seq in 0u16..16 {
            wire.extend_from_slice(&Header::new(Opcode::Status, 0, 0, seq, 0).encode());
        }
        let mut parser = Parser::new(ParserOptions::default());
        let frames = collect(&mut parser, &wire);
        let order: Vec<u16> = frames.iter().map(|(h, _)| h.hdata).collect();
        assert_eq!(order, (0u16..16).collect::<Vec<_>>());
    }
}
