//! Packet-domain streaming API: float samples in, packed 1-bit bytes out
//!
//! Bits are packed MSB first (the first sample lands in bit 7), matching
//! DSDIFF and DoP payload order. The last, partial byte of a stream is padded
//! with `0` bits in its low-order positions.

use crate::error::{Result, SdmError};
use crate::modulator::{SigmaDeltaModulator, Surface};
use std::collections::VecDeque;

/// Value of the padding bits in the final partial byte
pub const PAD_BIT: bool = false;

/// Completed bytes held before the queue has to grow
const QUEUE_CAPACITY: usize = 16;

/// Accumulates decisions into bytes, MSB first
///
/// Completed bytes wait in a queue until the caller has room for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitPacker {
    queue: VecDeque<u8>,
    byte: u8,
    bits: u8,
}

impl BitPacker {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(QUEUE_CAPACITY),
            byte: 0,
            bits: 0,
        }
    }

    /// Add one bit, queueing the byte it completes
    #[inline]
    pub fn push(&mut self, bit: bool) {
        self.byte = (self.byte << 1) | u8::from(bit);
        self.bits += 1;

        if self.bits == 8 {
            self.queue.push_back(self.byte);
            self.byte = 0;
            self.bits = 0;
        }
    }

    /// Oldest completed byte
    #[inline]
    pub fn pop(&mut self) -> Option<u8> {
        self.queue.pop_front()
    }

    /// Queue a partially filled byte, padded with [`PAD_BIT`]
    ///
    /// Returns whether there was anything to pad.
    pub fn flush(&mut self) -> bool {
        if self.bits == 0 {
            return false;
        }
        self.queue.push_back(self.byte << (8 - self.bits));
        self.byte = 0;
        self.bits = 0;
        true
    }

    /// Completed bytes not yet handed out
    pub fn queued_bytes(&self) -> usize {
        self.queue.len()
    }

    /// Bits held in the packer, queued bytes included
    pub fn pending_bits(&self) -> usize {
        self.queue.len() * 8 + self.bits as usize
    }

    /// Move queued bytes into `output`; returns the count written
    fn write_queued(&mut self, output: &mut [u8]) -> usize {
        let mut written = 0;
        while written < output.len() {
            match self.queue.pop_front() {
                Some(byte) => {
                    output[written] = byte;
                    written += 1;
                }
                None => break,
            }
        }
        written
    }
}

/// Expand packed bytes back into decisions, MSB first
pub fn unpack_bits(bytes: &[u8]) -> impl Iterator<Item = bool> + '_ {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |i| (byte >> i) & 1 == 1))
}

/// Map any input onto the valid range: NaN to silence, the rest clamped to full scale
#[inline]
fn sanitize(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(-1.0, 1.0)
    }
}

impl SigmaDeltaModulator {
    /// Modulate float samples (full scale ±1.0) into packed bytes
    ///
    /// Consumes all of `input`. `output` must hold at least
    /// `input.len() / 8` bytes. Bytes that do not fit are queued and written
    /// first by the next packet call. Returns the number of bytes written.
    pub fn packet_process(&mut self, input: &[f64], output: &mut [u8]) -> Result<usize> {
        self.ensure_streaming()?;

        let required = input.len() / 8;
        if output.len() < required {
            return Err(SdmError::BufferTooSmall {
                required,
                actual: output.len(),
            });
        }
        self.claim_surface(Surface::Packets)?;

        let gain = self.filter().input_gain();
        let mut written = self.packer.write_queued(output);
        let mut emitted = 0;

        for &sample in input {
            if let Some(bit) = self.engine_mut().push(sanitize(sample) * gain) {
                emitted += 1;
                self.packer.push(bit);
                written += self.packer.write_queued(&mut output[written..]);
            }
        }

        self.record(input.len(), emitted);
        Ok(written)
    }

    /// Emit pending decisions as packed bytes after the end of input
    ///
    /// Queued bytes come first; the final partial byte is zero-padded.
    /// Returns the number of bytes written; call again until it returns 0.
    pub fn packet_drain(&mut self, output: &mut [u8]) -> Result<usize> {
        if output.is_empty() {
            return Err(SdmError::EmptyOutput);
        }
        self.claim_surface(Surface::Packets)?;
        self.begin_drain();

        let mut written = 0;
        let mut emitted = 0;

        loop {
            written += self.packer.write_queued(&mut output[written..]);
            if written == output.len() {
                break;
            }

            match self.engine_mut().flush_one() {
                Some(bit) => {
                    emitted += 1;
                    self.packer.push(bit);
                }
                None => {
                    if !self.packer.flush() {
                        self.finish();
                        break;
                    }
                }
            }
        }

        self.record(0, emitted);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SdmSettings;

    fn zero_latency(filter: &str) -> SigmaDeltaModulator {
        let settings = SdmSettings::new(filter, 2_822_400).with_trellis(8, 4, 0);
        SigmaDeltaModulator::new(&settings).unwrap()
    }

    #[test]
    fn test_packer_msb_first() {
        let mut packer = BitPacker::new();
        for bit in [true, false, false, false, false, false, false, true] {
            packer.push(bit);
        }
        assert_eq!(packer.queued_bytes(), 1);
        assert_eq!(packer.pop(), Some(0b1000_0001));
        assert_eq!(packer.pending_bits(), 0);
    }

    #[test]
    fn test_packer_pads_low_bits_with_zero() {
        let mut packer = BitPacker::new();
        for _ in 0..3 {
            packer.push(true);
        }
        assert_eq!(packer.pending_bits(), 3);
        assert!(packer.flush());
        assert_eq!(packer.pop(), Some(0b1110_0000));
        assert!(!packer.flush());
        assert_eq!(packer.pop(), None);
    }

    #[test]
    fn test_unpack_bits() {
        let bits: Vec<bool> = unpack_bits(&[0b1010_0000, 0xFF]).collect();
        assert_eq!(bits.len(), 16);
        assert_eq!(&bits[..4], &[true, false, true, false]);
        assert!(bits[8..].iter().all(|b| *b));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(f64::NAN), 0.0);
        assert_eq!(sanitize(f64::INFINITY), 1.0);
        assert_eq!(sanitize(f64::NEG_INFINITY), -1.0);
        assert_eq!(sanitize(1e200), 1.0);
        assert_eq!(sanitize(-3.5), -1.0);
        assert_eq!(sanitize(0.25), 0.25);
    }

    #[test]
    fn test_packet_output_too_small() {
        let mut sdm = zero_latency("sdm-2");
        let mut output = [0u8; 1];
        assert_eq!(
            sdm.packet_process(&[0.0; 16], &mut output),
            Err(SdmError::BufferTooSmall {
                required: 2,
                actual: 1
            })
        );
        // Rejected calls leave the stream untouched
        assert_eq!(sdm.samples_in(), 0);
        assert_eq!(sdm.packet_process(&[0.0; 8], &mut output), Ok(1));
    }

    #[test]
    fn test_minimum_buffer_with_leftover_bits() {
        let mut sdm = zero_latency("sdm-3");
        let mut output = [0u8; 1];

        // 13 bits: one byte out, five held
        assert_eq!(sdm.packet_process(&[0.1; 13], &mut output), Ok(1));
        assert_eq!(sdm.pending(), 5);

        // 18 bits complete two bytes; the second one waits in the queue
        assert_eq!(sdm.packet_process(&[0.1; 13], &mut output), Ok(1));
        assert_eq!(sdm.pending(), 10);

        let mut tail = [0u8; 4];
        assert_eq!(sdm.packet_drain(&mut tail), Ok(2));
        assert_eq!(tail[1] & 0x3F, 0);
        assert_eq!(sdm.packet_drain(&mut tail), Ok(0));
        assert_eq!(sdm.samples_out(), 26);
    }

    #[test]
    fn test_queued_bytes_keep_stream_order() {
        let input: Vec<f64> = (0..256).map(|i| (f64::from(i) * 0.05).sin() * 0.6).collect();

        let mut roomy = zero_latency("sdm-4");
        let mut expected = vec![0u8; 32];
        assert_eq!(roomy.packet_process(&input, &mut expected), Ok(32));

        // 7-sample calls with no output room push everything through the queue
        let mut tight = zero_latency("sdm-4");
        let mut actual = Vec::new();
        for block in input.chunks(7) {
            let mut none = [0u8; 0];
            assert_eq!(tight.packet_process(block, &mut none), Ok(0));
        }
        let mut buffer = [0u8; 5];
        loop {
            let n = tight.packet_drain(&mut buffer).unwrap();
            if n == 0 {
                break;
            }
            actual.extend_from_slice(&buffer[..n]);
        }
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_packet_drain_flushes_partial_byte() {
        let mut sdm = SigmaDeltaModulator::init("sdm-3", 2_822_400, 8, 4, 5).unwrap();
        let mut output = [0u8; 4];
        // 12 samples, 7 final during processing -> no whole byte yet
        assert_eq!(sdm.packet_process(&[0.1; 12], &mut output), Ok(0));
        assert_eq!(sdm.pending(), 12);

        // 12 bits -> one full byte plus one padded byte
        assert_eq!(sdm.packet_drain(&mut output), Ok(2));
        assert_eq!(output[1] & 0x0F, 0);
        assert_eq!(sdm.packet_drain(&mut output), Ok(0));
        assert!(sdm.is_drained());
    }

    #[test]
    fn test_sample_drain_after_packets_rejected() {
        let mut sdm = SigmaDeltaModulator::init("sdm-3", 2_822_400, 8, 4, 4).unwrap();
        assert_eq!(sdm.packet_process(&[0.1; 13], &mut [0u8; 2]), Ok(1));

        let mut samples = [0; 16];
        let err = sdm.drain(&mut samples).unwrap_err();
        assert_eq!(err, SdmError::SurfaceMismatch("packet"));
        assert!(!sdm.is_drained());

        // Nothing was lost: the packet drain still returns every held bit
        assert_eq!(sdm.pending(), 5);
        assert_eq!(sdm.packet_drain(&mut [0u8; 4]), Ok(1));
        assert_eq!(sdm.samples_out(), 13);
    }
}
