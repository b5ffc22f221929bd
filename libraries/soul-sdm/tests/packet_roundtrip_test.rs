//! Packet API tests
//!
//! The packet surface must make exactly the decisions the sample surface
//! makes, packed MSB first, with a zero-padded final byte.

use soul_sdm::{unpack_bits, Sample, SdmError, SigmaDeltaModulator, PAD_BIT, SAMPLE_MAX};
use std::f64::consts::PI;

const RATE: u32 = 2_822_400;
const FULL_SCALE: f64 = 2_147_483_648.0;

fn sine_fixed(len: usize, freq: f64, amplitude: f64) -> Vec<Sample> {
    (0..len)
        .map(|i| {
            let v = amplitude * (2.0 * PI * freq * i as f64 / RATE as f64).sin();
            (v * 2_147_483_647.0) as Sample
        })
        .collect()
}

/// Same values as the fixed-point input, in float full scale
fn to_float(samples: &[Sample]) -> Vec<f64> {
    samples.iter().map(|&s| f64::from(s) / FULL_SCALE).collect()
}

fn sample_domain_bits(sdm: &mut SigmaDeltaModulator, input: &[Sample]) -> Vec<bool> {
    let mut output = vec![0; input.len()];
    let progress = sdm.process(input, &mut output).unwrap();
    assert_eq!(progress.consumed, input.len());

    let mut bits: Vec<bool> = output[..progress.produced]
        .iter()
        .map(|&s| s == SAMPLE_MAX)
        .collect();

    let mut tail = vec![0; 64];
    loop {
        let n = sdm.drain(&mut tail).unwrap();
        if n == 0 {
            break;
        }
        bits.extend(tail[..n].iter().map(|&s| s == SAMPLE_MAX));
    }
    bits
}

fn packet_domain_bytes(sdm: &mut SigmaDeltaModulator, input: &[f64], chunk: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut buffer = vec![0u8; chunk.div_ceil(8)];

    for block in input.chunks(chunk) {
        let n = sdm.packet_process(block, &mut buffer).unwrap();
        bytes.extend_from_slice(&buffer[..n]);
    }

    loop {
        let n = sdm.packet_drain(&mut buffer).unwrap();
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&buffer[..n]);
    }
    bytes
}

#[test]
fn test_packet_matches_sample_domain() {
    let fixed = sine_fixed(3003, 4000.0, 0.6);
    let float = to_float(&fixed);

    let mut a = SigmaDeltaModulator::init("sdm-5", RATE, 12, 8, 96).unwrap();
    let expected = sample_domain_bits(&mut a, &fixed);

    let mut b = SigmaDeltaModulator::init("sdm-5", RATE, 12, 8, 96).unwrap();
    let bytes = packet_domain_bytes(&mut b, &float, 512);

    assert_eq!(bytes.len(), fixed.len().div_ceil(8));
    let unpacked: Vec<bool> = unpack_bits(&bytes).collect();
    assert_eq!(&unpacked[..expected.len()], &expected[..]);

    // 3003 = 375 * 8 + 3: five padding bits
    assert!(unpacked[expected.len()..].iter().all(|&b| b == PAD_BIT));
    assert_eq!(unpacked.len() - expected.len(), 5);
}

#[test]
fn test_packet_chunking_is_transparent() {
    let float = to_float(&sine_fixed(5000, 1500.0, 0.5));

    let mut whole = SigmaDeltaModulator::init("sdm-4", RATE, 8, 8, 64).unwrap();
    let expected = packet_domain_bytes(&mut whole, &float, 5000);

    // Odd chunk sizes leave partial bytes in the packer between calls
    let mut chunked = SigmaDeltaModulator::init("sdm-4", RATE, 8, 8, 64).unwrap();
    let actual = packet_domain_bytes(&mut chunked, &float, 13);

    assert_eq!(actual, expected);
}

#[test]
fn test_packet_byte_count_whole_stream() {
    let float = vec![0.25; 4096];
    let mut sdm = SigmaDeltaModulator::init("sdm-3", RATE, 8, 8, 100).unwrap();
    let mut output = vec![0u8; 512];

    let during = sdm.packet_process(&float, &mut output).unwrap();
    // 3996 final bits -> 499 whole bytes, 4 bits held in the packer
    assert_eq!(during, 499);
    assert_eq!(sdm.pending(), 104);

    let drained = sdm.packet_drain(&mut output).unwrap();
    assert_eq!(during + drained, 512);
    assert_eq!(sdm.packet_drain(&mut output), Ok(0));
    assert_eq!(sdm.samples_out(), 4096);
}

#[test]
fn test_packet_drain_bounded_by_buffer() {
    let float = vec![-0.3; 400];
    let mut sdm = SigmaDeltaModulator::init("sdm-2", RATE, 8, 4, 200).unwrap();
    let mut output = vec![0u8; 50];
    sdm.packet_process(&float, &mut output).unwrap();

    // 200 pending bits = 25 bytes, drained 4 at a time
    let mut small = [0u8; 4];
    let mut total = 0;
    loop {
        let n = sdm.packet_drain(&mut small).unwrap();
        assert!(n <= small.len());
        if n == 0 {
            break;
        }
        total += n;
    }
    assert_eq!(total, 25);
    assert!(sdm.is_drained());
}

#[test]
fn test_packet_drain_requires_room() {
    let mut sdm = SigmaDeltaModulator::init("sdm-2", RATE, 8, 4, 8).unwrap();
    assert_eq!(sdm.packet_drain(&mut []), Err(SdmError::EmptyOutput));
}

#[test]
fn test_non_finite_input_is_accepted() {
    let mut input = vec![0.1; 64];
    input[10] = f64::NAN;
    input[20] = f64::INFINITY;
    input[30] = f64::NEG_INFINITY;

    let mut sdm = SigmaDeltaModulator::init("sdm-3", RATE, 8, 4, 16).unwrap();
    let bytes = packet_domain_bytes(&mut sdm, &input, 64);
    assert_eq!(bytes.len(), 8);
    assert_eq!(sdm.stability_resets(), 0);
}

#[test]
fn test_huge_finite_sample_recovers() {
    let mut input = vec![0.25; 16_384];
    input[100] = 1e200;
    input[5000] = -1e300;

    let mut sdm = SigmaDeltaModulator::init("sdm-5", RATE, 13, 16, 256).unwrap();
    let bytes = packet_domain_bytes(&mut sdm, &input, 1024);
    assert_eq!(bytes.len(), 2048);
    assert!(sdm.accumulated_cost().is_finite());

    // The second half of the stream still encodes the input level
    let tail = &bytes[1024..];
    let ones: u32 = tail.iter().map(|b| b.count_ones()).sum();
    let mean = 2.0 * f64::from(ones) / (tail.len() * 8) as f64 - 1.0;
    let expected = 0.25 * sdm.filter().input_gain();
    assert!((mean - expected).abs() < 0.01, "mean {mean}, expected {expected}");
}

#[test]
fn test_constant_input_density() {
    // Bit density encodes the (gain-scaled) level
    let level = 0.5;
    let mut sdm = SigmaDeltaModulator::init("sdm-4", RATE, 8, 8, 64).unwrap();
    let bytes = packet_domain_bytes(&mut sdm, &vec![level; 16_384], 4096);

    let ones: u32 = bytes.iter().map(|b| b.count_ones()).sum();
    let mean = 2.0 * f64::from(ones) / (bytes.len() * 8) as f64 - 1.0;
    let expected = level * sdm.filter().input_gain();
    assert!((mean - expected).abs() < 0.01, "mean {mean}, expected {expected}");
}
