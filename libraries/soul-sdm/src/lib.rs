//! Soul Player Sigma-Delta Modulator
//!
//! Converts band-limited, high-resolution audio into a 1-bit pulse-density
//! stream (DSD) using trellis noise shaping instead of plain rounding.
//!
//! This crate provides:
//! - A named bank of noise-shaping loop filters derived for the target rate
//! - A bounded beam search over future bit decisions with fixed latency
//! - A fixed-point streaming API (`process` / `drain`)
//! - A packet API emitting MSB-first packed bytes (`packet_process` / `packet_drain`)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌─────────────────┐
//! │ i32 samples  │ ──► │               │ ──► │ ±SAMPLE_MAX     │
//! └──────────────┘     │ TrellisEngine │     └─────────────────┘
//! ┌──────────────┐     │ (LoopFilter)  │     ┌─────────────────┐
//! │ f64 samples  │ ──► │               │ ──► │ BitPacker bytes │
//! └──────────────┘     └───────────────┘     └─────────────────┘
//! ```
//!
//! # Example: Packed DSD output
//!
//! ```rust
//! use soul_sdm::{DsdRate, SdmSettings, SigmaDeltaModulator};
//!
//! let settings = SdmSettings::for_rate(DsdRate::Dsd128).with_trellis(8, 4, 32);
//! let mut sdm = SigmaDeltaModulator::new(&settings)?;
//!
//! let input: Vec<f64> = (0..4096)
//!     .map(|i| 0.5 * (2.0 * std::f64::consts::PI * i as f64 / 5644.8).sin())
//!     .collect();
//! let mut packets = vec![0u8; input.len().div_ceil(8)];
//! let mut written = sdm.packet_process(&input, &mut packets)?;
//!
//! let mut tail = [0u8; 8];
//! loop {
//!     let n = sdm.packet_drain(&mut tail)?;
//!     if n == 0 {
//!         break;
//!     }
//!     written += n;
//! }
//! assert_eq!(written, 4096 / 8);
//! # Ok::<(), soul_sdm::SdmError>(())
//! ```

#![forbid(unsafe_code)]

mod error;
pub mod filter;
mod modulator;
mod packet;
mod settings;
mod trellis;

pub use error::{ErrorKind, Result, SdmError};
pub use filter::{LoopFilter, Section};
pub use modulator::{Phase, Sample, SigmaDeltaModulator, StreamProgress, SAMPLE_MAX};
pub use packet::{unpack_bits, BitPacker, PAD_BIT};
pub use settings::{DsdRate, SdmSettings, TrellisParams};

/// Maximum trellis order (recent decisions identifying a trellis state)
pub const SDM_TRELLIS_MAX_ORDER: u32 = 32;

/// Maximum trellis width (candidate paths kept)
pub const SDM_TRELLIS_MAX_NUM: u32 = 32;

/// Maximum trellis latency in samples
pub const SDM_TRELLIS_MAX_LAT: u32 = 2048;
