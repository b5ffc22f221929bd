//! Sigma-delta modulator instance and its sample-domain streaming API
//!
//! One modulator handles one mono stream. Multi-channel hosts create one
//! instance per channel; instances share nothing and can run on separate
//! threads.

use crate::error::{Result, SdmError};
use crate::filter::LoopFilter;
use crate::packet::BitPacker;
use crate::settings::{SdmSettings, TrellisParams};
use crate::trellis::TrellisEngine;
use tracing::debug;

/// Fixed-point sample of the surrounding pipeline (full scale is ±2^31)
pub type Sample = i32;

/// Output level for a `1` decision; `0` decisions produce `-SAMPLE_MAX`
pub const SAMPLE_MAX: Sample = i32::MAX;

const FULL_SCALE: f64 = 2_147_483_648.0;

/// Lifecycle phase of a modulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting input
    Streaming,
    /// Drain started; pending decisions are being emitted
    Draining,
    /// Every decision has been emitted
    Finished,
}

/// Streaming API an instance is bound to by its first data call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Surface {
    Samples,
    Packets,
}

impl Surface {
    fn name(self) -> &'static str {
        match self {
            Surface::Samples => "sample",
            Surface::Packets => "packet",
        }
    }
}

/// Result of one [`SigmaDeltaModulator::process`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamProgress {
    /// Input samples consumed
    pub consumed: usize,
    /// Output samples written
    pub produced: usize,
}

#[inline]
pub(crate) fn output_level(bit: bool) -> Sample {
    if bit {
        SAMPLE_MAX
    } else {
        -SAMPLE_MAX
    }
}

/// Trellis noise-shaped sigma-delta modulator
///
/// Converts high-resolution samples to a 1-bit stream delayed by exactly
/// `trellis_latency` samples. Feed input through [`process`](Self::process)
/// (fixed point) or [`packet_process`](Self::packet_process) (float in,
/// packed bytes out), then call the matching drain until it returns 0.
/// The first data call binds the instance to one of the two APIs; calls on
/// the other fail with [`SdmError::SurfaceMismatch`].
///
/// # Example
///
/// ```rust
/// use soul_sdm::{SigmaDeltaModulator, SAMPLE_MAX};
///
/// let mut sdm = SigmaDeltaModulator::init("sdm-4", 2_822_400, 8, 8, 64)?;
///
/// let input = vec![0; 256];
/// let mut output = vec![0; 256];
/// let progress = sdm.process(&input, &mut output)?;
/// assert_eq!(progress.consumed, 256);
/// assert_eq!(progress.produced, 256 - 64);
///
/// let mut tail = vec![0; 64];
/// while sdm.drain(&mut tail)? > 0 {}
/// assert!(output[..progress.produced].iter().all(|s| s.abs() == SAMPLE_MAX));
/// # Ok::<(), soul_sdm::SdmError>(())
/// ```
pub struct SigmaDeltaModulator {
    engine: TrellisEngine,
    params: TrellisParams,
    pub(crate) packer: BitPacker,
    phase: Phase,
    surface: Option<Surface>,
    samples_in: u64,
    samples_out: u64,
}

impl SigmaDeltaModulator {
    /// Create a modulator from settings
    pub fn new(settings: &SdmSettings) -> Result<Self> {
        let (filter, params) = settings.resolve()?;

        debug!(
            filter = filter.name(),
            sample_rate = filter.sample_rate(),
            trellis_order = params.order,
            trellis_num = params.num,
            trellis_latency = params.latency,
            "Sigma-delta modulator initialized"
        );

        Ok(Self {
            engine: TrellisEngine::new(filter, params),
            params,
            packer: BitPacker::new(),
            phase: Phase::Streaming,
            surface: None,
            samples_in: 0,
            samples_out: 0,
        })
    }

    /// Create a modulator from positional parameters
    ///
    /// A trellis parameter of `0` selects the filter's default for it.
    pub fn init(
        filter_name: &str,
        freq: u32,
        trellis_order: u32,
        trellis_num: u32,
        trellis_latency: u32,
    ) -> Result<Self> {
        let nonzero = |v: u32| (v != 0).then_some(v);
        let settings = SdmSettings {
            trellis_order: nonzero(trellis_order),
            trellis_num: nonzero(trellis_num),
            trellis_latency: nonzero(trellis_latency),
            ..SdmSettings::new(filter_name, freq)
        };
        Self::new(&settings)
    }

    /// Modulate fixed-point samples
    ///
    /// Consumes input while `output` has room and writes each finalized
    /// decision as `±SAMPLE_MAX`. A call that fills `output` may consume
    /// less than all of `input`; pass the remainder again.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<StreamProgress> {
        self.ensure_streaming()?;
        if output.is_empty() && !input.is_empty() {
            return Err(SdmError::EmptyOutput);
        }
        self.claim_surface(Surface::Samples)?;

        let gain = self.engine.filter().input_gain();
        let mut progress = StreamProgress::default();

        for &sample in input {
            if progress.produced == output.len() {
                break;
            }
            let x = f64::from(sample) / FULL_SCALE * gain;
            if let Some(bit) = self.engine.push(x) {
                output[progress.produced] = output_level(bit);
                progress.produced += 1;
            }
            progress.consumed += 1;
        }

        self.samples_in += progress.consumed as u64;
        self.samples_out += progress.produced as u64;
        Ok(progress)
    }

    /// Emit pending decisions after the end of input
    ///
    /// Returns the number of samples written; call again until it returns 0.
    /// No further input is accepted once draining has started.
    pub fn drain(&mut self, output: &mut [Sample]) -> Result<usize> {
        if output.is_empty() {
            return Err(SdmError::EmptyOutput);
        }
        self.claim_surface(Surface::Samples)?;
        self.begin_drain();

        let mut produced = 0;
        while produced < output.len() {
            match self.engine.flush_one() {
                Some(bit) => {
                    output[produced] = output_level(bit);
                    produced += 1;
                }
                None => {
                    self.finish();
                    break;
                }
            }
        }

        self.samples_out += produced as u64;
        Ok(produced)
    }

    /// Release the modulator
    pub fn close(self) {
        debug!(
            samples_in = self.samples_in,
            samples_out = self.samples_out,
            "Sigma-delta modulator closed"
        );
    }

    pub(crate) fn ensure_streaming(&self) -> Result<()> {
        if self.phase == Phase::Streaming {
            Ok(())
        } else {
            Err(SdmError::AlreadyDraining)
        }
    }

    pub(crate) fn claim_surface(&mut self, surface: Surface) -> Result<()> {
        match self.surface {
            Some(active) if active != surface => Err(SdmError::SurfaceMismatch(active.name())),
            Some(_) => Ok(()),
            None => {
                self.surface = Some(surface);
                Ok(())
            }
        }
    }

    pub(crate) fn begin_drain(&mut self) {
        if self.phase == Phase::Streaming {
            debug!(pending = self.engine.pending(), "Draining sigma-delta modulator");
            self.phase = Phase::Draining;
        }
    }

    pub(crate) fn finish(&mut self) {
        if self.phase != Phase::Finished {
            debug!(
                samples_in = self.samples_in,
                samples_out = self.samples_out,
                cost = self.engine.accumulated_cost(),
                "Sigma-delta modulator drained"
            );
            self.phase = Phase::Finished;
        }
    }

    pub(crate) fn engine_mut(&mut self) -> &mut TrellisEngine {
        &mut self.engine
    }

    pub(crate) fn record(&mut self, consumed: usize, emitted: usize) {
        self.samples_in += consumed as u64;
        self.samples_out += emitted as u64;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether every decision has been emitted
    pub fn is_drained(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn filter(&self) -> &LoopFilter {
        self.engine.filter()
    }

    /// Effective trellis parameters
    pub fn trellis(&self) -> TrellisParams {
        self.params
    }

    /// Output delay in samples
    pub fn latency(&self) -> usize {
        self.engine.latency()
    }

    /// Decisions not yet returned: undecided bits plus bits held for packing
    pub fn pending(&self) -> usize {
        self.engine.pending() + self.packer.pending_bits()
    }

    /// Live candidate paths
    pub fn candidates(&self) -> usize {
        self.engine.candidates()
    }

    /// Filtered-error energy of the best path so far
    pub fn accumulated_cost(&self) -> f64 {
        self.engine.accumulated_cost()
    }

    /// Times the loop filter was reset for instability
    pub fn stability_resets(&self) -> u64 {
        self.engine.resets()
    }

    /// Input samples consumed so far
    pub fn samples_in(&self) -> u64 {
        self.samples_in
    }

    /// Decisions emitted so far (padding excluded)
    pub fn samples_out(&self) -> u64 {
        self.samples_out
    }
}

impl std::fmt::Debug for SigmaDeltaModulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigmaDeltaModulator")
            .field("filter", &self.engine.filter().name())
            .field("sample_rate", &self.engine.filter().sample_rate())
            .field("trellis", &self.params)
            .field("phase", &self.phase)
            .field("surface", &self.surface)
            .field("samples_in", &self.samples_in)
            .field("samples_out", &self.samples_out)
            .finish()
    }
}
