//! Noise-shaping filter bank
//!
//! Every filter is identified by name and derived for the target sample rate
//! at construction time. The result is an immutable [`LoopFilter`] owned by
//! one modulator instance; there is no process-wide coefficient table.
//!
//! # Families
//!
//! | Name        | Zeros                              | Orders |
//! |-------------|------------------------------------|--------|
//! | `sdm-N`     | spread across 0-20 kHz (optimized) | 1-8    |
//! | `dc-N`      | all at DC                          | 2-4    |
//!
//! The loop filter run by the trellis is the inverse of the noise transfer
//! function (NTF). It is stored as a cascade of second-order sections (plus
//! one first-order section for odd orders), so the per-path filter state is
//! exactly `order` values.

mod design;

use crate::error::{Result, SdmError};
use crate::settings::TrellisParams;
use std::f64::consts::PI;

/// Upper edge of the band the noise is shaped away from
pub const BAND_EDGE_HZ: f64 = 20_000.0;

/// Peak NTF gain allowed outside the band
pub const MAX_NTF_GAIN: f64 = 1.5;

/// Lowest supported rate as a multiple of the band edge
pub const MIN_OVERSAMPLING: u32 = 16;

/// Highest filter order in the bank
pub const MAX_FILTER_ORDER: usize = 8;

/// Gain applied to every input sample before modulation
const INPUT_GAIN: f64 = 0.5;

/// Where the NTF zeros are placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroPlacement {
    /// Spread across the band at the Legendre nodes
    Optimized,
    /// All at DC
    Dc,
}

/// Static description of a named filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSpec {
    pub name: &'static str,
    pub order: usize,
    pub zeros: ZeroPlacement,
    /// Trellis parameters used when the caller leaves them unset
    pub trellis: TrellisParams,
}

const fn spec(
    name: &'static str,
    order: usize,
    zeros: ZeroPlacement,
    trellis: (u32, u32, u32),
) -> FilterSpec {
    FilterSpec {
        name,
        order,
        zeros,
        trellis: TrellisParams {
            order: trellis.0,
            num: trellis.1,
            latency: trellis.2,
        },
    }
}

static FILTERS: &[FilterSpec] = &[
    spec("sdm-1", 1, ZeroPlacement::Optimized, (8, 4, 32)),
    spec("sdm-2", 2, ZeroPlacement::Optimized, (8, 8, 64)),
    spec("sdm-3", 3, ZeroPlacement::Optimized, (8, 8, 64)),
    spec("sdm-4", 4, ZeroPlacement::Optimized, (13, 16, 256)),
    spec("sdm-5", 5, ZeroPlacement::Optimized, (13, 16, 256)),
    spec("sdm-6", 6, ZeroPlacement::Optimized, (16, 16, 512)),
    spec("sdm-7", 7, ZeroPlacement::Optimized, (16, 16, 512)),
    spec("sdm-8", 8, ZeroPlacement::Optimized, (16, 16, 512)),
    spec("dc-2", 2, ZeroPlacement::Dc, (8, 8, 64)),
    spec("dc-3", 3, ZeroPlacement::Dc, (8, 8, 64)),
    spec("dc-4", 4, ZeroPlacement::Dc, (13, 16, 256)),
];

/// Names of every filter in the bank
pub fn available() -> impl Iterator<Item = &'static str> {
    FILTERS.iter().map(|f| f.name)
}

/// Find a filter description by name
pub fn find(name: &str) -> Option<&'static FilterSpec> {
    FILTERS.iter().find(|f| f.name == name)
}

/// One section of the loop filter cascade
///
/// `pole` and `zero` hold `[c1, c2]` of `1 + c1 z^-1 + c2 z^-2` for the NTF.
/// The loop filter is the inverse NTF, so NTF poles form the numerator and
/// NTF zeros the denominator. First-order sections have `c2 == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub pole: [f64; 2],
    pub zero: [f64; 2],
}

impl Section {
    /// Number of state values this section needs
    pub fn order(&self) -> usize {
        if self.pole[1] == 0.0 && self.zero[1] == 0.0 {
            1
        } else {
            2
        }
    }

    /// Transposed direct form II step
    #[inline]
    fn run(&self, state: &mut [f64], x: f64) -> f64 {
        let y = x + state[0];
        if state.len() == 2 {
            state[0] = state[1] + self.pole[0] * x - self.zero[0] * y;
            state[1] = self.pole[1] * x - self.zero[1] * y;
        } else {
            state[0] = self.pole[0] * x - self.zero[0] * y;
        }
        y
    }
}

/// Loop filter derived for one name and sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct LoopFilter {
    name: &'static str,
    sample_rate: u32,
    order: usize,
    sections: Vec<Section>,
    input_gain: f64,
    defaults: TrellisParams,
}

impl LoopFilter {
    /// Derive the named filter for `sample_rate`
    pub fn new(name: &str, sample_rate: u32) -> Result<Self> {
        let spec = find(name).ok_or_else(|| SdmError::UnknownFilter(name.to_string()))?;

        let unsupported = || SdmError::UnsupportedRate {
            filter: spec.name.to_string(),
            freq: sample_rate,
        };

        if f64::from(sample_rate) < f64::from(MIN_OVERSAMPLING) * BAND_EDGE_HZ {
            return Err(unsupported());
        }

        let band_omega = 2.0 * PI * BAND_EDGE_HZ / f64::from(sample_rate);
        let sections = design::synthesize(spec.order, spec.zeros, band_omega, MAX_NTF_GAIN)
            .ok_or_else(unsupported)?;

        Ok(Self {
            name: spec.name,
            sample_rate,
            order: spec.order,
            sections,
            input_gain: INPUT_GAIN,
            defaults: spec.trellis,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Filter order, which is also the length of the filter state
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn input_gain(&self) -> f64 {
        self.input_gain
    }

    /// Trellis parameters recommended for this filter
    pub fn default_trellis(&self) -> TrellisParams {
        self.defaults
    }

    /// Run one reconstruction error value through the loop filter
    ///
    /// `state` must hold [`order`](Self::order) values. Returns the filtered
    /// error whose square is the trellis cost increment.
    #[inline]
    pub fn filter_error(&self, state: &mut [f64], error: f64) -> f64 {
        let mut x = error;
        let mut offset = 0;
        for section in &self.sections {
            let n = section.order();
            x = section.run(&mut state[offset..offset + n], x);
            offset += n;
        }
        x
    }

    /// NTF magnitude at `hz`
    pub fn ntf_magnitude(&self, hz: f64) -> f64 {
        let omega = 2.0 * PI * hz / f64::from(self.sample_rate);
        let poles: Vec<[f64; 2]> = self.sections.iter().map(|s| s.pole).collect();
        let zeros: Vec<[f64; 2]> = self.sections.iter().map(|s| s.zero).collect();
        design::ntf_magnitude(&poles, &zeros, omega)
    }

    /// NTF magnitude at `hz` in dB
    pub fn ntf_magnitude_db(&self, hz: f64) -> f64 {
        20.0 * self.ntf_magnitude(hz).max(1e-15).log10()
    }
}
