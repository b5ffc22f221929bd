//! Modulator settings
//!
//! All settings are fixed for the lifetime of a modulator. They can be loaded
//! from a host configuration file through serde.

use crate::error::{Result, SdmError};
use crate::filter::LoopFilter;
use crate::{SDM_TRELLIS_MAX_LAT, SDM_TRELLIS_MAX_NUM, SDM_TRELLIS_MAX_ORDER};
use serde::{Deserialize, Serialize};

/// DSD output rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DsdRate {
    /// DSD64: 2.8224 MHz (64x CD rate)
    #[default]
    Dsd64,

    /// DSD128: 5.6448 MHz (128x CD rate)
    Dsd128,

    /// DSD256: 11.2896 MHz (256x CD rate)
    Dsd256,

    /// DSD512: 22.5792 MHz (512x CD rate)
    Dsd512,
}

impl DsdRate {
    /// Sample rate multiplier relative to 44100 Hz
    pub fn multiplier(&self) -> u32 {
        match self {
            DsdRate::Dsd64 => 64,
            DsdRate::Dsd128 => 128,
            DsdRate::Dsd256 => 256,
            DsdRate::Dsd512 => 512,
        }
    }

    /// DSD sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        44100 * self.multiplier()
    }

    /// Noise-shaping filter recommended for this rate
    ///
    /// Lower rates leave less room between the audio band and Nyquist, so
    /// they get steeper shaping.
    pub fn recommended_filter(&self) -> &'static str {
        match self {
            DsdRate::Dsd64 => "sdm-7",
            DsdRate::Dsd128 => "sdm-5",
            DsdRate::Dsd256 | DsdRate::Dsd512 => "sdm-4",
        }
    }
}

/// Trellis search parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrellisParams {
    /// Number of recent decisions that identify a trellis state
    pub order: u32,
    /// Beam width: candidate paths kept after pruning
    pub num: u32,
    /// Samples a decision is held before it becomes final
    pub latency: u32,
}

impl TrellisParams {
    /// Check the documented bounds
    pub fn validate(&self) -> Result<()> {
        if self.order == 0 || self.order > SDM_TRELLIS_MAX_ORDER {
            return Err(SdmError::InvalidTrellisOrder(self.order));
        }
        if self.num == 0 || self.num > SDM_TRELLIS_MAX_NUM {
            return Err(SdmError::InvalidTrellisNum(self.num));
        }
        if self.latency > SDM_TRELLIS_MAX_LAT {
            return Err(SdmError::InvalidTrellisLatency(self.latency));
        }
        Ok(())
    }
}

/// Modulator settings
///
/// Unset trellis fields fall back to the filter's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdmSettings {
    /// Noise-shaping filter name (see [`crate::filter::available`])
    pub filter: String,

    /// Output (and input) sample rate in Hz
    pub sample_rate: u32,

    pub trellis_order: Option<u32>,
    pub trellis_num: Option<u32>,
    pub trellis_latency: Option<u32>,
}

impl Default for SdmSettings {
    fn default() -> Self {
        Self::for_rate(DsdRate::Dsd64)
    }
}

impl SdmSettings {
    /// Settings for a DSD rate with its recommended filter
    pub fn for_rate(rate: DsdRate) -> Self {
        Self {
            filter: rate.recommended_filter().to_string(),
            sample_rate: rate.sample_rate(),
            trellis_order: None,
            trellis_num: None,
            trellis_latency: None,
        }
    }

    /// Settings for an explicit filter and rate
    pub fn new(filter: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            filter: filter.into(),
            sample_rate,
            trellis_order: None,
            trellis_num: None,
            trellis_latency: None,
        }
    }

    /// Override all trellis parameters
    pub fn with_trellis(mut self, order: u32, num: u32, latency: u32) -> Self {
        self.trellis_order = Some(order);
        self.trellis_num = Some(num);
        self.trellis_latency = Some(latency);
        self
    }

    /// Build the loop filter and the effective trellis parameters
    pub fn resolve(&self) -> Result<(LoopFilter, TrellisParams)> {
        let filter = LoopFilter::new(&self.filter, self.sample_rate)?;
        let defaults = filter.default_trellis();

        let params = TrellisParams {
            order: self.trellis_order.unwrap_or(defaults.order),
            num: self.trellis_num.unwrap_or(defaults.num),
            latency: self.trellis_latency.unwrap_or(defaults.latency),
        };
        params.validate()?;

        Ok((filter, params))
    }

    /// Check these settings without keeping the derived filter
    pub fn validate(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }
}
