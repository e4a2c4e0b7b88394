//! Codecs for GameCube-era game media.
//!
//! The audio side is built around GC-ADPCM ([`decode`], [`encode`],
//! [`coefficients`]) and the containers that carry it: raw `.dsp`, `.wav` for
//! interchange, the loop-aware streaming `.hps`, read-only `.brstm` and the
//! `.ssm` sound bank. The video side wraps transformed JPEG frames (`.thp`) in
//! the chained `.mth` container. [`script`] packs the sound effect bytecode
//! found in `.sem` banks.

pub mod brstm;
pub mod coefficients;
pub mod decode;
pub mod dsp;
pub mod encode;
pub mod error;
pub mod hps;
pub mod io;
pub mod math;
pub mod script;
pub mod sound;
pub mod ssm;
pub mod video;
pub mod wav;

#[cfg(test)]
mod test_util;

pub use error::{Error, Result};
pub use sound::{Channel, GcAdpcmContext, Sound};

pub const SAMPLES_PER_FRAME: usize = 14;
pub const NIBBLES_PER_FRAME: usize = 16;
pub const BYTES_PER_FRAME: usize = 8;

/// The two most recent output samples of the predictor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct History {
    pub hist_1: i16,
    pub hist_2: i16,
}

impl History {
    pub fn new(hist_1: i16, hist_2: i16) -> Self {
        Self { hist_1, hist_2 }
    }

    /// History right before `index`, taken from already decoded samples.
    pub fn before(pcm: &[i16], index: usize) -> Self {
        let at = |offset: usize| {
            index.checked_sub(offset).and_then(|i| pcm.get(i)).copied().unwrap_or(0)
        };

        Self { hist_1: at(1), hist_2: at(2) }
    }

    fn push(&mut self, sample: i16) {
        self.hist_2 = self.hist_1;
        self.hist_1 = sample;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecParameters {
    pub sample_count: usize,
    pub history: History,
}

impl CodecParameters {
    pub fn new(sample_count: usize) -> Self {
        Self { sample_count, history: History::default() }
    }
}
