use crate::{
    coefficients::calculate_coefficients,
    decode::{decode_gc_adpcm_from, decode_gc_adpcm_with},
    encode::encode_gc_adpcm,
    error::{Error, Result},
    io::{Reader, Writer},
    math::{
        nibble_count_to_sample_count, nibble_to_sample, predictor_scale_at,
        sample_count_to_nibble_count, sample_to_nibble, DivideByRoundUp,
    },
    wav::Wave,
    CodecParameters, History,
};
use std::{path::Path, time::Duration};
use tracing::debug;

pub const FORMAT_ADPCM: i16 = 0;

/// Predictor/scale byte plus the two samples that precede a decode position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcAdpcmContext {
    pub predictor_scale: i16,
    pub hist_1: i16,
    pub hist_2: i16,
}

impl GcAdpcmContext {
    pub fn read(reader: &mut Reader) -> Result<Self> {
        let predictor_scale = reader.read_i16()?;
        let hist_1 = reader.read_i16()?;
        let hist_2 = reader.read_i16()?;

        Ok(Self { predictor_scale, hist_1, hist_2 })
    }

    pub fn write(&self, writer: &mut Writer) {
        writer.write_i16(self.predictor_scale);
        writer.write_i16(self.hist_1);
        writer.write_i16(self.hist_2);
    }

    pub fn history(&self) -> History {
        History::new(self.hist_1, self.hist_2)
    }
}

/// One mono GC-ADPCM stream.
///
/// `loop_start` and `nibble_count` are measured in nibbles. `loop_start` is relative to
/// the first sample nibble, so containers store it as `2 + loop_start` and a loop at
/// sample `s` has `loop_start == sample_to_nibble(s) - 2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub looping: bool,
    pub format: i16,
    pub coefficients: [i16; 16],
    pub gain: i16,
    pub start_context: GcAdpcmContext,
    pub loop_context: GcAdpcmContext,
    pub data: Vec<u8>,
    pub loop_start: usize,
    pub nibble_count: usize,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            looping: false,
            format: FORMAT_ADPCM,
            coefficients: [0; 16],
            gain: 0,
            start_context: GcAdpcmContext::default(),
            loop_context: GcAdpcmContext::default(),
            data: Vec::new(),
            loop_start: 0,
            nibble_count: 0,
        }
    }
}

impl Channel {
    /// Solves coefficients for `pcm` and encodes it.
    pub fn encode(pcm: &[i16]) -> Self {
        let coefficients = calculate_coefficients(pcm);
        let data = encode_gc_adpcm(pcm, &coefficients);
        let predictor_scale = data.first().copied().unwrap_or(0) as i16;

        Self {
            coefficients,
            start_context: GcAdpcmContext { predictor_scale, ..Default::default() },
            nibble_count: sample_count_to_nibble_count(pcm.len()),
            data,
            ..Default::default()
        }
    }

    pub fn sample_count(&self) -> usize {
        nibble_count_to_sample_count(self.nibble_count)
    }

    pub fn loop_sample(&self) -> usize {
        nibble_to_sample(self.loop_start + 2)
    }

    /// Checks the nibble count against the payload.
    pub fn validate(&self) -> Result<()> {
        let expected = self.nibble_count.divide_by_2_round_up();
        if self.data.len() < expected {
            return Err(Error::format(format!(
                "channel holds {} bytes but {} nibbles need {expected}",
                self.data.len(),
                self.nibble_count
            )));
        }

        Ok(())
    }

    pub fn decode(&self) -> Vec<i16> {
        let config = CodecParameters {
            sample_count: self.sample_count(),
            history: self.start_context.history(),
        };

        decode_gc_adpcm_with(&self.data, &self.coefficients, &config).0
    }

    /// Decodes from the loop point to the end using only the loop context.
    pub fn decode_loop(&self) -> Vec<i16> {
        let start = self.loop_sample();
        let config = CodecParameters {
            sample_count: self.sample_count().saturating_sub(start),
            history: self.loop_context.history(),
        };

        decode_gc_adpcm_from(&self.data, &self.coefficients, start, &config).0
    }

    /// Sets the loop to start at `sample` and recomputes the loop context.
    pub fn set_loop_sample(&mut self, sample: usize) {
        self.looping = true;
        self.loop_start = sample_to_nibble(sample) - 2;
        self.refresh_loop_context();
    }

    pub fn clear_loop(&mut self) {
        self.looping = false;
        self.loop_start = 0;
        self.loop_context = GcAdpcmContext::default();
    }

    pub fn refresh_loop_context(&mut self) {
        let sample = self.loop_sample();
        let pcm = self.decode();
        let history = History::before(&pcm, sample);

        self.loop_context = GcAdpcmContext {
            predictor_scale: predictor_scale_at(&self.data, sample).unwrap_or(0) as i16,
            hist_1: history.hist_1,
            hist_2: history.hist_2,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Dsp,
    Wav,
    Hps,
    Brstm,
}

impl AudioFormat {
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let extension = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "dsp" => Some(AudioFormat::Dsp),
            "wav" => Some(AudioFormat::Wav),
            "hps" => Some(AudioFormat::Hps),
            "brstm" => Some(AudioFormat::Brstm),
            _ => None,
        }
    }
}

/// One to two channels played together at one sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sound {
    pub sample_rate: u32,
    pub channels: Vec<Channel>,
}

impl Sound {
    pub fn new(sample_rate: u32, channels: Vec<Channel>) -> Result<Self> {
        if channels.is_empty() || channels.len() > 2 {
            return Err(Error::unsupported(format!("{} channels", channels.len())));
        }

        Ok(Self { sample_rate, channels })
    }

    pub fn from_wave(wave: &Wave) -> Result<Self> {
        let channels = wave.channels.iter().map(|pcm| Channel::encode(pcm)).collect();
        let mut sound = Self::new(wave.sample_rate, channels)?;

        if let Some(sample) = wave.loop_point {
            sound.set_loop(Some(sample))?;
        }

        debug!(
            sample_rate = sound.sample_rate,
            channels = sound.channels.len(),
            samples = sound.sample_count(),
            "encoded wave"
        );

        Ok(sound)
    }

    pub fn to_wave(&self) -> Wave {
        Wave {
            sample_rate: self.sample_rate,
            channels: self.channels.iter().map(Channel::decode).collect(),
            loop_point: self.loop_sample(),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.channels.iter().map(Channel::sample_count).max().unwrap_or(0)
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.sample_count(), self.sample_rate)
    }

    pub fn is_looping(&self) -> bool {
        self.channels.first().is_some_and(|c| c.looping)
    }

    pub fn loop_sample(&self) -> Option<usize> {
        self.channels.first().filter(|c| c.looping).map(Channel::loop_sample)
    }

    pub fn loop_time(&self) -> Option<Duration> {
        self.loop_sample().map(|sample| samples_to_duration(sample, self.sample_rate))
    }

    /// Applies one loop point to every channel, or removes it.
    pub fn set_loop(&mut self, sample: Option<usize>) -> Result<()> {
        match sample {
            Some(sample) => {
                let count = self.sample_count();
                if sample >= count {
                    return Err(Error::invalid_input(format!(
                        "loop sample {sample} is past the end ({count} samples)"
                    )));
                }

                for channel in &mut self.channels {
                    channel.set_loop_sample(sample);
                }
            },
            None => {
                for channel in &mut self.channels {
                    channel.clear_loop();
                }
            },
        }

        Ok(())
    }

    pub fn set_loop_time(&mut self, time: Duration) -> Result<()> {
        let sample = (time.as_secs_f64() * self.sample_rate as f64).round() as usize;
        self.set_loop(Some(sample))
    }

    pub fn from_bytes(data: &[u8], format: AudioFormat) -> Result<Self> {
        match format {
            AudioFormat::Dsp => crate::dsp::read(data),
            AudioFormat::Wav => Self::from_wave(&Wave::read(data)?),
            AudioFormat::Hps => crate::hps::read(data),
            AudioFormat::Brstm => crate::brstm::read(data),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = AudioFormat::from_path(path)
            .ok_or_else(|| Error::unsupported(format!("audio file {}", path.display())))?;

        Self::from_bytes(&std::fs::read(path)?, format)
    }

    /// Writes the sound in the format named by the extension. Raw `.dsp` holds one
    /// channel, so stereo sounds become `name_channel_0.dsp` and `name_channel_1.dsp`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = AudioFormat::from_path(path)
            .ok_or_else(|| Error::unsupported(format!("audio file {}", path.display())))?;

        match format {
            AudioFormat::Wav => std::fs::write(path, self.to_wave().to_bytes()?)?,
            AudioFormat::Hps => std::fs::write(path, crate::hps::write(self)?)?,
            AudioFormat::Dsp if self.channels.len() == 1 => {
                std::fs::write(path, crate::dsp::write_channel(self.sample_rate, &self.channels[0])?)?
            },
            AudioFormat::Dsp => {
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("sound");
                let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("dsp");
                for (i, channel) in self.channels.iter().enumerate() {
                    let channel_path = path.with_file_name(format!("{stem}_channel_{i}.{extension}"));
                    std::fs::write(channel_path, crate::dsp::write_channel(self.sample_rate, channel)?)?;
                }
            },
            AudioFormat::Brstm => return Err(Error::unsupported("writing brstm")),
        }

        Ok(())
    }
}

fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }

    Duration::from_nanos((samples as u128 * 1_000_000_000 / sample_rate as u128) as u64)
}
