//! THP movies (`"THP\0"`, version 1.1): a video component of THP frames and an
//! optional GC-ADPCM audio track interleaved per frame.

use super::thp::Thp;
use crate::{
    decode::decode_gc_adpcm_with,
    error::{Error, Result},
    io::read_payload,
    wav::Wave,
    CodecParameters, History,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
};
use tracing::{debug, trace};

const MAGIC: u32 = 0x5448_5000;
const VERSION: u32 = 0x0001_1000;
const COMPONENT_SLOTS: usize = 16;
const MAX_AUDIO_CHANNELS: u32 = 2;

const COMPONENT_VIDEO: u8 = 0;
const COMPONENT_AUDIO: u8 = 1;
const COMPONENT_NONE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VideoComponent {
    width: u32,
    height: u32,
    format: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AudioComponent {
    channel_count: u32,
    frequency: u32,
    sample_count: u32,
    data_count: u32,
}

/// One decoded movie frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieFrame {
    pub image: Thp,
    /// The audio that plays alongside the frame, if the movie carries any.
    pub audio: Option<Wave>,
}

pub struct ThpMovie<R: Read + Seek> {
    inner: R,
    frame_rate: f32,
    frame_count: u32,
    video: VideoComponent,
    audio: Option<AudioComponent>,
    /// Size of the frame at the current position.
    current_size: u32,
    frame: u32,
}

impl ThpMovie<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> ThpMovie<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        if inner.read_u32::<BigEndian>()? != MAGIC {
            return Err(Error::InvalidSignature { format: "THP" });
        }

        let version = inner.read_u32::<BigEndian>()?;
        if version != VERSION {
            return Err(Error::unsupported(format!("thp version {version:#x}")));
        }

        let _max_buffer_size = inner.read_u32::<BigEndian>()?;
        let _max_audio_samples = inner.read_u32::<BigEndian>()?;
        let frame_rate = inner.read_f32::<BigEndian>()?;
        let frame_count = inner.read_u32::<BigEndian>()?;
        let first_frame_size = inner.read_u32::<BigEndian>()?;
        let _movie_data_size = inner.read_u32::<BigEndian>()?;
        let component_offset = inner.read_u32::<BigEndian>()?;
        if inner.read_u32::<BigEndian>()? != 0 {
            return Err(Error::unsupported("thp frame offset tables"));
        }
        let first_frame_offset = inner.read_u32::<BigEndian>()?;
        let _last_frame_offset = inner.read_u32::<BigEndian>()?;

        inner.seek(SeekFrom::Start(component_offset as u64))?;
        let component_count = inner.read_u32::<BigEndian>()? as usize;
        let mut kinds = [0; COMPONENT_SLOTS];
        inner.read_exact(&mut kinds)?;

        if component_count > COMPONENT_SLOTS {
            return Err(Error::format(format!("thp lists {component_count} components")));
        }

        let mut video = None;
        let mut audio = None;
        for &kind in &kinds[..component_count] {
            match kind {
                COMPONENT_VIDEO if video.is_none() => {
                    video = Some(VideoComponent {
                        width: inner.read_u32::<BigEndian>()?,
                        height: inner.read_u32::<BigEndian>()?,
                        format: inner.read_u32::<BigEndian>()?,
                    });
                },
                COMPONENT_AUDIO if audio.is_none() => {
                    audio = Some(AudioComponent {
                        channel_count: inner.read_u32::<BigEndian>()?,
                        frequency: inner.read_u32::<BigEndian>()?,
                        sample_count: inner.read_u32::<BigEndian>()?,
                        data_count: inner.read_u32::<BigEndian>()?,
                    });
                },
                COMPONENT_VIDEO | COMPONENT_AUDIO => {
                    return Err(Error::unsupported(format!("thp with more than one component of type {kind}")))
                },
                COMPONENT_NONE => {},
                other => return Err(Error::unsupported(format!("thp component type {other}"))),
            }
        }

        let video = video.ok_or_else(|| Error::unsupported("thp without a video component"))?;
        if let Some(audio) = audio {
            if audio.channel_count == 0 || audio.channel_count > MAX_AUDIO_CHANNELS {
                return Err(Error::unsupported(format!("{} channel thp audio", audio.channel_count)));
            }
        }

        debug!(frame_rate, frame_count, ?video, ?audio, "read thp header");

        inner.seek(SeekFrom::Start(first_frame_offset as u64))?;
        Ok(Self { inner, frame_rate, frame_count, video, audio, current_size: first_frame_size, frame: 0 })
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn width(&self) -> u32 {
        self.video.width
    }

    pub fn height(&self) -> u32 {
        self.video.height
    }

    pub fn audio_frequency(&self) -> Option<u32> {
        self.audio.map(|a| a.frequency)
    }

    pub fn audio_channel_count(&self) -> u32 {
        self.audio.map_or(0, |a| a.channel_count)
    }

    /// Total audio samples per channel over the whole movie.
    pub fn audio_sample_count(&self) -> Option<u32> {
        self.audio.map(|a| a.sample_count)
    }

    /// Number of frames that carry audio.
    pub fn audio_block_count(&self) -> Option<u32> {
        self.audio.map(|a| a.data_count)
    }

    pub fn video_format(&self) -> u32 {
        self.video.format
    }

    /// Reads the next frame, or `None` once every frame has been read.
    pub fn read_frame(&mut self) -> Result<Option<MovieFrame>> {
        if self.frame >= self.frame_count {
            return Ok(None);
        }

        let start = self.inner.stream_position()?;
        let next_position = start + self.current_size as u64;

        let next_size = self.inner.read_u32::<BigEndian>()?;
        let _previous_size = self.inner.read_u32::<BigEndian>()?;
        let image_size = self.inner.read_u32::<BigEndian>()? as usize;
        let audio_size = self.inner.read_u32::<BigEndian>()?;

        let image = read_payload(&mut self.inner, image_size)?;

        let audio = match self.audio {
            Some(component) if audio_size > 0 => Some(self.read_audio(component)?),
            _ => None,
        };

        trace!(frame = self.frame, offset = start, image_size, audio_size, "thp frame");

        self.inner.seek(SeekFrom::Start(next_position))?;
        self.current_size = next_size;
        self.frame += 1;

        Ok(Some(MovieFrame { image: Thp::new(image), audio }))
    }

    fn read_audio(&mut self, component: AudioComponent) -> Result<Wave> {
        let channel_size = self.inner.read_u32::<BigEndian>()? as usize;
        let sample_count = self.inner.read_u32::<BigEndian>()? as usize;

        let mut coefficients = [[0i16; 16]; 2];
        for set in &mut coefficients {
            self.inner.read_i16_into::<BigEndian>(set)?;
        }

        let mut histories = [History::default(); 2];
        for history in &mut histories {
            let hist_1 = self.inner.read_i16::<BigEndian>()?;
            let hist_2 = self.inner.read_i16::<BigEndian>()?;
            *history = History::new(hist_1, hist_2);
        }

        let mut channels = Vec::with_capacity(component.channel_count as usize);
        for channel in 0..component.channel_count as usize {
            let adpcm = read_payload(&mut self.inner, channel_size)?;

            let config = CodecParameters { sample_count, history: histories[channel] };
            let (pcm, _) = decode_gc_adpcm_with(&adpcm, &coefficients[channel], &config);
            channels.push(pcm);
        }

        Ok(Wave { sample_rate: component.frequency, channels, loop_point: None })
    }
}
