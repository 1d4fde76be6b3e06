//! decoded audio files and the playhead that feeds them to an output
//!
//! a `Clip` keeps the whole file as interleaved `f32` in memory. A `Playhead` walks over it at
//! the device rate, interpolating linearly between clip frames, and maps the clip's channel
//! layout onto the device's.

#[cfg(feature = "wav")]
use std::io::Read;
#[cfg(feature = "wav")]
use std::path::Path;

#[cfg(feature = "wav")]
use log::info;

#[cfg(feature = "wav")]
use crate::audio::converter::int_to_f32;
use crate::config::StreamFormat;
use crate::error::{ConfigError, ConfigResult, SourceError, SourceResult};
use crate::spectrum::config::positive;
use crate::utils::map_channels;

/// interleaved PCM of a whole file
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}
impl Clip {
    /// a trailing incomplete frame is dropped
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> SourceResult<Self> {
        if sample_rate == 0 {
            return Err(ConfigError::SampleRate(sample_rate).into());
        }
        if channels == 0 {
            return Err(ConfigError::Zero { name: "channels" }.into());
        }
        samples.truncate(samples.len() - samples.len() % channels as usize);
        if samples.is_empty() {
            return Err(SourceError::Empty);
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    #[cfg(feature = "wav")]
    pub fn open(path: impl AsRef<Path>) -> SourceResult<Self> {
        let path = path.as_ref();
        let clip = Self::decode(hound::WavReader::open(path)?)?;
        info!(
            "loaded {}: {} frames, {} Hz, {} ch",
            path.display(),
            clip.frames(),
            clip.sample_rate,
            clip.channels
        );
        Ok(clip)
    }

    /// decodes a wav stream
    #[cfg(feature = "wav")]
    pub fn from_reader<R: Read>(reader: R) -> SourceResult<Self> {
        Self::decode(hound::WavReader::new(reader)?)
    }

    #[cfg(feature = "wav")]
    fn decode<R: Read>(mut reader: hound::WavReader<R>) -> SourceResult<Self> {
        let spec = reader.spec();
        let samples = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            (hound::SampleFormat::Int, bits @ 1..=32) => {
                let raw = reader.samples::<i32>().collect::<Result<Vec<_>, _>>()?;
                int_to_f32(&raw, bits)
            }
            (format, bits) => {
                return Err(SourceError::Unsupported(format!("{format:?} with {bits} bits")));
            }
        };

        Self::new(samples, spec.sample_rate, spec.channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// reads a clip at another rate and channel layout
#[derive(Debug, Clone)]
pub struct Playhead {
    clip: Clip,
    format: StreamFormat,

    /// in clip frames
    position: f64,

    /// clip frames per device frame at speed 1
    step: f64,
    speed: f64,
    looping: bool,

    /// one interpolated clip frame
    frame: Vec<f32>,
}
impl Playhead {
    pub fn new(clip: Clip, format: StreamFormat) -> ConfigResult<Self> {
        format.validate()?;
        let step = clip.sample_rate as f64 / format.sample_rate as f64;
        let frame = vec![0.0; clip.channels as usize];
        Ok(Self {
            clip,
            format,
            position: 0.0,
            step,
            speed: 1.0,
            looping: false,
            frame,
        })
    }

    /// fills `out` with interleaved device frames, silence past the end
    ///
    /// returns false once the clip is exhausted, never while looping
    pub fn read(&mut self, out: &mut [f32]) -> bool {
        let channels = self.clip.channels as usize;
        let frames = self.clip.frames();
        let end = frames as f64;
        let step = self.step * self.speed;

        for out_frame in out.chunks_exact_mut(self.format.channels as usize) {
            if self.position >= end {
                if !self.looping {
                    out_frame.iter_mut().for_each(|s| *s = 0.0);
                    continue;
                }
                self.position %= end;
            }

            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let next = match index + 1 {
                next if next < frames => next,
                _ if self.looping => 0,
                _ => index,
            };

            let a = &self.clip.samples[index * channels..(index + 1) * channels];
            let b = &self.clip.samples[next * channels..(next + 1) * channels];
            for ((v, a), b) in self.frame.iter_mut().zip(a).zip(b) {
                *v = a + (b - a) * frac;
            }
            map_channels(&self.frame, channels, out_frame, self.format.channels as usize);

            self.position += step;
        }

        self.looping || self.position < end
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// tempo and pitch factor, 1.0 plays at the clip's own rate
    pub fn set_speed(&mut self, speed: f64) -> ConfigResult<()> {
        positive("speed", speed)?;
        self.speed = speed;
        Ok(())
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// seconds from the start of the clip, clamped to its length
    pub fn seek(&mut self, seconds: f64) {
        let position = seconds.max(0.0) * self.clip.sample_rate as f64;
        self.position = position.min(self.clip.frames() as f64);
    }

    /// seconds from the start of the clip
    pub fn position(&self) -> f64 {
        self.position / self.clip.sample_rate as f64
    }

    pub fn is_finished(&self) -> bool {
        !self.looping && self.position >= self.clip.frames() as f64
    }

    pub fn clip(&self) -> &Clip {
        &self.clip
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }
}
