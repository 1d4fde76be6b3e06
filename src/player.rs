//! glue between the pipeline and the analysis
//!
//! `Player` is the output side: it reads a clip, analyses what it reads and plays either the
//! resynthesis or the clip itself. `Monitor` is the input side: it only analyses what the
//! device records. Both publish a `Snapshot` per device buffer for whoever draws.

use log::{debug, warn};

use crate::audio::{Capture, Render};
use crate::config::Config;
use crate::controls::{Controls, PlaybackMode};
use crate::error::{ConfigError, ConfigResult};
use crate::source::{Clip, Playhead};
use crate::spectrum::stream::Stream;
use crate::spectrum::analyzer::transpose_for_speed;
use crate::spectrum::{Analyzer, SnapshotCell};
use crate::synth::WaveSynth;

/// frames per analysis sub-block, 1 ms at 44.1 kHz
pub const DEFAULT_BLOCK_FRAMES: usize = 44;

fn controls_for(config: &Config) -> ConfigResult<Controls> {
    let controls = Controls::new();
    controls.set_pitch(config.synth.pitch)?;
    controls.set_auto_gain(config.analyzer.auto_gain);
    controls.set_normalize(config.analyzer.normalize);
    Ok(controls)
}

/// pulls gain mode and pending tunings out of `controls`
fn apply_analysis_controls(controls: &Controls, analyzer: &mut Analyzer) {
    analyzer.set_gain_mode(controls.auto_gain(), controls.normalize());
    if let Some((display, synthesis)) = controls.take_tuning() {
        if let Err(e) = analyzer.set_tuning(display, synthesis) {
            warn!("peak tuning rejected: {e}");
        }
    }
}

/// file playback with live analysis and resynthesis
pub struct Player {
    playhead: Playhead,
    analyzer: Analyzer,
    synth: WaveSynth,
    controls: Controls,
    snapshots: SnapshotCell,

    /// interleaved samples per sub-block
    block_len: usize,
}
impl Player {
    pub fn new(clip: Clip, config: &Config, block_frames: usize) -> ConfigResult<Self> {
        config.validate()?;
        if block_frames == 0 {
            return Err(ConfigError::Zero { name: "block_frames" });
        }

        let format = config.pipeline.format;
        if clip.sample_rate() != format.sample_rate {
            debug!("clip at {} Hz resampled to {} Hz", clip.sample_rate(), format.sample_rate);
        }

        Ok(Self {
            playhead: Playhead::new(clip, format)?,
            analyzer: Analyzer::new(config.analyzer.clone())?,
            synth: WaveSynth::new(config.synth.clone(), &config.analyzer)?,
            controls: controls_for(config)?,
            snapshots: SnapshotCell::new(),
            block_len: block_frames * format.channels as usize,
        })
    }

    /// shared knobs, clone before moving the player into a pipeline
    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    /// where snapshots are published, clone before moving the player into a pipeline
    pub fn snapshots(&self) -> &SnapshotCell {
        &self.snapshots
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn synth(&self) -> &WaveSynth {
        &self.synth
    }

    pub fn playhead(&self) -> &Playhead {
        &self.playhead
    }

    pub fn playhead_mut(&mut self) -> &mut Playhead {
        &mut self.playhead
    }

    fn apply_controls(&mut self) {
        apply_analysis_controls(&self.controls, &mut self.analyzer);
        self.synth.set_pitch(self.controls.pitch());

        let speed = self.controls.speed();
        if speed != self.playhead.speed() {
            if let Err(e) = self.playhead.set_speed(speed) {
                warn!("speed rejected: {e}");
                return;
            }
            // thresholds follow the content to where the speed moved it
            if let Err(e) = self.analyzer.set_transpose(transpose_for_speed(speed)) {
                warn!("transpose rejected: {e}");
            }
        }
    }
}

impl Render for Player {
    fn render(&mut self, out: &mut [f32]) -> bool {
        let mut playing = true;

        for block in out.chunks_mut(self.block_len) {
            self.apply_controls();
            playing &= self.playhead.read(block);
            self.analyzer.update(block);

            if self.controls.mode() == PlaybackMode::Resynthesis {
                self.synth.write_buffer(&self.analyzer, block);
            }
        }

        self.snapshots.publish(self.analyzer.snapshot());
        playing
    }
}

/// live analysis of a recording
pub struct Monitor {
    stream: Stream,
    controls: Controls,
    snapshots: SnapshotCell,
}
impl Monitor {
    pub fn new(config: &Config, block_frames: usize) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            stream: Stream::new(Analyzer::new(config.analyzer.clone())?, block_frames)?,
            controls: controls_for(config)?,
            snapshots: SnapshotCell::new(),
        })
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn snapshots(&self) -> &SnapshotCell {
        &self.snapshots
    }

    pub fn analyzer(&self) -> &Analyzer {
        self.stream.analyzer()
    }
}

impl Capture for Monitor {
    fn capture(&mut self, samples: &[f32]) {
        apply_analysis_controls(&self.controls, self.stream.analyzer_mut());
        self.stream.push_data(samples);
        if self.stream.update() > 0 {
            self.snapshots.publish(self.stream.snapshot());
        }
    }
}
