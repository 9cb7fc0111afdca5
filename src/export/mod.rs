//! Offline rendering
//!
//! [`EncodeStream`] drives a [`DecoderWorker`] without any audio output and
//! yields the song as a sequence of [`EncodeChunk`]s, one per decoded
//! block. It ends on the same conditions as real-time playback (stop flag,
//! completed fade, duration cap) plus an optional trailing-silence limit.

#[cfg(feature = "export-wav")]
mod wav;

#[cfg(feature = "export-wav")]
pub use wav::{export_to_wav, ExportSummary};

use crate::config::{DeviceQuality, PlaybackArgs, RcFilter};
use crate::engine::{EngineFactory, SongData};
use crate::worker::DecoderWorker;
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Offline render configuration.
///
/// Defaults match a typical batch conversion: 44.1 kHz mono, ten minute
/// cap, three second fade after the second loop, stop after three seconds
/// of silence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    /// Output sample rate
    pub sample_rate: u32,
    /// Output channels (1 = mono, 2 = duplicated stereo)
    pub channels: u16,
    /// Song index inside the blob
    pub song_index: u32,
    /// Duration cap in milliseconds
    pub play_time_ms: u32,
    /// Fade-out duration in milliseconds
    pub fade_ms: u32,
    /// Loop count that triggers the fade
    pub loop_count: u32,
    /// Linear gain applied to every sample
    pub gain: f32,
    /// Stop after this much continuous silence (0 disables)
    pub silent_limit_ms: u32,
    /// CPU speed override
    pub cpu: u32,
    /// RC output filter
    pub rcf: RcFilter,
    /// Per-chip quality
    pub quality: DeviceQuality,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            song_index: 0,
            play_time_ms: 600_000,
            fade_ms: 3000,
            loop_count: 2,
            gain: 1.0,
            silent_limit_ms: 3000,
            cpu: 0,
            rcf: RcFilter::default(),
            quality: DeviceQuality::PSG | DeviceQuality::OPLL | DeviceQuality::OPL,
        }
    }
}

impl ExportConfig {
    /// Default configuration with stereo output.
    pub fn stereo() -> Self {
        Self {
            channels: 2,
            ..Self::default()
        }
    }

    /// Set the output sample rate.
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Select the song.
    pub fn song(mut self, song_index: u32) -> Self {
        self.song_index = song_index;
        self
    }

    /// Set the duration cap.
    pub fn play_time(mut self, ms: u32) -> Self {
        self.play_time_ms = ms;
        self
    }

    /// Set the fade-out duration.
    pub fn fade(mut self, ms: u32) -> Self {
        self.fade_ms = ms;
        self
    }

    /// Set the loop count.
    pub fn loops(mut self, count: u32) -> Self {
        self.loop_count = count;
        self
    }

    /// Set the gain. Non-finite values become 1.0.
    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = if gain.is_finite() { gain } else { 1.0 };
        self
    }

    /// Set the trailing-silence limit.
    pub fn silent_limit(mut self, ms: u32) -> Self {
        self.silent_limit_ms = ms;
        self
    }

    /// Session arguments for the decoder worker.
    pub fn playback_args(&self) -> PlaybackArgs {
        PlaybackArgs {
            song_index: self.song_index,
            duration_ms: self.play_time_ms,
            fade_ms: self.fade_ms,
            loop_count: self.loop_count,
            cpu: self.cpu,
            rcf: self.rcf,
            quality: self.quality,
            gain: self.gain,
            ..PlaybackArgs::default()
        }
    }
}

/// One block of offline output.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeChunk {
    /// Audio time covered by this and all previous chunks
    pub elapsed_ms: u64,
    /// Mono samples, gain applied
    pub samples: Vec<i16>,
    /// Last chunk of the stream
    pub is_final: bool,
}

/// Iterator over the offline rendering of one song.
pub struct EncodeStream {
    worker: DecoderWorker,
    block: Vec<i16>,
    gain: f32,
    elapsed_frames: u64,
    silent_frames: u64,
    silent_limit_frames: u64,
    cancelled: Arc<AtomicBool>,
    done: bool,
}

impl EncodeStream {
    /// Load `song` into a fresh engine and prepare to render it.
    pub fn new(factory: impl EngineFactory, song: &SongData, config: &ExportConfig) -> Result<Self> {
        let mut worker = DecoderWorker::new(factory, config.sample_rate);
        let cancelled = Arc::new(AtomicBool::new(false));
        worker.set_cancel_flag(Some(Arc::clone(&cancelled)));
        worker.init()?;
        worker.start(&config.playback_args(), song)?;
        log::debug!(
            "encode stream ready: song {} cap {}ms",
            config.song_index,
            config.play_time_ms
        );
        Ok(Self {
            worker,
            block: Vec::with_capacity(config.sample_rate as usize),
            gain: config.gain,
            elapsed_frames: 0,
            silent_frames: 0,
            silent_limit_frames: config.sample_rate as u64 * config.silent_limit_ms as u64 / 1000,
            cancelled,
            done: false,
        })
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.worker.sample_rate()
    }

    /// Audio time rendered so far.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_frames * 1000 / self.sample_rate().max(1) as u64
    }

    /// Flag that stops the stream when set, usable from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Stop the stream; the next call to `next` returns `None`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Render everything that is left into one buffer.
    pub fn collect_samples(self) -> Vec<i16> {
        self.flat_map(|chunk| chunk.samples).collect()
    }

    fn finish(&mut self) {
        self.done = true;
        self.worker.dispose();
    }

    fn track_silence(&mut self, samples: &[i16]) -> bool {
        if self.silent_limit_frames == 0 {
            return false;
        }
        let trailing = samples.iter().rev().take_while(|&&s| s == 0).count() as u64;
        if trailing == samples.len() as u64 {
            self.silent_frames += trailing;
        } else {
            self.silent_frames = trailing;
        }
        self.silent_frames >= self.silent_limit_frames
    }
}

impl Iterator for EncodeStream {
    type Item = EncodeChunk;

    fn next(&mut self) -> Option<EncodeChunk> {
        if self.done {
            return None;
        }
        if self.cancelled.load(Ordering::Relaxed) {
            log::debug!("encode stream cancelled at {}ms", self.elapsed_ms());
            self.finish();
            return None;
        }

        if !self.worker.process_into(&mut self.block) {
            self.finish();
            return Some(EncodeChunk {
                elapsed_ms: self.elapsed_ms(),
                samples: Vec::new(),
                is_final: true,
            });
        }

        let gain = self.gain;
        let samples: Vec<i16> = self
            .block
            .iter()
            .map(|&s| (s as f32 * gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();
        self.elapsed_frames += samples.len() as u64;

        let is_final = self.track_silence(&samples);
        if is_final {
            log::debug!("silence limit reached at {}ms", self.elapsed_ms());
            self.finish();
        }
        Some(EncodeChunk {
            elapsed_ms: self.elapsed_ms(),
            samples,
            is_final,
        })
    }
}
