//! Player transport
//!
//! [`Player`] ties together the decoder worker thread, the renderer and an
//! [`AudioSink`]. It exposes the transport (play, pause, resume, seek, stop,
//! release) and the read-only status queries used by a UI.
//!
//! ```text
//!  control thread            decoder thread             audio thread
//!  ──────────────            ──────────────             ────────────
//!  Player::play ──Start────▶ DecoderWorker::start
//!                             ◀───Pull──────────────── Renderer::render
//!                             DecoderWorker::process
//!                             ────Block──────────────▶ WaveBuffer ─▶ sink
//!  Player::played_time ◀──────────── RenderStatus ◀──────────┘
//! ```

use crate::config::{PlaybackArgs, PlaybackOptions};
use crate::engine::{EngineFactory, SongData};
use crate::render::{RenderStatus, Renderer, TransportState};
use crate::sink::AudioSink;
use crate::worker::WorkerHandle;
use crate::{MsxPlayError, Result};
use std::sync::Arc;

/// Frames a session capped at `duration_ms` can decode.
fn cap_frames(sample_rate: u32, duration_ms: u32) -> u64 {
    sample_rate as u64 * duration_ms as u64 / 1000
}

/// Streaming player for one output.
pub struct Player<S: AudioSink> {
    sink: S,
    worker: WorkerHandle,
    status: Arc<RenderStatus>,
    song: Option<(SongData, PlaybackArgs)>,
    released: bool,
}

impl<S: AudioSink> Player<S> {
    /// Create a player on `sink`, spawning a decoder worker that builds its
    /// engines with `factory`.
    pub fn new(sink: S, factory: impl EngineFactory) -> Result<Self> {
        let sample_rate = sink.sample_rate();
        if sample_rate == 0 {
            return Err(MsxPlayError::ConfigError(
                "sink sample rate must be greater than 0".into(),
            ));
        }
        let worker = WorkerHandle::spawn(factory, sample_rate)?;
        Ok(Self {
            sink,
            worker,
            status: Arc::new(RenderStatus::new(sample_rate)),
            song: None,
            released: false,
        })
    }

    /// Bind the song to play next. Takes effect on the next [`play`](Self::play).
    ///
    /// A gain given in `options` replaces the output gain right away.
    pub fn set_data(&mut self, song: SongData, song_index: u32, options: &PlaybackOptions) {
        let args = PlaybackArgs::resolve(song_index, options);
        if options.gain.is_some() {
            self.status.set_output_gain(args.gain);
        }
        let song = match &options.label {
            Some(label) => song.with_label(label.as_str()),
            None => song,
        };
        log::debug!(
            "song data set: {} bytes, song {song_index}, cap {}ms",
            song.len(),
            args.duration_ms
        );
        self.song = Some((song, args));
    }

    /// Start a new session from the bound song, stopping any current one.
    ///
    /// # Errors
    ///
    /// * [`MsxPlayError::ConfigError`] if no song was set
    /// * [`MsxPlayError::PlaybackBlocked`] if the sink refuses to resume
    /// * [`MsxPlayError::InvalidInput`] if the engine rejects the song
    ///
    /// The player is left in standby on error.
    pub fn play(&mut self) -> Result<()> {
        self.ensure_live()?;
        let Some((song, args)) = self.song.clone() else {
            return Err(MsxPlayError::ConfigError(
                "set_data must be called before play".into(),
            ));
        };
        if self.sink.is_suspended() {
            self.sink.resume()?;
        }

        self.stop();
        let link = self.worker.start(&args, &song)?;
        let cap = cap_frames(self.status.sample_rate(), args.duration_ms);
        let renderer = match Renderer::new(Arc::clone(&self.status), link, cap) {
            Ok(renderer) => renderer,
            Err(e) => {
                self.worker.abort();
                self.status.reset();
                return Err(e);
            }
        };

        self.status.set_state(TransportState::Playing);
        if let Err(e) = self.sink.connect(renderer) {
            self.worker.abort();
            self.status.reset();
            return Err(e);
        }
        self.sink.play();
        log::info!(
            "playing song {} (cap {}ms, fade {}ms, loop {})",
            args.song_index,
            args.duration_ms,
            args.fade_ms,
            args.loop_count
        );
        Ok(())
    }

    /// Hold the output. Only has an effect while playing.
    pub fn pause(&mut self) {
        if self
            .status
            .transition(TransportState::Playing, TransportState::Paused)
        {
            self.sink.pause();
            self.worker.pause();
            log::debug!("paused at {}ms", self.status.played_time());
        }
    }

    /// Continue after [`pause`](Self::pause). Only has an effect while paused.
    ///
    /// Fails with [`MsxPlayError::PlaybackBlocked`] if the sink is suspended
    /// and refuses to resume; the player stays paused.
    pub fn resume(&mut self) -> Result<()> {
        if self.status.state() != TransportState::Paused {
            return Ok(());
        }
        if self.sink.is_suspended() {
            self.sink.resume()?;
        }
        if self
            .status
            .transition(TransportState::Paused, TransportState::Playing)
        {
            self.worker.resume();
            self.sink.play();
            log::debug!("resumed at {}ms", self.status.played_time());
        }
        Ok(())
    }

    /// Move the play position to `position_ms`.
    ///
    /// Only positions that are already decoded are reachable; anything else
    /// is ignored and `false` is returned.
    pub fn seek_to(&mut self, position_ms: f64) -> bool {
        if self.status.state() == TransportState::Standby || !position_ms.is_finite() {
            return false;
        }
        let frame =
            (position_ms.max(0.0) * self.status.sample_rate() as f64 / 1000.0).round() as u64;
        if frame > self.status.write_frames() {
            log::debug!("seek to {position_ms}ms ignored: not decoded yet");
            return false;
        }
        self.status.request_seek(frame);
        true
    }

    /// Stop playback and drop the session. Gains and the bound song are kept.
    pub fn stop(&mut self) {
        self.sink.disconnect();
        self.worker.abort();
        if self.status.state() != TransportState::Standby {
            log::debug!("stopped at {}ms", self.status.played_time());
        }
        self.status.reset();
    }

    /// Release the worker, the sink and the song. Idempotent; the player
    /// cannot be used for playback afterwards.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.stop();
        self.sink.close();
        self.worker.shutdown();
        self.song = None;
        self.released = true;
        log::debug!("player released");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            return Err(MsxPlayError::WorkerError("player has been released".into()));
        }
        Ok(())
    }

    /// Current transport state.
    pub fn state(&self) -> TransportState {
        self.status.state()
    }

    /// Whether audio is being rendered.
    pub fn is_playing(&self) -> bool {
        self.state() == TransportState::Playing
    }

    /// Whether the transport is paused.
    pub fn is_paused(&self) -> bool {
        self.state() == TransportState::Paused
    }

    /// Whether [`release`](Self::release) was called.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Played time in milliseconds.
    pub fn played_time(&self) -> u64 {
        self.status.played_time()
    }

    /// Decoded time in milliseconds.
    pub fn buffered_time(&self) -> u64 {
        self.status.buffered_time()
    }

    /// Total time in milliseconds: the duration cap while decoding, the
    /// exact length once the stream ended.
    pub fn total_time(&self) -> u64 {
        self.status.total_time()
    }

    /// Decode speed relative to real time.
    pub fn render_speed(&self) -> f32 {
        self.status.render_speed()
    }

    /// Per-song output gain.
    pub fn output_gain(&self) -> f32 {
        self.status.output_gain()
    }

    /// Set the per-song output gain. Non-finite values become 1.0.
    pub fn set_output_gain(&mut self, gain: f32) {
        self.status.set_output_gain(gain);
    }

    /// Player-wide master volume.
    pub fn master_volume(&self) -> f32 {
        self.status.master_volume()
    }

    /// Set the master volume. Non-finite values become 1.0.
    pub fn set_master_volume(&mut self, volume: f32) {
        self.status.set_master_volume(volume);
    }

    /// Shared status, for observers on other threads.
    pub fn status(&self) -> Arc<RenderStatus> {
        Arc::clone(&self.status)
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.status.sample_rate()
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: AudioSink> Drop for Player<S> {
    fn drop(&mut self) {
        self.release();
    }
}
