//! Synchronous decoder worker core.

use crate::config::PlaybackArgs;
use crate::engine::{DecoderEngine, EngineFactory, FadeState, SongData};
use crate::{MsxPlayError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns one engine and one bound song for the duration of a session.
///
/// All engine state is private to the worker; callers only see the
/// start / process / abort / dispose contract.
pub struct DecoderWorker {
    factory: Box<dyn EngineFactory>,
    sample_rate: u32,
    initialized: bool,
    engine: Option<Box<dyn DecoderEngine>>,
    song_loaded: bool,
    args: PlaybackArgs,
    /// Frames handed out since `start`
    decode_frames: u64,
    skip_pending: bool,
    fade_requested: bool,
    ended: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl DecoderWorker {
    /// Create a worker that renders at `sample_rate` with engines from `factory`.
    pub fn new(factory: impl EngineFactory, sample_rate: u32) -> Self {
        Self {
            factory: Box::new(factory),
            sample_rate,
            initialized: false,
            engine: None,
            song_loaded: false,
            args: PlaybackArgs::default(),
            decode_frames: 0,
            skip_pending: false,
            fade_requested: false,
            ended: true,
            cancel: None,
        }
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// One-time engine runtime bootstrap. Calling it again is a no-op.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.factory.initialize()?;
        self.initialized = true;
        log::debug!("decoder engine runtime initialized");
        Ok(())
    }

    /// Flag checked during long-running skips; setting it abandons the skip.
    pub fn set_cancel_flag(&mut self, cancel: Option<Arc<AtomicBool>>) {
        self.cancel = cancel;
    }

    /// Begin a new session.
    ///
    /// Any previous engine is torn down first. On error the worker is left
    /// without a session and [`process`](Self::process) returns `None`.
    pub fn start(&mut self, args: &PlaybackArgs, song: &SongData) -> Result<()> {
        if !self.initialized {
            return Err(MsxPlayError::WorkerError(
                "init() must complete before start()".into(),
            ));
        }
        self.dispose();

        if song.is_empty() {
            return Err(MsxPlayError::InvalidInput("song data is empty".into()));
        }

        let mut engine = self.factory.create(self.sample_rate)?;
        engine.load(song)?;
        engine.set_device_quality(args.quality);
        if let Err(e) = engine.reset(args.song_index, args.cpu) {
            engine.unload();
            return Err(e);
        }
        engine.set_rcf(args.rcf.resistor, args.rcf.capacitor);

        self.engine = Some(engine);
        self.song_loaded = true;
        self.args = args.clone();
        self.decode_frames = 0;
        self.skip_pending = args.debug;
        self.fade_requested = false;
        self.ended = false;
        log::debug!(
            "decoder session started: song={} duration={}ms fade={}ms loop={}",
            args.song_index,
            args.duration_ms,
            args.fade_ms,
            args.loop_count
        );
        Ok(())
    }

    /// Decode the next block, or `None` once the session has ended.
    pub fn process(&mut self) -> Option<Vec<i16>> {
        let mut block = Vec::new();
        self.process_into(&mut block).then_some(block)
    }

    /// Decode the next block into `block`, reusing its allocation.
    ///
    /// Returns `false` at end of stream; every later call returns `false`
    /// too. Engine errors end the session and are logged, never propagated.
    pub fn process_into(&mut self, block: &mut Vec<i16>) -> bool {
        if self.ended {
            return false;
        }
        let produced = match self.decode_step(block) {
            Ok(produced) => produced,
            Err(e) => {
                log::error!("decode failure, ending session: {e}");
                false
            }
        };
        if !produced {
            self.ended = true;
            block.clear();
        }
        produced
    }

    fn decode_step(&mut self, block: &mut Vec<i16>) -> Result<bool> {
        if !self.song_loaded {
            return Ok(false);
        }
        if self.skip_pending {
            self.skip_pending = false;
            self.skip_to_debug_marker()?;
        }

        let elapsed_ms = self.elapsed_ms();
        let duration_ms = self.args.duration_ms as f64;
        let fade_ms = self.args.fade_ms;
        let loop_limit = self.args.loop_count;
        let sample_rate = self.sample_rate as usize;

        let Some(engine) = self.engine.as_mut() else {
            return Ok(false);
        };
        if engine.fade_state() == FadeState::Complete || engine.stop_flag() {
            return Ok(false);
        }

        let loop_reached = engine.loop_count() >= loop_limit;
        let near_cap = duration_ms - fade_ms as f64 <= elapsed_ms;
        if (loop_reached || near_cap)
            && !self.fade_requested
            && engine.fade_state() == FadeState::NotStarted
        {
            engine.fade_start(fade_ms);
            self.fade_requested = true;
            log::debug!(
                "fade started at {elapsed_ms:.0}ms (loop_reached={loop_reached}, near_cap={near_cap})"
            );
        }

        // nothing is decoded past the cap; the last block may be short
        let cap_frames = self.args.duration_ms as u64 * sample_rate as u64 / 1000;
        if self.decode_frames >= cap_frames {
            return Ok(false);
        }
        let frames = (cap_frames - self.decode_frames).min(sample_rate as u64) as usize;

        block.clear();
        block.resize(frames, 0);
        engine.calc(block)?;
        self.decode_frames += frames as u64;
        Ok(true)
    }

    /// Silently run the engine until it reports a debug marker or the
    /// duration cap is reached.
    fn skip_to_debug_marker(&mut self) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        let interval = (self.sample_rate / 60).max(1) as u64;
        let max_tick = self.sample_rate as u64 * self.args.duration_ms as u64 / 1000;
        let mut tick = 0u64;
        while tick <= max_tick {
            if self
                .cancel
                .as_ref()
                .is_some_and(|c| c.load(Ordering::Relaxed))
            {
                log::debug!("debug-marker skip cancelled");
                break;
            }
            engine.calc_silent(interval as usize)?;
            if engine.jump_count() != 0 {
                log::debug!("debug marker found after {tick} frames");
                return Ok(());
            }
            tick += interval;
        }
        log::debug!("no debug marker before the duration cap");
        Ok(())
    }

    /// Elapsed decode time of the current session in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.decode_frames as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Release the song handle. Safe to call in any state, any number of times.
    pub fn abort(&mut self) {
        if self.song_loaded {
            if let Some(engine) = self.engine.as_mut() {
                engine.unload();
            }
            self.song_loaded = false;
            log::debug!("decoder session aborted");
        }
        self.ended = true;
    }

    /// Release the engine and the song handle.
    pub fn dispose(&mut self) {
        self.abort();
        if self.engine.take().is_some() {
            log::debug!("decoder engine disposed");
        }
    }
}

impl Drop for DecoderWorker {
    fn drop(&mut self) {
        self.dispose();
    }
}
