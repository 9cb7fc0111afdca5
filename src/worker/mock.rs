//! Scripted engine used by the unit tests.

use crate::config::DeviceQuality;
use crate::engine::{DecoderEngine, EngineFactory, FadeState, SongData};
use crate::{MsxPlayError, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub(crate) struct MockScript {
    pub sample: i16,
    /// Loop counter increments every `loop_frames` rendered frames
    pub loop_frames: Option<u64>,
    /// Stop flag is raised once this many frames were rendered
    pub end_frames: Option<u64>,
    /// Jump counter becomes non-zero at this frame
    pub marker_frame: Option<u64>,
    /// `calc` fails when a block crosses this frame
    pub fail_at_frame: Option<u64>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            sample: 1000,
            loop_frames: None,
            end_frames: None,
            marker_frame: None,
            fail_at_frame: None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockStats {
    created: AtomicU32,
    unloads: AtomicU32,
    fade_starts: AtomicU32,
    last_fade_ms: AtomicU32,
    silent_frames: AtomicU64,
}

impl MockStats {
    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
    pub fn unloads(&self) -> u32 {
        self.unloads.load(Ordering::SeqCst)
    }
    pub fn fade_starts(&self) -> u32 {
        self.fade_starts.load(Ordering::SeqCst)
    }
    pub fn last_fade_ms(&self) -> u32 {
        self.last_fade_ms.load(Ordering::SeqCst)
    }
    pub fn silent_frames(&self) -> u64 {
        self.silent_frames.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub(crate) struct MockEngineFactory {
    script: MockScript,
    stats: Arc<MockStats>,
}

impl MockEngineFactory {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self, sample_rate: u32) -> Result<Box<dyn DecoderEngine>> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine {
            script: self.script,
            stats: Arc::clone(&self.stats),
            sample_rate,
            loaded: false,
            rendered: 0,
            silent: 0,
            fade_frames: None,
            fade_total: 0,
        }))
    }
}

struct MockEngine {
    script: MockScript,
    stats: Arc<MockStats>,
    sample_rate: u32,
    loaded: bool,
    rendered: u64,
    silent: u64,
    /// Frames rendered since the fade started
    fade_frames: Option<u64>,
    fade_total: u64,
}

impl DecoderEngine for MockEngine {
    fn load(&mut self, song: &SongData) -> Result<()> {
        if song.bytes().first() == Some(&0xFF) {
            return Err(MsxPlayError::InvalidInput("mock rejects 0xFF".into()));
        }
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        if self.loaded {
            self.loaded = false;
            self.stats.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reset(&mut self, song: u32, _cpu: u32) -> Result<()> {
        if song > 7 {
            return Err(MsxPlayError::InvalidInput("no such song".into()));
        }
        self.rendered = 0;
        Ok(())
    }

    fn set_rcf(&mut self, _resistor: u32, _capacitor: u32) {}

    fn set_device_quality(&mut self, _quality: DeviceQuality) {}

    fn calc(&mut self, out: &mut [i16]) -> Result<()> {
        let end = self.rendered + out.len() as u64;
        if let Some(fail) = self.script.fail_at_frame {
            if self.rendered <= fail && fail < end {
                return Err(MsxPlayError::DecodeFailure("scripted failure".into()));
            }
        }
        let value = if self.fade_state() == FadeState::Complete {
            0
        } else {
            self.script.sample
        };
        out.fill(value);
        self.rendered = end;
        if let Some(frames) = self.fade_frames.as_mut() {
            *frames += out.len() as u64;
        }
        Ok(())
    }

    fn calc_silent(&mut self, frames: usize) -> Result<()> {
        self.silent += frames as u64;
        self.stats
            .silent_frames
            .fetch_add(frames as u64, Ordering::SeqCst);
        Ok(())
    }

    fn fade_start(&mut self, duration_ms: u32) {
        self.stats.fade_starts.fetch_add(1, Ordering::SeqCst);
        self.stats.last_fade_ms.store(duration_ms, Ordering::SeqCst);
        self.fade_frames = Some(0);
        self.fade_total = self.sample_rate as u64 * duration_ms as u64 / 1000;
    }

    fn fade_state(&self) -> FadeState {
        match self.fade_frames {
            None => FadeState::NotStarted,
            Some(frames) if frames >= self.fade_total => FadeState::Complete,
            Some(_) => FadeState::Fading,
        }
    }

    fn stop_flag(&self) -> bool {
        self.script
            .end_frames
            .is_some_and(|end| self.rendered >= end)
    }

    fn loop_count(&self) -> u32 {
        match self.script.loop_frames {
            Some(frames) if frames > 0 => (self.rendered / frames) as u32,
            _ => 0,
        }
    }

    fn jump_count(&self) -> u32 {
        match self.script.marker_frame {
            Some(marker) if self.silent + self.rendered >= marker => 1,
            _ => 0,
        }
    }
}
