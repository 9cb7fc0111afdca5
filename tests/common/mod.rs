//! Shared helpers for integration tests.

#![allow(dead_code)]

use msxplay::{
    DecoderEngine, DeviceQuality, EngineFactory, FadeState, ManualSink, MsxPlayError, Result,
    SongData,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Behaviour of a [`ScriptedEngine`].
#[derive(Debug, Clone, Copy)]
pub struct Script {
    /// Constant output value
    pub level: i16,
    /// Song length in frames; loops back to 0 when `looping`, stops otherwise
    pub length_frames: Option<u64>,
    pub looping: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            level: 8000,
            length_frames: None,
            looping: false,
        }
    }
}

/// Counters observed from outside the worker thread.
#[derive(Debug, Default)]
pub struct Counters {
    pub created: AtomicU32,
    pub loads: AtomicU32,
    pub unloads: AtomicU32,
    pub fades: AtomicU32,
    pub fade_ms: AtomicU32,
}

impl Counters {
    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct ScriptedFactory {
    pub script: Script,
    pub counters: Arc<Counters>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            counters: Arc::new(Counters::default()),
        }
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, sample_rate: u32) -> Result<Box<dyn DecoderEngine>> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            script: self.script,
            counters: Arc::clone(&self.counters),
            sample_rate: sample_rate as u64,
            loaded: false,
            position: 0,
            loops: 0,
            stopped: false,
            fade: None,
        }))
    }
}

/// Engine producing a constant level with a linear fade.
pub struct ScriptedEngine {
    script: Script,
    counters: Arc<Counters>,
    sample_rate: u64,
    loaded: bool,
    position: u64,
    loops: u32,
    stopped: bool,
    /// (frames faded so far, fade length in frames)
    fade: Option<(u64, u64)>,
}

impl ScriptedEngine {
    fn gain(&self) -> f32 {
        match self.fade {
            None => 1.0,
            Some((_, 0)) => 0.0,
            Some((done, total)) => 1.0 - (done.min(total) as f32 / total as f32),
        }
    }
}

impl DecoderEngine for ScriptedEngine {
    fn load(&mut self, song: &SongData) -> Result<()> {
        if song.bytes().starts_with(b"BAD") {
            return Err(MsxPlayError::InvalidInput("unrecognized song".into()));
        }
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        if self.loaded {
            self.loaded = false;
            self.counters.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reset(&mut self, song: u32, _cpu: u32) -> Result<()> {
        if song != 0 {
            return Err(MsxPlayError::InvalidInput(format!("song {song} out of range")));
        }
        Ok(())
    }

    fn set_rcf(&mut self, _resistor: u32, _capacitor: u32) {}

    fn set_device_quality(&mut self, _quality: DeviceQuality) {}

    fn calc(&mut self, out: &mut [i16]) -> Result<()> {
        for sample in out.iter_mut() {
            if self.stopped {
                *sample = 0;
                continue;
            }
            *sample = (self.script.level as f32 * self.gain()) as i16;
            if let Some((done, _)) = self.fade.as_mut() {
                *done += 1;
            }
            self.position += 1;
            if let Some(length) = self.script.length_frames {
                if self.position >= length {
                    if self.script.looping {
                        self.position = 0;
                        self.loops += 1;
                    } else {
                        self.stopped = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn calc_silent(&mut self, frames: usize) -> Result<()> {
        self.position += frames as u64;
        Ok(())
    }

    fn fade_start(&mut self, duration_ms: u32) {
        self.counters.fades.fetch_add(1, Ordering::SeqCst);
        self.counters.fade_ms.store(duration_ms, Ordering::SeqCst);
        self.fade = Some((0, self.sample_rate * duration_ms as u64 / 1000));
    }

    fn fade_state(&self) -> FadeState {
        match self.fade {
            None => FadeState::NotStarted,
            Some((done, total)) if done >= total => FadeState::Complete,
            Some(_) => FadeState::Fading,
        }
    }

    fn stop_flag(&self) -> bool {
        self.stopped
    }

    fn loop_count(&self) -> u32 {
        self.loops
    }
}

pub fn song() -> SongData {
    SongData::new(b"SONG".to_vec()).with_label("test.kss")
}

/// Pull 10 ms chunks from `sink` until `done` holds.
pub fn pull_until(sink: &ManualSink, timeout: Duration, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    let mut out = vec![0.0f32; (sink_rate(sink) / 100).max(1) as usize];
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for player");
        sink.pull(&mut out);
        std::thread::sleep(Duration::from_micros(200));
    }
}

fn sink_rate(sink: &ManualSink) -> u32 {
    use msxplay::AudioSink;
    sink.sample_rate()
}
