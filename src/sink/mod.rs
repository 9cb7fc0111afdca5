//! Audio output sinks
//!
//! A sink is the host audio output a [`Renderer`] is attached to. The
//! [`Player`](crate::Player) only talks to the [`AudioSink`] trait, so the
//! transport logic is the same for a real device ([`RodioSink`], behind the
//! `streaming` feature) and for [`ManualSink`], which lets the caller pull
//! audio by hand.

#[cfg(feature = "streaming")]
mod device;

#[cfg(feature = "streaming")]
pub use device::RodioSink;

use crate::render::Renderer;
use crate::{MsxPlayError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Host audio output.
pub trait AudioSink {
    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Whether the output is suspended by the host (for example an autoplay
    /// policy) and needs [`resume`](Self::resume) before audio can flow.
    fn is_suspended(&self) -> bool {
        false
    }

    /// Leave the suspended state.
    ///
    /// Fails with [`MsxPlayError::PlaybackBlocked`] if the host refuses.
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// Attach a renderer, replacing any previous one.
    fn connect(&mut self, renderer: Renderer) -> Result<()>;

    /// Detach and drop the current renderer. No-op without one.
    fn disconnect(&mut self);

    /// Hold the output; the renderer is kept but no longer called.
    fn pause(&mut self);

    /// Restart the output after [`pause`](Self::pause).
    fn play(&mut self);

    /// Release the output. Later `connect` calls fail.
    fn close(&mut self);
}

#[derive(Default)]
struct ManualState {
    renderer: Option<Renderer>,
    paused: bool,
    suspended: bool,
    resume_blocked: bool,
    closed: bool,
}

/// Sink driven by explicit [`pull`](ManualSink::pull) calls.
///
/// Clones share the same output, so one clone can be handed to a player
/// while another pulls audio (from a test, an offline mixer or a host
/// callback the caller owns).
#[derive(Clone)]
pub struct ManualSink {
    sample_rate: u32,
    state: Arc<Mutex<ManualState>>,
}

impl ManualSink {
    /// Create a sink running at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// Render the next `out.len()` samples.
    ///
    /// Fills silence and returns `false` when no renderer is attached or the
    /// sink is paused or suspended.
    pub fn pull(&self, out: &mut [f32]) -> bool {
        let mut state = self.state.lock();
        let active = !state.paused && !state.suspended;
        match state.renderer.as_mut() {
            Some(renderer) if active => {
                renderer.render(out);
                true
            }
            _ => {
                out.fill(0.0);
                false
            }
        }
    }

    /// Whether a renderer is attached.
    pub fn is_connected(&self) -> bool {
        self.state.lock().renderer.is_some()
    }

    /// Whether the output is paused.
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Whether [`AudioSink::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Put the sink into (or out of) the host-suspended state.
    pub fn set_suspended(&self, suspended: bool) {
        self.state.lock().suspended = suspended;
    }

    /// Make [`AudioSink::resume`] fail while `blocked` is set.
    pub fn block_resume(&self, blocked: bool) {
        self.state.lock().resume_blocked = blocked;
    }
}

impl AudioSink for ManualSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    fn resume(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.resume_blocked {
            return Err(MsxPlayError::PlaybackBlocked(
                "host refused to resume the output".into(),
            ));
        }
        state.suspended = false;
        Ok(())
    }

    fn connect(&mut self, renderer: Renderer) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MsxPlayError::AudioDeviceError("sink is closed".into()));
        }
        state.renderer = Some(renderer);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.state.lock().renderer = None;
    }

    fn pause(&mut self) {
        self.state.lock().paused = true;
    }

    fn play(&mut self) {
        self.state.lock().paused = false;
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.renderer = None;
        state.closed = true;
    }
}
