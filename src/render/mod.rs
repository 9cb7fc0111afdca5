//! Real-time rendering side of playback
//!
//! The [`Renderer`] lives on the audio thread. It pulls decoded blocks from
//! the worker, stores them in a [`WaveBuffer`] and copies them to the output,
//! padding with silence on underrun. Everything the control thread needs to
//! observe (transport state, cursors, gains) is published through a shared
//! [`RenderStatus`] made of atomics.

mod renderer;
mod wave_buffer;

pub use renderer::{Renderer, DEFAULT_LOOKAHEAD_MS};
pub use wave_buffer::{WaveBuffer, MAX_CAPACITY};

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Transport state of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransportState {
    /// Nothing is playing
    #[default]
    Standby = 0,
    /// Audio is being rendered
    Playing = 1,
    /// Output is held; buffered audio is kept
    Paused = 2,
    /// The stream ended and every decoded frame was played
    Finished = 3,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            3 => TransportState::Finished,
            _ => TransportState::Standby,
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportState::Standby => "standby",
            TransportState::Playing => "playing",
            TransportState::Paused => "paused",
            TransportState::Finished => "finished",
        };
        f.write_str(name)
    }
}

const NO_SEEK: u64 = u64::MAX;

/// Playback status shared between the control thread and the renderer.
///
/// Readers only touch atomics. Writers are serialized by a lock: the control
/// thread takes it to bind or reset a session, the renderer only ever
/// try-locks it (see [`lock_session`](Self::lock_session)), so a render that
/// races with a reset can never publish after it.
#[derive(Debug)]
pub struct RenderStatus {
    sample_rate: u32,
    state: AtomicU8,
    read_pos: AtomicU64,
    write_pos: AtomicU64,
    total_frames: AtomicU64,
    /// f32 bits
    render_speed: AtomicU32,
    output_gain: AtomicU32,
    master_volume: AtomicU32,
    seek_request: AtomicU64,
    /// Session allowed to publish; 0 when none
    session: AtomicU64,
    writer: Mutex<()>,
}

impl RenderStatus {
    /// New status in standby with unity gains.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: AtomicU8::new(TransportState::Standby as u8),
            read_pos: AtomicU64::new(0),
            write_pos: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            render_speed: AtomicU32::new(0f32.to_bits()),
            output_gain: AtomicU32::new(1f32.to_bits()),
            master_volume: AtomicU32::new(1f32.to_bits()),
            seek_request: AtomicU64::new(NO_SEEK),
            session: AtomicU64::new(0),
            writer: Mutex::new(()),
        }
    }

    /// Output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Session currently bound to this status, 0 if none.
    pub fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// Bind `session` and publish a fresh stream of `total_frames`.
    pub(crate) fn begin_session(&self, session: u64, total_frames: u64) {
        let _writer = self.writer.lock();
        self.session.store(session, Ordering::Release);
        self.publish_cursors(0, 0);
        self.set_total_frames(total_frames);
        self.set_render_speed(0.0);
    }

    /// Exclusive publishing rights for `session`.
    ///
    /// Never blocks: returns `None` if another writer holds the lock or if
    /// `session` is no longer bound. Everything the renderer writes goes
    /// through the returned guard.
    pub(crate) fn lock_session(&self, session: u64) -> Option<MutexGuard<'_, ()>> {
        let guard = self.writer.try_lock()?;
        (self.session() == session && session != 0).then_some(guard)
    }

    /// Current transport state.
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to` only if the state is still `from`.
    pub(crate) fn transition(&self, from: TransportState, to: TransportState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Frames played so far.
    pub fn read_frames(&self) -> u64 {
        self.read_pos.load(Ordering::Acquire)
    }

    /// Frames decoded so far.
    pub fn write_frames(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Length of the stream in frames: the duration cap while decoding,
    /// the exact decoded length once the stream ended.
    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    pub(crate) fn publish_cursors(&self, read: u64, write: u64) {
        self.read_pos.store(read, Ordering::Release);
        self.write_pos.store(write, Ordering::Release);
    }

    pub(crate) fn set_total_frames(&self, frames: u64) {
        self.total_frames.store(frames, Ordering::Release);
    }

    /// Played time in milliseconds.
    pub fn played_time(&self) -> u64 {
        self.frames_to_ms(self.read_frames())
    }

    /// Decoded time in milliseconds.
    pub fn buffered_time(&self) -> u64 {
        self.frames_to_ms(self.write_frames())
    }

    /// Total time in milliseconds.
    pub fn total_time(&self) -> u64 {
        self.frames_to_ms(self.total_frames())
    }

    fn frames_to_ms(&self, frames: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        frames * 1000 / self.sample_rate as u64
    }

    /// Ratio of decoded audio time to wall-clock decode time; above 1.0 the
    /// decoder keeps up with real time. 0.0 until the first block arrives.
    pub fn render_speed(&self) -> f32 {
        f32::from_bits(self.render_speed.load(Ordering::Relaxed))
    }

    pub(crate) fn set_render_speed(&self, speed: f32) {
        self.render_speed.store(speed.to_bits(), Ordering::Relaxed);
    }

    /// Per-song output gain.
    pub fn output_gain(&self) -> f32 {
        f32::from_bits(self.output_gain.load(Ordering::Relaxed))
    }

    /// Set the per-song output gain. Non-finite values become 1.0.
    pub fn set_output_gain(&self, gain: f32) {
        let gain = if gain.is_finite() { gain } else { 1.0 };
        self.output_gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Player-wide master volume.
    pub fn master_volume(&self) -> f32 {
        f32::from_bits(self.master_volume.load(Ordering::Relaxed))
    }

    /// Set the master volume. Non-finite values become 1.0.
    pub fn set_master_volume(&self, volume: f32) {
        let volume = if volume.is_finite() { volume } else { 1.0 };
        self.master_volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// Combined linear gain applied to every output sample.
    pub fn effective_gain(&self) -> f32 {
        self.output_gain() * self.master_volume()
    }

    pub(crate) fn request_seek(&self, frame: u64) {
        self.seek_request.store(frame, Ordering::Release);
    }

    pub(crate) fn take_seek(&self) -> Option<u64> {
        match self.seek_request.swap(NO_SEEK, Ordering::AcqRel) {
            NO_SEEK => None,
            frame => Some(frame),
        }
    }

    /// Back to standby with cursors and totals cleared. Gains are kept.
    pub(crate) fn reset(&self) {
        let _writer = self.writer.lock();
        self.session.store(0, Ordering::Release);
        self.set_state(TransportState::Standby);
        self.publish_cursors(0, 0);
        self.set_total_frames(0);
        self.set_render_speed(0.0);
        self.seek_request.store(NO_SEEK, Ordering::Release);
    }
}
