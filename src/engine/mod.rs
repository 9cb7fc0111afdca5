//! Decoder engine contract
//!
//! The decoder engine is the chip-emulation component that turns a compiled
//! song blob into PCM. It is an external collaborator: this crate only
//! defines the operations the decoder worker needs from it. A fresh engine
//! is created per playback session through an [`EngineFactory`].

#[cfg(feature = "vgm-engine")]
pub mod vgm;

use crate::config::DeviceQuality;
use crate::Result;
use std::sync::Arc;

/// Immutable compiled song blob, cheap to clone.
///
/// One blob may hold several songs addressed by index.
#[derive(Clone, Debug)]
pub struct SongData {
    bytes: Arc<[u8]>,
    label: String,
}

impl SongData {
    /// Wrap raw song bytes.
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            label: String::new(),
        }
    }

    /// Attach a label (usually the file name) used in engine diagnostics.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The song bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The label, empty if none was given.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Size of the blob in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Fade progress reported by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadeState {
    /// No fade requested yet
    #[default]
    NotStarted,
    /// Fading out
    Fading,
    /// Fade finished; the engine produces silence only
    Complete,
}

impl FadeState {
    /// Map the numeric fade flag used by native engines (0, 1, 2).
    pub fn from_flag(flag: u32) -> Self {
        match flag {
            0 => FadeState::NotStarted,
            1 => FadeState::Fading,
            _ => FadeState::Complete,
        }
    }
}

/// Operations the decoder worker needs from a chip-emulation engine.
///
/// Implementations are driven by a single thread (the decoder worker) and
/// advance their internal state block by block.
pub trait DecoderEngine: Send {
    /// Parse and bind a song blob.
    ///
    /// Fails with [`crate::MsxPlayError::InvalidInput`] on malformed data.
    fn load(&mut self, song: &SongData) -> Result<()>;

    /// Release the bound song blob. Must tolerate being called when nothing
    /// is loaded.
    fn unload(&mut self);

    /// Restart playback at `song` using cpu mode `cpu` (0 = default).
    ///
    /// Fails with [`crate::MsxPlayError::InvalidInput`] for an out-of-range
    /// song index.
    fn reset(&mut self, song: u32, cpu: u32) -> Result<()>;

    /// Configure the RC output filter (resistor Ω, capacitor pF; 0,0 disables).
    fn set_rcf(&mut self, resistor: u32, capacitor: u32);

    /// Select high-quality rendering per chip.
    fn set_device_quality(&mut self, quality: DeviceQuality);

    /// Render `out.len()` samples.
    fn calc(&mut self, out: &mut [i16]) -> Result<()>;

    /// Advance `frames` samples without producing audio.
    fn calc_silent(&mut self, frames: usize) -> Result<()>;

    /// Begin fading out over `duration_ms`.
    fn fade_start(&mut self, duration_ms: u32);

    /// Current fade progress.
    fn fade_state(&self) -> FadeState;

    /// Whether the song stopped by itself.
    fn stop_flag(&self) -> bool;

    /// Number of times the song loop point has been replayed.
    fn loop_count(&self) -> u32;

    /// Number of debug markers passed so far.
    fn jump_count(&self) -> u32 {
        0
    }
}

/// Builds engines for decoder worker sessions.
pub trait EngineFactory: Send + 'static {
    /// One-time runtime bootstrap, run before the first engine is created.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Create a fresh engine rendering at `sample_rate`.
    fn create(&self, sample_rate: u32) -> Result<Box<dyn DecoderEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(u32) -> Result<Box<dyn DecoderEngine>> + Send + 'static,
{
    fn create(&self, sample_rate: u32) -> Result<Box<dyn DecoderEngine>> {
        self(sample_rate)
    }
}
