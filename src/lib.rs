//! Streaming playback engine for compiled MSX chiptune songs
//!
//! A song blob is decoded block-by-block by a [`DecoderEngine`] running on a
//! dedicated worker thread. Decoded PCM travels to a [`Renderer`] that lives on
//! the real-time audio callback, where it is buffered in a circular
//! [`WaveBuffer`] and copied into the device output without ever blocking.
//! A [`Player`] ties both sides together for a single "now playing" session.
//!
//! # Features
//! - Pull-based decoding on an isolated worker thread, one block in flight
//! - Lock-free hand-off between worker and audio callback
//! - Loop-count and duration-cap driven fading, debug-marker skip
//! - Pause, resume and seeking inside the already decoded region
//! - Underrun-safe rendering (silence instead of blocking)
//! - Offline rendering as a cancellable stream, WAV export
//!
//! # Crate feature flags
//! - `vgm-engine` (default): built-in reference engine for VGM PSG logs (`engine::vgm`)
//! - `export-wav` (default): WAV file export (`export::export_to_wav`)
//! - `streaming` (opt-in): real audio output through `rodio` (`sink::RodioSink`)
//!
//! # Quick start
//! ```no_run
//! # #[cfg(feature = "vgm-engine")]
//! # {
//! use msxplay::{ManualSink, Player, PlaybackOptions, SongData, VgmEngineFactory};
//!
//! let data = std::fs::read("song.vgm").unwrap();
//! let sink = ManualSink::new(44_100);
//! let mut player = Player::new(sink.clone(), VgmEngineFactory).unwrap();
//! player.set_data(SongData::new(data), 0, &PlaybackOptions::default());
//! player.play().unwrap();
//!
//! let mut out = vec![0.0f32; 512];
//! sink.pull(&mut out); // one hardware callback worth of audio
//! println!("{} ms played", player.played_time());
//! # }
//! ```

#![warn(missing_docs)]

pub mod config; // Playback options and effective session arguments
pub mod engine; // Decoder engine contract (+ reference engine)
pub mod export; // Offline rendering
pub mod player; // Transport controller
pub mod render; // Wave buffer and real-time renderer
pub mod sink; // Audio destinations
pub mod worker; // Decoder worker

/// Error types for playback operations
#[derive(thiserror::Error, Debug)]
pub enum MsxPlayError {
    /// Malformed song blob or out-of-range song index
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The decoder engine failed mid-stream
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// The audio sink could not be resumed (e.g. autoplay policy)
    #[error("Playback blocked: {0}")]
    PlaybackBlocked(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// Error writing audio file
    #[error("Audio file write error: {0}")]
    AudioFileError(String),

    /// The decoder worker is gone or unusable
    #[error("Decoder worker error: {0}")]
    WorkerError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for MsxPlayError {
    /// Converts a String into `MsxPlayError::Other`.
    ///
    /// Prefer the specific variants (`InvalidInput`, `DecodeFailure`, ...)
    /// when the failure category is known.
    fn from(msg: String) -> Self {
        MsxPlayError::Other(msg)
    }
}

impl From<&str> for MsxPlayError {
    /// Converts a string slice into `MsxPlayError::Other`.
    fn from(msg: &str) -> Self {
        MsxPlayError::Other(msg.to_string())
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, MsxPlayError>;

// Public API exports
pub use config::{parse_time, DeviceQuality, PlaybackArgs, PlaybackOptions, RcFilter};
pub use engine::{DecoderEngine, EngineFactory, FadeState, SongData};
#[cfg(feature = "vgm-engine")]
pub use engine::vgm::{VgmEngine, VgmEngineFactory};
pub use export::{EncodeChunk, EncodeStream, ExportConfig};
#[cfg(feature = "export-wav")]
pub use export::{export_to_wav, ExportSummary};
pub use player::Player;
pub use render::{RenderStatus, Renderer, TransportState, WaveBuffer};
#[cfg(feature = "streaming")]
pub use sink::RodioSink;
pub use sink::{AudioSink, ManualSink};
pub use worker::{DecoderWorker, WorkerHandle};
