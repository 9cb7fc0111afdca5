//! WAV file export functionality

use super::{EncodeStream, ExportConfig};
use crate::engine::{EngineFactory, SongData};
use crate::{MsxPlayError, Result};
use std::path::Path;

/// What an export produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    /// Frames written per channel
    pub frames: u64,
    /// Audio length in milliseconds
    pub duration_ms: u64,
}

/// Render a song to a 16-bit PCM WAV file.
///
/// The file is written block by block, so memory use does not depend on
/// the song length.
///
/// # Examples
///
/// ```no_run
/// use msxplay::{export_to_wav, ExportConfig, SongData, VgmEngineFactory};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let song = SongData::new(std::fs::read("song.vgm")?);
/// let config = ExportConfig::stereo().fade(5000);
/// let summary = export_to_wav(VgmEngineFactory, &song, &config, "output.wav")?;
/// println!("{} ms written", summary.duration_ms);
/// # Ok(())
/// # }
/// ```
pub fn export_to_wav<P: AsRef<Path>>(
    factory: impl EngineFactory,
    song: &SongData,
    config: &ExportConfig,
    output_path: P,
) -> Result<ExportSummary> {
    if config.channels == 0 || config.channels > 2 {
        return Err(MsxPlayError::ConfigError(format!(
            "unsupported channel count {}",
            config.channels
        )));
    }
    let stream = EncodeStream::new(factory, song, config)?;

    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let path = output_path.as_ref();
    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| {
        MsxPlayError::AudioFileError(format!("Failed to create WAV file: {e}"))
    })?;

    let mut frames = 0u64;
    let mut duration_ms = 0u64;
    for chunk in stream {
        for &sample in &chunk.samples {
            for _ in 0..config.channels {
                writer.write_sample(sample).map_err(|e| {
                    MsxPlayError::AudioFileError(format!("Failed to write sample: {e}"))
                })?;
            }
        }
        frames += chunk.samples.len() as u64;
        duration_ms = chunk.elapsed_ms;
        log::trace!("exported {duration_ms}ms");
    }

    writer.finalize().map_err(|e| {
        MsxPlayError::AudioFileError(format!("Failed to finalize WAV file: {e}"))
    })?;
    log::info!("wrote {} ({duration_ms}ms)", path.display());
    Ok(ExportSummary {
        frames,
        duration_ms,
    })
}
