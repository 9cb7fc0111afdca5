//! Audio device integration using rodio
//!
//! Plays a [`Renderer`] on the system's default output device.

use super::AudioSink;
use crate::render::Renderer;
use crate::{MsxPlayError, Result};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::time::Duration;

/// Samples rendered per batch on the audio thread
const BATCH_SIZE: usize = 1024;

/// Audio source that pulls from a renderer
struct RendererSource {
    renderer: Renderer,
    sample_rate: u32,
    /// Internal buffer for batch rendering
    buffer: Vec<f32>,
    buffer_pos: usize,
}

impl RendererSource {
    fn new(renderer: Renderer, sample_rate: u32) -> Self {
        RendererSource {
            renderer,
            sample_rate,
            buffer: vec![0.0f32; BATCH_SIZE],
            buffer_pos: BATCH_SIZE,
        }
    }
}

impl Source for RendererSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for RendererSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.buffer_pos >= self.buffer.len() {
            // the renderer pads underruns and pauses with silence
            self.renderer.render(&mut self.buffer);
            self.buffer_pos = 0;
        }
        let sample = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        Some(sample)
    }
}

/// Playback on the default output device using rodio
pub struct RodioSink {
    stream: Option<(OutputStream, OutputStreamHandle)>,
    sink: Option<Sink>,
    sample_rate: u32,
}

impl RodioSink {
    /// Open the default output device.
    ///
    /// Rodio resamples from `sample_rate` to the device rate if they differ.
    pub fn new(sample_rate: u32) -> Result<Self> {
        let (stream, handle) = OutputStream::try_default().map_err(|e| {
            MsxPlayError::AudioDeviceError(format!("Failed to create audio stream: {e}"))
        })?;
        log::debug!("audio output opened at {sample_rate} Hz");
        Ok(RodioSink {
            stream: Some((stream, handle)),
            sink: None,
            sample_rate,
        })
    }
}

impl AudioSink for RodioSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn connect(&mut self, renderer: Renderer) -> Result<()> {
        self.disconnect();
        let Some((_, handle)) = self.stream.as_ref() else {
            return Err(MsxPlayError::AudioDeviceError(
                "audio output is closed".into(),
            ));
        };
        let sink = Sink::try_new(handle).map_err(|e| {
            MsxPlayError::AudioDeviceError(format!("Failed to create audio sink: {e}"))
        })?;
        sink.append(RendererSource::new(renderer, self.sample_rate));
        self.sink = Some(sink);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn play(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn close(&mut self) {
        self.disconnect();
        if self.stream.take().is_some() {
            log::debug!("audio output closed");
        }
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        self.close();
    }
}
