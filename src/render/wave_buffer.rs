//! Wave buffer holding the decoded stream of one session
//!
//! The buffer is circular but sized to hold the whole session (duration
//! cap plus one block), so every decoded frame stays addressable and seeking
//! back is just moving the read cursor. Cursors are absolute frame positions
//! from the start of the session.
//!
//! The buffer is owned by the renderer and only touched from the audio
//! callback, so it needs no locking. Memory is allocated once in [`WaveBuffer::new`].

use crate::{MsxPlayError, Result};

/// Largest buffer the renderer will allocate (512 MB of f32 samples)
pub const MAX_CAPACITY: usize = 512 * 1024 * 1024 / std::mem::size_of::<f32>();

/// Circular f32 sample store with absolute read and write cursors.
#[derive(Debug)]
pub struct WaveBuffer {
    data: Vec<f32>,
    write_pos: u64,
    read_pos: u64,
}

impl WaveBuffer {
    /// Allocate a buffer of `capacity` frames.
    ///
    /// # Errors
    ///
    /// Returns [`MsxPlayError::ConfigError`] if the capacity is 0 or would
    /// exceed [`MAX_CAPACITY`].
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(MsxPlayError::ConfigError(
                "wave buffer capacity must be greater than 0".into(),
            ));
        }
        if capacity > MAX_CAPACITY {
            return Err(MsxPlayError::ConfigError(format!(
                "wave buffer capacity {capacity} exceeds maximum safe size {MAX_CAPACITY}"
            )));
        }
        Ok(Self {
            data: vec![0.0; capacity],
            write_pos: 0,
            read_pos: 0,
        })
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Absolute write cursor (frames decoded so far).
    pub fn write_pos(&self) -> u64 {
        self.write_pos
    }

    /// Absolute read cursor (frames played so far).
    pub fn read_pos(&self) -> u64 {
        self.read_pos
    }

    /// Frames written but not yet read.
    pub fn available_read(&self) -> usize {
        (self.write_pos - self.read_pos) as usize
    }

    /// Frames that can be written without overwriting unread data.
    pub fn free_space(&self) -> usize {
        self.capacity() - self.available_read()
    }

    /// Append 16-bit PCM, scaled to `[-1.0, 1.0)`. Returns the number of
    /// frames written; unread data is never overwritten.
    pub fn write_pcm(&mut self, samples: &[i16]) -> usize {
        let to_write = samples.len().min(self.free_space());
        let capacity = self.capacity() as u64;
        for (offset, &sample) in samples[..to_write].iter().enumerate() {
            let idx = ((self.write_pos + offset as u64) % capacity) as usize;
            self.data[idx] = sample as f32 / 32768.0;
        }
        self.write_pos += to_write as u64;
        to_write
    }

    /// Copy unread samples into `dest`. Returns the number of frames read;
    /// the rest of `dest` is left untouched.
    pub fn read(&mut self, dest: &mut [f32]) -> usize {
        let to_read = dest.len().min(self.available_read());
        if to_read == 0 {
            return 0;
        }
        let capacity = self.capacity();
        let read_idx = (self.read_pos % capacity as u64) as usize;

        if read_idx + to_read <= capacity {
            dest[..to_read].copy_from_slice(&self.data[read_idx..read_idx + to_read]);
        } else {
            let first_part = capacity - read_idx;
            dest[..first_part].copy_from_slice(&self.data[read_idx..]);
            dest[first_part..to_read].copy_from_slice(&self.data[..to_read - first_part]);
        }

        self.read_pos += to_read as u64;
        to_read
    }

    /// Move the read cursor to `frame`.
    ///
    /// Only positions that are decoded and still held by the buffer are
    /// accepted; anything else leaves the cursor unchanged and returns `false`.
    pub fn seek(&mut self, frame: u64) -> bool {
        if frame > self.write_pos || self.write_pos - frame > self.capacity() as u64 {
            return false;
        }
        self.read_pos = frame;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// PCM value that scales to `value / 8`.
    fn eighths(value: i16) -> i16 {
        value * 4096
    }

    #[test]
    fn test_capacity_validation() {
        assert!(WaveBuffer::new(0).is_err());
        assert!(WaveBuffer::new(MAX_CAPACITY + 1).is_err());
        assert_eq!(WaveBuffer::new(100).unwrap().capacity(), 100);
    }

    #[test]
    fn test_write_then_read() {
        let mut buf = WaveBuffer::new(16).unwrap();
        let pcm: Vec<i16> = (1..=4).map(eighths).collect();
        assert_eq!(buf.write_pcm(&pcm), 4);
        let mut out = [0.0; 8];
        assert_eq!(buf.read(&mut out), 4);
        assert_eq!(&out[..4], &[0.125, 0.25, 0.375, 0.5]);
        assert_eq!(buf.read_pos(), 4);
        assert_eq!(buf.write_pos(), 4);
    }

    #[test]
    fn test_wrap_around() {
        let mut buf = WaveBuffer::new(8).unwrap();
        buf.write_pcm(&[0; 6]);
        let mut drained = [0.0; 6];
        buf.read(&mut drained);

        let pcm: Vec<i16> = (1..=7).map(eighths).collect();
        assert_eq!(buf.write_pcm(&pcm), 7);
        let mut out = [0.0; 7];
        assert_eq!(buf.read(&mut out), 7);
        let expected: Vec<f32> = (1..=7).map(|i| i as f32 / 8.0).collect();
        assert_eq!(&out[..], &expected[..]);
    }

    #[test]
    fn test_write_never_overwrites_unread() {
        let mut buf = WaveBuffer::new(4).unwrap();
        assert_eq!(buf.write_pcm(&[1; 6]), 4);
        assert_eq!(buf.free_space(), 0);
        assert_eq!(buf.write_pcm(&[1]), 0);
    }

    #[test]
    fn test_pcm_scaling() {
        let mut buf = WaveBuffer::new(4).unwrap();
        buf.write_pcm(&[i16::MIN, 0, 16384]);
        let mut out = [9.0; 3];
        buf.read(&mut out);
        assert_eq!(out, [-1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_seek_only_within_decoded_region() {
        let mut buf = WaveBuffer::new(100).unwrap();
        buf.write_pcm(&[16384; 50]);
        let mut out = [0.0; 10];
        buf.read(&mut out);

        assert!(!buf.seek(51));
        assert_eq!(buf.read_pos(), 10);
        assert!(buf.seek(50));
        assert_eq!(buf.available_read(), 0);
        assert!(buf.seek(0));
        assert_eq!(buf.available_read(), 50);
    }
}
