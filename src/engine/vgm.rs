//! Reference engine for VGM register logs (AY-3-8910 / YM2149 PSG)
//!
//! Renders the PSG writes of a VGM file with three square-wave tone channels
//! and the fixed-volume registers. Noise, envelopes and every other chip in
//! the log are ignored; this engine exists so the player can be exercised
//! end-to-end without an external emulator.

use super::{DecoderEngine, EngineFactory, FadeState, SongData};
use crate::config::DeviceQuality;
use crate::{MsxPlayError, Result};

/// VGM timeline rate; every wait command is expressed in these samples.
pub const VGM_SAMPLE_RATE: u32 = 44_100;

/// PSG clock used when the header does not provide one (MSX: 3.58 MHz / 2).
pub const DEFAULT_AY_CLOCK: u32 = 1_789_773;

/// PSG volume table, normalized output level per 4-bit amplitude.
const VOLUME_TABLE: [u16; 16] = [
    20, 53, 88, 125, 193, 258, 385, 525, 753, 1029, 1523, 2077, 3110, 4395, 7073, 10922,
];

/// Upper bound on commands executed without a wait before the log is
/// considered corrupt.
const MAX_COMMANDS_PER_SAMPLE: usize = 100_000;

const HEADER_SIZE: usize = 0x100;

/// Parsed header fields needed for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VgmLayout {
    data_start: usize,
    data_end: usize,
    loop_start: Option<usize>,
    ay_clock: u32,
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn parse_layout(bytes: &[u8]) -> Result<VgmLayout> {
    if bytes.len() < 0x40 {
        return Err(MsxPlayError::InvalidInput(format!(
            "VGM header too short ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[0..4] != b"Vgm " {
        return Err(MsxPlayError::InvalidInput("missing 'Vgm ' ident".into()));
    }

    let version = read_u32_le(bytes, 0x08).unwrap_or(0);
    let data_offset = if version >= 0x150 {
        read_u32_le(bytes, 0x34).unwrap_or(0)
    } else {
        0
    };
    let data_start = if data_offset == 0 {
        0x40
    } else {
        0x34 + data_offset as usize
    };
    if data_start > bytes.len() {
        return Err(MsxPlayError::InvalidInput(format!(
            "data offset {data_start:#x} beyond end of file"
        )));
    }

    let eof = read_u32_le(bytes, 0x04)
        .map(|v| 0x04 + v as usize)
        .filter(|&end| end > data_start && end <= bytes.len())
        .unwrap_or(bytes.len());

    let loop_start = match read_u32_le(bytes, 0x1C).unwrap_or(0) {
        0 => None,
        raw => {
            let pos = 0x1C + raw as usize;
            if pos < data_start || pos >= eof {
                return Err(MsxPlayError::InvalidInput(format!(
                    "loop offset {pos:#x} outside of command data"
                )));
            }
            Some(pos)
        }
    };

    // Header bytes overlapping the command data read as zero.
    let ay_clock = if version >= 0x151 && data_start >= 0x78 {
        read_u32_le(bytes, 0x74).unwrap_or(0) & 0x3FFF_FFFF
    } else {
        0
    };

    Ok(VgmLayout {
        data_start,
        data_end: eof,
        loop_start,
        ay_clock: if ay_clock == 0 {
            DEFAULT_AY_CLOCK
        } else {
            ay_clock
        },
    })
}

/// Single PSG tone channel as a phase accumulator.
#[derive(Clone, Copy, Debug, Default)]
struct ToneChannel {
    phase: f64,
    step: f64,
}

impl ToneChannel {
    fn set_period(&mut self, period: u16, clock: u32, sample_rate: u32) {
        // period 0 behaves like 1 on the real chip
        let period = period.max(1) as f64;
        let freq = clock as f64 / (16.0 * period);
        // Above Nyquist the chip output is effectively DC
        self.step = if freq * 2.0 >= sample_rate as f64 {
            0.0
        } else {
            freq / sample_rate as f64
        };
    }

    /// Next output value. `smooth` averages the square over the sample
    /// period instead of point sampling it.
    #[inline]
    fn next(&mut self, smooth: bool) -> f32 {
        let start = self.phase;
        self.phase += self.step;
        let value = if smooth && self.step > 0.0 {
            (square_integral(self.phase) - square_integral(start)) / self.step
        } else if start < 0.5 {
            1.0
        } else {
            -1.0
        };
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        value as f32
    }
}

/// Integral of a unit square wave (+1 then -1) from 0 to `x`, `0 <= x < 2`.
fn square_integral(x: f64) -> f64 {
    let x = if x >= 1.0 { x - 1.0 } else { x };
    if x < 0.5 {
        x
    } else {
        1.0 - x
    }
}

/// One-pole RC low-pass filter.
#[derive(Clone, Copy, Debug, Default)]
struct RcLowPass {
    alpha: f32,
    state: f32,
    enabled: bool,
}

impl RcLowPass {
    fn configure(&mut self, resistor: u32, capacitor: u32, sample_rate: u32) {
        self.enabled = resistor != 0 && capacitor != 0;
        self.state = 0.0;
        if self.enabled {
            let rc = resistor as f64 * capacitor as f64 * 1e-12;
            let dt = 1.0 / sample_rate as f64;
            self.alpha = (dt / (rc + dt)) as f32;
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        if !self.enabled {
            return x;
        }
        self.state += self.alpha * (x - self.state);
        self.state
    }
}

/// Reference [`DecoderEngine`] for VGM files carrying AY-3-8910 writes.
pub struct VgmEngine {
    sample_rate: u32,
    data: Option<SongData>,
    layout: Option<VgmLayout>,
    pos: usize,
    /// Remaining wait in VGM timeline samples
    wait: f64,
    /// VGM samples consumed per output sample
    wait_step: f64,
    regs: [u8; 16],
    tones: [ToneChannel; 3],
    filter: RcLowPass,
    quality: DeviceQuality,
    loops: u32,
    stopped: bool,
    fade: FadeState,
    fade_total: u64,
    fade_pos: u64,
}

impl VgmEngine {
    /// Create an engine rendering at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            data: None,
            layout: None,
            pos: 0,
            wait: 0.0,
            wait_step: VGM_SAMPLE_RATE as f64 / sample_rate.max(1) as f64,
            regs: [0; 16],
            tones: [ToneChannel::default(); 3],
            filter: RcLowPass::default(),
            quality: DeviceQuality::default(),
            loops: 0,
            stopped: true,
            fade: FadeState::NotStarted,
            fade_total: 0,
            fade_pos: 0,
        }
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        let reg = (reg & 0x0F) as usize;
        self.regs[reg] = value;
        if reg < 6 {
            let ch = reg / 2;
            let period =
                (((self.regs[ch * 2 + 1] & 0x0F) as u16) << 8) | self.regs[ch * 2] as u16;
            let clock = self.layout.map(|l| l.ay_clock).unwrap_or(DEFAULT_AY_CLOCK);
            self.tones[ch].set_period(period, clock, self.sample_rate);
        }
    }

    /// Execute commands until a wait is pending or the song stops.
    fn run_commands(&mut self) -> Result<()> {
        if self.wait > 0.0 || self.stopped {
            return Ok(());
        }
        let Some(data) = self.data.take() else {
            self.stopped = true;
            return Ok(());
        };
        let result = self.execute(data.bytes());
        self.data = Some(data);
        result
    }

    fn execute(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(layout) = self.layout else {
            self.stopped = true;
            return Ok(());
        };
        let mut executed = 0usize;

        while self.wait <= 0.0 && !self.stopped {
            executed += 1;
            if executed > MAX_COMMANDS_PER_SAMPLE {
                return Err(MsxPlayError::DecodeFailure(
                    "command stream loops without waiting".into(),
                ));
            }

            if self.pos >= layout.data_end {
                self.end_of_data(layout);
                continue;
            }

            let at = |i: usize| bytes.get(self.pos + i).copied().unwrap_or(0);
            let opcode = at(0);
            let (len, wait) = match opcode {
                0x30..=0x3F | 0x4F | 0x50 => (2, 0),
                0x40..=0x4E | 0x51..=0x5F => (3, 0),
                0x61 => (3, u16::from_le_bytes([at(1), at(2)]) as u32),
                0x62 => (1, 735),
                0x63 => (1, 882),
                0x66 => {
                    self.end_of_data(layout);
                    continue;
                }
                0x67 => {
                    let size = u32::from_le_bytes([at(3), at(4), at(5), at(6)]) as usize;
                    (7 + size, 0)
                }
                0x68 => (12, 0),
                0x70..=0x7F => (1, (opcode & 0x0F) as u32 + 1),
                0x80..=0x8F => (1, (opcode & 0x0F) as u32),
                0x90 | 0x91 | 0x95 => (5, 0),
                0x92 => (6, 0),
                0x93 => (11, 0),
                0x94 => (2, 0),
                0xA0 => {
                    let (reg, value) = (at(1), at(2));
                    // bit 7 of the register selects the second chip
                    if reg & 0x80 == 0 {
                        self.write_register(reg, value);
                    }
                    (3, 0)
                }
                0xA1..=0xBF => (3, 0),
                0xC0..=0xDF => (4, 0),
                0xE0..=0xFF => (5, 0),
                other => {
                    return Err(MsxPlayError::DecodeFailure(format!(
                        "unknown VGM command {other:#04x} at {:#x}",
                        self.pos
                    )));
                }
            };
            self.pos += len;
            self.wait += wait as f64;
        }
        Ok(())
    }

    fn end_of_data(&mut self, layout: VgmLayout) {
        match layout.loop_start {
            Some(loop_start) => {
                self.pos = loop_start;
                self.loops += 1;
            }
            None => self.stopped = true,
        }
    }

    fn mix(&mut self) -> f32 {
        let mixer = self.regs[7];
        let smooth = self.quality.contains(DeviceQuality::PSG);
        let mut out = 0.0f32;
        for ch in 0..3 {
            let square = self.tones[ch].next(smooth);
            let tone_enabled = mixer & (1 << ch) == 0;
            let amp = self.regs[8 + ch];
            // Envelope mode is rendered at full level
            let level = if amp & 0x10 != 0 { 15 } else { amp & 0x0F };
            let volume = VOLUME_TABLE[level as usize] as f32 / 32767.0;
            out += if tone_enabled { square * volume } else { volume };
        }
        out
    }

    fn fade_gain(&mut self) -> f32 {
        match self.fade {
            FadeState::NotStarted => 1.0,
            FadeState::Complete => 0.0,
            FadeState::Fading => {
                let gain = 1.0 - self.fade_pos as f32 / self.fade_total as f32;
                self.fade_pos += 1;
                if self.fade_pos >= self.fade_total {
                    self.fade = FadeState::Complete;
                }
                gain
            }
        }
    }

    /// Advance one output sample, returning its value when `render` is set.
    fn step(&mut self, render: bool) -> Result<f32> {
        self.run_commands()?;
        let gain = self.fade_gain();
        let value = if render && !self.stopped && gain > 0.0 {
            let mixed = self.mix() * gain;
            self.filter.process(mixed)
        } else {
            0.0
        };
        if self.wait > 0.0 {
            self.wait -= self.wait_step;
        }
        Ok(value)
    }
}

impl DecoderEngine for VgmEngine {
    fn load(&mut self, song: &SongData) -> Result<()> {
        let layout = parse_layout(song.bytes())?;
        self.layout = Some(layout);
        self.data = Some(song.clone());
        Ok(())
    }

    fn unload(&mut self) {
        self.data = None;
        self.layout = None;
        self.stopped = true;
    }

    fn reset(&mut self, song: u32, _cpu: u32) -> Result<()> {
        let Some(layout) = self.layout else {
            return Err(MsxPlayError::InvalidInput("no song loaded".into()));
        };
        if song != 0 {
            return Err(MsxPlayError::InvalidInput(format!(
                "song index {song} out of range (VGM holds a single song)"
            )));
        }
        self.pos = layout.data_start;
        self.wait = 0.0;
        self.regs = [0; 16];
        // all channels silent until the log enables them
        self.regs[7] = 0x3F;
        self.tones = [ToneChannel::default(); 3];
        self.loops = 0;
        self.stopped = false;
        self.fade = FadeState::NotStarted;
        self.fade_total = 0;
        self.fade_pos = 0;
        Ok(())
    }

    fn set_rcf(&mut self, resistor: u32, capacitor: u32) {
        self.filter.configure(resistor, capacitor, self.sample_rate);
    }

    fn set_device_quality(&mut self, quality: DeviceQuality) {
        self.quality = quality;
    }

    fn calc(&mut self, out: &mut [i16]) -> Result<()> {
        for sample in out.iter_mut() {
            let value = self.step(true)?;
            *sample = (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        }
        Ok(())
    }

    fn calc_silent(&mut self, frames: usize) -> Result<()> {
        for _ in 0..frames {
            self.step(false)?;
        }
        Ok(())
    }

    fn fade_start(&mut self, duration_ms: u32) {
        if self.fade != FadeState::NotStarted {
            return;
        }
        self.fade_total = duration_ms as u64 * self.sample_rate as u64 / 1000;
        self.fade_pos = 0;
        self.fade = if self.fade_total == 0 {
            FadeState::Complete
        } else {
            FadeState::Fading
        };
    }

    fn fade_state(&self) -> FadeState {
        self.fade
    }

    fn stop_flag(&self) -> bool {
        self.stopped
    }

    fn loop_count(&self) -> u32 {
        self.loops
    }
}

/// Factory creating a [`VgmEngine`] per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct VgmEngineFactory;

impl EngineFactory for VgmEngineFactory {
    fn create(&self, sample_rate: u32) -> Result<Box<dyn DecoderEngine>> {
        if sample_rate == 0 {
            return Err(MsxPlayError::ConfigError("sample rate must be non-zero".into()));
        }
        Ok(Box::new(VgmEngine::new(sample_rate)))
    }
}

/// Minimal writer for PSG-only VGM files.
///
/// ```
/// use msxplay::engine::vgm::VgmBuilder;
/// let mut builder = VgmBuilder::new();
/// builder.ay_write(7, 0x3E).ay_write(8, 0x0F).wait(44_100);
/// let bytes = builder.build();
/// assert_eq!(&bytes[0..4], b"Vgm ");
/// ```
#[derive(Debug, Clone, Default)]
pub struct VgmBuilder {
    commands: Vec<u8>,
    loop_at: Option<usize>,
    total_samples: u32,
    loop_samples_start: u32,
    ay_clock: u32,
}

impl VgmBuilder {
    /// Start an empty log at the default PSG clock.
    pub fn new() -> Self {
        Self {
            ay_clock: DEFAULT_AY_CLOCK,
            ..Self::default()
        }
    }

    /// Write `value` to PSG register `reg`.
    pub fn ay_write(&mut self, reg: u8, value: u8) -> &mut Self {
        self.commands.extend_from_slice(&[0xA0, reg & 0x0F, value]);
        self
    }

    /// Wait `samples` VGM samples (44.1 kHz timeline).
    pub fn wait(&mut self, mut samples: u32) -> &mut Self {
        self.total_samples += samples;
        while samples > 0 {
            let chunk = samples.min(u16::MAX as u32);
            let [lo, hi] = (chunk as u16).to_le_bytes();
            self.commands.extend_from_slice(&[0x61, lo, hi]);
            samples -= chunk;
        }
        self
    }

    /// Mark the current position as the loop point.
    pub fn loop_here(&mut self) -> &mut Self {
        self.loop_at = Some(self.commands.len());
        self.loop_samples_start = self.total_samples;
        self
    }

    /// Serialize into a VGM 1.51 file.
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(b"Vgm ");
        out[0x08..0x0C].copy_from_slice(&0x151u32.to_le_bytes());
        out[0x18..0x1C].copy_from_slice(&self.total_samples.to_le_bytes());
        if let Some(at) = self.loop_at {
            let rel = (HEADER_SIZE + at - 0x1C) as u32;
            out[0x1C..0x20].copy_from_slice(&rel.to_le_bytes());
            let loop_len = self.total_samples - self.loop_samples_start;
            out[0x20..0x24].copy_from_slice(&loop_len.to_le_bytes());
        }
        out[0x34..0x38].copy_from_slice(&((HEADER_SIZE - 0x34) as u32).to_le_bytes());
        out[0x74..0x78].copy_from_slice(&self.ay_clock.to_le_bytes());

        out.extend_from_slice(&self.commands);
        out.push(0x66);
        let eof_rel = (out.len() - 4) as u32;
        out[0x04..0x08].copy_from_slice(&eof_rel.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_song(seconds: u32, looped: bool) -> SongData {
        let mut b = VgmBuilder::new();
        b.ay_write(0, 0xFE).ay_write(1, 0x00); // ~440 Hz
        b.ay_write(7, 0x3E).ay_write(8, 0x0F);
        if looped {
            b.loop_here();
        }
        b.wait(seconds * VGM_SAMPLE_RATE);
        SongData::new(b.build())
    }

    fn engine_for(song: &SongData, rate: u32) -> VgmEngine {
        let mut engine = VgmEngine::new(rate);
        engine.load(song).unwrap();
        engine.reset(0, 0).unwrap();
        engine
    }

    #[test]
    fn test_rejects_garbage() {
        let mut engine = VgmEngine::new(44_100);
        let err = engine.load(&SongData::new(vec![0u8; 8])).unwrap_err();
        assert!(matches!(err, MsxPlayError::InvalidInput(_)));

        let mut bytes = tone_song(1, false).bytes().to_vec();
        bytes[0] = b'X';
        assert!(engine.load(&SongData::new(bytes)).is_err());
    }

    #[test]
    fn test_song_index_out_of_range() {
        let song = tone_song(1, false);
        let mut engine = VgmEngine::new(44_100);
        engine.load(&song).unwrap();
        assert!(matches!(
            engine.reset(1, 0),
            Err(MsxPlayError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_renders_square_wave() {
        let song = tone_song(1, false);
        let mut engine = engine_for(&song, 44_100);
        let mut out = vec![0i16; 4410];
        engine.calc(&mut out).unwrap();
        let positive = out.iter().filter(|&&s| s > 0).count();
        let negative = out.iter().filter(|&&s| s < 0).count();
        assert!(positive > 1000 && negative > 1000, "{positive} / {negative}");
        assert!(!engine.stop_flag());
    }

    #[test]
    fn test_stops_at_end_without_loop() {
        let song = tone_song(1, false);
        let mut engine = engine_for(&song, 22_050);
        engine.calc_silent(22_050 + 10).unwrap();
        assert!(engine.stop_flag());
        assert_eq!(engine.loop_count(), 0);
    }

    #[test]
    fn test_loop_counter_increments() {
        let song = tone_song(1, true);
        let mut engine = engine_for(&song, 22_050);
        engine.calc_silent(22_050 * 3 + 10).unwrap();
        assert!(!engine.stop_flag());
        assert_eq!(engine.loop_count(), 3);
    }

    #[test]
    fn test_fade_completes_and_silences() {
        let song = tone_song(10, true);
        let mut engine = engine_for(&song, 8_000);
        engine.fade_start(500);
        assert_eq!(engine.fade_state(), FadeState::Fading);
        let mut out = vec![0i16; 4_001];
        engine.calc(&mut out).unwrap();
        assert_eq!(engine.fade_state(), FadeState::Complete);
        let mut tail = vec![1i16; 100];
        engine.calc(&mut tail).unwrap();
        assert!(tail.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_fade_start_only_once() {
        let song = tone_song(10, true);
        let mut engine = engine_for(&song, 8_000);
        engine.fade_start(1000);
        engine.calc_silent(4_000).unwrap();
        engine.fade_start(1000);
        engine.calc_silent(4_001).unwrap();
        assert_eq!(engine.fade_state(), FadeState::Complete);
    }

    #[test]
    fn test_unknown_command_is_decode_failure() {
        let mut bytes = tone_song(1, false).bytes().to_vec();
        bytes[HEADER_SIZE] = 0x01;
        let song = SongData::new(bytes);
        let mut engine = engine_for(&song, 44_100);
        let mut out = [0i16; 16];
        assert!(matches!(
            engine.calc(&mut out),
            Err(MsxPlayError::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_psg_quality_band_limits_edges() {
        let song = tone_song(1, false);
        let levels = |quality: DeviceQuality| {
            let mut engine = engine_for(&song, 44_100);
            engine.set_device_quality(quality);
            let mut out = vec![0i16; 2048];
            engine.calc(&mut out).unwrap();
            out.sort_unstable();
            out.dedup();
            out.len()
        };
        assert_eq!(levels(DeviceQuality::empty()), 2);
        assert!(levels(DeviceQuality::PSG) > 1);
    }

    #[test]
    fn test_rc_filter_smooths_output() {
        let song = tone_song(1, false);
        let mut raw = engine_for(&song, 44_100);
        let mut filtered = engine_for(&song, 44_100);
        filtered.set_rcf(4_700, 100_000);

        let mut a = vec![0i16; 2048];
        let mut b = vec![0i16; 2048];
        raw.calc(&mut a).unwrap();
        filtered.calc(&mut b).unwrap();
        let peak = |s: &[i16]| s.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
        assert!(peak(&b) < peak(&a));
    }
}
