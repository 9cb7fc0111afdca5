//! Playback options and effective session arguments
//!
//! [`PlaybackOptions`] is the loose, caller-facing description of a play
//! request: every field is optional and time values may be written as
//! `"10s"`, `"500ms"` or plain milliseconds. [`PlaybackArgs::resolve`]
//! validates it once and fills in the defaults, producing the immutable
//! argument set handed to the decoder worker for one session.

use bitflags::bitflags;
use serde::Deserialize;

/// Default duration cap (5 minutes)
pub const DEFAULT_DURATION_MS: u32 = 5 * 60 * 1000;

/// Hard ceiling for the duration cap (20 minutes)
pub const MAX_DURATION_MS: u32 = 20 * 60 * 1000;

/// Default fade-out duration
pub const DEFAULT_FADE_MS: u32 = 5000;

/// Default loop count after which the fade starts
pub const DEFAULT_LOOP_COUNT: u32 = 2;

bitflags! {
    /// High-quality rendering switches, one per sound chip
    ///
    /// A set bit selects the engine's high-quality (slower) path for that chip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceQuality: u8 {
        /// AY-3-8910 / YM2149 PSG
        const PSG = 0x01;
        /// Konami SCC
        const SCC = 0x02;
        /// YM2413 (MSX-MUSIC)
        const OPLL = 0x04;
        /// Y8950 (MSX-AUDIO)
        const OPL = 0x08;
    }
}

impl Default for DeviceQuality {
    fn default() -> Self {
        DeviceQuality::PSG | DeviceQuality::OPLL | DeviceQuality::OPL
    }
}

/// Per-chip quality overrides as they appear in an options document.
///
/// Missing entries keep the [`DeviceQuality::default`] value.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct QualityOptions {
    /// PSG quality (0 = fast, non-zero = high)
    pub psg: Option<u8>,
    /// SCC quality
    pub scc: Option<u8>,
    /// OPLL quality
    pub opll: Option<u8>,
    /// OPL quality
    pub opl: Option<u8>,
}

impl QualityOptions {
    /// Merge the overrides onto the default quality set.
    pub fn resolve(&self) -> DeviceQuality {
        let mut quality = DeviceQuality::default();
        let pairs = [
            (self.psg, DeviceQuality::PSG),
            (self.scc, DeviceQuality::SCC),
            (self.opll, DeviceQuality::OPLL),
            (self.opl, DeviceQuality::OPL),
        ];
        for (value, flag) in pairs {
            if let Some(value) = value {
                quality.set(flag, value != 0);
            }
        }
        quality
    }
}

/// RC low-pass output filter (resistor in Ω, capacitor in pF)
///
/// `0, 0` disables the filter.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct RcFilter {
    /// Resistor value in ohms
    #[serde(default)]
    pub resistor: u32,
    /// Capacitor value in picofarads
    #[serde(default)]
    pub capacitor: u32,
}

impl RcFilter {
    /// Create a filter from resistor and capacitor values.
    pub fn new(resistor: u32, capacitor: u32) -> Self {
        Self {
            resistor,
            capacitor,
        }
    }

    /// Whether the filter has any effect.
    pub fn is_enabled(&self) -> bool {
        self.resistor != 0 && self.capacitor != 0
    }
}

/// A time value as written by a caller: milliseconds or a suffixed string.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TimeValue {
    /// Milliseconds
    Millis(f64),
    /// `"1500"`, `"1500ms"` or `"1.5s"`
    Text(String),
}

impl TimeValue {
    /// Milliseconds represented by this value, if it parses.
    pub fn as_millis(&self) -> Option<f64> {
        match self {
            TimeValue::Millis(ms) => Some(*ms),
            TimeValue::Text(text) => parse_time(text),
        }
    }
}

impl From<u32> for TimeValue {
    fn from(ms: u32) -> Self {
        TimeValue::Millis(ms as f64)
    }
}

impl From<&str> for TimeValue {
    fn from(text: &str) -> Self {
        TimeValue::Text(text.to_string())
    }
}

/// Parse a time string into milliseconds.
///
/// Accepts plain digits (milliseconds), `<n>ms` and `<n>s`.
///
/// ```
/// use msxplay::parse_time;
/// assert_eq!(parse_time("1500"), Some(1500.0));
/// assert_eq!(parse_time("250ms"), Some(250.0));
/// assert_eq!(parse_time("10s"), Some(10_000.0));
/// assert_eq!(parse_time("soon"), None);
/// ```
pub fn parse_time(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse::<f64>().ok();
    }
    if let Some(ms) = text.strip_suffix("ms") {
        return ms.trim().parse::<f64>().ok();
    }
    if let Some(sec) = text.strip_suffix('s') {
        return sec.trim().parse::<f64>().ok().map(|s| s * 1000.0);
    }
    None
}

/// Caller-facing playback options; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackOptions {
    /// Duration cap
    pub duration: Option<TimeValue>,
    /// Fade-out duration
    pub fade: Option<TimeValue>,
    /// Loop count that triggers the fade
    #[serde(alias = "loop")]
    pub loop_count: Option<u32>,
    /// CPU speed override (0 = engine default)
    pub cpu: Option<u32>,
    /// RC output filter
    pub rcf: Option<RcFilter>,
    /// Per-chip quality overrides
    pub quality: Option<QualityOptions>,
    /// Per-song output gain
    pub gain: Option<f64>,
    /// Skip ahead to the first debug marker
    pub debug: Option<bool>,
    /// Label handed to the engine together with the song data
    pub label: Option<String>,
}

impl PlaybackOptions {
    /// Parse options from a JSON document.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| crate::MsxPlayError::ConfigError(format!("invalid options: {e}")))
    }

    /// Read and parse a JSON options file.
    ///
    /// Fails with [`MsxPlayError::Io`](crate::MsxPlayError::Io) if the file
    /// cannot be read.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Set the duration cap.
    pub fn with_duration(mut self, duration: impl Into<TimeValue>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    /// Set the fade-out duration.
    pub fn with_fade(mut self, fade: impl Into<TimeValue>) -> Self {
        self.fade = Some(fade.into());
        self
    }

    /// Set the loop count threshold.
    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = Some(loop_count);
        self
    }

    /// Set the output gain.
    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = Some(gain);
        self
    }

    /// Enable or disable the debug-marker skip.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }
}

/// Effective, validated arguments of one playback session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackArgs {
    /// Song (track) index inside the blob
    pub song_index: u32,
    /// Duration cap in milliseconds, never above [`MAX_DURATION_MS`]
    pub duration_ms: u32,
    /// Fade-out duration in milliseconds
    pub fade_ms: u32,
    /// Loop count that triggers the fade
    pub loop_count: u32,
    /// CPU speed override
    pub cpu: u32,
    /// RC output filter
    pub rcf: RcFilter,
    /// Per-chip quality
    pub quality: DeviceQuality,
    /// Output gain, always finite
    pub gain: f32,
    /// Skip ahead to the first debug marker on the first decode step
    pub debug: bool,
    /// Label handed to the engine
    pub label: String,
}

impl PlaybackArgs {
    /// Resolve options into effective arguments.
    ///
    /// Unparsable or negative time values fall back to their defaults.
    pub fn resolve(song_index: u32, options: &PlaybackOptions) -> Self {
        let duration = options
            .duration
            .as_ref()
            .and_then(TimeValue::as_millis)
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| ms.round() as u32)
            .unwrap_or(DEFAULT_DURATION_MS);
        let fade_ms = options
            .fade
            .as_ref()
            .and_then(TimeValue::as_millis)
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| ms.round() as u32)
            .unwrap_or(DEFAULT_FADE_MS);

        PlaybackArgs {
            song_index,
            duration_ms: duration.min(MAX_DURATION_MS),
            fade_ms,
            loop_count: options.loop_count.unwrap_or(DEFAULT_LOOP_COUNT),
            cpu: options.cpu.unwrap_or(0),
            rcf: options.rcf.unwrap_or_default(),
            quality: options
                .quality
                .map(|q| q.resolve())
                .unwrap_or_default(),
            gain: normalize_gain(options.gain.unwrap_or(1.0)),
            debug: options.debug.unwrap_or(false),
            label: options.label.clone().unwrap_or_default(),
        }
    }
}

impl Default for PlaybackArgs {
    fn default() -> Self {
        Self::resolve(0, &PlaybackOptions::default())
    }
}

/// Replace NaN and infinite gains with unity.
pub fn normalize_gain(gain: f64) -> f32 {
    if gain.is_finite() {
        gain as f32
    } else {
        1.0
    }
}
