//! Command line player and WAV exporter.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use msxplay::{PlaybackOptions, SongData};

#[derive(Parser)]
#[command(name = "msxplay")]
#[command(about = "Play or export MSX chiptune songs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a song on the default audio device
    Play(PlayArgs),
    /// Render a song to a WAV file
    Wav(WavArgs),
}

#[derive(Args)]
struct SongArgs {
    /// Song file
    file: PathBuf,

    /// Song index inside the file
    #[arg(short, long, default_value_t = 0)]
    song: u32,

    /// Fade-out duration ("3s", "2500ms" or milliseconds)
    #[arg(short, long, value_parser = parse_millis)]
    fade: Option<u32>,

    /// Loop count that triggers the fade
    #[arg(short, long = "loop")]
    loops: Option<u32>,

    /// Output gain
    #[arg(short, long)]
    gain: Option<f32>,

    /// Sample rate in Hz
    #[arg(short, long, default_value_t = 44100)]
    rate: u32,
}

#[derive(Args)]
struct PlayArgs {
    #[command(flatten)]
    song: SongArgs,

    /// Duration cap ("90s", "120000ms" or milliseconds)
    #[arg(short, long, value_parser = parse_millis)]
    duration: Option<u32>,

    /// Master volume
    #[arg(short, long, default_value_t = 1.0)]
    volume: f32,

    /// JSON file with playback options; command line flags take precedence
    #[arg(long)]
    options: Option<PathBuf>,

    /// Skip ahead to the first debug marker
    #[arg(long)]
    debug: bool,
}

#[derive(Args)]
struct WavArgs {
    #[command(flatten)]
    song: SongArgs,

    /// Output WAV file
    #[arg(short, long)]
    output: PathBuf,

    /// Play time cap ("600s", "90000ms" or milliseconds)
    #[arg(short, long, value_parser = parse_millis)]
    play_time: Option<u32>,

    /// Stop after this much silence, 0 disables
    #[arg(long, value_parser = parse_millis)]
    silent_limit: Option<u32>,

    /// Write two identical channels
    #[arg(long)]
    stereo: bool,
}

fn parse_millis(text: &str) -> std::result::Result<u32, String> {
    msxplay::parse_time(text)
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| ms.round() as u32)
        .ok_or_else(|| format!("invalid time value '{text}'"))
}

fn load_song(path: &Path) -> Result<SongData> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(SongData::new(bytes).with_label(label))
}

#[cfg_attr(not(feature = "streaming"), allow(dead_code))]
fn playback_options(args: &PlayArgs) -> Result<PlaybackOptions> {
    let mut options = match &args.options {
        Some(path) => PlaybackOptions::from_json_file(path)
            .with_context(|| format!("loading options from {}", path.display()))?,
        None => PlaybackOptions::default(),
    };
    if let Some(duration) = args.duration {
        options = options.with_duration(duration);
    }
    if let Some(fade) = args.song.fade {
        options = options.with_fade(fade);
    }
    if let Some(loops) = args.song.loops {
        options = options.with_loop_count(loops);
    }
    if let Some(gain) = args.song.gain {
        options = options.with_gain(gain as f64);
    }
    if args.debug {
        options = options.with_debug(true);
    }
    Ok(options)
}

#[cfg(not(feature = "streaming"))]
fn play(_args: PlayArgs) -> Result<()> {
    bail!(
        "Playback requires the \"streaming\" feature. Rebuild with `--features streaming` to enable it."
    )
}

#[cfg(feature = "streaming")]
fn play(args: PlayArgs) -> Result<()> {
    use crossbeam_channel::RecvTimeoutError;
    use msxplay::{Player, RodioSink, TransportState};
    use std::io::{self, BufRead, Write};
    use std::time::Duration;

    enum Key {
        Toggle,
        Seek(f64),
        Quit,
    }

    let song = load_song(&args.song.file)?;
    let options = playback_options(&args)?;
    let sink = RodioSink::new(args.song.rate)?;
    let mut player = Player::new(sink, engine_factory())?;
    player.set_master_volume(args.volume);
    player.set_data(song, args.song.song, &options);
    player.play()?;

    println!("Playing {} (song {})", args.song.file.display(), args.song.song);
    println!("Commands: [enter] pause/resume, s <seconds> seek, q quit");

    let (keys_tx, keys_rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("msxplay-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                let key = if line == "q" {
                    Key::Quit
                } else if let Some(secs) = line.strip_prefix('s') {
                    match secs.trim().parse::<f64>() {
                        Ok(secs) => Key::Seek(secs * 1000.0),
                        Err(_) => continue,
                    }
                } else {
                    Key::Toggle
                };
                if keys_tx.send(key).is_err() {
                    break;
                }
            }
        })
        .context("spawning stdin reader")?;

    loop {
        match keys_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Key::Toggle) => {
                if player.is_paused() {
                    player.resume()?;
                } else {
                    player.pause();
                }
            }
            Ok(Key::Seek(ms)) => {
                if !player.seek_to(ms) {
                    log::warn!("cannot seek to {:.1}s yet", ms / 1000.0);
                }
            }
            Ok(Key::Quit) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(Duration::from_millis(100)),
        }

        print!(
            "\r{:>7} {} / {} (buffered {}, x{:.1})   ",
            player.state().to_string(),
            format_ms(player.played_time()),
            format_ms(player.total_time()),
            format_ms(player.buffered_time()),
            player.render_speed()
        );
        io::stdout().flush().ok();

        if player.state() == TransportState::Finished {
            break;
        }
    }
    println!();
    player.release();
    Ok(())
}

#[cfg(not(feature = "export-wav"))]
fn wav(_args: WavArgs) -> Result<()> {
    bail!(
        "WAV export requires the \"export-wav\" feature. Rebuild with `--features export-wav` to enable it."
    )
}

#[cfg(feature = "export-wav")]
fn wav(args: WavArgs) -> Result<()> {
    use msxplay::ExportConfig;

    let song = load_song(&args.song.file)?;
    let mut config = if args.stereo {
        ExportConfig::stereo()
    } else {
        ExportConfig::default()
    };
    config = config.sample_rate(args.song.rate).song(args.song.song);
    if let Some(ms) = args.play_time {
        config = config.play_time(ms);
    }
    if let Some(ms) = args.song.fade {
        config = config.fade(ms);
    }
    if let Some(loops) = args.song.loops {
        config = config.loops(loops);
    }
    if let Some(gain) = args.song.gain {
        config = config.gain(gain);
    }
    if let Some(ms) = args.silent_limit {
        config = config.silent_limit(ms);
    }

    println!(
        "Rendering {} to {}...",
        args.song.file.display(),
        args.output.display()
    );
    let summary = msxplay::export_to_wav(engine_factory(), &song, &config, &args.output)?;
    println!("Export complete! ({})", format_ms(summary.duration_ms));
    Ok(())
}

#[cfg(feature = "vgm-engine")]
fn engine_factory() -> msxplay::VgmEngineFactory {
    msxplay::VgmEngineFactory
}

#[cfg(not(feature = "vgm-engine"))]
fn engine_factory() -> impl msxplay::EngineFactory {
    |_rate: u32| -> msxplay::Result<Box<dyn msxplay::DecoderEngine>> {
        Err(msxplay::MsxPlayError::ConfigError(
            "no decoder engine built in; enable the \"vgm-engine\" feature".into(),
        ))
    }
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}.{}", secs / 60, secs % 60, (ms % 1000) / 100)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match cli.command {
        Command::Play(args) => play(args),
        Command::Wav(args) => wav(args),
    }
}
