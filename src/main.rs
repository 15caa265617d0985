//! Sequin - multi-format MIDI player
//!
//! Entry point for the command-line player.

use std::fs::File;
use std::io::{self, BufRead, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tracing::{info, warn};

use sequin::config::{self, PlayerConfig};
use sequin::dsp::Quality;
use sequin::engine::{
    input_ports, output_devices, AudioSink, ControlState, CpalSink, LiveRenderer, PcmSink,
    PlayerChannels, PlayerCommand, PlayerEvent, RenderError, RenderPipeline, INTERNAL_SAMPLE_RATE,
};
use sequin::sequence::{self, SequenceFormat};
use sequin::synth::ToneSynth;

#[derive(Parser, Debug)]
#[command(name = "sequin", version, about = "Play MIDI, MUS, XMI, HMI and HMP songs")]
struct Cli {
    /// Song file, or //MIDIIN<port> for live input
    #[arg(value_name = "SONG")]
    path: Option<PathBuf>,

    /// Run non-interactively
    #[arg(short, long)]
    quiet: bool,

    /// Play only once and then exit
    #[arg(short = '1', long)]
    play_once: bool,

    /// Select an individual song, if multiple in file (1-based)
    #[arg(short = 's', long = "song", value_name = "NUM")]
    song_number: Option<usize>,

    /// Render to a WAV file (implies --quiet and --play-once)
    #[arg(short, long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Ignore MIDI panning information
    #[arg(short, long)]
    mono: bool,

    /// Output buffer size in frames
    #[arg(short, long, value_name = "FRAMES")]
    buf: Option<usize>,

    /// Output gain
    #[arg(short, long)]
    gain: Option<f32>,

    /// Output sample rate in Hz
    #[arg(short, long)]
    rate: Option<u32>,

    /// Highpass cutoff in Hz (0 disables)
    #[arg(short, long, value_name = "HZ")]
    filter: Option<f32>,

    /// Resampler quality: nearest, linear or cubic
    #[arg(long)]
    quality: Option<Quality>,

    /// Maximum tail rendered after the end of a WAV render, in seconds
    #[arg(long, value_name = "SECS")]
    tail: Option<f32>,

    /// Load settings from a JSON file; flags override it
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// List MIDI input ports and audio output devices, then exit
    #[arg(long)]
    list_ports: bool,
}

/// Writes bulk-rendered PCM to a WAV file.
struct WavSink {
    writer: hound::WavWriter<BufWriter<File>>,
}

impl PcmSink for WavSink {
    fn write(&mut self, samples: &[i16]) -> Result<(), RenderError> {
        for &sample in samples {
            self.writer
                .write_sample(sample)
                .map_err(|e| RenderError::Sink(e.to_string()))?;
        }
        Ok(())
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<PlayerConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_from_file(path)?,
        None => PlayerConfig::default(),
    };
    if cli.play_once || cli.out.is_some() {
        config.looping = false;
    }
    if let Some(song) = cli.song_number {
        config.song = song.saturating_sub(1);
    }
    if cli.mono {
        config.stereo = false;
    }
    if let Some(buf) = cli.buf {
        config.buffer_frames = buf;
    }
    if let Some(gain) = cli.gain {
        config.gain = gain;
    }
    if let Some(rate) = cli.rate {
        config.sample_rate = rate;
    }
    if let Some(filter) = cli.filter {
        config.filter_hz = filter;
    }
    if let Some(quality) = cli.quality {
        config.quality = quality;
    }
    if let Some(tail) = cli.tail {
        config.max_tail_secs = tail;
    }
    config.validate()?;
    Ok(config)
}

fn list_ports() -> anyhow::Result<()> {
    println!("MIDI inputs:");
    for port in input_ports()? {
        println!("  //MIDIIN{}  {}", port.index, port.name);
    }
    println!("Audio outputs:");
    for device in output_devices() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}  {}{}", device.index, device.name, marker);
    }
    Ok(())
}

fn short_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn render_wav(
    mut pipeline: RenderPipeline<ToneSynth>,
    out: &Path,
    config: &PlayerConfig,
) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: config.channels(),
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let writer = hound::WavWriter::create(out, spec)
        .with_context(|| format!("cannot create {}", out.display()))?;
    let mut sink = WavSink { writer };

    let summary = pipeline.render_bulk(&mut sink, Some(config.max_tail()))?;
    sink.writer.finalize().context("cannot finish WAV file")?;

    println!(
        "wrote {} ({:.1} s)",
        out.display(),
        summary.frames as f64 / config.sample_rate as f64
    );
    Ok(())
}

fn spawn_key_reader() -> mpsc::Receiver<char> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { return };
            for key in line.chars() {
                if tx.send(key).is_err() {
                    return;
                }
            }
        }
    });
    rx
}

fn print_event(event: PlayerEvent) {
    match event {
        PlayerEvent::Started { sample_rate, channels } => {
            info!(sample_rate, channels, "playback started")
        }
        PlayerEvent::SongChanged { index, count } => println!("song {}/{}", index + 1, count),
        PlayerEvent::Ended => println!("end of song"),
        PlayerEvent::Asleep => println!("waiting for input..."),
        PlayerEvent::Awake => {}
        PlayerEvent::DeviceLost { attempt } => {
            warn!(attempt, "audio device lost, reopening")
        }
        PlayerEvent::Stopped => {}
    }
}

fn play_live(
    pipeline: RenderPipeline<ToneSynth>,
    config: &PlayerConfig,
    interactive: bool,
    play_once: bool,
) -> anyhow::Result<()> {
    let control = Arc::new(ControlState::new(config.looping));
    let (mut ui, handle) = PlayerChannels::with_defaults().split();

    let (buffer_frames, channels, sample_rate) =
        (config.buffer_frames, config.channels(), config.sample_rate);
    let renderer = LiveRenderer::new(
        pipeline,
        Arc::clone(&control),
        handle,
        move || {
            CpalSink::open(buffer_frames, channels, Some(sample_rate))
                .map(|sink| Box::new(sink) as Box<dyn AudioSink>)
        },
        config.live_options(play_once),
    );
    let render_thread = thread::Builder::new()
        .name("render".to_string())
        .spawn(move || renderer.run().map(|_| ()))
        .context("cannot start render thread")?;

    let keys = interactive.then(|| {
        println!("keys (then Enter): p = pause, r = restart, n/b = next/previous song, q = quit");
        spawn_key_reader()
    });

    while !render_thread.is_finished() {
        ui.drain_events().for_each(print_event);
        let Some(keys) = &keys else {
            thread::sleep(Duration::from_millis(30));
            continue;
        };
        let command = match keys.recv_timeout(Duration::from_millis(30)) {
            Ok('p') => {
                let paused = control.toggle_pause();
                println!("{}", if paused { "paused" } else { "resumed" });
                None
            }
            Ok('r') => {
                control.set_paused(false);
                Some(PlayerCommand::Restart)
            }
            Ok('n') => Some(PlayerCommand::NextSong),
            Ok('b') => Some(PlayerCommand::PreviousSong),
            Ok('q') | Err(mpsc::RecvTimeoutError::Disconnected) => {
                control.stop();
                None
            }
            Ok(_) | Err(mpsc::RecvTimeoutError::Timeout) => None,
        };
        if let Some(command) = command {
            if ui.send_command(command).is_err() {
                warn!(?command, "command queue full, dropping command");
            }
        }
    }

    ui.drain_events().for_each(print_event);
    render_thread
        .join()
        .map_err(|_| anyhow!("render thread panicked"))??;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if cli.list_ports {
        return list_ports();
    }
    let Some(path) = cli.path.clone() else {
        bail!("no song given (see --help)");
    };
    let config = build_config(&cli)?;

    let sequence = sequence::load_path(&path, config.event_capacity)
        .with_context(|| format!("couldn't load {}", path.display()))?;
    let live_input = sequence.format() == SequenceFormat::MidiIn;
    if live_input && cli.out.is_some() {
        bail!("live input cannot be rendered to a file");
    }
    println!("{} [{}]", short_name(&path), sequence.format());

    let mut pipeline = RenderPipeline::new(
        ToneSynth::new(INTERNAL_SAMPLE_RATE),
        config.sample_rate,
        config.channels(),
        config.quality,
    )?;
    pipeline.set_gain(config.gain);
    pipeline.set_filter(config.filter_hz);
    pipeline.parts_mut().0.set_looping(config.looping);
    pipeline.load(sequence)?;

    let (sequencer, synth) = pipeline.parts_mut();
    if sequencer.song_count() > 1 {
        let index = sequencer.set_song(config.song, synth)?;
        println!("song {}/{}", index + 1, sequencer.song_count());
    }

    match &cli.out {
        Some(out) => render_wav(pipeline, out, &config),
        None => play_live(pipeline, &config, !cli.quiet, cli.play_once),
    }
}
