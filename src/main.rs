//! jumaudio CLI - list devices, play a song or watch a capture device as a text spectrum

use clap::{Parser, Subcommand};
use jumaudio::{Config, Device, DeviceKind, Engine, FftInputMode};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Refresh interval of the spectrum display (~60 fps)
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Columns of the text spectrum
const COLUMNS: usize = 48;

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Parser)]
#[command(name = "jumaudio", about = "Audio engine with live spectrum analysis", version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List playback and capture devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Play a song and draw its spectrum
    Play {
        /// Audio file to play
        file: PathBuf,

        /// Playback device index (default device if omitted)
        #[arg(long)]
        device: Option<usize>,

        /// Music volume in [0, 1]
        #[arg(long, default_value_t = 1.0)]
        volume: f32,
    },

    /// Draw the spectrum of a capture device
    Capture {
        /// Capture device index (default device if omitted)
        #[arg(long)]
        device: Option<usize>,

        /// How long to listen, in seconds
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> jumaudio::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let mut engine = Engine::new();
    engine.init_audio(config.audio)?;
    engine.init_fft(config.fft)?;

    match cli.command {
        Command::Devices { json } => list_devices(&mut engine, json),
        Command::Play {
            file,
            device,
            volume,
        } => play(&mut engine, file, device, volume),
        Command::Capture { device, seconds } => capture(&mut engine, device, seconds),
    }
}

fn list_devices(engine: &mut Engine, json: bool) -> jumaudio::Result<()> {
    let catalog = engine.enumerate_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    for (title, devices) in [("Playback", &catalog.playback), ("Capture", &catalog.capture)] {
        println!("{}:", title);
        if devices.is_empty() {
            println!("  (none)");
        }
        for device in devices {
            let marker = if device.is_default { "*" } else { " " };
            println!("  {} [{}] {}", marker, device.index, device.name);
        }
    }
    Ok(())
}

fn pick_device(
    engine: &mut Engine,
    kind: DeviceKind,
    index: Option<usize>,
) -> jumaudio::Result<Option<Device>> {
    let index = match index {
        Some(index) => index,
        None => return Ok(None),
    };
    let catalog = engine.enumerate_devices()?;
    catalog
        .devices(kind)
        .get(index)
        .cloned()
        .map(Some)
        .ok_or_else(|| {
            jumaudio::AudioError::Device(format!("No {} device at index {}", kind, index))
        })
}

fn play(
    engine: &mut Engine,
    file: PathBuf,
    device: Option<usize>,
    volume: f32,
) -> jumaudio::Result<()> {
    let device = pick_device(engine, DeviceKind::Playback, device)?;
    engine.open_playback_device(device.as_ref())?;
    engine.set_music_volume(volume)?;
    engine.set_fft_input_mode(FftInputMode::Playback)?;
    engine.play_song(&file)?;

    let length = engine.length_seconds()?;
    println!("Playing {} ({:.1}s)", file.display(), length);

    while !engine.is_finished()? {
        let cursor = engine.cursor_seconds()?;
        let frame = engine.analyze(FRAME_INTERVAL.as_millis() as i32)?;
        draw(frame.result, frame.level, &format!("{:6.1}s", cursor));
        std::thread::sleep(FRAME_INTERVAL);
    }
    println!();

    let status = engine.status();
    log::info!("Finished with {} underruns", status.underruns);
    println!("{}", serde_json::to_string(&status)?);
    Ok(())
}

fn capture(engine: &mut Engine, device: Option<usize>, seconds: u64) -> jumaudio::Result<()> {
    let device = pick_device(engine, DeviceKind::Capture, device)?;
    engine.open_capture_device(device.as_ref())?;
    engine.set_fft_input_mode(FftInputMode::Capture)?;

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        let frame = engine.analyze(FRAME_INTERVAL.as_millis() as i32)?;
        draw(frame.result, frame.level, "capture");
        std::thread::sleep(FRAME_INTERVAL);
    }
    println!();
    Ok(())
}

/// Render one line of bars, each column the peak of its share of bins
fn draw(result: &[f32], level: f32, label: &str) {
    let per_column = (result.len() / COLUMNS).max(1);
    let line: String = result
        .chunks(per_column)
        .take(COLUMNS)
        .map(|chunk| {
            let peak = chunk.iter().copied().fold(0.0f32, f32::max);
            BARS[((peak * (BARS.len() - 1) as f32).round() as usize).min(BARS.len() - 1)]
        })
        .collect();

    print!("\r{} {} level {:.3}", label, line, level);
    let _ = std::io::stdout().flush();
}
