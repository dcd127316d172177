use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::signal;

use voxlink::audio::{
    AlsaEngine, AudioEngine, Direction, StreamRegistry, StreamRoute, SyntheticEngine,
};
use voxlink::buffer::frame_slots_sized;
use voxlink::codec::{create_decoder, create_encoder};
use voxlink::config::Config;
use voxlink::pipeline::{spawn_event_logger, EventSink, StatsSnapshot};

const USAGE: &str = "usage: voxlink [--synthetic] <devices [--json] | echo [seconds] | loopback [seconds]>";

enum Command {
    Devices { json: bool },
    Echo { seconds: Option<u64> },
    Loopback { seconds: Option<u64> },
}

struct Args {
    synthetic: bool,
    command: Command,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut synthetic = false;
    let mut json = false;
    let mut positional = Vec::new();

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--synthetic" => synthetic = true,
            "--json" => json = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => positional.push(arg),
        }
    }

    let seconds = |idx: usize| -> anyhow::Result<Option<u64>> {
        positional
            .get(idx)
            .map(|s| s.parse().with_context(|| format!("invalid duration \"{s}\"")))
            .transpose()
    };

    let command = match positional.first().map(String::as_str) {
        Some("devices") => Command::Devices { json },
        Some("echo") => Command::Echo { seconds: seconds(1)? },
        Some("loopback") => Command::Loopback { seconds: seconds(1)? },
        Some(other) => bail!("unknown command \"{other}\"\n{USAGE}"),
        None => bail!("{USAGE}"),
    };

    Ok(Args { synthetic, command })
}

fn create_engine(synthetic: bool) -> anyhow::Result<Arc<dyn AudioEngine>> {
    if synthetic {
        return Ok(Arc::new(SyntheticEngine::new()));
    }
    let engine = AlsaEngine::new().context("Failed to initialize ALSA (try --synthetic)")?;
    Ok(Arc::new(engine))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    let args = parse_args()?;

    // 加载配置
    let config = Config::from_env()?;
    config.validate().context("invalid configuration")?;
    log::info!("{} {} starting", config.app_name, config.app_version);

    let engine = create_engine(args.synthetic)?;
    log::info!("audio engine: {}", engine.name());

    match args.command {
        Command::Devices { json } => list_devices(engine, json),
        Command::Echo { seconds } => {
            let run_time = seconds.map(Duration::from_secs).unwrap_or(config.run_time());
            run_echo(&config, engine, run_time).await
        }
        Command::Loopback { seconds } => {
            let run_time = seconds.map(Duration::from_secs).unwrap_or(config.run_time());
            run_loopback(&config, engine, run_time).await
        }
    }
}

fn list_devices(engine: Arc<dyn AudioEngine>, json: bool) -> anyhow::Result<()> {
    let registry = StreamRegistry::new(engine, EventSink::detached());
    let endpoints = registry.resolver().list(None)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&endpoints)?);
        return Ok(());
    }

    for direction in [Direction::Capture, Direction::Playback] {
        println!("{direction} devices:");
        for ep in endpoints.iter().filter(|ep| ep.direction == direction) {
            println!("  {ep}");
        }
    }
    Ok(())
}

/// capture -> encoder -> slot buffer -> decoder -> playback
async fn run_echo(
    config: &Config,
    engine: Arc<dyn AudioEngine>,
    run_time: Duration,
) -> anyhow::Result<()> {
    let (sink, rx) = EventSink::new(config.event_queue);
    let logger = spawn_event_logger(rx);
    let mut registry = StreamRegistry::new(engine, sink.clone());

    let mic = registry
        .resolver()
        .resolve(&config.capture_device, Direction::Capture)?;
    let speaker = registry
        .resolver()
        .resolve(&config.playback_device, Direction::Playback)?;

    let params = config.codec_params()?;
    let settings = config.codec_stream_settings();
    let encoder = create_encoder(&params)?;
    let (slot_tx, slot_rx) = frame_slots_sized(config.slot_frames, encoder.max_frame_bytes());

    let capture = registry.open_with(
        Direction::Capture,
        &mic,
        settings.clone(),
        StreamRoute::Encode {
            encoder,
            slots: slot_tx,
        },
    )?;
    let playback = registry.open_with(
        Direction::Playback,
        &speaker,
        settings,
        StreamRoute::Decode {
            decoder: create_decoder(&params)?,
            slots: slot_rx,
        },
    )?;

    registry.start(capture)?;
    registry.start(playback)?;
    log::info!(
        "echo running: {} -> {} ({}, {} ms frames) for {:?}",
        mic.name,
        speaker.name,
        params.kind,
        params.frame_duration_ms,
        run_time
    );

    wait_for_stop(run_time).await;

    registry.close(capture)?;
    registry.close(playback)?;
    finish(registry, sink, logger).await;
    Ok(())
}

/// Raw PCM capture read by the application and written straight back out.
async fn run_loopback(
    config: &Config,
    engine: Arc<dyn AudioEngine>,
    run_time: Duration,
) -> anyhow::Result<()> {
    let (sink, rx) = EventSink::new(config.event_queue);
    let logger = spawn_event_logger(rx);
    let mut registry = StreamRegistry::new(engine, sink.clone());

    let mic = registry
        .resolver()
        .resolve(&config.capture_device, Direction::Capture)?;
    let speaker = registry
        .resolver()
        .resolve(&config.playback_device, Direction::Playback)?;

    let settings = config.stream_settings();
    let capture = registry.open(Direction::Capture, &mic, settings.clone())?;
    let playback = registry.open(Direction::Playback, &speaker, settings.clone())?;

    registry.start(capture)?;
    registry.start(playback)?;
    log::info!("loopback running: {} -> {} for {:?}", mic.name, speaker.name, run_time);

    // record/play block, so the copy loop gets its own thread
    let stop = Arc::new(AtomicBool::new(false));
    let stopped = Arc::clone(&stop);
    let period_samples = settings.period_samples();
    let copier = tokio::task::spawn_blocking(move || -> anyhow::Result<(StreamRegistry, u64)> {
        let mut buf = vec![0i16; period_samples];
        let mut moved: u64 = 0;
        while !stopped.load(Ordering::Acquire) {
            let n = registry.record(capture, &mut buf)?;
            registry.play(playback, &buf[..n])?;
            moved += n as u64;
        }
        Ok((registry, moved))
    });

    wait_for_stop(run_time).await;
    stop.store(true, Ordering::Release);
    let (mut registry, moved) = copier.await.context("loopback thread panicked")??;

    registry.close(capture)?;
    registry.close(playback)?;
    log::info!("loopback moved {} samples", moved);
    finish(registry, sink, logger).await;
    Ok(())
}

async fn wait_for_stop(run_time: Duration) {
    tokio::select! {
        _ = signal::ctrl_c() => log::info!("Ctrl-C received, shutting down"),
        _ = tokio::time::sleep(run_time) => log::info!("run time elapsed"),
    }
}

async fn finish(registry: StreamRegistry, sink: EventSink, logger: tokio::task::JoinHandle<()>) {
    let stats = sink.stats().snapshot();
    drop(registry);
    drop(sink);
    if let Err(e) = logger.await {
        log::warn!("event logger ended abnormally: {}", e);
    }
    print_stats(&stats);
}

fn print_stats(stats: &StatsSnapshot) {
    println!(
        "frames encoded={} decoded={} codec failures={} overwritten samples={} underruns={} faults={} dropped events={}",
        stats.frames_encoded,
        stats.frames_decoded,
        stats.codec_failures,
        stats.samples_overwritten,
        stats.underruns,
        stats.faults,
        stats.events_dropped,
    );
}
