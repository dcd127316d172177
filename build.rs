use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    application: Application,
    devices: Devices,
    stream: Stream,
    codec: Codec,
    buffers: Buffers,
    session: Session,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Devices {
    capture: String,
    playback: String,
}

#[derive(Deserialize)]
struct Stream {
    sample_rate: u32,
    channels: u32,
    frames_per_buffer: usize,
}

#[derive(Deserialize)]
struct Codec {
    format: String,
    frame_duration_ms: u32,
    bitrate: i32,
}

#[derive(Deserialize)]
struct Buffers {
    slot_frames: usize,
    ring_periods: usize,
    event_queue: usize,
}

#[derive(Deserialize)]
struct Session {
    run_seconds: u64,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.devices.capture);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.devices.playback);

    println!("cargo:rustc-env=SAMPLE_RATE={}", config.stream.sample_rate);
    println!("cargo:rustc-env=CHANNELS={}", config.stream.channels);
    println!(
        "cargo:rustc-env=FRAMES_PER_BUFFER={}",
        config.stream.frames_per_buffer
    );

    println!("cargo:rustc-env=STREAM_FORMAT={}", config.codec.format);
    println!(
        "cargo:rustc-env=FRAME_DURATION_MS={}",
        config.codec.frame_duration_ms
    );
    println!("cargo:rustc-env=CODEC_BITRATE={}", config.codec.bitrate);

    println!("cargo:rustc-env=SLOT_FRAMES={}", config.buffers.slot_frames);
    println!("cargo:rustc-env=RING_PERIODS={}", config.buffers.ring_periods);
    println!("cargo:rustc-env=EVENT_QUEUE={}", config.buffers.event_queue);

    println!("cargo:rustc-env=RUN_SECONDS={}", config.session.run_seconds);
}
