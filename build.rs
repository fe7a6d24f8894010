use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    plugin: Plugin,
    pcm: Pcm,
}

#[derive(Deserialize)]
struct Plugin {
    name: String,
    pcm_name: String,
}

#[derive(Deserialize)]
struct Pcm {
    default_rate: u32,
    default_frame_bytes: u32,
    constraints: Constraints,
}

#[derive(Deserialize)]
struct Constraints {
    channels_min: u32,
    channels_max: u32,
    rate_min: u32,
    rate_max: u32,
    buffer_bytes_min: u32,
    buffer_bytes_max: u32,
    period_bytes_min: u32,
    period_bytes_max: u32,
    periods_min: u32,
    periods_max: u32,
    formats: Vec<String>,
}

// Keep in sync with `config::format_from_name`.
const KNOWN_FORMATS: &[&str] = &[
    "S8", "U8", "S16_LE", "S16_BE", "U16_LE", "U16_BE", "S32_LE", "S32_BE", "FLOAT_LE",
    "FLOAT_BE", "MU_LAW", "A_LAW",
];

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    let c = &config.pcm.constraints;
    if c.channels_min > c.channels_max
        || c.rate_min > c.rate_max
        || c.buffer_bytes_min > c.buffer_bytes_max
        || c.period_bytes_min > c.period_bytes_max
        || c.periods_min > c.periods_max
    {
        panic!("config.toml: a [pcm.constraints] minimum exceeds its maximum");
    }
    if c.formats.is_empty() {
        panic!("config.toml: [pcm.constraints] formats must not be empty");
    }
    for f in &c.formats {
        if !KNOWN_FORMATS.contains(&f.as_str()) {
            panic!("config.toml: unknown sample format {}", f);
        }
    }

    println!("cargo:rustc-env=PLUGIN_NAME={}", config.plugin.name);
    println!("cargo:rustc-env=PCM_NAME={}", config.plugin.pcm_name);

    println!("cargo:rustc-env=PCM_DEFAULT_RATE={}", config.pcm.default_rate);
    println!("cargo:rustc-env=PCM_DEFAULT_FRAME_BYTES={}", config.pcm.default_frame_bytes);

    println!("cargo:rustc-env=PCM_CHANNELS_MIN={}", c.channels_min);
    println!("cargo:rustc-env=PCM_CHANNELS_MAX={}", c.channels_max);
    println!("cargo:rustc-env=PCM_RATE_MIN={}", c.rate_min);
    println!("cargo:rustc-env=PCM_RATE_MAX={}", c.rate_max);
    println!("cargo:rustc-env=PCM_BUFFER_BYTES_MIN={}", c.buffer_bytes_min);
    println!("cargo:rustc-env=PCM_BUFFER_BYTES_MAX={}", c.buffer_bytes_max);
    println!("cargo:rustc-env=PCM_PERIOD_BYTES_MIN={}", c.period_bytes_min);
    println!("cargo:rustc-env=PCM_PERIOD_BYTES_MAX={}", c.period_bytes_max);
    println!("cargo:rustc-env=PCM_PERIODS_MIN={}", c.periods_min);
    println!("cargo:rustc-env=PCM_PERIODS_MAX={}", c.periods_max);
    println!("cargo:rustc-env=PCM_FORMATS={}", c.formats.join(","));

    // The ioplug/ctl_ext entry points live in libasound; alsa-sys links it as
    // well, this only makes a missing dev package fail with a clear message.
    pkg_config::Config::new()
        .cargo_metadata(false)
        .probe("alsa")
        .expect("Failed to find alsa. Please install libasound2-dev.");
}
