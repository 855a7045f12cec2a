//! Chunk Bridge - 音频 chunk 桥接工具
//!
//! - info: 列出软件 driver 的设备
//! - loopback: 打开双工流，把采集到的 chunk 原样送回回放队列

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};

use chunk_bridge::audio::{Direction, SampleFormat, StreamOptions};
use chunk_bridge::driver::{AudioHost, RunMode, SharedHost, VirtualHost};
use chunk_bridge::engine::{AudioStreamContext, StopMode};

/// Chunk Bridge - Real-time audio chunk bridge
#[derive(Parser)]
#[command(name = "chunk-bridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show audio device information
    Info,

    /// Run a duplex stream that plays back everything it captures
    Loopback(LoopbackArgs),
}

#[derive(clap::Args)]
struct LoopbackArgs {
    /// Run time in seconds
    #[arg(short, long, default_value = "3")]
    seconds: f64,

    /// Sample rate in Hz
    #[arg(short, long, default_value = "48000")]
    rate: u32,

    /// Channel count
    #[arg(short, long, default_value = "2")]
    channels: u16,

    /// Sample format code (1 = float32, 8/16/24/32 = signed integer)
    #[arg(short, long, default_value = "16")]
    format: u32,

    /// Bytes per pulled chunk [default and maximum: one callback period]
    #[arg(long)]
    chunk_bytes: Option<usize>,

    /// Maximum queue depth in chunks (0 = unbounded)
    #[arg(long, default_value = "0")]
    max_queue: usize,

    /// Stop when the driver reports a status condition
    #[arg(long)]
    close_on_error: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match cli.command {
        Commands::Info => show_device_info(),
        Commands::Loopback(ref args) => run_loopback(args),
    }
}

/// 显示设备信息
fn show_device_info() -> anyhow::Result<()> {
    let host = Arc::new(VirtualHost::new(RunMode::Clocked));
    let shared = SharedHost::new(host.clone());
    let lease = shared.acquire()?;

    println!("{}", lease.host().version_text());
    println!("=== Audio Devices ===\n");

    let default_input = host.default_input_device();
    let default_output = host.default_output_device();

    for index in 0..host.device_count() {
        let Some(info) = host.device_info(index) else {
            continue;
        };
        let mut marks = String::new();
        if default_input == Some(index) {
            marks.push_str(" [default input]");
        }
        if default_output == Some(index) {
            marks.push_str(" [default output]");
        }

        println!("[{:>3}] {}{}", index, info.name, marks);
        println!(
            "      channels: {} in / {} out, default rate: {}Hz",
            info.max_input_channels, info.max_output_channels, info.default_sample_rate
        );
        println!(
            "      latency: {:.1}ms low / {:.1}ms high",
            info.default_low_output_latency * 1000.0,
            info.default_high_output_latency * 1000.0
        );
    }

    println!();
    println!("Run a loopback: chunk-bridge loopback --seconds 3");
    Ok(())
}

/// 双工回环
///
/// pipeline 线程：pull 采集 chunk → push 到回放队列，直到队列终止
fn run_loopback(args: &LoopbackArgs) -> anyhow::Result<()> {
    let format = SampleFormat::from_code(args.format)?;
    let options = StreamOptions::default()
        .with_sample_rate(args.rate)
        .with_channels(args.channels)
        .with_format(format)
        .with_max_queue(args.max_queue)
        .with_close_on_error(args.close_on_error);

    let host = Arc::new(VirtualHost::new(RunMode::Clocked));
    let shared = SharedHost::new(host);
    let context = Arc::new(
        AudioStreamContext::open(&shared, Some(options.clone()), Some(options))
            .context("Failed to open loopback stream")?,
    );

    let c = Arc::clone(&context);
    ctrlc::set_handler(move || {
        c.quit();
    })?;

    let chunk_bytes = context.duplex_pull_bytes(args.chunk_bytes);
    let pipeline = {
        let context = Arc::clone(&context);
        thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || -> anyhow::Result<usize> {
                let mut moved = 0;
                while let Some(chunk) = context.pull_chunk(chunk_bytes)? {
                    moved += chunk.len();
                    context.push_chunk(chunk)?;

                    if let Some(message) = context.poll_status(Direction::Input) {
                        log::error!("Closing on driver status: {}", message);
                        context.quit();
                    }
                }
                Ok(moved)
            })?
    };

    println!("Chunk Bridge - Loopback");
    println!(
        "{} Hz, {} ch, {}, {} bytes per chunk",
        args.rate, args.channels, format, chunk_bytes
    );
    println!("Press Ctrl+C to stop.\n");

    context.start()?;

    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds.max(0.0));
    while Instant::now() < deadline && !pipeline.is_finished() {
        thread::sleep(Duration::from_millis(50));
    }

    context.quit();
    context.stop(StopMode::Graceful)?;

    let moved = pipeline
        .join()
        .map_err(|_| anyhow::anyhow!("pipeline thread panicked"))??;

    println!("Moved {} bytes through the pipeline", moved);
    println!("{}", context.stats());
    Ok(())
}
