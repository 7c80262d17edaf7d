//! frosted-bench: CLI tool for exercising the blur pipeline.
//!
//! Loads one or more images, requests a blur of each through an
//! [`ImageBlurrer`] (optionally from several simulated callers per image
//! so requests coalesce), drives the home loop until every result is
//! delivered, and prints a coalescing and timing report. Useful for:
//!
//! - Tuning scale factor, radius and kernel against real images
//! - Observing how duplicate and canceled callers are coalesced
//! - Warming or inspecting a disk cache directory
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin frosted-bench -- [OPTIONS] <IMAGE_PATH>...
//! ```
//!
//! Set `RUST_LOG=frosted=trace` to see every request lifecycle marker.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use crossbeam_channel::Sender;
use frosted::{
    BlurConfig, BlurEvent, BlurKernel, BlurrerConfig, CoalescerStats, CropRegion, ImageBlurrer,
    ImageCache, MemoryCache, ShutdownPolicy,
};
use frosted_io::{DiskCache, TieredCache};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Blur pipeline exerciser for frosted.
///
/// Blurs each input image through the coalescing pipeline and reports
/// per-image outcomes plus coalescing statistics.
#[derive(Parser)]
#[command(name = "frosted-bench", version)]
struct Cli {
    /// Paths to the input images (PNG, JPEG, BMP, WebP).
    #[arg(required = true)]
    image_paths: Vec<PathBuf>,

    /// Integer downscale factor applied before blurring.
    #[arg(long, default_value_t = BlurConfig::DEFAULT_SCALE_FACTOR, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    scale_factor: u32,

    /// Blur radius in downscaled pixels.
    #[arg(long, default_value_t = BlurConfig::DEFAULT_RADIUS)]
    radius: u32,

    /// Blur kernel.
    #[arg(long, value_enum, default_value_t = Kernel::Stack)]
    kernel: Kernel,

    /// Batching window in milliseconds (0 delivers immediately).
    #[arg(long, default_value_t = BlurrerConfig::DEFAULT_BATCH_DELAY_MS)]
    batch_delay_ms: u64,

    /// What the dispatcher does with queued work on stop.
    #[arg(long, value_enum, default_value_t = Shutdown::Abandon)]
    shutdown: Shutdown,

    /// Region to blur, as `WIDTH,HEIGHT,LEFT,TOP` (0 width/height = full).
    #[arg(long, value_parser = parse_crop)]
    crop: Option<CropRegion>,

    /// Simulated callers requesting each image.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    callers: usize,

    /// How many of each image's callers cancel right after requesting.
    #[arg(long, default_value_t = 0)]
    cancel: usize,

    /// Persist blurred images in this directory (memory-only otherwise).
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Disk cache size limit in megabytes.
    #[arg(long, default_value_t = 256)]
    disk_cache_mb: u64,

    /// Memory cache size limit in megabytes.
    #[arg(long, default_value_t = 64)]
    memory_cache_mb: usize,

    /// Write each blurred image as `<stem>.blur.png` into this directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Give up waiting for results after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Output the report as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,

    /// Full blurrer config as a JSON string.
    ///
    /// When provided, all other blur parameter flags are ignored.
    /// The JSON must be a valid `BlurrerConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Blur kernel selection.
#[derive(Clone, Copy, ValueEnum)]
enum Kernel {
    /// Stack blur (triangle-weighted moving sum).
    Stack,
    /// Box blur (uniform moving average).
    Box,
}

/// Shutdown policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Shutdown {
    /// Leave queued work unprocessed.
    Abandon,
    /// Process queued work before exiting.
    Drain,
}

/// Parse `WIDTH,HEIGHT,LEFT,TOP`.
fn parse_crop(value: &str) -> Result<CropRegion, String> {
    let parts: Vec<u32> = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| format!("invalid crop component {part:?}: {e}"))
        })
        .collect::<Result<_, _>>()?;

    match parts.as_slice() {
        &[width, height, left, top] => Ok(CropRegion::new(width, height, left, top)),
        _ => Err(format!(
            "expected WIDTH,HEIGHT,LEFT,TOP, got {} component(s)",
            parts.len()
        )),
    }
}

/// Build a [`BlurrerConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<BlurrerConfig, String> {
    if let Some(ref json) = cli.config_json {
        return BlurrerConfig::from_json(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let config = BlurrerConfig {
        batch_delay_ms: cli.batch_delay_ms,
        shutdown: match cli.shutdown {
            Shutdown::Abandon => ShutdownPolicy::Abandon,
            Shutdown::Drain => ShutdownPolicy::Drain,
        },
        blur: BlurConfig {
            scale_factor: cli.scale_factor,
            radius: cli.radius,
            kernel: match cli.kernel {
                Kernel::Stack => BlurKernel::Stack,
                Kernel::Box => BlurKernel::Box,
            },
        },
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Build the cache the dispatcher reads and writes.
fn cache_from_cli(cli: &Cli) -> Result<Arc<dyn ImageCache>, String> {
    let memory = MemoryCache::new(cli.memory_cache_mb.saturating_mul(1024 * 1024));
    let Some(ref dir) = cli.cache_dir else {
        return Ok(Arc::new(memory));
    };
    let disk = DiskCache::open(dir, cli.disk_cache_mb.saturating_mul(1024 * 1024))
        .map_err(|e| format!("Error opening disk cache {}: {e}", dir.display()))?;
    Ok(Arc::new(TieredCache::new(memory, disk)))
}

/// Outcome of one image.
#[derive(Serialize)]
struct ImageReport {
    path: PathBuf,
    key: String,
    outcome: String,
    width: Option<u32>,
    height: Option<u32>,
    listeners_notified: usize,
    listeners_canceled: usize,
}

/// Whole-run report.
#[derive(Serialize)]
struct Report {
    images: Vec<ImageReport>,
    stats: CoalescerStats,
    coalescing_ratio: f64,
    elapsed_ms: f64,
    idle: bool,
}

impl Report {
    fn print(&self) {
        println!("{:<40} {:>10} {:>8} {:>8}", "Image", "Outcome", "Size", "Notified");
        println!("{}", "-".repeat(70));
        for image in &self.images {
            let size = match (image.width, image.height) {
                (Some(w), Some(h)) => format!("{w}x{h}"),
                _ => "-".to_string(),
            };
            println!(
                "{:<40} {:>10} {:>8} {:>8}",
                image.path.display(),
                image.outcome,
                size,
                image.listeners_notified,
            );
        }
        println!();
        println!("Requests:   {}", self.stats.total_requests);
        println!("Coalesced:  {}", self.stats.coalesced_requests);
        println!("New work:   {}", self.stats.new_requests);
        println!("Canceled:   {}", self.stats.canceled_requests);
        println!("Ticks:      {}", self.stats.delivery_ticks);
        println!("Ratio:      {:.1}%", self.coalescing_ratio * 100.0);
        println!("Elapsed:    {:.3}ms", self.elapsed_ms);
        if !self.idle {
            println!("Warning: timed out with requests still outstanding");
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn output_path(out_dir: &Path, image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    out_dir.join(format!("{stem}.blur.png"))
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let cache = match cache_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(ref dir) = cli.out_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("Error creating {}: {e}", dir.display());
        return ExitCode::FAILURE;
    }

    let mut sources = Vec::with_capacity(cli.image_paths.len());
    for path in &cli.image_paths {
        match frosted_io::load_image(path) {
            Ok(image) => {
                eprintln!(
                    "Image: {} ({}x{})",
                    path.display(),
                    image.width(),
                    image.height()
                );
                sources.push(Arc::new(image));
            }
            Err(e) => {
                eprintln!("Error loading {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }
    eprintln!("Config: {config:#?}");
    eprintln!();

    let blurrer = match ImageBlurrer::start(cache, &config) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error starting blurrer: {e}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let (events_tx, events_rx) = crossbeam_channel::unbounded::<(usize, BlurEvent)>();
    let crop = cli.crop.unwrap_or(CropRegion::FULL);
    let mut containers = Vec::with_capacity(sources.len());

    for (index, (path, source)) in cli.image_paths.iter().zip(&sources).enumerate() {
        let cache_key = path.to_string_lossy();
        let mut mine = Vec::with_capacity(cli.callers);
        for _ in 0..cli.callers {
            let listener = notifier(index, events_tx.clone());
            match blurrer.blur_cropped(Arc::clone(source), &cache_key, crop, listener) {
                Ok(container) => mine.push(container),
                Err(e) => {
                    eprintln!("Error requesting blur of {}: {e}", path.display());
                    return ExitCode::FAILURE;
                }
            }
        }
        for container in mine.iter().take(cli.cancel) {
            if let Err(e) = container.cancel() {
                eprintln!("Error canceling request: {e}");
                return ExitCode::FAILURE;
            }
        }
        containers.push(mine);
    }
    drop(events_tx);

    let idle = match blurrer.wait_idle(Duration::from_secs(cli.timeout_secs)) {
        Ok(idle) => idle,
        Err(e) => {
            eprintln!("Error driving deliveries: {e}");
            return ExitCode::FAILURE;
        }
    };
    let elapsed = start.elapsed();
    blurrer.stop();
    blurrer.log_stats();

    let mut notified = vec![0_usize; sources.len()];
    for (index, _) in events_rx.try_iter() {
        notified[index] += 1;
    }

    let mut images = Vec::with_capacity(sources.len());
    for (index, (path, mine)) in cli.image_paths.iter().zip(&containers).enumerate() {
        let live = mine.iter().find(|c| !c.is_canceled());
        let image = live.and_then(frosted::BlurredImageContainer::image);
        let outcome = match live.map(frosted::BlurredImageContainer::status) {
            None => "canceled".to_string(),
            Some(frosted::ContainerStatus::Ready(_)) => "ok".to_string(),
            Some(frosted::ContainerStatus::Failed(e)) => format!("error: {e}"),
            Some(frosted::ContainerStatus::Pending) => "pending".to_string(),
            Some(frosted::ContainerStatus::Canceled) => "canceled".to_string(),
        };

        if let (Some(dir), Some(image)) = (cli.out_dir.as_deref(), image.as_deref()) {
            let out = output_path(dir, path);
            match frosted_io::save_png(image, &out) {
                Ok(()) => info!(path = %out.display(), "blurred image written"),
                Err(e) => eprintln!("Error writing {}: {e}", out.display()),
            }
        }

        images.push(ImageReport {
            path: path.clone(),
            key: mine
                .first()
                .map(|c| c.key().to_string())
                .unwrap_or_default(),
            outcome,
            width: image.as_ref().map(|i| i.width()),
            height: image.as_ref().map(|i| i.height()),
            listeners_notified: notified[index],
            listeners_canceled: mine.iter().filter(|c| c.is_canceled()).count(),
        });
    }

    let stats = blurrer.stats();
    let report = Report {
        images,
        stats,
        coalescing_ratio: stats.coalescing_ratio(),
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        idle,
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        report.print();
    }

    if idle {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Listener that forwards events, tagged with the image index.
fn notifier(index: usize, tx: Sender<(usize, BlurEvent)>) -> impl FnMut(BlurEvent) + Send + 'static {
    move |event: BlurEvent| {
        let _ = tx.send((index, event));
    }
}
