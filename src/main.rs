//! cam-importer binary: capture frames from a configured camera.

use std::env;
use std::path::PathBuf;
use std::process;
use std::thread;

use anyhow::{bail, Context};
use chrono::Local;
use fern::Dispatch;
use log::{debug, error, info, warn, LevelFilter};

use cam_importer::{
    available_devices, ensure_ready, Camera, CaptureConfig, Frame, ReconnectPolicy, ReplayCamera,
    V4l2Camera,
};

const USAGE: &str =
    "usage: cam-importer <config.toml> [--frames N] [--replay FILE] [--list-devices]";

/// Parsed command line.
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    frames: Option<u64>,
    replay: Option<PathBuf>,
    list_devices: bool,
}

impl Args {
    fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--frames" => {
                    let value = args.next().context("--frames needs a count")?;
                    parsed.frames = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid frame count {value:?}"))?,
                    );
                }
                "--replay" => {
                    parsed.replay = Some(args.next().context("--replay needs a file")?.into());
                }
                "--list-devices" => parsed.list_devices = true,
                "-h" | "--help" => bail!(USAGE),
                flag if flag.starts_with('-') => bail!("unknown option {flag}\n{USAGE}"),
                _ if parsed.config.is_some() => bail!("more than one config file given\n{USAGE}"),
                _ => parsed.config = Some(arg.into()),
            }
        }

        if parsed.config.is_none() && !parsed.list_devices {
            bail!(USAGE);
        }
        Ok(parsed)
    }
}

fn setup_logging(level: LevelFilter) -> Result<(), fern::InitError> {
    Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                msg
            ));
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}

fn list_devices() {
    let devices = available_devices();
    if devices.is_empty() {
        info!("no video devices found");
    }
    for node in devices {
        info!(
            "{}: {}",
            node.path,
            node.name.as_deref().unwrap_or("(unnamed)")
        );
    }
}

/// Query the device controls, apply the configured values and log the result.
fn setup_controls(camera: &mut V4l2Camera, config: &CaptureConfig) {
    let registry = match camera.query_controls() {
        Ok(registry) => registry,
        Err(err) => {
            warn!("unable to query controls: {err}");
            return;
        }
    };

    match camera.apply_controls(&registry, config) {
        Ok(summary) => info!(
            "controls: {} applied, {} skipped, {} mismatched, {} failed",
            summary.applied, summary.skipped, summary.mismatched, summary.failed
        ),
        Err(err) => warn!("unable to apply controls: {err}"),
    }
    for line in camera.describe_controls(&registry) {
        info!("{line}");
    }
}

/// Capture until `limit` frames succeeded, or forever without a limit.
///
/// `after_reopen` runs whenever the reconnect loop had to reopen the camera.
/// A failed capture waits the policy's initial delay before the next try.
fn capture_loop<C, F>(
    camera: &mut C,
    policy: &ReconnectPolicy,
    limit: Option<u64>,
    mut after_reopen: F,
) -> anyhow::Result<u64>
where
    C: Camera,
    F: FnMut(&mut C),
{
    let settings = camera.settings().cloned().context("camera was never opened")?;
    let mut frame = Frame::for_settings(&settings);
    let mut captured = 0u64;

    while limit.is_none_or(|limit| captured < limit) {
        if ensure_ready(camera, policy)? {
            after_reopen(camera);
        }

        match camera.capture_image(&mut frame) {
            Ok(()) => {
                captured += 1;
                debug!(
                    "frame {}: {} bytes at {:?}",
                    frame.metadata.sequence, frame.metadata.bytes_used, frame.metadata.timestamp
                );
            }
            Err(err) => {
                error!("capture failed: {err}");
                thread::sleep(policy.initial_delay);
            }
        }
    }

    Ok(captured)
}

fn run_device(config: &CaptureConfig, frames: Option<u64>) -> anyhow::Result<u64> {
    list_devices();

    let mut camera = V4l2Camera::new().with_options(config.camera_options());
    camera
        .open(&config.device, &config.settings())
        .with_context(|| format!("unable to open {}", config.device))?;

    match camera.valid_settings() {
        Ok(settings) => {
            info!("{} supports {} settings", config.device, settings.len());
            for entry in &settings {
                debug!("  {entry}");
            }
        }
        Err(err) => warn!("unable to enumerate settings: {err}"),
    }

    setup_controls(&mut camera, config);

    capture_loop(&mut camera, &config.reconnect_policy(), frames, |camera| {
        setup_controls(camera, config);
    })
}

fn run_replay(config: &CaptureConfig, file: &str, frames: Option<u64>) -> anyhow::Result<u64> {
    let mut camera = ReplayCamera::new();
    camera
        .open(file, &config.settings())
        .with_context(|| format!("unable to replay {file}"))?;

    capture_loop(&mut camera, &config.reconnect_policy(), frames, |_| {})
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse(env::args().skip(1))?;

    let Some(config_path) = args.config else {
        setup_logging(LevelFilter::Info)?;
        list_devices();
        return Ok(());
    };

    let config = CaptureConfig::load(&config_path)
        .with_context(|| format!("unable to load {}", config_path.display()))?;
    setup_logging(config.logging.level_filter()?)?;

    if args.list_devices {
        list_devices();
        return Ok(());
    }

    let captured = match &args.replay {
        Some(file) => run_replay(&config, &file.to_string_lossy(), args.frames)?,
        None => run_device(&config, args.frames)?,
    };
    info!("captured {captured} frames");
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}
