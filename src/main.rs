use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rvm_live::capture::{FrameSource, StillImageSource, WebcamCapture};
use rvm_live::output::V4L2Output;
use rvm_live::scheduler::IntervalClock;
use rvm_live::segmentation;
use rvm_live::{Scheduler, SchedulerHandle, SchedulerState, SessionConfig, ViewMode};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Use a still image as the frame source instead of a webcam
    #[arg(long)]
    input_image: Option<PathBuf>,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Model input width
    #[arg(long, default_value_t = 640)]
    capture_width: u32,

    /// Model input height
    #[arg(long, default_value_t = 480)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Display refresh rate in frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Path to the recurrent matting model (ONNX file)
    #[arg(long)]
    model: PathBuf,

    /// Internal resolution scale used by the model
    #[arg(long, default_value_t = 0.5)]
    downsample_ratio: f32,

    /// What to show on the output device
    #[arg(long, value_enum, default_value_t = ViewMode::PlainWhite)]
    view: ViewMode,

    /// Restart attempts after a capture failure before giving up
    #[arg(long, default_value_t = 3)]
    max_restarts: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = SessionConfig {
        frame_width: args.capture_width,
        frame_height: args.capture_height,
        downsample_ratio: args.downsample_ratio,
        target_fps: args.fps,
    };
    config.validate().context("Invalid session configuration")?;

    tracing::info!("rvm-live starting");
    tracing::info!("Frames: {}x{}", config.frame_width, config.frame_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", config.target_fps);
    tracing::info!("Downsample ratio: {}", config.downsample_ratio);

    let model = segmentation::load_default_model(&args.model)?;

    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    match &args.input_image {
        Some(path) => {
            let source = StillImageSource::new(path, config.frame_width, config.frame_height)
                .context("Failed to initialize still image source")?;
            run(source, model, output, &config, &args).await
        }
        None => {
            let source = WebcamCapture::new(args.input_device, config.frame_width, config.frame_height)
                .context("Failed to initialize webcam capture")?;
            run(source, model, output, &config, &args).await
        }
    }
}

async fn run<S: FrameSource>(
    source: S,
    model: segmentation::RobustVideoMatting,
    output: V4L2Output,
    config: &SessionConfig,
    args: &Args,
) -> Result<()> {
    let scheduler = Scheduler::new(source, model, output, IntervalClock::new(config.target_fps), config);
    let handle = scheduler.handle();
    handle.set_view_mode(args.view);
    handle.start();

    tracing::info!("Press Ctrl+C to stop");

    let (finished, supervised) = tokio::join!(scheduler.run(), supervise(&handle, args.max_restarts));

    tracing::info!(
        "Processed {} frames, {} tensors outstanding after teardown",
        finished.cycles,
        finished.ledger.outstanding()
    );

    supervised
}

/// Watch for faults and Ctrl+C, restarting after capture failures.
async fn supervise(handle: &SchedulerHandle, max_restarts: u32) -> Result<()> {
    let mut restarts = 0;

    let outcome = loop {
        if handle.state() == SchedulerState::Faulted {
            let error = handle.last_error();
            let message = error.as_ref().map(|e| e.to_string()).unwrap_or_default();
            let recoverable = error.as_ref().is_some_and(|e| e.implies_source_change());

            if !recoverable || restarts >= max_restarts {
                break Err(anyhow!("matting pipeline faulted: {message}"));
            }

            restarts += 1;
            tracing::warn!("Restarting after failure ({}/{}): {}", restarts, max_restarts, message);
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.start();
            continue;
        }

        tokio::select! {
            _ = handle.state_changed() => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    break Err(anyhow::Error::new(err).context("Failed to listen for Ctrl+C"));
                }
                tracing::info!("Ctrl+C received, stopping");
                handle.stop();
                break Ok(());
            }
        }
    };

    handle.shutdown();
    outcome
}
