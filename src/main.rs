// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use ballcam::{
    acquisition::{AcquisitionOutcome, TriggeredAcquisition},
    args::{Args, Mode},
    error::ImageError,
    image::MaterializedImage,
    mock::{SimulatedCamera, SimulatedConfig},
    motion::run_motion_watch,
    source::{MonotonicClock, RunFlag},
    video::{FileOutput, VideoManager},
};
use clap::Parser;
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    thread,
};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const PRE_IMAGE: &str = "pre_image.jpeg";
const FINAL_IMAGE: &str = "final_image.jpeg";
const SUBTRACTED_IMAGE: &str = "subtracted_image.jpeg";

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error + Send + Sync>> {
    let args = Args::parse();
    init_logging(&args)?;

    fs::create_dir_all(&args.output)?;

    let run_flag = RunFlag::new();
    let signal_flag = run_flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_flag.shutdown();
        }
    });

    let task = match args.mode {
        Mode::Motion => tokio::task::spawn_blocking(move || motion(&args, &run_flag)),
        Mode::Triggered => tokio::task::spawn_blocking(move || triggered(&args, &run_flag)),
    };
    let success = task.await??;

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_logging(args: &Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let stdout_log = tracing_subscriber::fmt::layer().with_filter(level);

    let journald = if args.journald {
        Some(tracing_journald::layer()?.with_filter(level))
    } else {
        None
    };

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default().with_filter(level))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(journald)
        .with(tracy)
        .try_init()?;
    Ok(())
}

fn motion(args: &Args, run_flag: &RunFlag) -> Result<bool, Box<dyn Error + Send + Sync>> {
    let video_path = args.output.join(&args.video);
    let output = FileOutput::create(&video_path)?;
    let mut vidmgr = VideoManager::new(output, args.video_quality);
    let mut camera = SimulatedCamera::new(SimulatedConfig::from(args));

    let outcome = run_motion_watch(&mut camera, &mut vidmgr, run_flag)?;
    info!(
        completed = outcome.completed_normally,
        motion = outcome.motion_detected,
        frames = vidmgr.frames(),
        "motion watch finished, recording in {}",
        video_path.display()
    );
    Ok(outcome.completed_normally && outcome.motion_detected)
}

fn triggered(args: &Args, run_flag: &RunFlag) -> Result<bool, Box<dyn Error + Send + Sync>> {
    let config = args.acquisition_config().map_err(|e| e.to_string())?;
    let mut camera = SimulatedCamera::new(SimulatedConfig::from(args));

    // Pre-images are written from a worker thread so JPEG encoding never
    // delays the next trigger.
    let (tx, rx) = kanal::bounded::<MaterializedImage>(1);
    let pre_image_path = args.output.join(PRE_IMAGE);
    let writer = thread::spawn(move || save_images(rx, pre_image_path));
    let mut background = None;
    let mut sink = |img: MaterializedImage| {
        background = Some(img.clone());
        if let Err(e) = tx.send(img) {
            warn!("pre-image writer is gone: {e:?}");
        }
    };

    let mut acq = TriggeredAcquisition::new(config, MonotonicClock::new());
    let result = acq.run(&mut camera, &mut sink, run_flag);
    // The writer exits once the last sender is gone.
    drop(tx);
    if writer.join().is_err() {
        error!("pre-image writer panicked");
    }

    let outcome = result?;
    match outcome {
        AcquisitionOutcome::Captured(img) => {
            save_results(&args.output, &img, background.as_ref())?;
            Ok(true)
        }
        AcquisitionOutcome::Quit { state } => {
            warn!(%state, "camera quit before the final image");
            Ok(false)
        }
        AcquisitionOutcome::Aborted(reason) => {
            warn!("acquisition failed: {reason}");
            Ok(false)
        }
    }
}

/// Writes the final still and, when a pre-image was captured, the still
/// with that background removed.
fn save_results(
    dir: &Path,
    image: &MaterializedImage,
    background: Option<&MaterializedImage>,
) -> Result<Vec<PathBuf>, ImageError> {
    let path = dir.join(FINAL_IMAGE);
    image.save_jpeg(&path)?;
    info!("final image {image} saved to {}", path.display());
    let mut saved = vec![path];

    if let Some(background) = background {
        let path = dir.join(SUBTRACTED_IMAGE);
        image.subtract(background)?.save_jpeg(&path)?;
        info!("background-subtracted image saved to {}", path.display());
        saved.push(path);
    }
    Ok(saved)
}

fn save_images(rx: kanal::Receiver<MaterializedImage>, path: PathBuf) {
    while let Ok(img) = rx.recv() {
        match img.save_jpeg(&path) {
            Ok(()) => info!("pre-image {img} saved to {}", path.display()),
            Err(e) => error!("failed to save pre-image: {e}"),
        }
    }
}
