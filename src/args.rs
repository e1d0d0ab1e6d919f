// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{acquisition::AcquisitionConfig, event::StreamFlags, mock::SimulatedConfig};
use clap::Parser;
use std::{error::Error, fs::File, path::PathBuf, time::Duration};

/// Which camera role this process plays.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum Mode {
    /// Watch for motion and stop on the first detection
    Motion,
    /// Run the strobe-triggered still capture protocol
    Triggered,
}

/// Command-line arguments for the ball-flight camera.
///
/// Every option can also be given through the environment variable shown
/// in `--help`.
///
/// # Example
///
/// ```bash
/// # Strobe camera with a pre-image and a 1.5 s priming window
/// ballcam --mode triggered --pre-image --quiesce-ms 1500
///
/// # Via environment variables
/// export MODE=motion
/// export OUTPUT=/var/lib/ballcam
/// ballcam
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Camera role
    #[arg(long, env = "MODE", default_value = "triggered", value_enum)]
    pub mode: Mode,

    /// Time spent absorbing priming trigger pulses, in milliseconds
    #[arg(long, env = "QUIESCE_MS", default_value = "2000")]
    pub quiesce_ms: u64,

    /// Capture a pre-strobe reference image before the final image
    #[arg(long, env = "PRE_IMAGE")]
    pub pre_image: bool,

    /// The camera needs a flush pulse before the final frame is latched
    #[arg(long, env = "FLUSH_PULSE")]
    pub flush_pulse: bool,

    /// JSON file with acquisition settings; overrides the flags above
    #[arg(long, env = "ACQUISITION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory that receives captured images and video
    #[arg(short, long, env = "OUTPUT", default_value = ".")]
    pub output: PathBuf,

    /// File name of the motion watch MJPEG recording
    #[arg(long, env = "VIDEO", default_value = "motion.mjpeg")]
    pub video: String,

    /// MJPEG quality for the motion watch recording
    #[arg(long, env = "VIDEO_QUALITY", default_value = "80")]
    pub video_quality: i32,

    /// Camera capture resolution in pixels (width height)
    #[arg(
        long,
        env = "CAMERA_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub camera_size: Vec<u32>,

    /// Interval between simulated frames / trigger pulses, in milliseconds
    #[arg(long, env = "FRAME_INTERVAL_MS", default_value = "100")]
    pub frame_interval_ms: u64,

    /// Simulated frame number that reports motion
    #[arg(long, env = "MOTION_FRAME")]
    pub motion_frame: Option<u64>,

    /// Simulated camera quits after this many frames
    #[arg(long, env = "FRAME_LIMIT")]
    pub frame_limit: Option<u64>,

    /// Time without a frame before the camera is restarted, in milliseconds
    #[arg(long, env = "WAIT_TIMEOUT_MS", default_value = "1000")]
    pub wait_timeout_ms: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Send logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    /// Acquisition settings from the flags, replaced by `--config` when given.
    pub fn acquisition_config(&self) -> Result<AcquisitionConfig, Box<dyn Error>> {
        match &self.config {
            Some(path) => {
                let file = File::open(path)
                    .map_err(|e| format!("cannot open {}: {e}", path.display()))?;
                Ok(serde_json::from_reader(file)?)
            }
            None => Ok(AcquisitionConfig::from(self)),
        }
    }
}

impl From<&Args> for AcquisitionConfig {
    fn from(args: &Args) -> Self {
        AcquisitionConfig {
            use_pre_image_subtraction: args.pre_image,
            camera_requires_flush_pulse: args.flush_pulse,
            quiesce_time: Duration::from_millis(args.quiesce_ms),
            ..Default::default()
        }
    }
}

impl From<&Args> for SimulatedConfig {
    fn from(args: &Args) -> Self {
        let available = match args.mode {
            Mode::Motion => StreamFlags::VIDEO,
            Mode::Triggered => StreamFlags::VIEWFINDER | StreamFlags::STILL,
        };
        SimulatedConfig {
            width: args.camera_size[0],
            height: args.camera_size[1],
            frame_interval: Duration::from_millis(args.frame_interval_ms),
            wait_timeout: Duration::from_millis(args.wait_timeout_ms),
            motion_frame: args.motion_frame,
            frame_limit: args.frame_limit,
            available,
            ..Default::default()
        }
    }
}
