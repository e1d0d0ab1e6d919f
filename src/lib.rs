// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # Ball-Flight Camera Acquisition
//!
//! This library drives the two cameras of a ball-flight capture rig. It
//! consumes the serialized stream of frame-ready, timeout and quit
//! notifications produced by the camera driver stack and turns it into
//! either a motion-gated capture decision or a single strobe-lit still.
//!
//! ## Features
//!
//! - **Motion Watch**: [`motion::run_motion_watch`] streams the video
//!   pipeline into an encoder until frame metadata reports motion.
//! - **Triggered Acquisition**: [`acquisition::TriggeredAcquisition`] threads
//!   the priming, quiescing, optional pre-image and final capture handshake
//!   driven by external trigger pulses.
//! - **Image Materialization**: [`image::MaterializedImage`] deep copies a
//!   transient hardware buffer into owned memory before the driver reclaims
//!   it.
//! - **Simulation**: [`mock::SimulatedCamera`] stands in for the sensor when
//!   none is attached.
//!
//! ## Example
//!
//! ```no_run
//! use ballcam::{
//!     acquisition::{AcquisitionConfig, TriggeredAcquisition},
//!     image::MaterializedImage,
//!     mock::{SimulatedCamera, SimulatedConfig},
//!     source::{MonotonicClock, RunFlag},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut camera = SimulatedCamera::new(SimulatedConfig::default());
//! let mut acq = TriggeredAcquisition::new(AcquisitionConfig::default(), MonotonicClock::new());
//! let mut pre_image = |img: MaterializedImage| println!("pre-image {img}");
//!
//! let outcome = acq.run(&mut camera, &mut pre_image, &RunFlag::new())?;
//! if let Some(img) = outcome.image() {
//!     img.save_jpeg("final.jpeg")?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Each loop is single threaded and owns its camera exclusively. The
//! source's `wait` is the only blocking call; cancellation is cooperative
//! through [`source::RunFlag`], checked once per loop iteration.

pub mod acquisition;
pub mod args;
pub mod error;
pub mod event;
pub mod image;
pub mod mock;
pub mod motion;
pub mod source;
pub mod video;
