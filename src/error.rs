// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for the acquisition core.
//!
//! Only two conditions escape the acquisition loops as `Err`: a camera control
//! call that fails while bringing the pipeline up, and an event type the
//! notification source was never supposed to emit. Everything else (timeouts,
//! missing streams, stale triggers, shutdown) is handled at the loop boundary
//! and reported through the loop's outcome value.

use crate::event::StreamId;
use std::io;
use thiserror::Error;

/// Failure reported by the camera driver stack for a pipeline control call.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A control call (`open`, `configure`, `start`, `stop`) was rejected.
    #[error("camera {op} failed: {reason}")]
    Control { op: &'static str, reason: String },

    /// The camera was used before `open` succeeded.
    #[error("camera is not open")]
    NotOpen,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DeviceError {
    pub fn control(op: &'static str, reason: impl Into<String>) -> Self {
        DeviceError::Control {
            op,
            reason: reason.into(),
        }
    }
}

/// Failure while copying a hardware buffer into an owned image or encoding it.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("row stride {stride} is shorter than a {width} pixel row ({row_bytes} bytes)")]
    Stride {
        stride: usize,
        width: u32,
        row_bytes: usize,
    },

    #[error("{width}x{height} image with stride {stride} does not fit in memory")]
    Overflow {
        width: u32,
        height: u32,
        stride: usize,
    },

    #[error("buffer holds {actual} bytes but the layout needs {required}")]
    Truncated { actual: usize, required: usize },

    #[error("image is {actual:?} but {expected:?} was required")]
    Dimensions {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("no buffer for the {0} stream")]
    MissingBuffer(StreamId),

    #[error(transparent)]
    Jpeg(#[from] turbojpeg::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Fatal errors returned by [`crate::motion::run_motion_watch`] and
/// [`crate::acquisition::TriggeredAcquisition::run`].
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("camera pipeline error: {0}")]
    Device(#[from] DeviceError),

    #[error("encoder error: {0}")]
    Encoder(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The notification source emitted an event type outside its contract.
    #[error("unrecognised event type {0} from notification source")]
    UnrecognizedEvent(u32),
}
