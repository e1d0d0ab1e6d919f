// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Motion-gated capture loop.
//!
//! Streams the video pipeline into the encoder until a frame arrives whose
//! `motion_detect.result` metadata is `true`. There is no time based exit;
//! the loop ends on the first detection, a `Quit` event, or shutdown.

use crate::{
    error::AcquisitionError,
    event::{NotificationEvent, StreamFlags, StreamId, StreamLayout, MOTION_DETECT_RESULT},
    source::{restart_capture, stop_quietly, FrameRequest, NotificationSource, RunFlag},
    video::EncoderSink,
};
use tracing::{debug, error, info, info_span, warn};

/// Result of [`run_motion_watch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionOutcome {
    /// False only when the run flag was cleared.
    pub completed_normally: bool,
    pub motion_detected: bool,
}

/// Opens the camera, starts the encoder and capture, and watches for motion.
///
/// Returns `(true, true)` on the first positive detection, `(true, false)`
/// on `Quit` and `(false, false)` on shutdown. Frames after the detecting
/// one are never requested.
pub fn run_motion_watch<S, E>(
    source: &mut S,
    encoder: &mut E,
    run_flag: &RunFlag,
) -> Result<MotionOutcome, AcquisitionError>
where
    S: NotificationSource,
    E: EncoderSink,
{
    let _span = info_span!("motion_watch").entered();

    source.open()?;
    source.configure(StreamFlags::VIDEO)?;
    let layout = source.stream_info(StreamId::Video);
    if layout.is_none() {
        warn!("video stream not configured, frames will not be encoded");
    }

    encoder.start().map_err(AcquisitionError::Encoder)?;
    if let Err(e) = source.start() {
        stop_encoder(encoder);
        return Err(e.into());
    }
    info!("motion watch started");

    let mut frames: u64 = 0;
    loop {
        if !run_flag.is_running() {
            info!(frames, "shutdown requested, stopping motion watch");
            stop_pipeline(source, encoder);
            return Ok(MotionOutcome {
                completed_normally: false,
                motion_detected: false,
            });
        }

        match source.wait() {
            NotificationEvent::Timeout => {
                warn!("camera timed out, restarting capture");
                restart_capture(source)?;
            }
            NotificationEvent::Quit => {
                info!(frames, "quit received");
                return Ok(MotionOutcome {
                    completed_normally: true,
                    motion_detected: false,
                });
            }
            NotificationEvent::Unrecognized(code) => {
                error!(code, "unrecognised event type");
                stop_pipeline(source, encoder);
                return Err(AcquisitionError::UnrecognizedEvent(code));
            }
            NotificationEvent::FrameReady(request) => {
                frames += 1;
                forward_frame(encoder, &request, layout.as_ref());

                let detected = match request.metadata().get(MOTION_DETECT_RESULT) {
                    Some(value) => value.as_bool().unwrap_or_else(|| {
                        debug!(?value, "non-boolean {MOTION_DETECT_RESULT}");
                        false
                    }),
                    None => false,
                };

                if detected {
                    let timestamp_us = request.timestamp_us();
                    info!(frames, timestamp_us, "motion detected");
                    drop(request);
                    stop_pipeline(source, encoder);
                    return Ok(MotionOutcome {
                        completed_normally: true,
                        motion_detected: true,
                    });
                }
            }
        }
    }
}

fn forward_frame<R, E>(encoder: &mut E, request: &R, layout: Option<&StreamLayout>)
where
    R: FrameRequest,
    E: EncoderSink,
{
    if let Some(layout) = layout {
        match request.acquire_scoped_read(StreamId::Video) {
            Some(buffer) => {
                if let Err(e) = encoder.encode(&buffer, layout, request.timestamp_us()) {
                    warn!("encode failed: {e}");
                }
            }
            None => debug!("request carries no video buffer"),
        }
    }

    if let Err(e) = encoder.metadata(request.metadata()) {
        warn!("metadata output failed: {e}");
    }
}

fn stop_encoder<E: EncoderSink>(encoder: &mut E) {
    if let Err(e) = encoder.stop() {
        warn!("encoder stop failed: {e}");
    }
}

fn stop_pipeline<S: NotificationSource, E: EncoderSink>(source: &mut S, encoder: &mut E) {
    stop_quietly(source);
    stop_encoder(encoder);
}
