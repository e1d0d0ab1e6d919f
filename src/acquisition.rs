// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Externally triggered acquisition state machine.
//!
//! The strobe camera receives a burst of priming trigger pulses before the
//! sensor has settled. The machine absorbs them for `quiesce_time`, then,
//! depending on configuration, captures a pre-strobe reference frame and
//! finally captures the strobe-lit frame that becomes the result.
//!
//! ```text
//! WaitFirstPrimingGroup -> WaitFirstPrimingEnd --(quiesced)--+
//!   +-- pre-image ------> WaitPreImageTrigger -> WaitPreImageFlush -> WaitFinalTrigger
//!   +-- flush pulse ----> WaitFinalTrigger -> WaitFinalFlush
//!   +-- otherwise ------> WaitFinalFlush -> FinalReceived
//! ```
//!
//! [`transition`] is the pure table; [`TriggeredAcquisition`] drives it from
//! a [`NotificationSource`] and performs the buffer side effects.

use crate::{
    error::{AcquisitionError, ImageError},
    event::{NotificationEvent, StreamFlags, StreamId},
    image::{materialize_stream, MaterializedImage},
    source::{restart_capture, stop_quietly, BufferAccess, Clock, NotificationSource, RunFlag},
};
use serde::{Deserialize, Deserializer};
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

/// Default time spent absorbing priming pulses.
pub const DEFAULT_QUIESCE_TIME: Duration = Duration::from_millis(2000);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcquisitionState {
    Uninitialized,
    WaitFirstPrimingGroup,
    WaitFirstPrimingEnd,
    WaitPreImageTrigger,
    WaitPreImageFlush,
    /// Dormant: no configuration routes here yet.
    WaitSecondPrimingGroup,
    /// Dormant: no configuration routes here yet.
    WaitSecondPrimingEnd,
    WaitFinalTrigger,
    WaitFinalFlush,
    FinalReceived,
}

impl AcquisitionState {
    pub const ALL: [AcquisitionState; 10] = [
        AcquisitionState::Uninitialized,
        AcquisitionState::WaitFirstPrimingGroup,
        AcquisitionState::WaitFirstPrimingEnd,
        AcquisitionState::WaitPreImageTrigger,
        AcquisitionState::WaitPreImageFlush,
        AcquisitionState::WaitSecondPrimingGroup,
        AcquisitionState::WaitSecondPrimingEnd,
        AcquisitionState::WaitFinalTrigger,
        AcquisitionState::WaitFinalFlush,
        AcquisitionState::FinalReceived,
    ];

    pub const INITIAL: AcquisitionState = AcquisitionState::WaitFirstPrimingGroup;

    pub fn is_terminal(self) -> bool {
        self == AcquisitionState::FinalReceived
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Read-only acquisition settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Capture a pre-strobe reference frame before the final frame.
    pub use_pre_image_subtraction: bool,
    /// The camera needs an extra pulse to latch the final frame.
    pub camera_requires_flush_pulse: bool,
    #[serde(rename = "quiesce_time_ms", deserialize_with = "duration_from_ms")]
    pub quiesce_time: Duration,
    /// Stream that pre-images and the final image are copied from.
    pub capture_stream: StreamId,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            use_pre_image_subtraction: false,
            camera_requires_flush_pulse: false,
            quiesce_time: DEFAULT_QUIESCE_TIME,
            capture_stream: StreamId::Viewfinder,
        }
    }
}

fn duration_from_ms<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

/// Facts about the current event that the table depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerInput {
    pub viewfinder_present: bool,
}

/// Buffer work attached to a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Copy the frame and hand it to the pre-image sink.
    MaterializePreImage,
    /// Stop capture, copy the frame and finish the run.
    MaterializeFinal,
}

/// Why a triggered run ended without an image.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    #[error("shutdown requested")]
    Shutdown,
    #[error("viewfinder stream is not present")]
    MissingViewfinder,
    #[error("{0} stream is not configured")]
    MissingStream(StreamId),
    #[error("request has no {0} buffer")]
    MissingBuffer(StreamId),
    #[error("trigger arrived in {0} state")]
    InvalidReentry(AcquisitionState),
    #[error("image copy failed: {0}")]
    Materialize(String),
}

impl From<ImageError> for AbortReason {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::MissingBuffer(stream) => AbortReason::MissingBuffer(stream),
            e => AbortReason::Materialize(e.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Advance {
        next: AcquisitionState,
        effect: Effect,
    },
    Abort(AbortReason),
}

impl Transition {
    fn to(next: AcquisitionState) -> Self {
        Transition::Advance {
            next,
            effect: Effect::None,
        }
    }
}

/// The transition table, applied to one `FrameReady` event.
///
/// `elapsed` is the time since `state` was entered. Every state has exactly
/// one outcome for a given input; `Uninitialized` and `FinalReceived` always
/// abort since a trigger there is stale or duplicated.
pub fn transition(
    state: AcquisitionState,
    input: TriggerInput,
    elapsed: Duration,
    config: &AcquisitionConfig,
) -> Transition {
    use AcquisitionState::*;

    match state {
        Uninitialized | FinalReceived => Transition::Abort(AbortReason::InvalidReentry(state)),
        WaitFirstPrimingGroup => Transition::to(WaitFirstPrimingEnd),
        WaitFirstPrimingEnd => {
            if elapsed < config.quiesce_time {
                Transition::to(WaitFirstPrimingEnd)
            } else if config.use_pre_image_subtraction {
                Transition::to(WaitPreImageTrigger)
            } else if config.camera_requires_flush_pulse {
                Transition::to(WaitFinalTrigger)
            } else {
                Transition::to(WaitFinalFlush)
            }
        }
        WaitPreImageTrigger => {
            if input.viewfinder_present {
                Transition::to(WaitPreImageFlush)
            } else {
                Transition::Abort(AbortReason::MissingViewfinder)
            }
        }
        WaitPreImageFlush => Transition::Advance {
            next: WaitFinalTrigger,
            effect: Effect::MaterializePreImage,
        },
        WaitSecondPrimingGroup => Transition::to(WaitSecondPrimingEnd),
        WaitSecondPrimingEnd => {
            if elapsed < config.quiesce_time / 2 {
                Transition::to(WaitSecondPrimingEnd)
            } else {
                Transition::to(WaitFinalTrigger)
            }
        }
        WaitFinalTrigger => Transition::to(WaitFinalFlush),
        WaitFinalFlush => Transition::Advance {
            next: FinalReceived,
            effect: Effect::MaterializeFinal,
        },
    }
}

/// Receiver of the pre-strobe reference frame.
pub trait PreImageSink {
    fn on_pre_image_captured(&mut self, image: MaterializedImage);
}

impl<F: FnMut(MaterializedImage)> PreImageSink for F {
    fn on_pre_image_captured(&mut self, image: MaterializedImage) {
        self(image)
    }
}

/// Result of a triggered run.
#[derive(Debug)]
pub enum AcquisitionOutcome {
    /// The final frame was captured.
    Captured(MaterializedImage),
    /// The source quit first. Reported as a success that carries no image,
    /// so callers must check [`AcquisitionOutcome::image`].
    Quit { state: AcquisitionState },
    Aborted(AbortReason),
}

impl AcquisitionOutcome {
    pub fn success(&self) -> bool {
        !matches!(self, AcquisitionOutcome::Aborted(_))
    }

    pub fn image(&self) -> Option<&MaterializedImage> {
        match self {
            AcquisitionOutcome::Captured(img) => Some(img),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<MaterializedImage> {
        match self {
            AcquisitionOutcome::Captured(img) => Some(img),
            _ => None,
        }
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            AcquisitionOutcome::Aborted(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Drives [`transition`] from a notification source.
pub struct TriggeredAcquisition<C: Clock> {
    config: AcquisitionConfig,
    clock: C,
    state: AcquisitionState,
    entered_at: Duration,
    triggers: u64,
}

impl<C: Clock> TriggeredAcquisition<C> {
    pub fn new(config: AcquisitionConfig, clock: C) -> Self {
        let entered_at = clock.now();
        Self {
            config,
            clock,
            state: AcquisitionState::INITIAL,
            entered_at,
            triggers: 0,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Number of `FrameReady` events processed so far.
    pub fn triggers(&self) -> u64 {
        self.triggers
    }

    /// Time since the current state was entered.
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.entered_at)
    }

    /// Applies one trigger without touching any buffer and commits the
    /// resulting state. Effects are returned for the caller to perform.
    pub fn step(&mut self, input: TriggerInput) -> Transition {
        let t = self.plan(input);
        if let Transition::Advance { next, .. } = t {
            self.enter(next);
        }
        t
    }

    fn plan(&self, input: TriggerInput) -> Transition {
        transition(self.state, input, self.elapsed(), &self.config)
    }

    fn reset(&mut self) {
        if self.state != AcquisitionState::INITIAL {
            debug!(from = %self.state, "resetting acquisition state");
        }
        self.state = AcquisitionState::INITIAL;
        self.entered_at = self.clock.now();
        self.triggers = 0;
    }

    // Entry time only moves on a real state change so self-loops keep
    // measuring from the original entry.
    fn enter(&mut self, next: AcquisitionState) {
        if next != self.state {
            debug!(
                from = %self.state,
                to = %next,
                elapsed_ms = self.elapsed().as_millis() as u64,
                "state transition"
            );
            self.state = next;
            self.entered_at = self.clock.now();
        }
    }

    /// Runs the protocol to completion.
    ///
    /// Every run starts from [`AcquisitionState::INITIAL`], whatever an
    /// earlier run on this instance left behind. Opens, configures and
    /// starts the camera, then consumes events until the final frame is
    /// captured, the source quits, the run flag clears, or a precondition
    /// fails. The camera is stopped on every exit except `Quit`.
    pub fn run<S, P>(
        &mut self,
        source: &mut S,
        pre_image_sink: &mut P,
        run_flag: &RunFlag,
    ) -> Result<AcquisitionOutcome, AcquisitionError>
    where
        S: NotificationSource,
        P: PreImageSink + ?Sized,
    {
        let _span = info_span!("triggered_acquisition").entered();
        self.reset();

        source.open()?;
        let streams = StreamFlags::from(self.config.capture_stream);
        source.configure(streams)?;
        source.start()?;
        info!(
            pre_image = self.config.use_pre_image_subtraction,
            flush_pulse = self.config.camera_requires_flush_pulse,
            quiesce_ms = self.config.quiesce_time.as_millis() as u64,
            "waiting for trigger"
        );

        loop {
            if !run_flag.is_running() {
                info!(state = %self.state, "shutdown requested, stopping acquisition");
                stop_quietly(source);
                return Ok(AcquisitionOutcome::Aborted(AbortReason::Shutdown));
            }

            let request = match source.wait() {
                NotificationEvent::FrameReady(request) => request,
                NotificationEvent::Timeout => {
                    warn!(state = %self.state, "camera timed out, restarting capture");
                    restart_capture(source)?;
                    continue;
                }
                NotificationEvent::Quit => {
                    info!(state = %self.state, "quit received");
                    return Ok(AcquisitionOutcome::Quit { state: self.state });
                }
                NotificationEvent::Unrecognized(code) => {
                    error!(code, state = %self.state, "unrecognised event type");
                    stop_quietly(source);
                    return Err(AcquisitionError::UnrecognizedEvent(code));
                }
            };

            self.triggers += 1;
            let input = TriggerInput {
                viewfinder_present: source.viewfinder_stream_present(),
            };

            let (next, effect) = match self.plan(input) {
                Transition::Advance { next, effect } => (next, effect),
                Transition::Abort(reason) => {
                    warn!(state = %self.state, "acquisition aborted: {reason}");
                    drop(request);
                    stop_quietly(source);
                    return Ok(AcquisitionOutcome::Aborted(reason));
                }
            };

            match effect {
                Effect::None => self.enter(next),
                Effect::MaterializePreImage => match self.capture(source, &request) {
                    Ok(image) => {
                        info!("pre-image captured: {image}");
                        drop(request);
                        pre_image_sink.on_pre_image_captured(image);
                        self.enter(next);
                    }
                    Err(reason) => {
                        warn!("pre-image capture failed: {reason}");
                        drop(request);
                        stop_quietly(source);
                        return Ok(AcquisitionOutcome::Aborted(reason));
                    }
                },
                Effect::MaterializeFinal => {
                    stop_quietly(source);
                    let result = self.capture(source, &request);
                    drop(request);
                    return Ok(match result {
                        Ok(image) => {
                            self.enter(next);
                            info!(triggers = self.triggers, "final image captured: {image}");
                            AcquisitionOutcome::Captured(image)
                        }
                        Err(reason) => {
                            warn!("final image capture failed: {reason}");
                            AcquisitionOutcome::Aborted(reason)
                        }
                    });
                }
            }
        }
    }

    fn capture<S, R>(&self, source: &S, request: &R) -> Result<MaterializedImage, AbortReason>
    where
        S: NotificationSource,
        R: BufferAccess,
    {
        let stream = self.config.capture_stream;
        let layout = source
            .stream_info(stream)
            .ok_or(AbortReason::MissingStream(stream))?;
        let image = materialize_stream(request, stream, &layout)?;
        Ok(image)
    }
}
