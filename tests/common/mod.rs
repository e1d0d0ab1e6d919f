// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

#![allow(dead_code)]

use ballcam::{
    error::DeviceError,
    event::{
        Metadata, NotificationEvent, StreamFlags, StreamId, StreamLayout, MOTION_DETECT_RESULT,
    },
    source::{BufferAccess, Clock, FrameRequest, NotificationSource, RunFlag, ScopedBuffer},
    video::{EncodeError, EncoderSink},
};
use std::{cell::Cell, collections::VecDeque, rc::Rc, time::Duration};

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 3;
pub const STRIDE: usize = 16;

pub fn layout() -> StreamLayout {
    StreamLayout {
        height: HEIGHT,
        width: WIDTH,
        stride: STRIDE,
    }
}

/// Padded frame whose pixel bytes are derived from `id`.
pub fn frame_bytes(id: u8) -> Vec<u8> {
    let layout = layout();
    let mut buf = vec![0xFF; layout.stride * layout.height as usize];
    for (y, row) in buf.chunks_mut(layout.stride).enumerate() {
        for (i, b) in row[..layout.row_bytes()].iter_mut().enumerate() {
            *b = id.wrapping_mul(31).wrapping_add((y * 12 + i) as u8);
        }
    }
    buf
}

/// The packed pixels a materialized copy of `frame_bytes(id)` must hold.
pub fn packed_pixels(id: u8) -> Vec<u8> {
    let layout = layout();
    frame_bytes(id)
        .chunks(layout.stride)
        .flat_map(|row| row[..layout.row_bytes()].to_vec())
        .collect()
}

/// Test clock moved forward by the scripted source.
#[derive(Clone, Default)]
pub struct ManualClock(Rc<Cell<Duration>>);

impl ManualClock {
    pub fn set_ms(&self, ms: u64) {
        self.0.set(Duration::from_millis(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.0.get()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    Open,
    Configure(StreamFlags),
    Start,
    Stop,
}

pub struct ScriptedFrame {
    pub at_ms: u64,
    pub id: u8,
    pub metadata: Metadata,
    pub streams: Vec<StreamId>,
}

pub enum Scripted {
    Frame(ScriptedFrame),
    Timeout,
    Quit,
    Unrecognized(u32),
}

/// Frame carrying viewfinder, still and video buffers, delivered at `at_ms`.
pub fn frame(at_ms: u64, id: u8) -> Scripted {
    Scripted::Frame(ScriptedFrame {
        at_ms,
        id,
        metadata: Metadata::new(),
        streams: vec![StreamId::Viewfinder, StreamId::Still, StreamId::Video],
    })
}

pub fn motion_frame(id: u8, motion: Option<bool>) -> Scripted {
    let mut metadata = Metadata::new().with("sequence", id as i64);
    if let Some(m) = motion {
        metadata.set(MOTION_DETECT_RESULT, m);
    }
    Scripted::Frame(ScriptedFrame {
        at_ms: id as u64 * 33,
        id,
        metadata,
        streams: vec![StreamId::Video],
    })
}

pub fn bare_frame(at_ms: u64, id: u8) -> Scripted {
    Scripted::Frame(ScriptedFrame {
        at_ms,
        id,
        metadata: Metadata::new(),
        streams: vec![],
    })
}

pub struct ScriptedRequest {
    pub id: u8,
    timestamp_us: i64,
    metadata: Metadata,
    buffers: Vec<(StreamId, Vec<u8>)>,
    acquired: Rc<Cell<usize>>,
    released: Rc<Cell<usize>>,
}

impl BufferAccess for ScriptedRequest {
    fn acquire_scoped_read(&self, stream: StreamId) -> Option<ScopedBuffer<'_>> {
        let (_, data) = self.buffers.iter().find(|(s, _)| *s == stream)?;
        self.acquired.set(self.acquired.get() + 1);
        let released = &self.released;
        Some(ScopedBuffer::with_release(data, move || {
            released.set(released.get() + 1);
        }))
    }
}

impl FrameRequest for ScriptedRequest {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }
}

/// Notification source replaying a fixed script. Once the script runs out
/// it reports `Quit`.
pub struct ScriptedSource {
    script: VecDeque<Scripted>,
    clock: ManualClock,
    available: StreamFlags,
    configured: StreamFlags,
    pub calls: Vec<Call>,
    pub delivered: usize,
    pub acquired: Rc<Cell<usize>>,
    pub released: Rc<Cell<usize>>,
    shutdown_after: Option<(usize, RunFlag)>,
}

impl ScriptedSource {
    pub fn new(clock: ManualClock, script: Vec<Scripted>) -> Self {
        Self {
            script: script.into(),
            clock,
            available: StreamFlags::VIEWFINDER | StreamFlags::STILL | StreamFlags::VIDEO,
            configured: StreamFlags::NONE,
            calls: Vec::new(),
            delivered: 0,
            acquired: Rc::new(Cell::new(0)),
            released: Rc::new(Cell::new(0)),
            shutdown_after: None,
        }
    }

    pub fn with_available(mut self, available: StreamFlags) -> Self {
        self.available = available;
        self
    }

    /// Clears `flag` once `events` events have been delivered.
    pub fn shutdown_after(mut self, events: usize, flag: RunFlag) -> Self {
        self.shutdown_after = Some((events, flag));
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    pub fn last_call(&self) -> Option<Call> {
        self.calls.last().copied()
    }
}

impl NotificationSource for ScriptedSource {
    type Request = ScriptedRequest;

    fn open(&mut self) -> Result<(), DeviceError> {
        self.calls.push(Call::Open);
        Ok(())
    }

    fn configure(&mut self, streams: StreamFlags) -> Result<(), DeviceError> {
        self.calls.push(Call::Configure(streams));
        self.configured = StreamFlags::NONE;
        for s in [StreamId::Viewfinder, StreamId::Still, StreamId::Video] {
            if streams.has(s) && self.available.has(s) {
                self.configured = self.configured | StreamFlags::from(s);
            }
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.calls.push(Call::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.calls.push(Call::Stop);
        Ok(())
    }

    fn wait(&mut self) -> NotificationEvent<ScriptedRequest> {
        let Some(next) = self.script.pop_front() else {
            return NotificationEvent::Quit;
        };
        self.delivered += 1;
        if let Some((events, flag)) = &self.shutdown_after {
            if self.delivered >= *events {
                flag.shutdown();
            }
        }

        match next {
            Scripted::Timeout => NotificationEvent::Timeout,
            Scripted::Quit => NotificationEvent::Quit,
            Scripted::Unrecognized(code) => NotificationEvent::Unrecognized(code),
            Scripted::Frame(f) => {
                self.clock.set_ms(f.at_ms);
                let data = frame_bytes(f.id);
                NotificationEvent::FrameReady(ScriptedRequest {
                    id: f.id,
                    timestamp_us: f.at_ms as i64 * 1000,
                    metadata: f.metadata,
                    buffers: f.streams.into_iter().map(|s| (s, data.clone())).collect(),
                    acquired: self.acquired.clone(),
                    released: self.released.clone(),
                })
            }
        }
    }

    fn stream_info(&self, stream: StreamId) -> Option<StreamLayout> {
        self.configured.has(stream).then(layout)
    }
}

/// Encoder that records what it was asked to do.
#[derive(Default)]
pub struct RecordingEncoder {
    pub starts: usize,
    pub stops: usize,
    pub frames: Vec<(i64, Vec<u8>)>,
    pub metadata: Vec<Metadata>,
}

impl EncoderSink for RecordingEncoder {
    fn start(&mut self) -> Result<(), EncodeError> {
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncodeError> {
        self.stops += 1;
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &ScopedBuffer<'_>,
        _layout: &StreamLayout,
        timestamp_us: i64,
    ) -> Result<(), EncodeError> {
        self.frames.push((timestamp_us, frame.as_slice().to_vec()));
        Ok(())
    }

    fn metadata(&mut self, metadata: &Metadata) -> Result<(), EncodeError> {
        self.metadata.push(metadata.clone());
        Ok(())
    }
}
