// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Simulated camera used when no sensor is attached.
//!
//! A producer thread generates RGB888 frames with padded rows at a fixed
//! interval and delivers them through a bounded channel. Each frame doubles
//! as a trigger pulse for the triggered acquisition machine. Stopping the
//! camera joins the producer and discards undelivered frames; requests
//! already handed out keep their memory alive until dropped.

use crate::{
    error::DeviceError,
    event::{
        Metadata, NotificationEvent, StreamFlags, StreamId, StreamLayout, MOTION_DETECT_RESULT,
    },
    source::{BufferAccess, FrameRequest, NotificationSource, ScopedBuffer},
};
use kanal::{ReceiveErrorTimeout, Receiver, Sender};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, trace};

const CHANNEL_DEPTH: usize = 4;
const PAD_BYTE: u8 = 0xEE;

#[derive(Clone, Debug)]
pub struct SimulatedConfig {
    pub width: u32,
    pub height: u32,
    /// Extra bytes appended to every row.
    pub row_padding: usize,
    pub frame_interval: Duration,
    /// `wait` reports a timeout after this long without a frame.
    pub wait_timeout: Duration,
    /// 1-based frame number that carries `motion_detect.result = true`.
    pub motion_frame: Option<u64>,
    /// The camera quits after producing this many frames.
    pub frame_limit: Option<u64>,
    /// Streams the sensor can deliver; others configure as absent.
    pub available: StreamFlags,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            row_padding: 64,
            frame_interval: Duration::from_millis(33),
            wait_timeout: Duration::from_secs(1),
            motion_frame: None,
            frame_limit: None,
            available: StreamFlags::VIEWFINDER | StreamFlags::STILL | StreamFlags::VIDEO,
        }
    }
}

impl SimulatedConfig {
    pub fn layout(&self) -> StreamLayout {
        StreamLayout {
            height: self.height,
            width: self.width,
            stride: self.width as usize * StreamLayout::BYTES_PER_PIXEL + self.row_padding,
        }
    }
}

enum SimEvent {
    Frame(SimulatedRequest),
    Quit,
}

/// Completed request produced by [`SimulatedCamera`].
pub struct SimulatedRequest {
    sequence: u64,
    timestamp_us: i64,
    metadata: Metadata,
    buffers: Vec<(StreamId, Arc<[u8]>)>,
    releases: Arc<AtomicU64>,
}

impl SimulatedRequest {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl BufferAccess for SimulatedRequest {
    fn acquire_scoped_read(&self, stream: StreamId) -> Option<ScopedBuffer<'_>> {
        let (_, data) = self.buffers.iter().find(|(id, _)| *id == stream)?;
        let releases = &self.releases;
        Some(ScopedBuffer::with_release(data, move || {
            releases.fetch_add(1, Ordering::Relaxed);
        }))
    }
}

impl FrameRequest for SimulatedRequest {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }
}

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SimulatedCamera {
    config: SimulatedConfig,
    opened: bool,
    configured: StreamFlags,
    producer: Option<Producer>,
    rx: Option<Receiver<SimEvent>>,
    sequence: Arc<AtomicU64>,
    releases: Arc<AtomicU64>,
    epoch: Instant,
}

impl SimulatedCamera {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            opened: false,
            configured: StreamFlags::NONE,
            producer: None,
            rx: None,
            sequence: Arc::new(AtomicU64::new(0)),
            releases: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
        }
    }

    /// Frames generated so far, including any discarded by `stop`.
    pub fn frames_produced(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Scoped buffer reads that have been released back to the camera.
    pub fn buffers_released(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    pub fn is_streaming(&self) -> bool {
        self.producer.is_some()
    }

    fn spawn_producer(&self, tx: Sender<SimEvent>) -> Producer {
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = ProducerContext {
            config: self.config.clone(),
            streams: self.configured,
            stop: stop.clone(),
            sequence: self.sequence.clone(),
            releases: self.releases.clone(),
            epoch: self.epoch,
        };
        let handle = thread::spawn(move || ctx.run(tx));
        Producer { stop, handle }
    }
}

impl NotificationSource for SimulatedCamera {
    type Request = SimulatedRequest;

    fn open(&mut self) -> Result<(), DeviceError> {
        self.opened = true;
        debug!(
            "simulated camera {}x{} opened",
            self.config.width, self.config.height
        );
        Ok(())
    }

    fn configure(&mut self, streams: StreamFlags) -> Result<(), DeviceError> {
        if !self.opened {
            return Err(DeviceError::NotOpen);
        }
        self.configured = StreamFlags::NONE;
        for stream in [StreamId::Viewfinder, StreamId::Still, StreamId::Video] {
            if streams.has(stream) && self.config.available.has(stream) {
                self.configured = self.configured | StreamFlags::from(stream);
            }
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if !self.opened {
            return Err(DeviceError::NotOpen);
        }
        if self.configured == StreamFlags::NONE {
            return Err(DeviceError::control("start", "no streams configured"));
        }
        if self.producer.is_none() {
            let (tx, rx) = kanal::bounded(CHANNEL_DEPTH);
            self.producer = Some(self.spawn_producer(tx));
            self.rx = Some(rx);
            debug!("simulated capture started");
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(producer) = self.producer.take() {
            producer.stop.store(true, Ordering::Release);
            // Closing the receiver unblocks a producer stuck in send.
            self.rx = None;
            if producer.handle.join().is_err() {
                return Err(DeviceError::control("stop", "producer thread panicked"));
            }
            debug!("simulated capture stopped");
        }
        Ok(())
    }

    fn wait(&mut self) -> NotificationEvent<SimulatedRequest> {
        let Some(rx) = self.rx.as_ref() else {
            return NotificationEvent::Quit;
        };
        match rx.recv_timeout(self.config.wait_timeout) {
            Ok(SimEvent::Frame(request)) => NotificationEvent::FrameReady(request),
            Ok(SimEvent::Quit) => NotificationEvent::Quit,
            Err(ReceiveErrorTimeout::Timeout) => NotificationEvent::Timeout,
            Err(_) => NotificationEvent::Quit,
        }
    }

    fn stream_info(&self, stream: StreamId) -> Option<StreamLayout> {
        self.configured.has(stream).then(|| self.config.layout())
    }
}

impl Drop for SimulatedCamera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct ProducerContext {
    config: SimulatedConfig,
    streams: StreamFlags,
    stop: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    releases: Arc<AtomicU64>,
    epoch: Instant,
}

impl ProducerContext {
    fn run(self, tx: Sender<SimEvent>) {
        while !self.stop.load(Ordering::Acquire) {
            thread::sleep(self.config.frame_interval);
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            if self.config.frame_limit.is_some_and(|limit| sequence > limit) {
                let _ = tx.send(SimEvent::Quit);
                break;
            }

            let request = self.request(sequence);
            trace!(sequence, "frame produced");
            if tx.send(SimEvent::Frame(request)).is_err() {
                break;
            }
        }
    }

    fn request(&self, sequence: u64) -> SimulatedRequest {
        let pixels: Arc<[u8]> = synthetic_frame(&self.config.layout(), sequence).into();
        let buffers = [StreamId::Viewfinder, StreamId::Still, StreamId::Video]
            .into_iter()
            .filter(|s| self.streams.has(*s))
            .map(|s| (s, pixels.clone()))
            .collect();

        let motion = self.config.motion_frame == Some(sequence);
        SimulatedRequest {
            sequence,
            timestamp_us: self.epoch.elapsed().as_micros() as i64,
            metadata: Metadata::new()
                .with(MOTION_DETECT_RESULT, motion)
                .with("sequence", sequence as i64),
            buffers,
            releases: self.releases.clone(),
        }
    }
}

/// Gradient frame that shifts with `sequence`; row padding is filled with
/// a marker byte.
pub fn synthetic_frame(layout: &StreamLayout, sequence: u64) -> Vec<u8> {
    let mut buf = vec![PAD_BYTE; layout.stride * layout.height as usize];
    let shift = sequence as usize;
    for (y, row) in buf.chunks_mut(layout.stride).enumerate() {
        for (x, px) in row[..layout.row_bytes()].chunks_mut(3).enumerate() {
            px[0] = (x + shift) as u8;
            px[1] = (y + shift) as u8;
            px[2] = shift as u8;
        }
    }
    buf
}
