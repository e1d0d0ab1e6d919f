// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Notification events and the stream/metadata types they carry.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, ops::BitOr};

/// Per-frame metadata key written by the motion detection stage.
pub const MOTION_DETECT_RESULT: &str = "motion_detect.result";

/// Logical stream a buffer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamId {
    Viewfinder,
    Still,
    Video,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            StreamId::Viewfinder => "viewfinder",
            StreamId::Still => "still",
            StreamId::Video => "video",
        };
        f.write_str(name)
    }
}

/// Set of streams requested from `NotificationSource::configure`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamFlags(u8);

impl StreamFlags {
    pub const NONE: StreamFlags = StreamFlags(0);
    pub const VIEWFINDER: StreamFlags = StreamFlags(1);
    pub const STILL: StreamFlags = StreamFlags(1 << 1);
    pub const VIDEO: StreamFlags = StreamFlags(1 << 2);

    pub const fn contains(self, other: StreamFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn has(self, stream: StreamId) -> bool {
        self.contains(StreamFlags::from_stream(stream))
    }

    pub const fn from_stream(stream: StreamId) -> StreamFlags {
        match stream {
            StreamId::Viewfinder => StreamFlags::VIEWFINDER,
            StreamId::Still => StreamFlags::STILL,
            StreamId::Video => StreamFlags::VIDEO,
        }
    }
}

impl BitOr for StreamFlags {
    type Output = StreamFlags;

    fn bitor(self, rhs: StreamFlags) -> StreamFlags {
        StreamFlags(self.0 | rhs.0)
    }
}

impl From<StreamId> for StreamFlags {
    fn from(stream: StreamId) -> Self {
        StreamFlags::from_stream(stream)
    }
}

/// How to interpret a stream buffer's raw bytes as a pixel grid.
///
/// Pixels are 3 bytes each; `stride` may exceed `width * 3` when the driver
/// pads rows for alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamLayout {
    pub height: u32,
    pub width: u32,
    pub stride: usize,
}

impl StreamLayout {
    pub const BYTES_PER_PIXEL: usize = 3;

    /// Layout with tightly packed rows.
    pub const fn packed(width: u32, height: u32) -> Self {
        Self {
            height,
            width,
            stride: width as usize * Self::BYTES_PER_PIXEL,
        }
    }

    /// Bytes of pixel data in one row, excluding padding.
    pub const fn row_bytes(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL
    }

    /// Minimum buffer length able to hold every row. The final row does not
    /// need its padding. `None` when the length does not fit in `usize`.
    pub const fn required_len(&self) -> Option<usize> {
        if self.height == 0 {
            return Some(0);
        }
        match self.stride.checked_mul(self.height as usize - 1) {
            Some(rows) => rows.checked_add(self.row_bytes()),
            None => None,
        }
    }
}

/// A single typed metadata value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

/// Per-frame metadata attached to a completed request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(MetadataValue::as_bool)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// One notification from the camera driver stack.
///
/// `FrameReady` carries the completed request. The source reclaims it on the
/// next `wait`, so the consumer drops it before asking for another event.
#[derive(Debug)]
pub enum NotificationEvent<R> {
    Timeout,
    Quit,
    FrameReady(R),
    /// Raw event code the driver could not map onto the variants above.
    Unrecognized(u32),
}

/// Payload-free classification of a [`NotificationEvent`], used for logging
/// and dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Timeout,
    Quit,
    FrameReady,
    Unrecognized,
}

impl<R> NotificationEvent<R> {
    pub fn kind(&self) -> EventKind {
        match self {
            NotificationEvent::Timeout => EventKind::Timeout,
            NotificationEvent::Quit => EventKind::Quit,
            NotificationEvent::FrameReady(_) => EventKind::FrameReady,
            NotificationEvent::Unrecognized(_) => EventKind::Unrecognized,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EventKind::Timeout => "timeout",
            EventKind::Quit => "quit",
            EventKind::FrameReady => "frame-ready",
            EventKind::Unrecognized => "unrecognized",
        };
        f.write_str(name)
    }
}
