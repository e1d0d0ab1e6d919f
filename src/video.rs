// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Encoder and output sinks fed by the motion watch loop.

use crate::{
    event::{Metadata, StreamLayout},
    image::encode_jpeg,
    source::ScopedBuffer,
};
use serde_json::json;
use std::{
    error::Error,
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

pub type EncodeError = Box<dyn Error + Send + Sync>;

/// Consumer of encoded frames.
pub trait Output {
    fn on_buffer_ready(
        &mut self,
        mem: &[u8],
        size: usize,
        timestamp_us: i64,
        is_keyframe: bool,
    ) -> io::Result<()>;

    fn on_metadata_ready(&mut self, metadata: &Metadata) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encoder stage of the motion camera pipeline. Started before capture and
/// left running across capture restarts.
pub trait EncoderSink {
    fn start(&mut self) -> Result<(), EncodeError>;

    fn stop(&mut self) -> Result<(), EncodeError>;

    /// Encodes one frame. The buffer is only valid for the call.
    fn encode(
        &mut self,
        frame: &ScopedBuffer<'_>,
        layout: &StreamLayout,
        timestamp_us: i64,
    ) -> Result<(), EncodeError>;

    fn metadata(&mut self, metadata: &Metadata) -> Result<(), EncodeError>;
}

/// Motion-JPEG encoder: every frame is compressed independently, so every
/// output buffer is a keyframe.
pub struct VideoManager<O: Output> {
    output: O,
    quality: i32,
    running: bool,
    frames: u64,
}

impl<O: Output> VideoManager<O> {
    pub fn new(output: O, quality: i32) -> Self {
        Self {
            output,
            quality,
            running: false,
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn into_output(self) -> O {
        self.output
    }
}

impl<O: Output> EncoderSink for VideoManager<O> {
    fn start(&mut self) -> Result<(), EncodeError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncodeError> {
        if self.running {
            self.running = false;
            self.output.flush()?;
            debug!("encoder stopped after {} frames", self.frames);
        }
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &ScopedBuffer<'_>,
        layout: &StreamLayout,
        timestamp_us: i64,
    ) -> Result<(), EncodeError> {
        if !self.running {
            return Err("encoder is not running".into());
        }
        let jpeg = encode_jpeg(frame.as_slice(), layout, self.quality)?;
        self.output
            .on_buffer_ready(&jpeg, jpeg.len(), timestamp_us, true)?;
        self.frames += 1;
        Ok(())
    }

    fn metadata(&mut self, metadata: &Metadata) -> Result<(), EncodeError> {
        Ok(self.output.on_metadata_ready(metadata)?)
    }
}

/// Writes the MJPEG stream to one file and frame metadata as JSON lines to
/// a sidecar file next to it.
pub struct FileOutput {
    video: BufWriter<File>,
    metadata: BufWriter<File>,
    last_timestamp_us: i64,
}

impl FileOutput {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            video: BufWriter::new(File::create(path)?),
            metadata: BufWriter::new(File::create(Self::metadata_path(path))?),
            last_timestamp_us: 0,
        })
    }

    /// `clip.mjpeg` -> `clip.mjpeg.jsonl`
    pub fn metadata_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".jsonl");
        PathBuf::from(name)
    }
}

impl Output for FileOutput {
    fn on_buffer_ready(
        &mut self,
        mem: &[u8],
        size: usize,
        timestamp_us: i64,
        _is_keyframe: bool,
    ) -> io::Result<()> {
        self.last_timestamp_us = timestamp_us;
        self.video.write_all(&mem[..size])
    }

    fn on_metadata_ready(&mut self, metadata: &Metadata) -> io::Result<()> {
        let line = json!({
            "timestamp_us": self.last_timestamp_us,
            "metadata": metadata,
        });
        serde_json::to_writer(&mut self.metadata, &line)?;
        self.metadata.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.video.flush()?;
        self.metadata.flush()
    }
}

/// Discards everything, counting what it was handed.
#[derive(Debug, Default)]
pub struct NullOutput {
    pub buffers: u64,
    pub bytes: u64,
    pub metadata: u64,
}

impl Output for NullOutput {
    fn on_buffer_ready(
        &mut self,
        _mem: &[u8],
        size: usize,
        _timestamp_us: i64,
        _is_keyframe: bool,
    ) -> io::Result<()> {
        self.buffers += 1;
        self.bytes += size as u64;
        Ok(())
    }

    fn on_metadata_ready(&mut self, _metadata: &Metadata) -> io::Result<()> {
        self.metadata += 1;
        Ok(())
    }
}
