// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use ballcam::{
    error::ImageError,
    event::{StreamId, StreamLayout},
    image::{encode_jpeg, materialize_stream, MaterializedImage},
    mock::synthetic_frame,
    source::{BufferAccess, ScopedBuffer},
};
use std::{cell::Cell, error::Error};

#[test]
fn test_sizes() -> Result<(), Box<dyn Error>> {
    let img = MaterializedImage::new(1920, 1080)?;
    println!("{}", img);
    assert_eq!(img.size(), 6220800);

    let img = MaterializedImage::new(3840, 2160)?;
    assert_eq!(img.size(), 24883200);
    Ok(())
}

#[test]
fn test_copy_survives_buffer_reuse() -> Result<(), Box<dyn Error>> {
    let layout = StreamLayout {
        width: 64,
        height: 48,
        stride: 64 * 3 + 32,
    };
    let mut hw = synthetic_frame(&layout, 7);
    let released = Cell::new(0);

    let img = {
        let scope = ScopedBuffer::with_release(&hw, || released.set(released.get() + 1));
        MaterializedImage::materialize(&scope, &layout)?
    };
    assert_eq!(released.get(), 1);

    let expected: Vec<u8> = hw
        .chunks(layout.stride)
        .flat_map(|row| row[..layout.row_bytes()].to_vec())
        .collect();
    assert_eq!(img.as_slice(), expected.as_slice());

    // The driver recycles the buffer for the next frame.
    hw.copy_from_slice(&synthetic_frame(&layout, 8));
    hw.iter_mut().step_by(5).for_each(|b| *b = 0);

    assert_eq!(img.as_slice(), expected.as_slice());
    assert_eq!(img.pixel(0, 0), Some([7, 7, 7]));
    assert_eq!(img.pixel(63, 47), Some([70, 54, 7]));
    Ok(())
}

struct TwoStreams {
    viewfinder: Vec<u8>,
    released: Cell<usize>,
}

impl BufferAccess for TwoStreams {
    fn acquire_scoped_read(&self, stream: StreamId) -> Option<ScopedBuffer<'_>> {
        if stream != StreamId::Viewfinder {
            return None;
        }
        let released = &self.released;
        Some(ScopedBuffer::with_release(&self.viewfinder, move || {
            released.set(released.get() + 1);
        }))
    }
}

#[test]
fn test_materialize_stream_releases_on_error() -> Result<(), Box<dyn Error>> {
    let request = TwoStreams {
        viewfinder: vec![0; 10],
        released: Cell::new(0),
    };

    let layout = StreamLayout::packed(4, 4);
    let res = materialize_stream(&request, StreamId::Viewfinder, &layout);
    assert!(matches!(res, Err(ImageError::Truncated { .. })));
    assert_eq!(request.released.get(), 1);

    let layout = StreamLayout::packed(1, 1);
    let res = materialize_stream(&request, StreamId::Still, &layout);
    assert!(matches!(
        res,
        Err(ImageError::MissingBuffer(StreamId::Still))
    ));
    assert_eq!(request.released.get(), 1);

    let layout = StreamLayout::packed(1, 3);
    let img = materialize_stream(&request, StreamId::Viewfinder, &layout)?;
    assert_eq!(img.size(), 9);
    assert_eq!(request.released.get(), 2);
    Ok(())
}

#[test]
fn test_jpeg() -> Result<(), Box<dyn Error>> {
    let layout = StreamLayout {
        width: 320,
        height: 240,
        stride: 320 * 3 + 64,
    };
    let raw = synthetic_frame(&layout, 3);

    let padded = encode_jpeg(&raw, &layout, 90)?;
    let img = MaterializedImage::materialize(&ScopedBuffer::new(&raw), &layout)?;
    let packed = img.to_jpeg(90)?;

    for jpeg in [&padded[..], &packed[..]] {
        let header = turbojpeg::read_header(jpeg)?;
        assert_eq!((header.width, header.height), (320, 240));
    }
    Ok(())
}

#[test]
fn test_save_jpeg() -> Result<(), Box<dyn Error>> {
    let img = MaterializedImage::new(64, 64)?;
    let name = format!("ballcam-test-{}.jpeg", std::process::id());
    let path = std::env::temp_dir().join(name);
    img.save_jpeg(&path)?;
    let data = std::fs::read(&path)?;
    std::fs::remove_file(&path)?;
    assert_eq!(&data[..2], &[0xFF, 0xD8]);
    Ok(())
}

#[test]
fn test_background_subtraction() -> Result<(), Box<dyn Error>> {
    let layout = StreamLayout::packed(8, 8);
    let background = synthetic_frame(&layout, 0);
    let mut lit = background.clone();
    // Strobe-lit ball in one pixel.
    let ball = (3 * 8 + 4) * 3;
    lit[ball..ball + 3].copy_from_slice(&[250, 250, 250]);

    let bg = MaterializedImage::materialize(&ScopedBuffer::new(&background), &layout)?;
    let fg = MaterializedImage::materialize(&ScopedBuffer::new(&lit), &layout)?;
    let diff = fg.subtract(&bg)?;

    assert_eq!(diff.pixel(4, 3), Some([246, 247, 250]));
    assert_eq!(diff.pixel(0, 0), Some([0, 0, 0]));
    assert_eq!(diff.as_slice().iter().filter(|b| **b != 0).count(), 3);
    Ok(())
}

#[test]
fn test_overflowing_layout() {
    let layout = StreamLayout {
        width: 1,
        height: 3,
        stride: usize::MAX / 2,
    };
    let raw = synthetic_frame(&StreamLayout::packed(1, 3), 0);

    let img = MaterializedImage::materialize(&ScopedBuffer::new(&raw), &layout);
    assert!(matches!(img, Err(ImageError::Overflow { height: 3, .. })));

    let jpeg = encode_jpeg(&raw, &layout, 90);
    assert!(matches!(jpeg, Err(ImageError::Overflow { .. })));
}
