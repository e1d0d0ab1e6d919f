// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::ImageError,
    event::{StreamId, StreamLayout},
    source::{BufferAccess, ScopedBuffer},
};
use core::fmt;
use std::{fs, path::Path};
use tracing::debug;
use turbojpeg::OwnedBuf;

/// JPEG quality used when saving captured stills.
pub const STILL_JPEG_QUALITY: i32 = 95;

/// Owned RGB888 image with no tie to any hardware buffer.
///
/// Rows are tightly packed: `pixels.len() == width * height * 3`. The image
/// is produced by copying out of a [`ScopedBuffer`], so the driver may
/// recycle or overwrite its memory as soon as the scope ends.
///
/// # Example
///
/// ```
/// use ballcam::{event::StreamLayout, image::MaterializedImage, source::ScopedBuffer};
///
/// let layout = StreamLayout { width: 2, height: 2, stride: 8 };
/// let raw = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12];
/// let img = MaterializedImage::materialize(&ScopedBuffer::new(&raw), &layout)?;
/// assert_eq!(img.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
/// # Ok::<(), ballcam::error::ImageError>(())
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct MaterializedImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl MaterializedImage {
    pub const CHANNELS: usize = StreamLayout::BYTES_PER_PIXEL;

    /// Black image of the given size.
    pub fn new(width: u32, height: u32) -> Result<Self, ImageError> {
        let size = required_len(&StreamLayout::packed(width, height))?;
        Ok(Self {
            width,
            height,
            pixels: vec![0; size],
        })
    }

    /// Wraps already packed RGB888 pixels.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, ImageError> {
        let required = required_len(&StreamLayout::packed(width, height))?;
        if pixels.len() != required {
            return Err(ImageError::Truncated {
                actual: pixels.len(),
                required,
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Deep copies the pixel region described by `layout` out of `buffer`.
    ///
    /// Row padding beyond `width * 3` bytes is dropped. The buffer must hold
    /// at least [`StreamLayout::required_len`] bytes.
    pub fn materialize(
        buffer: &ScopedBuffer<'_>,
        layout: &StreamLayout,
    ) -> Result<Self, ImageError> {
        let row_bytes = layout.row_bytes();
        if layout.stride < row_bytes {
            return Err(ImageError::Stride {
                stride: layout.stride,
                width: layout.width,
                row_bytes,
            });
        }

        let src = buffer.as_slice();
        let required = required_len(layout)?;
        if src.len() < required {
            return Err(ImageError::Truncated {
                actual: src.len(),
                required,
            });
        }

        let mut pixels = Vec::with_capacity(row_bytes * layout.height as usize);
        if layout.stride == row_bytes {
            pixels.extend_from_slice(&src[..required]);
        } else {
            for row in src.chunks(layout.stride).take(layout.height as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }

        debug!(
            width = layout.width,
            height = layout.height,
            stride = layout.stride,
            "materialized {} bytes",
            pixels.len()
        );
        Ok(Self {
            width: layout.width,
            height: layout.height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> usize {
        self.pixels.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.pixels
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let row_bytes = self.width as usize * Self::CHANNELS;
        let start = y as usize * row_bytes;
        Some(&self.pixels[start..start + row_bytes])
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width {
            return None;
        }
        let offset = x as usize * Self::CHANNELS;
        self.row(y)
            .map(|row| [row[offset], row[offset + 1], row[offset + 2]])
    }

    /// Removes a pre-strobe background, saturating each channel at zero.
    pub fn subtract(
        &self,
        background: &MaterializedImage,
    ) -> Result<MaterializedImage, ImageError> {
        if (self.width, self.height) != (background.width, background.height) {
            return Err(ImageError::Dimensions {
                expected: (self.width, self.height),
                actual: (background.width, background.height),
            });
        }
        let pixels = self
            .pixels
            .iter()
            .zip(&background.pixels)
            .map(|(lit, bg)| lit.saturating_sub(*bg))
            .collect();
        Ok(MaterializedImage {
            width: self.width,
            height: self.height,
            pixels,
        })
    }

    pub fn to_jpeg(&self, quality: i32) -> Result<OwnedBuf, ImageError> {
        encode_jpeg(
            &self.pixels,
            &StreamLayout::packed(self.width, self.height),
            quality,
        )
    }

    pub fn save_jpeg(&self, path: impl AsRef<Path>) -> Result<(), ImageError> {
        let jpeg = self.to_jpeg(STILL_JPEG_QUALITY)?;
        fs::write(path.as_ref(), &jpeg[..])?;
        debug!(
            "saved {} ({}x{}, {} bytes)",
            path.as_ref().display(),
            self.width,
            self.height,
            jpeg.len()
        );
        Ok(())
    }
}

/// Acquires `stream` from `request` and copies it out before the scope ends.
pub fn materialize_stream<A: BufferAccess + ?Sized>(
    request: &A,
    stream: StreamId,
    layout: &StreamLayout,
) -> Result<MaterializedImage, ImageError> {
    let buffer = request
        .acquire_scoped_read(stream)
        .ok_or(ImageError::MissingBuffer(stream))?;
    MaterializedImage::materialize(&buffer, layout)
}

impl fmt::Debug for MaterializedImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MaterializedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl fmt::Display for MaterializedImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{} RGB888 {} bytes",
            self.width,
            self.height,
            self.pixels.len()
        )
    }
}

/// Encodes RGB888 rows to JPEG using turbojpeg.
///
/// `pix` may carry row padding; `layout.stride` is passed through as the
/// pitch so padded driver buffers can be encoded without repacking.
pub fn encode_jpeg(
    pix: &[u8],
    layout: &StreamLayout,
    quality: i32,
) -> Result<OwnedBuf, ImageError> {
    let required = required_len(layout)?;
    if pix.len() < required {
        return Err(ImageError::Truncated {
            actual: pix.len(),
            required,
        });
    }

    let img = turbojpeg::Image {
        pixels: pix,
        width: layout.width as usize,
        pitch: layout.stride,
        height: layout.height as usize,
        format: turbojpeg::PixelFormat::RGB,
    };
    let jpeg = turbojpeg::compress(img, quality, turbojpeg::Subsamp::Sub2x2)?;
    Ok(jpeg)
}

fn required_len(layout: &StreamLayout) -> Result<usize, ImageError> {
    let overflow = ImageError::Overflow {
        width: layout.width,
        height: layout.height,
        stride: layout.stride,
    };
    layout.required_len().ok_or(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_copy_is_identical() {
        let layout = StreamLayout::packed(4, 3);
        let raw: Vec<u8> = (0..36).collect();
        let img = MaterializedImage::materialize(&ScopedBuffer::new(&raw), &layout)
            .unwrap();
        assert_eq!(img.as_slice(), raw.as_slice());
        assert_eq!(img.size(), 36);
    }

    #[test]
    fn padded_rows_are_dropped() {
        let layout = StreamLayout {
            width: 1,
            height: 3,
            stride: 5,
        };
        let raw = [1, 2, 3, 0xAA, 0xAA, 4, 5, 6, 0xAA, 0xAA, 7, 8, 9];
        let img = MaterializedImage::materialize(&ScopedBuffer::new(&raw), &layout)
            .unwrap();
        assert_eq!(img.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(img.pixel(0, 2), Some([7, 8, 9]));
        assert_eq!(img.pixel(1, 0), None);
    }

    #[test]
    fn short_stride_is_rejected() {
        let layout = StreamLayout {
            width: 4,
            height: 1,
            stride: 8,
        };
        let raw = [0u8; 16];
        let err = MaterializedImage::materialize(&ScopedBuffer::new(&raw), &layout)
            .unwrap_err();
        assert!(matches!(err, ImageError::Stride { stride: 8, .. }));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let layout = StreamLayout::packed(4, 4);
        let raw = [0u8; 47];
        let err = MaterializedImage::materialize(&ScopedBuffer::new(&raw), &layout)
            .unwrap_err();
        assert!(matches!(
            err,
            ImageError::Truncated {
                actual: 47,
                required: 48
            }
        ));
    }

    #[test]
    fn subtract_saturates() {
        let lit = MaterializedImage::from_pixels(1, 1, vec![200, 10, 50]);
        let bg = MaterializedImage::from_pixels(1, 1, vec![20, 30, 50]);
        let (lit, bg) = (lit.unwrap(), bg.unwrap());
        let diff = lit.subtract(&bg).unwrap();
        assert_eq!(diff.as_slice(), &[180, 0, 0]);

        let other = MaterializedImage::new(2, 1).unwrap();
        assert!(matches!(
            lit.subtract(&other),
            Err(ImageError::Dimensions { .. })
        ));
    }

    #[test]
    fn overflowing_layout_is_rejected() {
        let layout = StreamLayout {
            width: 1,
            height: 3,
            stride: usize::MAX / 2,
        };
        let raw = [0u8; 16];
        let err = MaterializedImage::materialize(&ScopedBuffer::new(&raw), &layout)
            .unwrap_err();
        assert!(matches!(err, ImageError::Overflow { height: 3, .. }));
        assert!(matches!(
            MaterializedImage::new(u32::MAX, u32::MAX),
            Err(ImageError::Overflow { .. })
        ));
    }
}
