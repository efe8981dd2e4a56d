//! Hardware frames, buffer leases and converted analysis images

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{AnalysisFormat, CropRect, PixelFormat, Rotation};

/// One plane of a hardware frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub bytes: Bytes,
    /// Bytes between the starts of two consecutive rows
    pub row_stride: u32,
    /// Bytes between two consecutive samples of the same row
    pub pixel_stride: u32,
}

impl Plane {
    pub fn new(bytes: impl Into<Bytes>, row_stride: u32, pixel_stride: u32) -> Self {
        Self {
            bytes: bytes.into(),
            row_stride,
            pixel_stride,
        }
    }

    /// Sample at (`col`, `row`) honouring both strides
    #[inline]
    pub(crate) fn sample(&self, col: u32, row: u32) -> Option<u8> {
        let index = row as usize * self.row_stride as usize + col as usize * self.pixel_stride as usize;
        self.bytes.get(index).copied()
    }
}

/// Release token for a hardware buffer.
///
/// The buffer returns to the pool exactly once: on [`FrameLease::release`] or
/// when the lease is dropped, whichever happens first.
pub struct FrameLease {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl FrameLease {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A lease with nothing to give back (frames built by hand in tests or tools)
    pub fn detached() -> Self {
        Self { release: None }
    }

    pub fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.fire();
    }
}

impl std::fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLease")
            .field("pending", &self.release.is_some())
            .finish()
    }
}

/// A frame delivered by the camera, owned by the hardware buffer pool
#[derive(Debug)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    pub crop_rect: CropRect,
    pub rotation: Rotation,
    pub timestamp_ns: u64,
    lease: FrameLease,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane>) -> Self {
        Self {
            width,
            height,
            format,
            planes,
            crop_rect: CropRect::full(width, height),
            rotation: Rotation::Deg0,
            timestamp_ns: 0,
            lease: FrameLease::detached(),
        }
    }

    pub fn with_lease(mut self, lease: FrameLease) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_crop(mut self, crop_rect: CropRect) -> Self {
        self.crop_rect = crop_rect;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    /// Give the underlying buffer back to the hardware pool
    pub fn release(self) {
        let Frame { lease, .. } = self;
        lease.release();
    }
}

/// Plane copied out of a hardware buffer for the consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPlane {
    pub bytes: Bytes,
    pub row_stride: u32,
    pub pixel_stride: u32,
}

/// Converted frame handed to the analysis consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisImage {
    pub sequence: u64,
    pub format: AnalysisFormat,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// Absent for RGBA output, which carries no crop information
    pub crop_rect: Option<CropRect>,
    /// Encoded JPEG or packed NV21 bytes
    pub bytes: Option<Bytes>,
    /// Repackaged source planes (YUV420, NV21, RGBA)
    pub planes: Vec<AnalysisPlane>,
    pub timestamp_ns: u64,
}
