//! Synthetic hardware frames
//!
//! Frames mimic what mobile camera stacks actually deliver: luma rows padded
//! out to a wider row stride, and chroma stored semi-planar so the U and V
//! planes are two views over one interleaved buffer with a pixel stride of 2.

use bytes::Bytes;

use crate::analysis::frame::{Frame, Plane};
use crate::types::PixelFormat;

/// Value written into row padding so conversions that read it are caught
pub const PADDING_BYTE: u8 = 0xEE;

/// Nominal frame spacing at 30 fps, in nanoseconds
const FRAME_INTERVAL_NS: u64 = 33_333_333;

/// Build a YUV420 frame whose content shifts with `frame_number`.
///
/// `row_stride` below `width` is raised to `width`.
pub fn synthetic_yuv420_frame(frame_number: u64, width: u32, height: u32, row_stride: u32) -> Frame {
    let row_stride = row_stride.max(width) as usize;
    let (w, h) = (width as usize, height as usize);
    let base = (frame_number % 256) as u8;

    let mut luma = vec![PADDING_BYTE; row_stride * h];
    for y in 0..h {
        for x in 0..w {
            luma[y * row_stride + x] = base.wrapping_add(((x + y) % 200) as u8);
        }
    }

    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let chroma_stride = row_stride.max(cw * 2);
    let mut chroma = vec![PADDING_BYTE; chroma_stride * ch];
    for y in 0..ch {
        for x in 0..cw {
            let idx = y * chroma_stride + x * 2;
            chroma[idx] = base.wrapping_add(64 + (x % 64) as u8); // U
            chroma[idx + 1] = base.wrapping_add(160 + (y % 64) as u8); // V
        }
    }
    let chroma = Bytes::from(chroma);
    let u = chroma.slice(..chroma.len() - 1);
    let v = chroma.slice(1..);

    Frame::new(
        width,
        height,
        PixelFormat::Yuv420,
        vec![
            Plane::new(luma, row_stride as u32, 1),
            Plane::new(u, chroma_stride as u32, 2),
            Plane::new(v, chroma_stride as u32, 2),
        ],
    )
    .with_timestamp(frame_number * FRAME_INTERVAL_NS)
}

/// Build a tightly packed RGBA frame with a gradient that moves per frame
pub fn synthetic_rgba_frame(frame_number: u64, width: u32, height: u32) -> Frame {
    let base = (frame_number % 256) as u8;
    let mut data = vec![0u8; (width * height * 4) as usize];
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 4) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
            data[idx + 3] = 255;
        }
    }

    Frame::new(
        width,
        height,
        PixelFormat::Rgba8888,
        vec![Plane::new(data, width * 4, 4)],
    )
    .with_timestamp(frame_number * FRAME_INTERVAL_NS)
}
