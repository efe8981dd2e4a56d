//! Pixel format transforms for the analysis stream
//!
//! Pure, synchronous functions: YUV420 planar to NV21, NV21 to JPEG and plane
//! repackaging. NV21 and JPEG derive from a YUV420 source; RGBA and raw
//! YUV420 output only repackage the source planes.

use bytes::Bytes;

use super::frame::{AnalysisImage, AnalysisPlane, Frame, Plane};
use crate::errors::SessionError;
use crate::types::{AnalysisFormat, CropRect};

/// Default JPEG quality for analysis frames
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Converts hardware frames into the configured analysis output format
#[derive(Debug, Clone, Copy)]
pub struct FrameFormatConverter {
    jpeg_quality: u8,
}

impl FrameFormatConverter {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Convert `frame` to `format`. The frame's buffer is not released here.
    pub fn convert(
        &self,
        frame: &Frame,
        format: AnalysisFormat,
        sequence: u64,
    ) -> Result<AnalysisImage, SessionError> {
        let expected = format.source_format();
        if frame.format != expected {
            return Err(SessionError::Conversion(format!(
                "{} output needs a {:?} source, got {:?}",
                format.as_str(),
                expected,
                frame.format
            )));
        }

        let mut image = AnalysisImage {
            sequence,
            format,
            width: frame.width,
            height: frame.height,
            rotation: frame.rotation,
            crop_rect: Some(frame.crop_rect),
            bytes: None,
            planes: Vec::new(),
            timestamp_ns: frame.timestamp_ns,
        };

        match format {
            AnalysisFormat::Jpeg => {
                let jpeg = yuv420_to_jpeg(
                    frame.width,
                    frame.height,
                    &frame.planes,
                    Some(frame.crop_rect),
                    self.jpeg_quality,
                )?;
                image.bytes = Some(Bytes::from(jpeg));
            }
            AnalysisFormat::Nv21 => {
                let nv21 = yuv420_to_nv21(frame.width, frame.height, &frame.planes)?;
                image.bytes = Some(Bytes::from(nv21));
                image.planes = repackage_planes(&frame.planes);
            }
            AnalysisFormat::Yuv420 => {
                check_plane_count(&frame.planes, 3)?;
                image.planes = repackage_planes(&frame.planes);
            }
            AnalysisFormat::Rgba8888 => {
                check_plane_count(&frame.planes, 1)?;
                image.crop_rect = None;
                image.planes = repackage_planes(&frame.planes);
            }
        }

        Ok(image)
    }
}

impl Default for FrameFormatConverter {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

fn check_plane_count(planes: &[Plane], expected: usize) -> Result<(), SessionError> {
    if planes.len() < expected {
        return Err(SessionError::Conversion(format!(
            "expected {} planes, got {}",
            expected,
            planes.len()
        )));
    }
    Ok(())
}

/// Copy planes out for the consumer; `Bytes` clones share the buffer
pub fn repackage_planes(planes: &[Plane]) -> Vec<AnalysisPlane> {
    planes
        .iter()
        .map(|plane| AnalysisPlane {
            bytes: plane.bytes.clone(),
            row_stride: plane.row_stride,
            pixel_stride: plane.pixel_stride,
        })
        .collect()
}

#[inline]
fn chroma_dims(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(2), height.div_ceil(2))
}

/// Packed NV21 length for a frame: full Y plane then interleaved V/U
pub fn nv21_len(width: u32, height: u32) -> usize {
    let (cw, ch) = chroma_dims(width, height);
    width as usize * height as usize + 2 * cw as usize * ch as usize
}

/// Interleave a YUV420 planar frame into NV21.
///
/// Row padding is skipped; chroma samples are read through each plane's
/// row and pixel stride, so both planar and semi-planar sources work.
pub fn yuv420_to_nv21(width: u32, height: u32, planes: &[Plane]) -> Result<Vec<u8>, SessionError> {
    check_plane_count(planes, 3)?;
    if width == 0 || height == 0 {
        return Err(SessionError::Conversion("empty frame".to_string()));
    }
    let (y_plane, u_plane, v_plane) = (&planes[0], &planes[1], &planes[2]);

    let mut nv21 = Vec::with_capacity(nv21_len(width, height));

    let row_len = width as usize;
    for row in 0..height as usize {
        let start = row * y_plane.row_stride as usize;
        let line = y_plane.bytes.get(start..start + row_len).ok_or_else(|| {
            SessionError::Conversion(format!("Y plane too short for row {}", row))
        })?;
        nv21.extend_from_slice(line);
    }

    let (chroma_width, chroma_height) = chroma_dims(width, height);
    for row in 0..chroma_height {
        for col in 0..chroma_width {
            let v = v_plane.sample(col, row);
            let u = u_plane.sample(col, row);
            match (v, u) {
                (Some(v), Some(u)) => {
                    nv21.push(v);
                    nv21.push(u);
                }
                _ => {
                    return Err(SessionError::Conversion(format!(
                        "chroma planes too short at ({}, {})",
                        col, row
                    )))
                }
            }
        }
    }

    Ok(nv21)
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Full-range BT.601 (JFIF) YCbCr to RGB, fixed point with 16 fractional bits
#[inline]
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = (y as i32) << 16;
    let cb = cb as i32 - 128;
    let cr = cr as i32 - 128;
    let r = (y + 91_881 * cr + 32_768) >> 16;
    let g = (y - 22_554 * cb - 46_802 * cr + 32_768) >> 16;
    let b = (y + 116_130 * cb + 32_768) >> 16;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn resolve_crop(crop: Option<CropRect>, width: u32, height: u32) -> Result<CropRect, SessionError> {
    let crop = crop.unwrap_or_else(|| CropRect::full(width, height));
    if !crop.fits_within(width, height) {
        return Err(SessionError::Conversion(format!(
            "crop rectangle {:?} outside {}x{} frame",
            crop, width, height
        )));
    }
    Ok(crop)
}

/// Decode the cropped region of an NV21 buffer into packed RGB
pub fn nv21_to_rgb(
    nv21: &[u8],
    width: u32,
    height: u32,
    crop: Option<CropRect>,
) -> Result<(Vec<u8>, u32, u32), SessionError> {
    if nv21.len() < nv21_len(width, height) {
        return Err(SessionError::Conversion(format!(
            "NV21 buffer holds {} bytes, {}x{} needs {}",
            nv21.len(),
            width,
            height,
            nv21_len(width, height)
        )));
    }
    let crop = resolve_crop(crop, width, height)?;
    let (chroma_width, _) = chroma_dims(width, height);
    let luma_len = width as usize * height as usize;

    let mut rgb = Vec::with_capacity(crop.width() as usize * crop.height() as usize * 3);
    for y in crop.top..crop.bottom {
        let chroma_row = luma_len + (y / 2) as usize * 2 * chroma_width as usize;
        for x in crop.left..crop.right {
            let luma = nv21[y as usize * width as usize + x as usize];
            let chroma = chroma_row + (x / 2) as usize * 2;
            let (cr, cb) = (nv21[chroma], nv21[chroma + 1]);
            rgb.extend_from_slice(&ycbcr_to_rgb(luma, cb, cr));
        }
    }
    Ok((rgb, crop.width(), crop.height()))
}

fn encode_rgb_jpeg(rgb: Vec<u8>, width: u32, height: u32, quality: u8) -> Result<Vec<u8>, SessionError> {
    let img = image::RgbImage::from_vec(width, height, rgb)
        .ok_or_else(|| SessionError::Conversion("RGB buffer does not match dimensions".to_string()))?;
    let dynamic_img = image::DynamicImage::ImageRgb8(img);

    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    dynamic_img
        .write_with_encoder(encoder)
        .map_err(|e| SessionError::Conversion(format!("JPEG encode failed: {}", e)))?;
    Ok(out)
}

/// Encode the cropped region of an NV21 buffer as JPEG
pub fn nv21_to_jpeg(
    nv21: &[u8],
    width: u32,
    height: u32,
    crop: Option<CropRect>,
    quality: u8,
) -> Result<Vec<u8>, SessionError> {
    let (rgb, out_width, out_height) = nv21_to_rgb(nv21, width, height, crop)?;
    encode_rgb_jpeg(rgb, out_width, out_height, quality)
}

/// YUV420 planar to JPEG, through NV21
pub fn yuv420_to_jpeg(
    width: u32,
    height: u32,
    planes: &[Plane],
    crop: Option<CropRect>,
    quality: u8,
) -> Result<Vec<u8>, SessionError> {
    let nv21 = yuv420_to_nv21(width, height, planes)?;
    nv21_to_jpeg(&nv21, width, height, crop, quality)
}

/// Encode an RGBA (or BGRA when `bgra` is set) buffer as JPEG, dropping alpha
pub fn rgba_to_jpeg(
    plane: &Plane,
    width: u32,
    height: u32,
    crop: Option<CropRect>,
    bgra: bool,
    quality: u8,
) -> Result<Vec<u8>, SessionError> {
    let crop = resolve_crop(crop, width, height)?;
    let pixel_stride = plane.pixel_stride.max(4) as usize;
    let mut rgb = Vec::with_capacity(crop.width() as usize * crop.height() as usize * 3);
    for y in crop.top..crop.bottom {
        let row = y as usize * plane.row_stride as usize;
        for x in crop.left..crop.right {
            let start = row + x as usize * pixel_stride;
            let px = plane.bytes.get(start..start + 3).ok_or_else(|| {
                SessionError::Conversion(format!("RGBA plane too short at ({}, {})", x, y))
            })?;
            if bgra {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            } else {
                rgb.extend_from_slice(px);
            }
        }
    }
    encode_rgb_jpeg(rgb, crop.width(), crop.height(), quality)
}
