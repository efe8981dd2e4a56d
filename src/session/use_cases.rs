//! Construction of the per-sensor use-case sets for a bind

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::configuration::CaptureConfiguration;
use crate::platform::FrameSink;
use crate::types::{
    AnalysisFormat, AspectRatio, CaptureMode, PixelFormat, Size, StillFlash, VideoQuality,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCaseKind {
    Preview,
    StillCapture,
    VideoCapture,
    Analysis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewSpec {
    pub aspect_ratio: Option<AspectRatio>,
    pub target_size: Option<Size>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StillCaptureSpec {
    pub flash: StillFlash,
    pub aspect_ratio: Option<AspectRatio>,
    pub target_size: Option<Size>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoCaptureSpec {
    pub quality: VideoQuality,
    pub aspect_ratio: Option<AspectRatio>,
}

#[derive(Clone)]
pub struct AnalysisSpec {
    pub target_size: Size,
    pub source_format: PixelFormat,
    pub output_format: AnalysisFormat,
    pub sink: Arc<dyn FrameSink>,
}

impl std::fmt::Debug for AnalysisSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisSpec")
            .field("target_size", &self.target_size)
            .field("source_format", &self.source_format)
            .field("output_format", &self.output_format)
            .finish()
    }
}

/// One capture function bound against a sensor
#[derive(Debug, Clone)]
pub enum UseCase {
    Preview(PreviewSpec),
    StillCapture(StillCaptureSpec),
    VideoCapture(VideoCaptureSpec),
    Analysis(AnalysisSpec),
}

impl UseCase {
    pub fn kind(&self) -> UseCaseKind {
        match self {
            UseCase::Preview(_) => UseCaseKind::Preview,
            UseCase::StillCapture(_) => UseCaseKind::StillCapture,
            UseCase::VideoCapture(_) => UseCaseKind::VideoCapture,
            UseCase::Analysis(_) => UseCaseKind::Analysis,
        }
    }
}

/// The use cases bound together against one sensor
#[derive(Debug, Clone, Default)]
pub struct UseCaseSet {
    use_cases: Vec<UseCase>,
}

impl UseCaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, use_case: UseCase) {
        self.use_cases.push(use_case);
    }

    pub fn iter(&self) -> impl Iterator<Item = &UseCase> {
        self.use_cases.iter()
    }

    pub fn kinds(&self) -> Vec<UseCaseKind> {
        self.use_cases.iter().map(UseCase::kind).collect()
    }

    pub fn contains(&self, kind: UseCaseKind) -> bool {
        self.use_cases.iter().any(|u| u.kind() == kind)
    }

    /// Flash of the still-capture use case, if one is present
    pub fn still_flash(&self) -> Option<StillFlash> {
        self.use_cases.iter().find_map(|u| match u {
            UseCase::StillCapture(spec) => Some(spec.flash),
            _ => None,
        })
    }

    pub fn analysis(&self) -> Option<&AnalysisSpec> {
        self.use_cases.iter().find_map(|u| match u {
            UseCase::Analysis(spec) => Some(spec),
            _ => None,
        })
    }
}

/// Analysis target resolution for a configured width.
///
/// Height follows the selector ratio: 4:3 (and square, which binds a 4:3
/// selector) or 16:9 for everything else.
pub fn analysis_target_size(width: u32, aspect_ratio: AspectRatio) -> Size {
    let ratio = match aspect_ratio.selector_ratio() {
        Some(AspectRatio::Ratio4x3) => 4.0 / 3.0,
        _ => 16.0 / 9.0,
    };
    Size::new(width, (width as f64 / ratio).round() as u32)
}

/// Build the use cases for the sensor at `index` in the bound sensor list.
///
/// `analysis` is passed for the primary sensor only; flash is forced off on
/// every secondary sensor.
pub fn build_use_cases(
    config: &CaptureConfiguration,
    index: usize,
    analysis: Option<AnalysisSpec>,
) -> UseCaseSet {
    let mut set = UseCaseSet::new();
    let aspect_ratio = config.aspect_ratio.selector_ratio();

    if config.capture_mode.has_preview() {
        set.push(UseCase::Preview(PreviewSpec {
            aspect_ratio,
            target_size: config.preview_size,
        }));
    }

    match config.capture_mode {
        CaptureMode::Photo => {
            let flash = if index == 0 {
                config.flash_mode.still_flash()
            } else {
                StillFlash::Off
            };
            set.push(UseCase::StillCapture(StillCaptureSpec {
                flash,
                aspect_ratio,
                target_size: config.photo_size,
            }));
        }
        CaptureMode::Video => {
            set.push(UseCase::VideoCapture(VideoCaptureSpec {
                quality: config.video_quality,
                aspect_ratio,
            }));
        }
        CaptureMode::PreviewOnly | CaptureMode::AnalysisOnly => {}
    }

    if let Some(spec) = analysis {
        set.push(UseCase::Analysis(spec));
    }

    log::debug!("Use cases for sensor {}: {:?}", index, set.kinds());
    set
}
