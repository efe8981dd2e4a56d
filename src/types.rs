//! Shared value types for sensors, capture settings and frame geometry

use serde::{Deserialize, Serialize};

/// Which side of the device a sensor faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorPosition {
    Front,
    Back,
}

/// Lens category of a physical sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    WideAngle,
    UltraWideAngle,
    Telephoto,
    TrueDepth,
    #[default]
    Unknown,
}

impl SensorType {
    /// Classify a lens by its 35mm-equivalent focal length in millimetres.
    pub fn from_equivalent_focal_length(focal_mm: f32) -> Self {
        if focal_mm > 35.0 {
            SensorType::Telephoto
        } else if focal_mm >= 24.0 {
            SensorType::WideAngle
        } else if focal_mm > 0.0 {
            SensorType::UltraWideAngle
        } else {
            SensorType::Unknown
        }
    }
}

/// Descriptor of one physical camera unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sensor {
    pub position: SensorPosition,
    pub device_id: Option<String>,
    #[serde(default)]
    pub sensor_type: SensorType,
}

impl Sensor {
    pub fn new(position: SensorPosition) -> Self {
        Self {
            position,
            device_id: None,
            sensor_type: SensorType::Unknown,
        }
    }

    pub fn back() -> Self {
        Self::new(SensorPosition::Back)
    }

    pub fn front() -> Self {
        Self::new(SensorPosition::Front)
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_type(mut self, sensor_type: SensorType) -> Self {
        self.sensor_type = sensor_type;
        self
    }

    pub fn is_front(&self) -> bool {
        self.position == SensorPosition::Front
    }

    /// Whether `requested` names this sensor. A request without a device id matches by position.
    pub fn matches(&self, requested: &Sensor) -> bool {
        self.position == requested.position
            && (requested.device_id.is_none() || self.device_id == requested.device_id)
    }

    /// Whether both descriptors could resolve to the same physical sensor
    pub fn overlaps(&self, other: &Sensor) -> bool {
        self.matches(other) || other.matches(self)
    }

    /// Stable key identifying this sensor within a session (device id, or position index)
    pub fn key(&self, index: usize) -> String {
        self.device_id.clone().unwrap_or_else(|| index.to_string())
    }
}

/// Which capture pipeline accompanies the preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Photo,
    Video,
    PreviewOnly,
    AnalysisOnly,
}

impl CaptureMode {
    pub fn has_preview(&self) -> bool {
        !matches!(self, CaptureMode::AnalysisOnly)
    }
}

/// Requested output aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    #[serde(rename = "4:3")]
    Ratio4x3,
    #[serde(rename = "16:9")]
    Ratio16x9,
    #[serde(rename = "1:1")]
    Ratio1x1,
    #[default]
    Unconstrained,
}

impl AspectRatio {
    /// Ratio handed to the native resolution selector.
    ///
    /// 1:1 is not supported by native selectors on every device; it binds a
    /// 4:3 selector and is cropped through the viewport instead.
    pub fn selector_ratio(&self) -> Option<AspectRatio> {
        match self {
            AspectRatio::Ratio4x3 | AspectRatio::Ratio1x1 => Some(AspectRatio::Ratio4x3),
            AspectRatio::Ratio16x9 => Some(AspectRatio::Ratio16x9),
            AspectRatio::Unconstrained => None,
        }
    }

    /// Viewport rational (width over height, portrait oriented)
    pub fn viewport(&self) -> Rational {
        match self {
            AspectRatio::Ratio16x9 => Rational::new(9, 16),
            AspectRatio::Ratio1x1 => Rational::new(1, 1),
            AspectRatio::Ratio4x3 | AspectRatio::Unconstrained => Rational::new(3, 4),
        }
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "4:3" | "RATIO_4_3" => Ok(AspectRatio::Ratio4x3),
            "16:9" | "RATIO_16_9" => Ok(AspectRatio::Ratio16x9),
            "1:1" | "RATIO_1_1" => Ok(AspectRatio::Ratio1x1),
            "" | "NONE" | "UNCONSTRAINED" => Ok(AspectRatio::Unconstrained),
            other => Err(format!("unknown aspect ratio: {}", other)),
        }
    }
}

/// Flash behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashMode {
    #[default]
    None,
    On,
    Auto,
    /// Continuous torch instead of a per-shot flash
    Always,
}

impl FlashMode {
    /// Per-shot flash setting for a still-capture pipeline
    pub fn still_flash(&self) -> StillFlash {
        match self {
            FlashMode::On | FlashMode::Always => StillFlash::On,
            FlashMode::Auto => StillFlash::Auto,
            FlashMode::None => StillFlash::Off,
        }
    }

    pub fn torch_enabled(&self) -> bool {
        matches!(self, FlashMode::Always)
    }
}

/// Flash setting as understood by a still-capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StillFlash {
    Off,
    On,
    Auto,
}

/// Output format of the analysis stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisFormat {
    Yuv420,
    #[default]
    Nv21,
    Jpeg,
    Rgba8888,
}

impl AnalysisFormat {
    /// Pixel layout the hardware must deliver for this output format
    pub fn source_format(&self) -> PixelFormat {
        match self {
            AnalysisFormat::Rgba8888 => PixelFormat::Rgba8888,
            _ => PixelFormat::Yuv420,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisFormat::Yuv420 => "yuv_420_888",
            AnalysisFormat::Nv21 => "nv21",
            AnalysisFormat::Jpeg => "jpeg",
            AnalysisFormat::Rgba8888 => "rgba_8888",
        }
    }
}

impl std::str::FromStr for AnalysisFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YUV_420" | "YUV420" | "YUV_420_888" => Ok(AnalysisFormat::Yuv420),
            "NV21" => Ok(AnalysisFormat::Nv21),
            "JPEG" | "JPG" => Ok(AnalysisFormat::Jpeg),
            "RGBA" | "RGBA_8888" => Ok(AnalysisFormat::Rgba8888),
            other => Err(format!("unknown analysis format: {}", other)),
        }
    }
}

/// Pixel layout of a hardware frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Three planes (Y, U, V) with independent row and pixel strides
    Yuv420,
    /// Single interleaved RGBA plane
    Rgba8888,
}

/// Image analysis parameters. Presence on a configuration enables analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    pub output_format: AnalysisFormat,
    /// Requested analysis width; `None` uses the configured default
    pub target_width: Option<u32>,
    /// Emission cap; `None` means uncapped
    pub max_frames_per_second: Option<f64>,
}

impl AnalysisSettings {
    pub fn new(output_format: AnalysisFormat) -> Self {
        Self {
            output_format,
            target_width: None,
            max_frames_per_second: None,
        }
    }

    /// Normalise raw plugin inputs: width <= 0 (or beyond `u32`) means default, fps <= 0 means uncapped.
    pub fn from_raw(output_format: AnalysisFormat, width: i64, max_fps: Option<f64>) -> Self {
        Self {
            output_format,
            target_width: u32::try_from(width).ok().filter(|w| *w > 0),
            max_frames_per_second: max_fps.filter(|fps| *fps > 0.0 && fps.is_finite()),
        }
    }

    pub fn with_max_fps(mut self, fps: f64) -> Self {
        self.max_frames_per_second = Some(fps).filter(|f| *f > 0.0 && f.is_finite());
        self
    }

    pub fn with_target_width(mut self, width: u32) -> Self {
        self.target_width = Some(width).filter(|w| *w > 0);
        self
    }
}

/// Resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn swapped(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

/// Simple fraction used for viewport cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: u32,
    pub denominator: u32,
}

impl Rational {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

/// Crop rectangle in frame coordinates (right/bottom exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.left < self.right && self.top < self.bottom && self.right <= width && self.bottom <= height
    }
}

/// Clockwise rotation to apply for upright display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    #[serde(rename = "rotation0deg")]
    Deg0,
    #[serde(rename = "rotation90deg")]
    Deg90,
    #[serde(rename = "rotation180deg")]
    Deg180,
    #[serde(rename = "rotation270deg")]
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            270 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// Video quality preset for the video-capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    #[default]
    Highest,
    Uhd,
    Fhd,
    Hd,
    Sd,
    Lowest,
}

impl VideoQuality {
    /// Nominal resolution (width, height); `None` means "whatever the device offers"
    pub fn resolution(&self) -> Option<(u32, u32)> {
        match self {
            VideoQuality::Uhd => Some((3840, 2160)),
            VideoQuality::Fhd => Some((1920, 1080)),
            VideoQuality::Hd => Some((1280, 720)),
            VideoQuality::Sd => Some((720, 480)),
            VideoQuality::Highest | VideoQuality::Lowest => None,
        }
    }
}

/// Supported hardware level, ordered from least to most capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareLevel {
    Legacy,
    External,
    Limited,
    Full,
    Level3,
}

/// Vendor processing extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionMode {
    Auto,
    Bokeh,
    Hdr,
    Night,
    FaceRetouch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_binds_four_by_three_selector() {
        assert_eq!(
            AspectRatio::Ratio1x1.selector_ratio(),
            Some(AspectRatio::Ratio4x3)
        );
        assert_eq!(AspectRatio::Ratio1x1.viewport(), Rational::new(1, 1));
        assert_eq!(AspectRatio::Unconstrained.selector_ratio(), None);
    }

    #[test]
    fn test_flash_mapping() {
        assert_eq!(FlashMode::Always.still_flash(), StillFlash::On);
        assert_eq!(FlashMode::Auto.still_flash(), StillFlash::Auto);
        assert_eq!(FlashMode::None.still_flash(), StillFlash::Off);
        assert!(FlashMode::Always.torch_enabled());
        assert!(!FlashMode::On.torch_enabled());
    }

    #[test]
    fn test_hardware_level_ordering() {
        assert!(HardwareLevel::Level3 > HardwareLevel::Full);
        assert!(HardwareLevel::Full > HardwareLevel::Limited);
        assert!(HardwareLevel::Limited > HardwareLevel::Legacy);
    }

    #[test]
    fn test_analysis_settings_from_raw() {
        let settings = AnalysisSettings::from_raw(AnalysisFormat::Jpeg, 0, Some(0.0));
        assert_eq!(settings.target_width, None);
        assert_eq!(settings.max_frames_per_second, None);

        let settings = AnalysisSettings::from_raw(AnalysisFormat::Nv21, 640, Some(10.0));
        assert_eq!(settings.target_width, Some(640));
        assert_eq!(settings.max_frames_per_second, Some(10.0));
        let settings = AnalysisSettings::from_raw(AnalysisFormat::Nv21, i64::from(u32::MAX) + 1, None);
        assert_eq!(settings.target_width, None);
        let settings = AnalysisSettings::from_raw(AnalysisFormat::Nv21, -5, None);
        assert_eq!(settings.target_width, None);
    }

    #[test]
    fn test_parse_inputs() {
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Ratio16x9);
        assert_eq!("RATIO_1_1".parse::<AspectRatio>().unwrap(), AspectRatio::Ratio1x1);
        assert_eq!("yuv_420".parse::<AnalysisFormat>().unwrap(), AnalysisFormat::Yuv420);
        assert!("bgra".parse::<AnalysisFormat>().is_err());
    }

    #[test]
    fn test_rotation_and_crop() {
        assert_eq!(Rotation::from_degrees(-90), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(450).degrees(), 90);
        let crop = CropRect { left: 2, top: 4, right: 10, bottom: 8 };
        assert_eq!((crop.width(), crop.height()), (8, 4));
        assert!(crop.fits_within(10, 8));
        assert!(!crop.fits_within(9, 8));
    }

    #[test]
    fn test_sensor_type_from_focal_length() {
        assert_eq!(SensorType::from_equivalent_focal_length(77.0), SensorType::Telephoto);
        assert_eq!(SensorType::from_equivalent_focal_length(26.0), SensorType::WideAngle);
        assert_eq!(SensorType::from_equivalent_focal_length(13.0), SensorType::UltraWideAngle);
    }
}
