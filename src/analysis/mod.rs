//! Image analysis stream: format conversion, backpressure and delivery

pub mod convert;
pub mod frame;
pub mod gate;
pub mod pipeline;

pub use convert::{
    nv21_len, nv21_to_jpeg, nv21_to_rgb, rgba_to_jpeg, yuv420_to_jpeg, yuv420_to_nv21,
    FrameFormatConverter, DEFAULT_JPEG_QUALITY,
};
pub use frame::{AnalysisImage, AnalysisPlane, Frame, FrameLease, Plane};
pub use gate::{FrameBackpressureGate, GateWait};
pub use pipeline::{
    AnalysisEvent, AnalysisPipeline, AnalysisReceiver, AnalysisStats, DEFAULT_CONSUMER_CAPACITY,
};
