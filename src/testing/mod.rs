//! Testing utilities
//!
//! An in-memory camera provider and synthetic frames shaped like real
//! mobile camera output, for exercising sessions without hardware.

pub mod fake_provider;
pub mod synthetic_data;

pub use fake_provider::{AckBehaviour, BoundSensorRecord, FakeCameraProvider, ProviderEvent};
pub use synthetic_data::{synthetic_rgba_frame, synthetic_yuv420_frame};
