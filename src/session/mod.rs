//! Camera session lifecycle
//!
//! [`CameraSession`] owns the desired [`CaptureConfiguration`] and serializes
//! every change onto its own thread, where [`SessionBinder`] turns the
//! configuration into exactly one live binding.

pub mod binder;
pub mod configuration;
pub mod controller;
pub mod events;
pub mod recording;
pub mod use_cases;

pub use binder::{BindOutcome, BinderPolicy, BinderState, SessionBinder, SessionBinding};
pub use configuration::{is_portrait, oriented_size, CaptureConfiguration};
pub use controller::{CameraSession, ConfigChange, DEFAULT_FOCUS_AUTO_CANCEL};
pub use events::{SessionEvent, EVENT_CAPACITY};
pub use recording::{PendingStop, RecordingInfo, RecordingSet};
pub use use_cases::{build_use_cases, UseCase, UseCaseKind, UseCaseSet};
