//! # echo-capture-windows
//!
//! Windows WASAPI backends for echo-capture.
//!
//! Provides:
//! - `WasapiCaptureBackend`: microphone capture by enumeration index
//! - `WasapiLoopbackBackend`: system output capture via loopback on the default render endpoint
//! - `DeviceEnumerator`: capture endpoint enumeration via the MMDevice API
//! - `permissions`: microphone privacy check
//!
//! The default `aec3` feature enables the WebRTC AEC3 filter in
//! `echo-capture-core`.
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use echo_capture_core::{Aec3Filter, EchoCancelledSourceBuilder};
//! use echo_capture_windows::{WasapiCaptureBackend, WasapiLoopbackBackend};
//!
//! let mut source = EchoCancelledSourceBuilder::new(WasapiCaptureBackend, WasapiLoopbackBackend, encoder)
//!     .delegate(delegate)
//!     .build::<Aec3Filter>()?;
//! source.start();
//! ```

#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_loopback;
#[cfg(target_os = "windows")]
pub mod wasapi_mic;
#[cfg(target_os = "windows")]
pub mod wasapi_stream;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use wasapi_loopback::WasapiLoopbackBackend;
#[cfg(target_os = "windows")]
pub use wasapi_mic::WasapiCaptureBackend;
#[cfg(target_os = "windows")]
pub use wasapi_stream::{Endpoint, WasapiStream};
