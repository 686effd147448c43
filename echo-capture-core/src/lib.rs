//! # echo-capture-core
//!
//! Platform-agnostic core of an echo-cancelled microphone source.
//!
//! A microphone and a loopback capture of the system output feed an echo
//! filter; every cancelled frame is encoded at the negotiated codec format
//! and handed to the registered delegates. Platform backends (Windows
//! WASAPI) implement the `CaptureDeviceBackend` and `LoopbackBackend`
//! traits and plug into the generic `EchoCancelledSource`.
//!
//! ## Architecture
//!
//! ```text
//! echo-capture-core (this crate)
//! ├── traits/       ← CaptureDeviceBackend, LoopbackBackend, EchoFilter, AudioEncoder, PipelineDelegate
//! ├── models/       ← CaptureError, PipelineState, PipelineConfiguration, AudioFrame, AudioCodecFormat
//! ├── processing/   ← PCM conversion, resampling, FrameCodecBridge, FrameQueue, CallbackGate, echo filters
//! ├── session/      ← device managers, EchoCanceller, FormatManager, EchoCancelledSource
//! └── backends/     ← virtual devices for running without hardware
//! ```
//!
//! ## Features
//! - `aec3`: [`Aec3Filter`], a WebRTC AEC3 echo filter. Without it only
//!   [`PassthroughFilter`] is available, which frames audio like a real
//!   canceller but removes no echo.

pub mod backends;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backends::virtual_device::{VirtualCaptureBackend, VirtualDeviceHandle, VirtualLoopbackBackend};
pub use models::audio_models::{AudioFormat, AudioFrame, AudioLevels, AudioSource, AudioTrackType, PipelineDiagnostics};
pub use models::codec_format::AudioCodecFormat;
pub use models::config::{CaptureDeviceConfig, EchoSessionConfig, FilterFeatures, PipelineConfiguration};
pub use models::error::CaptureError;
pub use models::state::PipelineState;
pub use processing::codec_bridge::{EncodedSample, FrameCodecBridge};
#[cfg(feature = "aec3")]
pub use processing::aec3_filter::Aec3Filter;
pub use processing::passthrough_filter::PassthroughFilter;
pub use processing::resampler::LinearResampler;
pub use session::capture_manager::CaptureDeviceManager;
pub use session::echo_canceller::{CancellerStats, EchoCanceller};
pub use session::format_manager::FormatManager;
pub use session::pipeline::{EchoCancelledSource, EchoCancelledSourceBuilder};
pub use session::reference_manager::ReferenceCaptureManager;
pub use traits::audio_encoder::AudioEncoder;
pub use traits::audio_source::EncodedAudioSource;
pub use traits::capture_backend::{CaptureDevice, CaptureDeviceBackend, FrameCallback, LoopbackBackend};
pub use traits::echo_filter::{EchoFilter, FilterRead};
pub use traits::pipeline_delegate::{ChannelDelegate, PipelineDelegate, PipelineEvent};
