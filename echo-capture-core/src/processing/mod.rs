#[cfg(feature = "aec3")]
pub mod aec3_filter;
pub mod callback_gate;
pub mod codec_bridge;
pub mod frame_queue;
pub mod passthrough_filter;
pub mod pcm;
pub mod resampler;
