pub mod audio_encoder;
pub mod audio_source;
pub mod capture_backend;
pub mod echo_filter;
pub mod pipeline_delegate;
