pub mod audio_models;
pub mod codec_format;
pub mod config;
pub mod error;
pub mod state;
