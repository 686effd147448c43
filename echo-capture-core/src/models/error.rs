use thiserror::Error;

/// Errors raised by the echo-cancelled capture pipeline and its collaborators.
///
/// Lifecycle operations never return these to the caller; device problems are
/// delivered through [`PipelineDelegate::on_error`](crate::PipelineDelegate::on_error).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no audio capture devices are available")]
    DeviceUnavailable,

    #[error("the requested audio input device index {index} exceeds the maximum index of {max_index}")]
    DeviceIndexOutOfRange { index: i32, max_index: i32 },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("echo filter failed: {0}")]
    FilterFailed(String),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),
}

impl CaptureError {
    /// Device-level conditions that leave the pipeline running but inert.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable | Self::DeviceIndexOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_out_of_range_message_names_maximum() {
        let err = CaptureError::DeviceIndexOutOfRange {
            index: 5,
            max_index: 1,
        };
        assert_eq!(
            err.to_string(),
            "the requested audio input device index 5 exceeds the maximum index of 1"
        );
        assert!(err.is_device_error());
    }

    #[test]
    fn unsupported_operation_is_not_a_device_error() {
        let err = CaptureError::UnsupportedOperation("raw samples".into());
        assert!(!err.is_device_error());
    }
}
