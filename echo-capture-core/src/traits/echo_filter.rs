use crate::models::config::EchoSessionConfig;
use crate::models::error::CaptureError;

/// Result of one [`EchoFilter::read`] attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRead {
    /// A cancelled frame was written to the output buffer.
    pub frame_ready: bool,
    /// Samples written to the output buffer when `frame_ready` is set.
    pub samples: usize,
    /// Further frames are available; the caller must read again immediately.
    pub more_pending: bool,
    /// The filter's estimate of the far-end audio behind the cancelled echo.
    pub played_echo: Option<Vec<i16>>,
}

impl FilterRead {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// An acoustic echo cancellation filter.
///
/// The filter owns its own framing: its internal block size need not match
/// the device period, so one `write` may make zero, one, or several frames
/// readable. Implementations are driven from a single lock owned by
/// [`EchoCanceller`](crate::EchoCanceller) and need no internal
/// synchronisation.
pub trait EchoFilter: Send {
    /// Build a filter for the given formats, delays and features.
    fn from_session(session: &EchoSessionConfig) -> Result<Self, CaptureError>
    where
        Self: Sized;

    /// Register a far-end frame that was played out of the speakers.
    fn register_played(&mut self, frame: &[u8]) -> Result<(), CaptureError>;

    /// Queue a near-end frame for cancellation.
    fn write(&mut self, frame: &[u8]) -> Result<(), CaptureError>;

    /// Produce at most one cancelled frame into `out`.
    fn read(&mut self, out: &mut [i16]) -> Result<FilterRead, CaptureError>;
}
