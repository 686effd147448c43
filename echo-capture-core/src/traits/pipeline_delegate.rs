use std::sync::mpsc::Sender;

use crate::models::error::CaptureError;
use crate::models::state::PipelineState;

/// Event delegate for pipeline notifications.
///
/// `on_encoded_sample` is called on the near-end capture thread, once per
/// cancelled-and-encoded frame and in capture order. `on_error` is called on
/// whichever thread discovered the problem. Implementations should hand off
/// to their own thread if they do more than enqueue.
pub trait PipelineDelegate: Send + Sync {
    /// An encoded frame is ready for transport.
    ///
    /// `duration_units` is the frame duration in RTP clock units.
    fn on_encoded_sample(&self, duration_units: u32, sample: &[u8]);

    /// A non-fatal device or processing problem occurred.
    fn on_error(&self, error: &CaptureError);

    /// Called after every lifecycle transition.
    fn on_state_changed(&self, _state: PipelineState) {}
}

/// A pipeline notification as delivered by [`ChannelDelegate`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    EncodedSample { duration_units: u32, sample: Vec<u8> },
    Error(CaptureError),
    StateChanged(PipelineState),
}

/// Forwards notifications into an mpsc channel.
///
/// Send failures (receiver dropped) are ignored.
pub struct ChannelDelegate {
    sender: Sender<PipelineEvent>,
}

impl ChannelDelegate {
    pub fn new(sender: Sender<PipelineEvent>) -> Self {
        Self { sender }
    }
}

impl PipelineDelegate for ChannelDelegate {
    fn on_encoded_sample(&self, duration_units: u32, sample: &[u8]) {
        let _ = self.sender.send(PipelineEvent::EncodedSample {
            duration_units,
            sample: sample.to_vec(),
        });
    }

    fn on_error(&self, error: &CaptureError) {
        let _ = self.sender.send(PipelineEvent::Error(error.clone()));
    }

    fn on_state_changed(&self, state: PipelineState) {
        let _ = self.sender.send(PipelineEvent::StateChanged(state));
    }
}
