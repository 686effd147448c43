use serde::Serialize;

/// Pipeline lifecycle state machine.
///
/// State transitions:
/// ```text
/// idle ──start──▶ started ──pause──▶ paused
///   │               ▲ │                │
///   │               └─┼────resume──────┘
///   └──────close──────┴──────close─────┴──▶ closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    #[default]
    Idle,
    Started,
    Paused,
    Closed,
}

impl PipelineState {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The state reached by `start`, or `None` when the call is a no-op.
    pub fn on_start(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Started),
            _ => None,
        }
    }

    pub fn on_pause(self) -> Option<Self> {
        match self {
            Self::Started => Some(Self::Paused),
            _ => None,
        }
    }

    pub fn on_resume(self) -> Option<Self> {
        match self {
            Self::Paused => Some(Self::Started),
            _ => None,
        }
    }

    pub fn on_close(self) -> Option<Self> {
        match self {
            Self::Closed => None,
            _ => Some(Self::Closed),
        }
    }
}
