use std::fmt;

use serde::{Deserialize, Serialize};

/// A codec format negotiated with the remote party.
///
/// The clock rate drives the near-end capture sample rate: the microphone is
/// always opened at the selected format's clock rate so the encoder never
/// has to resample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioCodecFormat {
    /// RTP payload type identifier.
    pub format_id: u8,
    /// Codec name as it appears in SDP, e.g. `PCMU`.
    pub name: String,
    pub clock_rate: u32,
    pub channels: u16,
}

impl AudioCodecFormat {
    pub fn new(format_id: u8, name: impl Into<String>, clock_rate: u32, channels: u16) -> Self {
        Self {
            format_id,
            name: name.into(),
            clock_rate,
            channels,
        }
    }

    /// G.711 µ-law, static payload type 0.
    pub fn pcmu() -> Self {
        Self::new(0, "PCMU", 8000, 1)
    }

    /// G.711 A-law, static payload type 8.
    pub fn pcma() -> Self {
        Self::new(8, "PCMA", 8000, 1)
    }

    /// Opus with the conventional dynamic payload type 111.
    pub fn opus() -> Self {
        Self::new(111, "OPUS", 48000, 2)
    }
}

impl fmt::Display for AudioCodecFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {}Hz/{}ch",
            self.name, self.format_id, self.clock_rate, self.channels
        )
    }
}
