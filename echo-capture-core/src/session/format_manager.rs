use crate::models::codec_format::AudioCodecFormat;

/// Tracks the codec formats offered in negotiation and the one selected.
///
/// The candidate set starts as everything the encoder supports and only
/// ever narrows. Until a format is explicitly selected, the first candidate
/// is used.
#[derive(Debug, Clone)]
pub struct FormatManager {
    candidates: Vec<AudioCodecFormat>,
    selected: Option<AudioCodecFormat>,
}

impl FormatManager {
    pub fn new(supported: Vec<AudioCodecFormat>) -> Self {
        let selected = supported.first().cloned();
        Self {
            candidates: supported,
            selected,
        }
    }

    pub fn source_formats(&self) -> Vec<AudioCodecFormat> {
        self.candidates.clone()
    }

    /// Keep only the candidates accepted by `filter`.
    ///
    /// If the selected format is filtered out, selection falls back to the
    /// first remaining candidate.
    pub fn restrict(&mut self, filter: &dyn Fn(&AudioCodecFormat) -> bool) {
        self.candidates.retain(|format| filter(format));
        let still_offered = self
            .selected
            .as_ref()
            .is_some_and(|selected| self.candidates.contains(selected));
        if !still_offered {
            self.selected = self.candidates.first().cloned();
        }
    }

    pub fn set_selected(&mut self, format: AudioCodecFormat) {
        if !self.candidates.contains(&format) {
            log::warn!("selected format {} was not among the offered candidates", format);
        }
        self.selected = Some(format);
    }

    pub fn selected(&self) -> Option<&AudioCodecFormat> {
        self.selected.as_ref()
    }
}
