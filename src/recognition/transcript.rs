// Transcript accumulation across recognition segments.

/// Visible transcript state: text finalized across earlier segments plus the
/// current segment's cumulative text.
#[derive(Debug, Default, Clone)]
pub struct TranscriptAccumulator {
    base: String,
    live: String,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the live text with the engine's latest cumulative text for
    /// the current segment.
    pub fn set_live(&mut self, text: &str) {
        self.live.clear();
        self.live.push_str(text.trim());
    }

    /// Folds the visible transcript into the base and clears the live part.
    /// Called right before a segment restart so the next segment appends.
    pub fn snapshot(&mut self) {
        self.base = self.visible();
        self.live.clear();
    }

    /// The joined view: base and live separated by a single space, empty
    /// parts omitted. Words the engine re-hears across a restart boundary
    /// stay duplicated; nothing here second-guesses the recognizer.
    pub fn visible(&self) -> String {
        match (self.base.is_empty(), self.live.is_empty()) {
            (true, true) => String::new(),
            (false, true) => self.base.clone(),
            (true, false) => self.live.clone(),
            (false, false) => format!("{} {}", self.base, self.live),
        }
    }

    pub fn clear(&mut self) {
        self.base.clear();
        self.live.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.live.is_empty()
    }
}
