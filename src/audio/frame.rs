// Frame types flowing through the capture pipeline.

use std::fmt;
use std::sync::Arc;

/// Declared format of a raw capture delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 16000, 44100, 48000)
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// A format the converter can actually be built from.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz / {} ch", self.sample_rate, self.channels)
    }
}

/// One extracted capture delivery: planar f32 samples plus the declared format.
///
/// Extraction copies the platform buffer into a flat owned region; `plane()`
/// exposes a typed per-channel view into it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    format: AudioFormat,
    frame_count: usize,
    /// Channel 0 plane, then channel 1 plane, and so on.
    samples: Vec<f32>,
}

impl RawFrame {
    /// Builds a frame from planar sample storage.
    ///
    /// Returns `None` when the storage does not hold exactly
    /// `channels * frame_count` samples. The declared sample rate is metadata
    /// and is not validated here; the converter rejects unusable rates.
    pub fn from_planar(format: AudioFormat, frame_count: usize, samples: Vec<f32>) -> Option<Self> {
        if format.channels == 0 || samples.len() != format.channels as usize * frame_count {
            return None;
        }
        Some(Self {
            format,
            frame_count,
            samples,
        })
    }

    /// Builds a frame from interleaved samples (file and test sources).
    pub fn from_interleaved(format: AudioFormat, interleaved: &[f32]) -> Option<Self> {
        if format.channels == 0 {
            return None;
        }
        let channels = format.channels as usize;
        if interleaved.len() % channels != 0 {
            return None;
        }
        let frame_count = interleaved.len() / channels;
        let mut planar = vec![0.0f32; interleaved.len()];
        for (i, sample) in interleaved.iter().enumerate() {
            let ch = i % channels;
            let frame = i / channels;
            planar[ch * frame_count + frame] = *sample;
        }
        Self::from_planar(format, frame_count, planar)
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Number of sample frames (per channel).
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Typed view of one channel's plane. Panics if `channel` is out of range.
    pub fn plane(&self, channel: usize) -> &[f32] {
        let start = channel * self.frame_count;
        &self.samples[start..start + self.frame_count]
    }
}

/// Immutable mono f32 audio at the pipeline's analysis rate.
///
/// Samples are Arc-backed so a frame clones cheaply on its way to both the
/// recognizer and the audio callback.
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    samples: Arc<[f32]>,
}

impl NormalizedFrame {
    /// Analysis sample rate every normalized frame carries.
    pub const SAMPLE_RATE: u32 = 16_000;
    /// Normalized audio is always mono.
    pub const CHANNELS: u16 = 1;

    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / Self::SAMPLE_RATE as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_frame_validates_shape() {
        let format = AudioFormat::new(48_000, 2);
        assert!(RawFrame::from_planar(format, 4, vec![0.0; 8]).is_some());
        assert!(RawFrame::from_planar(format, 4, vec![0.0; 7]).is_none());
        assert!(RawFrame::from_planar(AudioFormat::new(48_000, 0), 4, vec![0.0; 8]).is_none());
        // A zero sample rate is carried through; the converter rejects it.
        assert!(RawFrame::from_planar(AudioFormat::new(0, 2), 4, vec![0.0; 8]).is_some());
    }

    #[test]
    fn test_interleaved_deinterleaves_into_planes() {
        let format = AudioFormat::new(48_000, 2);
        let frame = RawFrame::from_interleaved(format, &[1.0, -1.0, 2.0, -2.0, 3.0, -3.0]).unwrap();
        assert_eq!(frame.frame_count(), 3);
        assert_eq!(frame.plane(0), &[1.0, 2.0, 3.0]);
        assert_eq!(frame.plane(1), &[-1.0, -2.0, -3.0]);
    }

    #[test]
    fn test_normalized_frame_duration() {
        let frame = NormalizedFrame::new(vec![0.0; 16_000]);
        assert_eq!(frame.len(), 16_000);
        assert!((frame.duration_secs() - 1.0).abs() < f64::EPSILON);
    }
}
