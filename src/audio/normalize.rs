// Format normalization: arbitrary capture formats down to 16 kHz mono f32.

use tracing::{debug, error, info};

use super::frame::{AudioFormat, NormalizedFrame, RawFrame};

/// Headroom added to the computed output allocation; actual output length may
/// be anything up to the capacity.
const CAPACITY_MARGIN: usize = 16;

/// The declared capture format cannot drive a converter.
#[derive(Debug, thiserror::Error)]
#[error("unsupported capture format: {0}")]
pub struct UnsupportedFormat(pub AudioFormat);

/// Single-shot view of one conversion's input.
///
/// The upstream service hands over one packet per conversion; the resampler
/// pulls it exactly once, and any later pull within the same conversion
/// reports exhaustion.
struct FramePull<'a> {
    samples: &'a [f32],
    consumed: bool,
}

impl<'a> FramePull<'a> {
    fn new(samples: &'a [f32]) -> Self {
        Self {
            samples,
            consumed: false,
        }
    }

    fn pull(&mut self) -> Option<&'a [f32]> {
        if self.consumed {
            None
        } else {
            self.consumed = true;
            Some(self.samples)
        }
    }
}

/// Streaming converter built from the first raw frame's format.
///
/// Downmixes to mono by averaging the channel planes, then resamples with
/// linear interpolation. The fractional read position and the boundary sample
/// carry across frames, so the output stream is continuous no matter how the
/// capture service sizes its deliveries.
#[derive(Debug)]
pub struct ConverterState {
    input: AudioFormat,
    /// Input samples consumed per output sample.
    step: f64,
    /// Fractional read position into the upcoming input, relative to the
    /// carried tail sample.
    pos: f64,
    /// Last input sample of the previous frame.
    tail: Option<f32>,
}

impl ConverterState {
    pub fn new(input: AudioFormat) -> Result<Self, UnsupportedFormat> {
        if !input.is_valid() {
            return Err(UnsupportedFormat(input));
        }
        Ok(Self {
            input,
            step: input.sample_rate as f64 / NormalizedFrame::SAMPLE_RATE as f64,
            pos: 0.0,
            tail: None,
        })
    }

    pub fn input_format(&self) -> AudioFormat {
        self.input
    }

    /// Converts one raw frame. At most one normalized frame comes out; `None`
    /// means the resampler produced nothing for this delivery.
    pub fn convert(&mut self, frame: &RawFrame) -> Option<NormalizedFrame> {
        if frame.frame_count() == 0 {
            return None;
        }
        let mono = downmix(frame);
        let mut pull = FramePull::new(&mono);
        let out = self.resample(&mut pull);
        if out.is_empty() {
            return None;
        }
        Some(NormalizedFrame::new(out))
    }

    fn resample(&mut self, pull: &mut FramePull<'_>) -> Vec<f32> {
        let mut out = Vec::new();
        while let Some(chunk) = pull.pull() {
            if chunk.is_empty() {
                continue;
            }
            let capacity = (chunk.len() as f64 / self.step).ceil() as usize + CAPACITY_MARGIN;
            out.reserve(capacity);

            // Virtual input for this round: the carried tail sample, then the
            // chunk. Positions are continuous across rounds.
            let tail = self.tail;
            let offset = usize::from(tail.is_some());
            let len = chunk.len() + offset;
            let sample_at = |i: usize| -> f32 {
                if i < offset {
                    tail.unwrap_or(0.0)
                } else {
                    chunk[i - offset]
                }
            };

            let last = (len - 1) as f64;
            let mut p = self.pos;
            while p <= last {
                let i = p.floor() as usize;
                let frac = p - i as f64;
                let s = if frac <= f64::EPSILON || i + 1 >= len {
                    sample_at(i)
                } else {
                    let a = sample_at(i);
                    let b = sample_at(i + 1);
                    a + (b - a) * frac as f32
                };
                out.push(s);
                p += self.step;
            }
            self.pos = p - last;
            self.tail = Some(sample_at(len - 1));
        }
        out
    }
}

/// Averages all channel planes into one mono buffer.
fn downmix(frame: &RawFrame) -> Vec<f32> {
    let channels = frame.format().channels as usize;
    if channels == 1 {
        return frame.plane(0).to_vec();
    }
    let mut mono = vec![0.0f32; frame.frame_count()];
    for ch in 0..channels {
        for (acc, s) in mono.iter_mut().zip(frame.plane(ch)) {
            *acc += *s;
        }
    }
    let scale = 1.0 / channels as f32;
    for s in mono.iter_mut() {
        *s *= scale;
    }
    mono
}

/// Lazily-built normalization stage.
///
/// The converter is constructed from the FIRST frame a session observes and
/// at most once. A construction failure poisons the stage: it is reported
/// once, and every later frame is dropped until a new session builds a fresh
/// normalizer.
#[derive(Debug, Default)]
pub struct FormatNormalizer {
    converter: Option<ConverterState>,
    poisoned: bool,
    mismatch_noted: bool,
}

impl FormatNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes one raw frame; `None` means the frame was dropped
    /// (poisoned stage or zero resampler output).
    pub fn normalize(&mut self, frame: &RawFrame) -> Option<NormalizedFrame> {
        if self.poisoned {
            return None;
        }
        if self.converter.is_none() {
            match ConverterState::new(frame.format()) {
                Ok(converter) => {
                    info!(
                        "normalizer configured: {} -> {} Hz mono",
                        frame.format(),
                        NormalizedFrame::SAMPLE_RATE
                    );
                    self.converter = Some(converter);
                }
                Err(e) => {
                    error!("normalizer cannot be built, dropping all frames: {}", e);
                    self.poisoned = true;
                    return None;
                }
            }
        }
        let converter = match self.converter.as_mut() {
            Some(c) => c,
            None => return None,
        };
        if converter.input_format() != frame.format() && !self.mismatch_noted {
            // The converter is frozen on the first format seen; a mid-stream
            // change keeps converting under the original configuration.
            debug!(
                "capture format changed mid-stream ({} -> {}), converter stays at {}",
                converter.input_format(),
                frame.format(),
                converter.input_format()
            );
            self.mismatch_noted = true;
        }
        converter.convert(frame)
    }

    /// Whether a converter has been built for this session.
    pub fn is_configured(&self) -> bool {
        self.converter.is_some()
    }
}
