pub mod capture;
pub mod file;
pub mod frame;
pub mod normalize;
pub mod source;

pub use capture::CaptureSession;
pub use file::FileSource;
pub use frame::{AudioFormat, NormalizedFrame, RawFrame};
pub use normalize::{ConverterState, FormatNormalizer, UnsupportedFormat};
pub use source::{
    CaptureConfig, CaptureError, CaptureSource, DeliverySink, PlatformSources, SampleBuffer,
    SourceKind, SourceProvider, VideoKeepalive,
};
