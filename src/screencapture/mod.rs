// Rust FFI interface to the Swift ScreenCaptureKit bridge
//
// Platform: macOS 13.0+ only
//
// The bridge delivers opaque retained sample-buffer handles; this side probes
// readiness and copies the payload out in two passes, so buffers whose audio
// data has not crossed out of the capture service yet are handled here, not
// hidden in Swift.

use std::ffi::c_void;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::audio::frame::AudioFormat;
use crate::audio::source::{
    CaptureConfig, CaptureError, CaptureSource, DeliverySink, SampleBuffer,
};

// MARK: - FFI declarations

#[link(name = "scribe_screencapture", kind = "static")]
extern "C" {
    fn scribe_capture_is_available() -> bool;

    /// Resolves the shareable display content. Blocks until the content
    /// query answers or times out.
    fn scribe_capture_resolve() -> i32;

    fn scribe_capture_start(
        sample_rate: u32,
        channels: u16,
        video_width: u32,
        video_height: u32,
        video_fps: u32,
        exclude_current: bool,
        callback: extern "C" fn(*mut c_void),
    ) -> i32;

    fn scribe_capture_stop() -> i32;

    fn scribe_buffer_format(
        handle: *mut c_void,
        sample_rate: *mut u32,
        channels: *mut u16,
        frame_count: *mut u32,
    ) -> i32;

    fn scribe_buffer_is_ready(handle: *mut c_void) -> bool;

    fn scribe_buffer_request_data(handle: *mut c_void);

    fn scribe_buffer_payload_size(handle: *mut c_void, size: *mut usize) -> i32;

    fn scribe_buffer_copy_payload(
        handle: *mut c_void,
        out: *mut u8,
        capacity: usize,
        written: *mut usize,
    ) -> i32;

    fn scribe_buffer_release(handle: *mut c_void);
}

/// Status codes shared with the Swift side.
const CODE_OK: i32 = 0;
const CODE_NO_DISPLAY: i32 = 1;
const CODE_NOT_AUTHORIZED: i32 = 2;
const CODE_CONFIGURATION: i32 = 3;

fn map_code(code: i32, what: &str) -> CaptureError {
    match code {
        CODE_NO_DISPLAY => CaptureError::NoSourceAvailable,
        CODE_NOT_AUTHORIZED => CaptureError::NotAuthorized,
        CODE_CONFIGURATION => CaptureError::Configuration(format!("{} (code {})", what, code)),
        other => CaptureError::Stream(format!("{} (code {})", what, other)),
    }
}

/// Whether ScreenCaptureKit exists on this system.
pub fn is_available() -> bool {
    unsafe { scribe_capture_is_available() }
}

// MARK: - Buffer handle

/// Owned reference to a retained CMSampleBuffer on the Swift side.
struct BufferHandle(*mut c_void);

// The underlying buffer is reference-counted and safe to read from any
// thread; the handle is released exactly once on drop.
unsafe impl Send for BufferHandle {}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        unsafe { scribe_buffer_release(self.0) };
    }
}

/// One ScreenCaptureKit delivery, still backed by the platform buffer.
struct ScreenBuffer {
    handle: BufferHandle,
    format: AudioFormat,
    frame_count: usize,
}

impl ScreenBuffer {
    fn from_handle(handle: *mut c_void) -> Option<Self> {
        let mut sample_rate = 0u32;
        let mut channels = 0u16;
        let mut frame_count = 0u32;
        let code =
            unsafe { scribe_buffer_format(handle, &mut sample_rate, &mut channels, &mut frame_count) };
        if code != CODE_OK {
            return None;
        }
        Some(Self {
            handle: BufferHandle(handle),
            format: AudioFormat::new(sample_rate, channels),
            frame_count: frame_count as usize,
        })
    }
}

impl SampleBuffer for ScreenBuffer {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn is_ready(&self) -> bool {
        unsafe { scribe_buffer_is_ready(self.handle.0) }
    }

    fn request_data(&self) {
        unsafe { scribe_buffer_request_data(self.handle.0) };
    }

    fn payload_size(&self) -> Result<usize, CaptureError> {
        let mut size = 0usize;
        let code = unsafe { scribe_buffer_payload_size(self.handle.0, &mut size) };
        if code != CODE_OK {
            return Err(map_code(code, "payload size probe failed"));
        }
        Ok(size)
    }

    fn copy_payload(&self, out: &mut [u8]) -> Result<usize, CaptureError> {
        let mut written = 0usize;
        let code = unsafe {
            scribe_buffer_copy_payload(self.handle.0, out.as_mut_ptr(), out.len(), &mut written)
        };
        if code != CODE_OK {
            return Err(map_code(code, "payload copy failed"));
        }
        Ok(written)
    }
}

// MARK: - Delivery callback

/// Sink for the currently running stream. The stream delegate thread takes
/// this lock only long enough for a non-blocking channel send.
static DELIVERY: Mutex<Option<DeliverySink>> = Mutex::new(None);

extern "C" fn buffer_callback(handle: *mut c_void) {
    if handle.is_null() {
        return;
    }
    let buffer = match ScreenBuffer::from_handle(handle) {
        Some(b) => b,
        None => {
            // Malformed delivery; release and move on.
            unsafe { scribe_buffer_release(handle) };
            return;
        }
    };
    if let Ok(guard) = DELIVERY.lock() {
        if let Some(sink) = guard.as_ref() {
            sink.deliver(Box::new(buffer));
        }
    }
}

fn install_sink(sink: DeliverySink) {
    if let Ok(mut guard) = DELIVERY.lock() {
        *guard = Some(sink);
    }
}

fn clear_sink() {
    if let Ok(mut guard) = DELIVERY.lock() {
        *guard = None;
    }
}

// MARK: - Capture source

/// System-audio capture through ScreenCaptureKit.
///
/// Audio-only capture, but a tiny video output is registered as well: the
/// stream stops delivering audio buffers when no video output is attached.
pub struct ScreenCaptureSource {
    config: CaptureConfig,
    running: bool,
}

impl ScreenCaptureSource {
    pub fn new() -> Self {
        Self {
            config: CaptureConfig::default(),
            running: false,
        }
    }
}

impl Default for ScreenCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CaptureSource for ScreenCaptureSource {
    async fn resolve(&mut self) -> Result<(), CaptureError> {
        if !is_available() {
            return Err(CaptureError::NoSourceAvailable);
        }
        let code = tokio::task::spawn_blocking(|| unsafe { scribe_capture_resolve() })
            .await
            .map_err(|e| CaptureError::Stream(e.to_string()))?;
        if code != CODE_OK {
            return Err(map_code(code, "shareable content query failed"));
        }
        debug!("shareable display content resolved");
        Ok(())
    }

    async fn configure(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        self.config = config.clone();
        Ok(())
    }

    async fn begin(&mut self, sink: DeliverySink) -> Result<(), CaptureError> {
        let config = self.config.clone();
        install_sink(sink);

        let code = tokio::task::spawn_blocking(move || unsafe {
            scribe_capture_start(
                config.sample_rate,
                config.channels,
                config.video_keepalive.width,
                config.video_keepalive.height,
                config.video_keepalive.frames_per_second,
                config.exclude_current_process,
                buffer_callback,
            )
        })
        .await
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

        if code != CODE_OK {
            clear_sink();
            return Err(map_code(code, "stream start failed"));
        }

        self.running = true;
        info!(
            "ScreenCaptureKit stream started ({} Hz / {} ch, keep-alive video {}x{}@{})",
            self.config.sample_rate,
            self.config.channels,
            self.config.video_keepalive.width,
            self.config.video_keepalive.height,
            self.config.video_keepalive.frames_per_second,
        );
        Ok(())
    }

    async fn end(&mut self) -> Result<(), CaptureError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;

        let code = tokio::task::spawn_blocking(|| unsafe { scribe_capture_stop() })
            .await
            .map_err(|e| CaptureError::Stream(e.to_string()))?;
        clear_sink();

        if code != CODE_OK {
            return Err(map_code(code, "stream stop failed"));
        }
        info!("ScreenCaptureKit stream stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "screencapturekit"
    }
}

impl Drop for ScreenCaptureSource {
    fn drop(&mut self) {
        if self.running {
            unsafe { scribe_capture_stop() };
            clear_sink();
        }
    }
}
