//! frametap: cross-platform screen capture.
//!
//! One library surface over three kinds of operation:
//! - one-shot image capture of a display, window or screen rectangle,
//! - a live stream of pixel frames delivered to a consumer callback,
//! - enumeration of monitors and windows plus a permission diagnostic.
//!
//! ## Backends
//!
//! | Backend | Platform | Transport |
//! |---------|----------|-----------|
//! | DXGI Desktop Duplication (GDI fallback) | Windows | staging texture |
//! | ScreenCaptureKit | macOS | sample buffers |
//! | MIT-SHM | Linux (X11) | shared memory |
//! | XDG portal + PipeWire | Linux (Wayland) | video stream |
//!
//! The Linux backend is picked at runtime from `$WAYLAND_DISPLAY` /
//! `$DISPLAY`, preferring Wayland when both are present.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use frametap::{FrameTap, Rect};
//!
//! let mut tap = FrameTap::with_region(Rect::new(0.0, 0.0, 800.0, 600.0))?;
//! tap.on_frame(|frame| {
//!     println!("{}x{} (+{:.1} ms)", frame.image.width, frame.image.height, frame.duration_ms);
//! });
//! tap.start()?;
//! // ...
//! tap.stop();
//! ```
//!
//! Frames are always delivered as tightly packed RGBA8, row-major,
//! top-down. The callback runs on the backend's producer thread, never on
//! the thread that installed it.

mod backend;
mod convert;
mod error;
mod queue;
mod types;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
mod portal;
#[cfg(target_os = "linux")]
mod wayland;
#[cfg(target_os = "linux")]
mod x11;

#[cfg(target_os = "windows")]
mod dxgi;

#[cfg(target_os = "macos")]
mod macos;

pub use convert::{bgra_to_rgba, bgra_to_rgba_into, checked_rgba_size};
pub use error::{Error, Result};
#[cfg(target_os = "linux")]
pub use portal::portal_screenshot;
pub use queue::FrameQueue;
pub use types::{
    Frame, FrameCallback, ImageData, Monitor, PermissionCheck, PermissionStatus, Rect, Window,
};

use std::sync::Arc;

use backend::Backend;

/// List the displays attached to this session.
pub fn get_monitors() -> Vec<Monitor> {
    backend::enumerate_monitors()
}

/// List the capturable top-level windows.
///
/// Empty on Wayland: window capture there goes through the portal's
/// interactive picker instead of programmatic enumeration.
pub fn get_windows() -> Vec<Window> {
    backend::enumerate_windows()
}

/// Report whether capture is expected to work in this environment, with
/// actionable details for anything missing.
pub fn check_permissions() -> PermissionCheck {
    backend::check_platform_permissions()
}

/// A capture session against one source: the primary screen, a region, a
/// monitor or a window.
///
/// The handle is movable but not clonable; dropping it stops any running
/// stream and releases the platform resources.
pub struct FrameTap {
    backend: Box<dyn Backend>,
    callback: Option<FrameCallback>,
    started: bool,
}

impl FrameTap {
    /// Capture the primary screen.
    pub fn new() -> Result<Self> {
        Ok(Self::from_backend(backend::make_backend()?))
    }

    /// Capture a rectangle of the virtual screen.
    pub fn with_region(region: Rect) -> Result<Self> {
        Ok(Self::from_backend(backend::make_backend_region(region)?))
    }

    /// Capture a specific monitor (see [`get_monitors`]).
    pub fn with_monitor(monitor: Monitor) -> Result<Self> {
        Ok(Self::from_backend(backend::make_backend_monitor(monitor)?))
    }

    /// Capture a specific window (see [`get_windows`]).
    pub fn with_window(window: Window) -> Result<Self> {
        Ok(Self::from_backend(backend::make_backend_window(window)?))
    }

    fn from_backend(backend: Box<dyn Backend>) -> Self {
        Self { backend, callback: None, started: false }
    }

    /// Update the crop rectangle; the next produced frame reflects it.
    pub fn set_region(&mut self, region: Rect) {
        self.backend.set_region(region);
    }

    /// Install the frame callback invoked for every streamed frame.
    ///
    /// The callback runs on a producer thread and must be prepared for
    /// that; installing a new callback replaces the previous one.
    pub fn on_frame<F>(&mut self, callback: F)
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Begin streaming frames to the installed callback.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::capture("capture already started"));
        }
        let callback = self
            .callback
            .clone()
            .ok_or_else(|| Error::capture("no frame callback set"))?;
        self.backend.start(callback)?;
        self.started = true;
        Ok(())
    }

    /// Alias of [`start`](Self::start): streaming is always asynchronous,
    /// the producer runs on its own thread.
    pub fn start_async(&mut self) -> Result<()> {
        self.start()
    }

    /// Stop streaming and release capture resources. Idempotent; a stop
    /// before start is a no-op.
    pub fn stop(&mut self) {
        if self.started {
            self.backend.stop();
            self.started = false;
        }
    }

    /// Suspend frame delivery without tearing down the stream.
    pub fn pause(&self) {
        self.backend.pause();
    }

    /// Resume frame delivery after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.backend.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.backend.is_paused()
    }

    /// One-shot capture using the session's configured region.
    pub fn screenshot(&mut self) -> Result<ImageData> {
        self.backend.screenshot(Rect::default())
    }

    /// One-shot capture of an explicit region.
    pub fn screenshot_region(&mut self, region: Rect) -> Result<ImageData> {
        self.backend.screenshot(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::checked_rgba_size;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Backend double: produces a fixed number of 2x2 frames from a
    /// producer thread, honoring the pause flag.
    struct MockBackend {
        paused: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        frames_to_send: usize,
        producer: Option<thread::JoinHandle<()>>,
    }

    impl MockBackend {
        fn new(frames_to_send: usize, stopped: Arc<AtomicBool>) -> Self {
            Self {
                paused: Arc::new(AtomicBool::new(false)),
                stopped,
                frames_to_send,
                producer: None,
            }
        }

        fn image() -> ImageData {
            ImageData {
                data: vec![0u8; checked_rgba_size(2, 2).unwrap()],
                width: 2,
                height: 2,
            }
        }
    }

    impl Backend for MockBackend {
        fn screenshot(&mut self, _region: Rect) -> Result<ImageData> {
            Ok(Self::image())
        }

        fn start(&mut self, callback: FrameCallback) -> Result<()> {
            let paused = self.paused.clone();
            let count = self.frames_to_send;
            self.producer = Some(thread::spawn(move || {
                let mut sent = 0;
                while sent < count {
                    if paused.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(1));
                        continue;
                    }
                    callback(&Frame {
                        image: Self::image(),
                        duration_ms: if sent == 0 { 0.0 } else { 16.0 },
                    });
                    sent += 1;
                }
            }));
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(handle) = self.producer.take() {
                let _ = handle.join();
            }
            self.stopped.store(true, Ordering::Release);
        }

        fn pause(&self) {
            self.paused.store(true, Ordering::Release);
        }

        fn resume(&self) {
            self.paused.store(false, Ordering::Release);
        }

        fn is_paused(&self) -> bool {
            self.paused.load(Ordering::Acquire)
        }

        fn set_region(&mut self, _region: Rect) {}
    }

    impl Drop for MockBackend {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn mock_tap(frames: usize) -> (FrameTap, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        let tap = FrameTap::from_backend(Box::new(MockBackend::new(frames, stopped.clone())));
        (tap, stopped)
    }

    #[test]
    fn start_without_callback_fails() {
        let (mut tap, _) = mock_tap(0);
        let err = tap.start().unwrap_err();
        assert!(err.to_string().contains("no frame callback set"));
    }

    #[test]
    fn stop_before_start_is_noop() {
        let (mut tap, stopped) = mock_tap(0);
        tap.stop();
        assert!(!stopped.load(Ordering::Acquire));
    }

    #[test]
    fn double_start_is_rejected() {
        let (mut tap, _) = mock_tap(0);
        tap.on_frame(|_| {});
        tap.start().unwrap();
        assert!(tap.start().is_err());
        tap.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut tap, stopped) = mock_tap(1);
        tap.on_frame(|_| {});
        tap.start().unwrap();
        tap.stop();
        assert!(stopped.load(Ordering::Acquire));
        tap.stop();
        tap.stop();
    }

    #[test]
    fn frames_reach_the_callback() {
        let (mut tap, _) = mock_tap(3);
        let received = Arc::new(AtomicUsize::new(0));
        let received2 = received.clone();
        tap.on_frame(move |frame| {
            assert_eq!(frame.image.data.len(), frame.image.width * frame.image.height * 4);
            assert!(frame.duration_ms >= 0.0);
            received2.fetch_add(1, Ordering::SeqCst);
        });
        tap.start().unwrap();
        tap.stop();
        assert_eq!(received.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn pause_blocks_delivery_until_resume() {
        let (mut tap, _) = mock_tap(2);
        tap.pause();
        let received = Arc::new(AtomicUsize::new(0));
        let received2 = received.clone();
        tap.on_frame(move |_| {
            received2.fetch_add(1, Ordering::SeqCst);
        });
        tap.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(received.load(Ordering::SeqCst), 0);
        assert!(tap.is_paused());

        tap.resume();
        tap.stop(); // joins the producer, which delivers both frames
        assert_eq!(received.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_stops_a_running_backend() {
        let (mut tap, stopped) = mock_tap(1);
        tap.on_frame(|_| {});
        tap.start().unwrap();
        drop(tap);
        assert!(stopped.load(Ordering::Acquire));
    }

    #[test]
    fn screenshot_respects_buffer_invariant() {
        let (mut tap, _) = mock_tap(0);
        let img = tap.screenshot().unwrap();
        assert_eq!(img.data.len(), img.width * img.height * 4);
    }
}
