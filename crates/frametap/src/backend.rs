//! Capture backend contract and per-platform construction.

use crate::error::Result;
use crate::types::{FrameCallback, ImageData, Rect};

/// Platform capture backend.
///
/// Each backend owns the native handles it opens and releases them at
/// `stop()` and on drop. `stop()` is idempotent; stop before start is a
/// no-op. The pause flag is consulted by the producer: while paused,
/// frames obtained from the platform are discarded without invoking the
/// callback (while still servicing the platform's buffer-return
/// protocol).
pub(crate) trait Backend: Send {
    /// Synchronous one-shot capture.
    ///
    /// A region with non-positive width/height falls back to the
    /// instance's configured region, then to the full source.
    fn screenshot(&mut self, region: Rect) -> Result<ImageData>;

    /// Begin streaming frames to `callback` from a producer thread.
    fn start(&mut self, callback: FrameCallback) -> Result<()>;

    /// Stop streaming, join the producer and release native handles.
    fn stop(&mut self);

    fn pause(&self);
    fn resume(&self);
    fn is_paused(&self) -> bool;

    /// Update the active crop rectangle. Safe to call from a thread other
    /// than the producer; the next produced frame reflects the change.
    fn set_region(&mut self, region: Rect);
}

#[cfg(target_os = "linux")]
pub(crate) use crate::linux::{
    check_platform_permissions, enumerate_monitors, enumerate_windows, make_backend,
    make_backend_monitor, make_backend_region, make_backend_window,
};

#[cfg(target_os = "windows")]
pub(crate) use crate::dxgi::{
    check_platform_permissions, enumerate_monitors, enumerate_windows, make_backend,
    make_backend_monitor, make_backend_region, make_backend_window,
};

#[cfg(target_os = "macos")]
pub(crate) use crate::macos::{
    check_platform_permissions, enumerate_monitors, enumerate_windows, make_backend,
    make_backend_monitor, make_backend_region, make_backend_window,
};

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
mod unsupported {
    use super::*;
    use crate::error::Error;
    use crate::types::{Monitor, PermissionCheck, PermissionStatus, Window};

    pub(crate) fn make_backend() -> Result<Box<dyn Backend>> {
        Err(Error::capture("screen capture is not supported on this platform"))
    }

    pub(crate) fn make_backend_region(_region: Rect) -> Result<Box<dyn Backend>> {
        make_backend()
    }

    pub(crate) fn make_backend_monitor(_monitor: Monitor) -> Result<Box<dyn Backend>> {
        make_backend()
    }

    pub(crate) fn make_backend_window(_window: Window) -> Result<Box<dyn Backend>> {
        make_backend()
    }

    pub(crate) fn enumerate_monitors() -> Vec<Monitor> {
        Vec::new()
    }

    pub(crate) fn enumerate_windows() -> Vec<Window> {
        Vec::new()
    }

    pub(crate) fn check_platform_permissions() -> PermissionCheck {
        PermissionCheck {
            status: PermissionStatus::Error,
            summary: "Unsupported platform".into(),
            details: vec!["Screen capture is implemented for Linux, Windows and macOS.".into()],
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
pub(crate) use unsupported::*;
