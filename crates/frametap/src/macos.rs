//! macOS capture backend.
//!
//! Streaming uses ScreenCaptureKit: the OS delivers BGRA sample buffers
//! on a system-managed serial queue, and the output handler converts and
//! crops each one before invoking the consumer callback. One-shot
//! screenshots go through the CoreGraphics window-list image APIs and are
//! rendered into an owned RGBA buffer.
//!
//! Both paths require the Screen Recording permission; failures surface
//! with a message naming the System Settings toggle to flip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use core_foundation::base::{CFType, TCFType};
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::display::CGDisplay;
use core_graphics::geometry::{CGPoint, CGRect, CGSize};
use core_graphics::image::CGImage;
use core_graphics::window::{
    kCGNullWindowID, kCGWindowImageBoundsIgnoreFraming, kCGWindowImageDefault,
    kCGWindowListOptionIncludingWindow, kCGWindowListOptionOnScreenOnly,
};
use screencapturekit::cm::CMSampleBuffer;
use screencapturekit::cv::CVPixelBufferLockFlags;
use screencapturekit::prelude::PixelFormat;
use screencapturekit::shareable_content::SCShareableContent;
use screencapturekit::stream::configuration::SCStreamConfiguration;
use screencapturekit::stream::content_filter::SCContentFilter;
use screencapturekit::stream::output_trait::SCStreamOutputTrait;
use screencapturekit::stream::output_type::SCStreamOutputType;
use screencapturekit::stream::SCStream;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::convert::{bgra_to_rgba_into, checked_rgba_size};
use crate::error::{Error, Result};
use crate::types::{
    CropArea, Frame, FrameCallback, ImageData, Monitor, PermissionCheck, PermissionStatus, Rect,
    Window,
};

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGPreflightScreenCaptureAccess() -> bool;
}

const PERMISSION_HINT: &str = "Screen Recording permission is not granted. Enable it in \
     System Settings > Privacy & Security > Screen Recording, then restart the app";

fn ensure_screen_recording_permission() -> Result<()> {
    if unsafe { CGPreflightScreenCaptureAccess() } {
        Ok(())
    } else {
        Err(Error::capture(PERMISSION_HINT))
    }
}

/// State shared with the sample-buffer handler.
struct Shared {
    region: Mutex<Rect>,
    paused: AtomicBool,
    /// Presentation time of the previous delivered frame, seconds
    last_pts: Mutex<Option<f64>>,
}

/// macOS (ScreenCaptureKit) capture backend.
pub(crate) struct MacosBackend {
    display_id: Option<u32>,
    window_id: Option<u64>,
    shared: Arc<Shared>,
    stream: Option<SCStream>,
}

impl MacosBackend {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self::create(Rect::default(), None, None))
    }

    pub(crate) fn with_region(region: Rect) -> Result<Self> {
        Ok(Self::create(region, None, None))
    }

    pub(crate) fn with_monitor(monitor: &Monitor) -> Result<Self> {
        Ok(Self::create(Rect::default(), Some(monitor.id as u32), None))
    }

    pub(crate) fn with_window(window: &Window) -> Result<Self> {
        Ok(Self::create(Rect::default(), None, Some(window.id)))
    }

    fn create(region: Rect, display_id: Option<u32>, window_id: Option<u64>) -> Self {
        Self {
            display_id,
            window_id,
            shared: Arc::new(Shared {
                region: Mutex::new(region),
                paused: AtomicBool::new(false),
                last_pts: Mutex::new(None),
            }),
            stream: None,
        }
    }
}

/// Receives sample buffers on the stream's serial queue.
struct OutputHandler {
    shared: Arc<Shared>,
    callback: FrameCallback,
}

impl SCStreamOutputTrait for OutputHandler {
    fn did_output_sample_buffer(&self, sample: CMSampleBuffer, _of_type: SCStreamOutputType) {
        // While paused, discard the sample without touching its pixels.
        if self.shared.paused.load(Ordering::Acquire) {
            return;
        }

        let Some(pixel_buffer) = sample.image_buffer() else {
            return;
        };
        let width = pixel_buffer.width() as usize;
        let height = pixel_buffer.height() as usize;
        if width == 0 || height == 0 {
            return;
        }

        let Ok(guard) = pixel_buffer.lock(CVPixelBufferLockFlags::READ_ONLY) else {
            warn!("failed to lock pixel buffer");
            return;
        };
        let bytes = guard.as_slice();
        let stride = pixel_buffer.bytes_per_row();

        let region = *self.shared.region.lock().unwrap();
        let area = if region.is_set() {
            match region.clamp_to(width as i32, height as i32) {
                Some(area) => area,
                None => return, // guard drop unlocks
            }
        } else {
            CropArea { x: 0, y: 0, width: width as i32, height: height as i32 }
        };

        let (out_w, out_h) = (area.width as usize, area.height as usize);
        let Ok(size) = checked_rgba_size(out_w, out_h) else {
            return;
        };
        let mut rgba = vec![0u8; size];
        for row in 0..out_h {
            let src_off = (row + area.y as usize) * stride + area.x as usize * 4;
            let Some(src_row) = bytes.get(src_off..src_off + out_w * 4) else {
                return;
            };
            bgra_to_rgba_into(src_row, &mut rgba[row * out_w * 4..(row + 1) * out_w * 4], out_w);
        }
        drop(guard);

        // Inter-frame duration from the sample's presentation time; the
        // first delivery (and the first after resume) reports 0.
        let pts = sample.presentation_timestamp();
        let seconds = if pts.timescale != 0 {
            pts.value as f64 / pts.timescale as f64
        } else {
            0.0
        };
        let duration_ms = {
            let mut last = self.shared.last_pts.lock().unwrap();
            let d = match *last {
                Some(prev) => ((seconds - prev) * 1000.0).max(0.0),
                None => 0.0,
            };
            *last = Some(seconds);
            d
        };

        (self.callback)(&Frame {
            image: ImageData { data: rgba, width: out_w, height: out_h },
            duration_ms,
        });
    }
}

impl Backend for MacosBackend {
    fn screenshot(&mut self, region: Rect) -> Result<ImageData> {
        ensure_screen_recording_permission()?;

        let effective = if region.is_set() {
            region
        } else {
            *self.shared.region.lock().unwrap()
        };

        let image = match self.window_id {
            Some(id) => window_list_image(id)?,
            None => display_rect_image(self.display_id, effective)?,
        };
        cgimage_to_rgba(&image)
    }

    fn start(&mut self, callback: FrameCallback) -> Result<()> {
        ensure_screen_recording_permission()?;
        *self.shared.last_pts.lock().unwrap() = None;

        let content = SCShareableContent::get().map_err(|e| {
            Error::capture(format!(
                "failed to enumerate shareable content: {e}. {PERMISSION_HINT}"
            ))
        })?;

        let (filter, width, height) = match self.window_id {
            Some(id) => {
                let windows = content.windows();
                let window = windows
                    .iter()
                    .find(|w| w.window_id() as u64 == id)
                    .ok_or_else(|| Error::capture(format!("window {id} not found")))?;
                let frame = window.frame();
                (
                    SCContentFilter::create()
                        .with_desktop_independent_window(window)
                        .build(),
                    frame.size.width as u32,
                    frame.size.height as u32,
                )
            }
            None => {
                let displays = content.displays();
                let display = match self.display_id {
                    Some(id) => displays
                        .iter()
                        .find(|d| d.display_id() == id)
                        .ok_or_else(|| Error::capture(format!("display {id} not found")))?,
                    None => displays
                        .first()
                        .ok_or_else(|| Error::capture("no displays available"))?,
                };
                (
                    SCContentFilter::create()
                        .with_display(display)
                        .with_excluding_windows(&[])
                        .build(),
                    display.width(),
                    display.height(),
                )
            }
        };

        let config = SCStreamConfiguration::new()
            .with_width(width)
            .with_height(height)
            .with_pixel_format(PixelFormat::BGRA)
            .with_shows_cursor(true);

        let mut stream = SCStream::new(&filter, &config);
        stream.add_output_handler(
            OutputHandler { shared: self.shared.clone(), callback },
            SCStreamOutputType::Screen,
        );

        // start_capture blocks until the OS reports the stream started.
        stream.start_capture().map_err(|e| {
            Error::capture(format!("failed to start capture stream: {e}. {PERMISSION_HINT}"))
        })?;

        self.stream = Some(stream);
        info!("ScreenCaptureKit stream started ({width}x{height})");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Waits for the stream's stop completion before releasing the
            // output handler with the stream itself.
            if let Err(e) = stream.stop_capture() {
                debug!("stop_capture: {e}");
            }
        }
    }

    fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        *self.shared.last_pts.lock().unwrap() = None;
    }

    fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    fn set_region(&mut self, region: Rect) {
        *self.shared.region.lock().unwrap() = region;
    }
}

impl Drop for MacosBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// One-shot capture via CoreGraphics
// ---------------------------------------------------------------------------

fn display_rect_image(display_id: Option<u32>, region: Rect) -> Result<CGImage> {
    let bounds = if region.is_set() {
        CGRect::new(
            &CGPoint::new(region.x, region.y),
            &CGSize::new(region.width, region.height),
        )
    } else {
        let display = display_id.map(CGDisplay::new).unwrap_or_else(CGDisplay::main);
        display.bounds()
    };

    CGDisplay::screenshot(
        bounds,
        kCGWindowListOptionOnScreenOnly,
        kCGNullWindowID,
        kCGWindowImageDefault,
    )
    .ok_or_else(|| {
        Error::capture(format!(
            "display image capture returned nothing. {PERMISSION_HINT}"
        ))
    })
}

fn window_list_image(window_id: u64) -> Result<CGImage> {
    // CGRectNull makes the image span the window's own bounds.
    let null_rect = CGRect::new(
        &CGPoint::new(f64::INFINITY, f64::INFINITY),
        &CGSize::new(0.0, 0.0),
    );
    CGDisplay::screenshot(
        null_rect,
        kCGWindowListOptionIncludingWindow,
        window_id as u32,
        kCGWindowImageBoundsIgnoreFraming,
    )
    .ok_or_else(|| Error::capture("window image capture returned nothing (window may be closed)"))
}

/// Render a CGImage into a tightly packed RGBA buffer.
fn cgimage_to_rgba(image: &CGImage) -> Result<ImageData> {
    use core_graphics::base::kCGImageAlphaPremultipliedLast;
    use core_graphics::color_space::CGColorSpace;
    use core_graphics::context::CGContext;

    let width = image.width() as usize;
    let height = image.height() as usize;
    if width == 0 || height == 0 {
        return Ok(ImageData::default());
    }

    let mut data = vec![0u8; checked_rgba_size(width, height)?];
    let color_space = CGColorSpace::create_device_rgb();
    let ctx = CGContext::create_bitmap_context(
        Some(data.as_mut_ptr() as *mut _),
        width,
        height,
        8,
        width * 4,
        &color_space,
        kCGImageAlphaPremultipliedLast,
    );
    ctx.draw_image(
        CGRect::new(
            &CGPoint::new(0.0, 0.0),
            &CGSize::new(width as f64, height as f64),
        ),
        image,
    );

    Ok(ImageData { data, width, height })
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

pub(crate) fn enumerate_monitors() -> Vec<Monitor> {
    let Ok(ids) = CGDisplay::active_displays() else {
        return Vec::new();
    };

    ids.iter()
        .map(|&id| {
            let display = CGDisplay::new(id);
            let bounds = display.bounds();
            let pixel_width = display.pixels_wide() as i32;
            let scale = if bounds.size.width > 0.0 {
                (pixel_width as f64 / bounds.size.width) as f32
            } else {
                1.0
            };
            Monitor {
                id: id as i32,
                name: format!("Display {id}"),
                x: bounds.origin.x as i32,
                y: bounds.origin.y as i32,
                width: pixel_width,
                height: display.pixels_high() as i32,
                scale: scale.max(1.0),
            }
        })
        .collect()
}

pub(crate) fn enumerate_windows() -> Vec<Window> {
    let mut result = Vec::new();

    let Some(info) = core_graphics::window::copy_window_info(
        kCGWindowListOptionOnScreenOnly,
        kCGNullWindowID,
    ) else {
        return result;
    };

    let layer_key = CFString::from_static_string("kCGWindowLayer");
    let name_key = CFString::from_static_string("kCGWindowName");
    let number_key = CFString::from_static_string("kCGWindowNumber");
    let bounds_key = CFString::from_static_string("kCGWindowBounds");

    for item in info.iter() {
        let dict = unsafe {
            CFDictionary::<CFString, CFType>::wrap_under_get_rule(*item as *const _)
        };

        // Layer 0 only: skips menu bars, docks and system overlays.
        let layer = dict
            .find(&layer_key)
            .and_then(|v| v.downcast::<CFNumber>())
            .and_then(|n| n.to_i32())
            .unwrap_or(-1);
        if layer != 0 {
            continue;
        }

        let Some(name) = dict
            .find(&name_key)
            .and_then(|v| v.downcast::<CFString>())
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
        else {
            continue;
        };

        let Some(id) = dict
            .find(&number_key)
            .and_then(|v| v.downcast::<CFNumber>())
            .and_then(|n| n.to_i64())
        else {
            continue;
        };

        let Some(bounds) = dict
            .find(&bounds_key)
            .and_then(|v| v.downcast::<CFDictionary>())
            .and_then(|d| CGRect::from_dict_representation(&d))
        else {
            continue;
        };

        result.push(Window {
            id: id as u64,
            name,
            x: bounds.origin.x as i32,
            y: bounds.origin.y as i32,
            width: bounds.size.width as i32,
            height: bounds.size.height as i32,
        });
    }

    result
}

// ---------------------------------------------------------------------------
// Permission diagnostics
// ---------------------------------------------------------------------------

pub(crate) fn check_platform_permissions() -> PermissionCheck {
    let mut result = PermissionCheck::default();
    result.summary = "macOS".into();

    if unsafe { CGPreflightScreenCaptureAccess() } {
        result.status = PermissionStatus::Ok;
        result.details.push("Screen Recording permission granted.".into());
    } else {
        result.status = PermissionStatus::Error;
        result.details.push("Screen Recording permission is not granted.".into());
        result.details.push(
            "Enable it in System Settings > Privacy & Security > Screen Recording, \
             then restart the app."
                .into(),
        );
    }

    result
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

pub(crate) fn make_backend() -> Result<Box<dyn Backend>> {
    Ok(Box::new(MacosBackend::new()?))
}

pub(crate) fn make_backend_region(region: Rect) -> Result<Box<dyn Backend>> {
    Ok(Box::new(MacosBackend::with_region(region)?))
}

pub(crate) fn make_backend_monitor(monitor: Monitor) -> Result<Box<dyn Backend>> {
    Ok(Box::new(MacosBackend::with_monitor(&monitor)?))
}

pub(crate) fn make_backend_window(window: Window) -> Result<Box<dyn Backend>> {
    Ok(Box::new(MacosBackend::with_window(&window)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_check_is_actionable_when_denied() {
        let report = check_platform_permissions();
        if report.status == PermissionStatus::Error {
            assert!(report.details.iter().any(|d| d.contains("Screen Recording")));
        }
    }

    #[test]
    fn monitor_scale_is_at_least_one() {
        for monitor in enumerate_monitors() {
            assert!(monitor.scale >= 1.0);
        }
    }
}
