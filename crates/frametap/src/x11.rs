//! X11 screen capture backend using the MIT-SHM extension.
//!
//! Streams frames from the root window or a specific window by reading
//! pixel regions into a System V shared-memory segment attached by both
//! this process and the X server. Falls back to plain `GetImage` requests
//! when the extension is unavailable.
//!
//! X protocol errors never abort the process: x11rb surfaces them as
//! reply errors, which the streaming loop converts into skipped frames
//! and the one-shot path converts into capture errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::shm::{self, ConnectionExt as ShmExt};
use x11rb::protocol::xinerama::ConnectionExt as XineramaExt;
use x11rb::protocol::xproto::{self, AtomEnum, ConnectionExt as XprotoExt, ImageFormat, ImageOrder, MapState};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as WrapperExt;

use crate::backend::Backend;
use crate::convert::{bgra_to_rgba_into, checked_rgba_size};
use crate::error::{Error, Result};
use crate::types::{CropArea, Frame, FrameCallback, ImageData, Monitor, Rect, Window};

const FRAME_INTERVAL: Duration = Duration::from_millis(16); // ~60 fps

/// Shared-memory segment attached by both this process and the X server.
struct ShmSegment {
    /// X-side segment id
    seg: shm::Seg,
    /// Local mapping
    addr: *mut u8,
    size: usize,
}

// Safety: the mapping is process-shared memory whose access is serialized
// by the owning `CaptureState` mutex.
unsafe impl Send for ShmSegment {}

struct CaptureState {
    region: Rect,
    /// Computed capture bounds, `None` when the region clamps to nothing
    cap: Option<CropArea>,
    shm: Option<ShmSegment>,
    streaming: bool,
}

/// X11 SHM capture backend.
pub(crate) struct X11Backend {
    conn: Arc<RustConnection>,
    target: xproto::Window,
    capture_window: bool,
    screen_width: i32,
    screen_height: i32,
    depth: u8,
    lsb_first: bool,
    use_shm: bool,
    state: Arc<Mutex<CaptureState>>,
    paused: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    capture_thread: Option<JoinHandle<()>>,
}

impl X11Backend {
    pub(crate) fn new() -> Result<Self> {
        Self::connect(Rect::default(), None)
    }

    pub(crate) fn with_region(region: Rect) -> Result<Self> {
        Self::connect(region, None)
    }

    pub(crate) fn with_monitor(monitor: &Monitor) -> Result<Self> {
        let region = Rect::new(
            monitor.x as f64,
            monitor.y as f64,
            monitor.width as f64,
            monitor.height as f64,
        );
        Self::connect(region, None)
    }

    pub(crate) fn with_window(window: &Window) -> Result<Self> {
        Self::connect(Rect::default(), Some(window.id))
    }

    fn connect(region: Rect, target_window: Option<u64>) -> Result<Self> {
        let (conn, screen_num) = RustConnection::connect(None).map_err(|e| {
            Error::capture(format!(
                "failed to open X11 display: {e}. Check that $DISPLAY is set correctly \
                 and X11 authorization (xauth) allows connections"
            ))
        })?;

        let setup = conn.setup();
        let lsb_first = u8::from(setup.image_byte_order) == u8::from(ImageOrder::LSB_FIRST);
        let screen = &setup.roots[screen_num];
        let root = screen.root;
        let screen_width = i32::from(screen.width_in_pixels);
        let screen_height = i32::from(screen.height_in_pixels);
        let depth = screen.root_depth;

        if depth < 24 {
            return Err(Error::capture(format!(
                "unsupported X11 display depth {depth} (24 or 32 required)"
            )));
        }

        let use_shm = conn
            .extension_information(shm::X11_EXTENSION_NAME)
            .ok()
            .flatten()
            .is_some();
        if !use_shm {
            warn!("MIT-SHM extension not available, using per-frame GetImage");
        }

        let capture_window = target_window.is_some();
        let target = target_window.map(|id| id as xproto::Window).unwrap_or(root);

        let backend = Self {
            conn: Arc::new(conn),
            target,
            capture_window,
            screen_width,
            screen_height,
            depth,
            lsb_first,
            use_shm,
            state: Arc::new(Mutex::new(CaptureState {
                region,
                cap: None,
                shm: None,
                streaming: false,
            })),
            paused: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            capture_thread: None,
        };

        let cap = backend.compute_capture_area(region)?;
        backend.state.lock().unwrap().cap = cap;

        info!(
            "X11 backend ready ({}x{} screen, shm: {}, window: {})",
            screen_width, screen_height, use_shm, capture_window
        );
        Ok(backend)
    }

    /// Determine the capture origin and dimensions for `region`.
    ///
    /// Window capture reads the whole window; region capture clamps
    /// against the screen (negative offsets shrink, far edges clip);
    /// otherwise the full screen is captured.
    fn compute_capture_area(&self, region: Rect) -> Result<Option<CropArea>> {
        if self.capture_window {
            let geom = self
                .conn
                .get_geometry(self.target)
                .map_err(|e| Error::capture(format!("failed to query window geometry: {e}")))?
                .reply()
                .map_err(|_| {
                    Error::capture("failed to get window attributes (window may not exist)")
                })?;
            return Ok(Some(CropArea {
                x: 0,
                y: 0,
                width: i32::from(geom.width),
                height: i32::from(geom.height),
            }));
        }

        if region.is_set() {
            return Ok(region.clamp_to(self.screen_width, self.screen_height));
        }

        Ok(Some(CropArea {
            x: 0,
            y: 0,
            width: self.screen_width,
            height: self.screen_height,
        }))
    }

    /// Create and attach a shared-memory segment sized to `width` x `height`.
    fn init_shm(&self, state: &mut CaptureState, width: i32, height: i32) -> Result<()> {
        Self::cleanup_shm(&self.conn, state);

        if !self.use_shm || width <= 0 || height <= 0 {
            return Ok(());
        }

        let size = checked_rgba_size(width as usize, height as usize)?;

        let shm_id = unsafe { libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600) };
        if shm_id < 0 {
            return Err(Error::capture(format!(
                "failed to create shared memory segment: {}",
                std::io::Error::last_os_error()
            )));
        }

        // shmat() returns (void*)-1 on failure, not null
        let addr = unsafe { libc::shmat(shm_id, std::ptr::null(), 0) };
        if addr == usize::MAX as *mut libc::c_void {
            unsafe { libc::shmctl(shm_id, libc::IPC_RMID, std::ptr::null_mut()) };
            return Err(Error::capture(format!(
                "failed to attach shared memory: {}",
                std::io::Error::last_os_error()
            )));
        }

        let seg = match self.attach_to_server(shm_id) {
            Ok(seg) => seg,
            Err(e) => {
                unsafe {
                    libc::shmdt(addr as *const _);
                    libc::shmctl(shm_id, libc::IPC_RMID, std::ptr::null_mut());
                }
                return Err(e);
            }
        };

        // Mark for removal now so the kernel reclaims the segment once both
        // sides detach, even if this process dies abnormally.
        unsafe { libc::shmctl(shm_id, libc::IPC_RMID, std::ptr::null_mut()) };

        debug!("SHM segment attached: seg={seg}, size={size} bytes ({width}x{height})");
        state.shm = Some(ShmSegment { seg, addr: addr as *mut u8, size });
        Ok(())
    }

    fn attach_to_server(&self, shm_id: i32) -> Result<shm::Seg> {
        let seg = self
            .conn
            .generate_id()
            .map_err(|e| Error::capture(format!("failed to allocate SHM segment id: {e}")))?;
        self.conn
            .shm_attach(seg, shm_id as u32, false)
            .map_err(|e| Error::capture(format!("failed to attach SHM to X server: {e}")))?;
        self.conn
            .sync()
            .map_err(|e| Error::capture(format!("failed to sync X connection: {e}")))?;
        Ok(seg)
    }

    /// Detach from the server, then from this process, in that order.
    fn cleanup_shm(conn: &RustConnection, state: &mut CaptureState) {
        if let Some(shm) = state.shm.take() {
            let _ = conn.shm_detach(shm.seg);
            let _ = conn.sync();
            unsafe { libc::shmdt(shm.addr as *const _) };
        }
    }

    /// Capture one frame under the state lock.
    ///
    /// Returns `None` for recoverable conditions (zero area, protocol
    /// error) so the streaming loop can skip the frame and continue.
    fn capture_frame(
        conn: &RustConnection,
        state: &mut CaptureState,
        target: xproto::Window,
        depth: u8,
        lsb_first: bool,
    ) -> Option<ImageData> {
        let cap = state.cap?;
        let (cw, ch) = (cap.width as usize, cap.height as usize);
        if cw == 0 || ch == 0 {
            return None;
        }

        let mut result = ImageData {
            data: vec![0u8; checked_rgba_size(cw, ch).ok()?],
            width: cw,
            height: ch,
        };
        let row_bytes = cw * 4;

        if let Some(shm) = &state.shm {
            let reply = conn
                .shm_get_image(
                    target,
                    cap.x as i16,
                    cap.y as i16,
                    cap.width as u16,
                    cap.height as u16,
                    !0,
                    ImageFormat::Z_PIXMAP.into(),
                    shm.seg,
                    0,
                )
                .ok()?
                .reply();
            // A protocol error here (window resized away, area off screen)
            // skips the frame rather than tearing down the stream.
            if reply.is_err() {
                return None;
            }

            let total = row_bytes * ch;
            debug_assert!(total <= shm.size);
            let src = unsafe { std::slice::from_raw_parts(shm.addr, total) };
            convert_rows(src, &mut result.data, cw, ch, row_bytes, depth, lsb_first);
        } else {
            let reply = conn
                .get_image(
                    ImageFormat::Z_PIXMAP,
                    target,
                    cap.x as i16,
                    cap.y as i16,
                    cap.width as u16,
                    cap.height as u16,
                    !0,
                )
                .ok()?
                .reply()
                .ok()?;
            convert_rows(&reply.data, &mut result.data, cw, ch, row_bytes, depth, lsb_first);
        }

        Some(result)
    }
}

/// Convert server-order rows into the canonical RGBA layout.
fn convert_rows(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    src_stride: usize,
    depth: u8,
    lsb_first: bool,
) {
    for y in 0..height {
        let srow = &src[y * src_stride..y * src_stride + width * 4];
        let drow = &mut dst[y * width * 4..(y + 1) * width * 4];
        if lsb_first {
            bgra_to_rgba_into(srow, drow, width);
        } else {
            drow.copy_from_slice(srow);
        }
        // At depth 24 the alpha byte is undefined; force opaque.
        if depth <= 24 {
            for px in drow.chunks_exact_mut(4) {
                px[3] = 0xFF;
            }
        }
    }
}

impl Backend for X11Backend {
    fn screenshot(&mut self, region: Rect) -> Result<ImageData> {
        let effective = if region.is_set() {
            region
        } else {
            self.state.lock().unwrap().region
        };

        let Some(cap) = self.compute_capture_area(effective)? else {
            return Ok(ImageData::default());
        };
        let (cw, ch) = (cap.width as usize, cap.height as usize);

        let reply = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                self.target,
                cap.x as i16,
                cap.y as i16,
                cap.width as u16,
                cap.height as u16,
                !0,
            )
            .map_err(|e| Error::capture(format!("failed to send GetImage request: {e}")))?
            .reply()
            .map_err(|_| {
                Error::capture(
                    "failed to capture X11 image. The window may have been closed or \
                     the capture region may be outside screen bounds",
                )
            })?;

        let mut result = ImageData {
            data: vec![0u8; checked_rgba_size(cw, ch)?],
            width: cw,
            height: ch,
        };
        convert_rows(&reply.data, &mut result.data, cw, ch, cw * 4, self.depth, self.lsb_first);
        Ok(result)
    }

    fn start(&mut self, callback: FrameCallback) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let cap = state.cap;
            if let Some(cap) = cap {
                self.init_shm(&mut state, cap.width, cap.height)?;
            }
            state.streaming = true;
        }
        self.stop_flag.store(false, Ordering::Release);

        let conn = self.conn.clone();
        let state = self.state.clone();
        let paused = self.paused.clone();
        let stop_flag = self.stop_flag.clone();
        let target = self.target;
        let depth = self.depth;
        let lsb_first = self.lsb_first;

        let handle = thread::Builder::new()
            .name("x11-capture".into())
            .spawn(move || {
                let mut last_time = Instant::now();

                while !stop_flag.load(Ordering::Acquire) {
                    if paused.load(Ordering::Acquire) {
                        thread::sleep(FRAME_INTERVAL);
                        last_time = Instant::now();
                        continue;
                    }

                    let image = {
                        let mut st = state.lock().unwrap();
                        Self::capture_frame(&conn, &mut st, target, depth, lsb_first)
                    };
                    let Some(image) = image else {
                        thread::sleep(FRAME_INTERVAL);
                        continue;
                    };

                    let now = Instant::now();
                    let duration_ms = now.duration_since(last_time).as_secs_f64() * 1000.0;
                    last_time = now;

                    callback(&Frame { image, duration_ms });

                    let elapsed = now.elapsed();
                    if elapsed < FRAME_INTERVAL {
                        thread::sleep(FRAME_INTERVAL - elapsed);
                    }
                }
            })
            .map_err(|e| Error::capture(format!("failed to spawn capture thread: {e}")))?;

        self.capture_thread = Some(handle);
        info!("X11 capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.capture_thread.take() {
            self.stop_flag.store(true, Ordering::Release);
            let _ = handle.join();
        }
        let mut state = self.state.lock().unwrap();
        Self::cleanup_shm(&self.conn, &mut state);
        state.streaming = false;
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

    fn set_region(&mut self, region: Rect) {
        let cap = match self.compute_capture_area(region) {
            Ok(cap) => cap,
            Err(e) => {
                warn!("set_region: {e}");
                None
            }
        };

        let mut state = self.state.lock().unwrap();
        state.region = region;
        state.cap = cap;

        // Streaming reads straight out of the segment; resize it to match.
        if state.streaming {
            if let Some(cap) = cap {
                if let Err(e) = self.init_shm(&mut state, cap.width, cap.height) {
                    warn!("set_region: SHM reinit failed: {e}");
                }
            } else {
                Self::cleanup_shm(&self.conn, &mut state);
            }
        }
    }
}

impl Drop for X11Backend {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

pub(crate) fn enumerate_monitors() -> Vec<Monitor> {
    let Ok((conn, screen_num)) = RustConnection::connect(None) else {
        return Vec::new();
    };

    let mut result = Vec::new();

    let active = conn
        .xinerama_is_active()
        .ok()
        .and_then(|c| c.reply().ok())
        .map(|r| r.state != 0)
        .unwrap_or(false);

    if active {
        if let Some(screens) = conn
            .xinerama_query_screens()
            .ok()
            .and_then(|c| c.reply().ok())
        {
            for (i, info) in screens.screen_info.iter().enumerate() {
                result.push(Monitor {
                    id: i as i32,
                    name: format!("Screen {i}"),
                    x: i32::from(info.x_org),
                    y: i32::from(info.y_org),
                    width: i32::from(info.width),
                    height: i32::from(info.height),
                    scale: 1.0,
                });
            }
        }
    }

    if result.is_empty() {
        // Single virtual screen covering the default screen's dimensions
        let screen = &conn.setup().roots[screen_num];
        result.push(Monitor {
            id: 0,
            name: "Default".into(),
            x: 0,
            y: 0,
            width: i32::from(screen.width_in_pixels),
            height: i32::from(screen.height_in_pixels),
            scale: 1.0,
        });
    }

    result
}

pub(crate) fn enumerate_windows() -> Vec<Window> {
    let Ok((conn, screen_num)) = RustConnection::connect(None) else {
        return Vec::new();
    };
    let root = conn.setup().roots[screen_num].root;

    let mut result = Vec::new();

    let Some(client_list) = intern(&conn, b"_NET_CLIENT_LIST") else {
        return result;
    };
    let net_wm_name = intern(&conn, b"_NET_WM_NAME");
    let utf8_string = intern(&conn, b"UTF8_STRING");

    let Some(prop) = conn
        .get_property(false, root, client_list, AtomEnum::WINDOW, 0, u32::MAX)
        .ok()
        .and_then(|c| c.reply().ok())
    else {
        return result;
    };
    let Some(ids) = prop.value32() else { return result };

    for id in ids {
        let Some(attrs) = conn
            .get_window_attributes(id)
            .ok()
            .and_then(|c| c.reply().ok())
        else {
            continue;
        };
        if attrs.map_state != MapState::VIEWABLE {
            continue;
        }

        // Prefer the UTF-8 window name, fall back to the classic one.
        let mut name = match (net_wm_name, utf8_string) {
            (Some(prop_atom), Some(type_atom)) => read_string_property(&conn, id, prop_atom, type_atom),
            _ => None,
        };
        if name.is_none() {
            name = read_string_property(&conn, id, AtomEnum::WM_NAME.into(), AtomEnum::STRING.into());
        }
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            continue;
        };

        let Some(geom) = conn.get_geometry(id).ok().and_then(|c| c.reply().ok()) else {
            continue;
        };

        result.push(Window {
            id: u64::from(id),
            name,
            x: i32::from(geom.x),
            y: i32::from(geom.y),
            width: i32::from(geom.width),
            height: i32::from(geom.height),
        });
    }

    result
}

fn intern(conn: &RustConnection, name: &[u8]) -> Option<xproto::Atom> {
    conn.intern_atom(true, name)
        .ok()?
        .reply()
        .ok()
        .map(|r| r.atom)
        .filter(|&a| a != x11rb::NONE)
}

fn read_string_property(
    conn: &RustConnection,
    window: xproto::Window,
    property: xproto::Atom,
    type_: xproto::Atom,
) -> Option<String> {
    let reply = conn
        .get_property(false, window, property, type_, 0, 1024)
        .ok()?
        .reply()
        .ok()?;
    if reply.value.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&reply.value).into_owned())
}

/// Whether an X server is reachable (used by the permission diagnostic).
pub(crate) fn can_connect() -> bool {
    RustConnection::connect(None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_display() -> bool {
        std::env::var("DISPLAY").is_ok() && can_connect()
    }

    #[test]
    fn fabricated_window_id_does_not_abort() {
        if !has_display() {
            return;
        }
        // A bogus window handle must produce a capture error or an empty
        // image, never process termination.
        let window = Window { id: 0x3f_ffff, ..Default::default() };
        match X11Backend::with_window(&window) {
            Ok(mut backend) => {
                let shot = backend.screenshot(Rect::default());
                assert!(shot.is_err() || shot.unwrap().is_empty());
            }
            Err(Error::Capture(msg)) => assert!(!msg.is_empty()),
            Err(e) => panic!("unexpected error kind: {e}"),
        }
    }

    #[test]
    fn enumerate_monitors_reports_geometry() {
        if !has_display() {
            return;
        }
        let monitors = enumerate_monitors();
        assert!(!monitors.is_empty());
        for m in &monitors {
            assert!(m.width > 0);
            assert!(m.height > 0);
            assert!(m.scale >= 1.0);
        }
    }

    #[test]
    fn region_screenshot_has_exact_buffer_size() {
        if !has_display() {
            return;
        }
        let mut backend = X11Backend::with_region(Rect::new(0.0, 0.0, 100.0, 100.0)).unwrap();
        let img = backend.screenshot(Rect::default()).unwrap();
        assert_eq!(img.width, 100);
        assert_eq!(img.height, 100);
        assert_eq!(img.data.len(), 40_000);
        // 24-bit depth sources must come out fully opaque.
        if backend.depth <= 24 {
            assert!(img.data.chunks_exact(4).all(|px| px[3] == 0xFF));
        }
    }
}
