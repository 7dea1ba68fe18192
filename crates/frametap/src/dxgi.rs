//! Windows capture backend.
//!
//! Monitor streaming uses DXGI Desktop Duplication: a D3D11 device on the
//! target adapter, an output duplication and a reusable CPU-readable
//! staging texture. When duplication cannot be created (RDP sessions,
//! some virtual machines) the loop falls back to GDI polling. Window
//! streaming always polls with GDI (`PrintWindow`, `BitBlt` fallback) at
//! roughly 60 Hz, cropping against the DWM extended frame bounds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use windows::core::{w, Interface, PCWSTR};
use windows::Win32::Foundation::{HWND, LPARAM, RECT};
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_UNKNOWN;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_CPU_ACCESS_READ,
    D3D11_CREATE_DEVICE_FLAG, D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ, D3D11_SDK_VERSION,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dwm::{
    DwmGetWindowAttribute, DWMWA_CLOAKED, DWMWA_EXTENDED_FRAME_BOUNDS,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, IDXGIFactory1, IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource,
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTPUT_DESC,
};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, CreateDCW, DeleteDC, DeleteObject,
    GetDC, GetDIBits, GetDeviceCaps, GetMonitorInfoW, ReleaseDC, SelectObject, BITMAPINFO,
    BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HDC, HORZRES, MONITORINFO, MONITORINFOEXW, SRCCOPY,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetSystemMetrics, GetWindowLongW, GetWindowRect, GetWindowTextLengthW,
    GetWindowTextW, IsWindowVisible, PrintWindow, GWL_EXSTYLE, PW_RENDERFULLCONTENT,
    SM_CXSCREEN, SM_CYSCREEN, SM_REMOTESESSION, WS_EX_TOOLWINDOW,
};

use crate::backend::Backend;
use crate::convert::{bgra_to_rgba, bgra_to_rgba_into, checked_rgba_size};
use crate::error::{Error, Result};
use crate::types::{
    CropArea, Frame, FrameCallback, ImageData, Monitor, PermissionCheck, PermissionStatus, Rect,
    Window,
};

const FRAME_INTERVAL: Duration = Duration::from_millis(16); // ~60 fps
const ACQUIRE_TIMEOUT_MS: u32 = 100;

/// Windows capture backend (DXGI streaming, GDI fallback and windows).
pub(crate) struct WindowsBackend {
    monitor_index: i32,
    /// Target window handle when capturing a window
    window_id: Option<u64>,
    region: Arc<Mutex<Rect>>,
    paused: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    capture_thread: Option<JoinHandle<()>>,
}

impl WindowsBackend {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self::create(Rect::default(), 0, None))
    }

    pub(crate) fn with_region(region: Rect) -> Result<Self> {
        Ok(Self::create(region, 0, None))
    }

    pub(crate) fn with_monitor(monitor: &Monitor) -> Result<Self> {
        Ok(Self::create(Rect::default(), monitor.id, None))
    }

    pub(crate) fn with_window(window: &Window) -> Result<Self> {
        Ok(Self::create(Rect::default(), 0, Some(window.id)))
    }

    fn create(region: Rect, monitor_index: i32, window_id: Option<u64>) -> Self {
        Self {
            monitor_index,
            window_id,
            region: Arc::new(Mutex::new(region)),
            paused: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            capture_thread: None,
        }
    }
}

impl Backend for WindowsBackend {
    fn screenshot(&mut self, region: Rect) -> Result<ImageData> {
        let effective = if region.is_set() {
            region
        } else {
            *self.region.lock().unwrap()
        };
        match self.window_id {
            Some(id) => screenshot_window(hwnd_from_id(id), effective),
            None => screenshot_monitor(self.monitor_index, effective),
        }
    }

    fn start(&mut self, callback: FrameCallback) -> Result<()> {
        self.stop_flag.store(false, Ordering::Release);

        let monitor_index = self.monitor_index;
        let window_id = self.window_id;
        let region = self.region.clone();
        let paused = self.paused.clone();
        let stop_flag = self.stop_flag.clone();

        let handle = thread::Builder::new()
            .name("win-capture".into())
            .spawn(move || {
                let shared = LoopShared { region, paused, stop_flag, callback };
                match window_id {
                    Some(id) => gdi_window_loop(id, &shared),
                    None => dxgi_capture_loop(monitor_index, &shared),
                }
            })
            .map_err(|e| Error::capture(format!("failed to spawn capture thread: {e}")))?;

        self.capture_thread = Some(handle);
        info!("Windows capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.capture_thread.take() {
            self.stop_flag.store(true, Ordering::Release);
            let _ = handle.join();
        }
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
        *self.region.lock().unwrap() = region;
    }
}

impl Drop for WindowsBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn hwnd_from_id(id: u64) -> HWND {
    HWND(id as isize as *mut core::ffi::c_void)
}

/// State shared with the capture thread.
struct LoopShared {
    region: Arc<Mutex<Rect>>,
    paused: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    callback: FrameCallback,
}

// ---------------------------------------------------------------------------
// DXGI desktop duplication
// ---------------------------------------------------------------------------

/// DXGI resources held for the lifetime of a streaming session.
struct DxgiState {
    _device: ID3D11Device,
    context: ID3D11DeviceContext,
    duplication: IDXGIOutputDuplication,
    staging: ID3D11Texture2D,
    width: i32,
    height: i32,
}

impl DxgiState {
    /// Build the full duplication pipeline for the monitor at the given
    /// flat (adapter, output) index.
    fn init(monitor_index: i32) -> Result<Self> {
        unsafe {
            let factory: IDXGIFactory1 = CreateDXGIFactory1()
                .map_err(|e| Error::capture(format!("failed to create DXGI factory: {e}")))?;

            let (adapter, output) = find_output(&factory, monitor_index)
                .ok_or_else(|| Error::capture(format!("monitor {monitor_index} not found")))?;

            let desc = output
                .GetDesc()
                .map_err(|e| Error::capture(format!("failed to get output desc: {e}")))?;
            let width = desc.DesktopCoordinates.right - desc.DesktopCoordinates.left;
            let height = desc.DesktopCoordinates.bottom - desc.DesktopCoordinates.top;

            let mut device: Option<ID3D11Device> = None;
            let mut context: Option<ID3D11DeviceContext> = None;
            D3D11CreateDevice(
                &adapter,
                D3D_DRIVER_TYPE_UNKNOWN,
                None,
                D3D11_CREATE_DEVICE_FLAG(0),
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(|e| Error::capture(format!("failed to create D3D11 device: {e}")))?;
            let device =
                device.ok_or_else(|| Error::capture("D3D11 device creation returned nothing"))?;
            let context =
                context.ok_or_else(|| Error::capture("D3D11 context creation returned nothing"))?;

            let output1: IDXGIOutput1 = output
                .cast()
                .map_err(|e| Error::capture(format!("failed to get IDXGIOutput1: {e}")))?;
            let duplication = output1
                .DuplicateOutput(&device)
                .map_err(|e| Error::capture(format!("failed to duplicate output: {e}")))?;

            // Reusable staging texture for CPU readback
            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: width as u32,
                Height: height as u32,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };
            let mut staging: Option<ID3D11Texture2D> = None;
            device
                .CreateTexture2D(&staging_desc, None, Some(&mut staging))
                .map_err(|e| Error::capture(format!("failed to create staging texture: {e}")))?;
            let staging =
                staging.ok_or_else(|| Error::capture("staging texture creation returned nothing"))?;

            debug!("duplication ready: {width}x{height}");
            Ok(Self { _device: device, context, duplication, staging, width, height })
        }
    }
}

/// Walk (adapter, output) pairs in declaration order to the flat index.
unsafe fn find_output(
    factory: &IDXGIFactory1,
    monitor_index: i32,
) -> Option<(windows::Win32::Graphics::Dxgi::IDXGIAdapter1, windows::Win32::Graphics::Dxgi::IDXGIOutput)>
{
    let mut current = 0;
    let mut adapter_index = 0u32;
    while let Ok(adapter) = factory.EnumAdapters1(adapter_index) {
        let mut output_index = 0u32;
        while let Ok(output) = adapter.EnumOutputs(output_index) {
            if current == monitor_index {
                return Some((adapter, output));
            }
            current += 1;
            output_index += 1;
        }
        adapter_index += 1;
    }
    None
}

fn dxgi_capture_loop(monitor_index: i32, shared: &LoopShared) {
    let mut dxgi = match DxgiState::init(monitor_index) {
        Ok(state) => state,
        Err(e) => {
            // No duplication available (RDP, some VMs): poll with GDI.
            warn!("desktop duplication unavailable ({e}), falling back to GDI polling");
            gdi_monitor_loop(monitor_index, shared);
            return;
        }
    };

    let mut last_time = Instant::now();

    while !shared.stop_flag.load(Ordering::Acquire) {
        if shared.paused.load(Ordering::Acquire) {
            thread::sleep(FRAME_INTERVAL);
            last_time = Instant::now();
            continue;
        }

        unsafe {
            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource: Option<IDXGIResource> = None;
            let acquired =
                dxgi.duplication
                    .AcquireNextFrame(ACQUIRE_TIMEOUT_MS, &mut frame_info, &mut resource);

            if let Err(e) = acquired {
                if e.code() == DXGI_ERROR_WAIT_TIMEOUT {
                    continue;
                }
                if e.code() == DXGI_ERROR_ACCESS_LOST {
                    // Desktop switch (UAC, lock screen, RDP): rebuild the
                    // duplication and keep going.
                    debug!("duplication access lost, reinitializing");
                    match DxgiState::init(monitor_index) {
                        Ok(state) => dxgi = state,
                        Err(e) => {
                            warn!("duplication reinit failed: {e}");
                            return;
                        }
                    }
                    continue;
                }
                continue;
            }

            // No new pixels since the last acquire
            if frame_info.LastPresentTime == 0 {
                drop(resource);
                let _ = dxgi.duplication.ReleaseFrame();
                continue;
            }

            let Some(resource) = resource else {
                let _ = dxgi.duplication.ReleaseFrame();
                continue;
            };
            let texture: ID3D11Texture2D = match resource.cast() {
                Ok(t) => t,
                Err(_) => {
                    let _ = dxgi.duplication.ReleaseFrame();
                    continue;
                }
            };

            dxgi.context.CopyResource(&dxgi.staging, &texture);

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            if dxgi
                .context
                .Map(&dxgi.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                .is_ok()
            {
                let region = *shared.region.lock().unwrap();
                if let Some(image) =
                    read_mapped(&mapped, dxgi.width, dxgi.height, region)
                {
                    dxgi.context.Unmap(&dxgi.staging, 0);

                    let now = Instant::now();
                    let duration_ms = now.duration_since(last_time).as_secs_f64() * 1000.0;
                    last_time = now;
                    (shared.callback)(&Frame { image, duration_ms });
                } else {
                    dxgi.context.Unmap(&dxgi.staging, 0);
                }
            }

            let _ = dxgi.duplication.ReleaseFrame();
        }
    }
}

/// Crop and convert a mapped staging texture into the canonical image.
unsafe fn read_mapped(
    mapped: &D3D11_MAPPED_SUBRESOURCE,
    desk_w: i32,
    desk_h: i32,
    region: Rect,
) -> Option<ImageData> {
    let area = if region.is_set() {
        region.clamp_to(desk_w, desk_h)?
    } else {
        CropArea { x: 0, y: 0, width: desk_w, height: desk_h }
    };

    let (out_w, out_h) = (area.width as usize, area.height as usize);
    let mut rgba = vec![0u8; checked_rgba_size(out_w, out_h).ok()?];

    let src = mapped.pData as *const u8;
    let pitch = mapped.RowPitch as usize;
    for row in 0..out_h {
        let src_row = src.add((row + area.y as usize) * pitch + area.x as usize * 4);
        let src_slice = std::slice::from_raw_parts(src_row, out_w * 4);
        bgra_to_rgba_into(src_slice, &mut rgba[row * out_w * 4..(row + 1) * out_w * 4], out_w);
    }

    Some(ImageData { data: rgba, width: out_w, height: out_h })
}

// ---------------------------------------------------------------------------
// GDI polling loops
// ---------------------------------------------------------------------------

fn gdi_monitor_loop(monitor_index: i32, shared: &LoopShared) {
    poll_loop(shared, || screenshot_monitor_gdi(monitor_index, *shared.region.lock().unwrap()));
}

fn gdi_window_loop(window_id: u64, shared: &LoopShared) {
    poll_loop(shared, || {
        screenshot_window(hwnd_from_id(window_id), *shared.region.lock().unwrap())
    });
}

fn poll_loop(shared: &LoopShared, mut grab: impl FnMut() -> Result<ImageData>) {
    let mut last_time = Instant::now();

    while !shared.stop_flag.load(Ordering::Acquire) {
        if shared.paused.load(Ordering::Acquire) {
            thread::sleep(FRAME_INTERVAL);
            last_time = Instant::now();
            continue;
        }

        let image = match grab() {
            Ok(img) if !img.is_empty() => img,
            _ => {
                thread::sleep(FRAME_INTERVAL);
                continue;
            }
        };

        let now = Instant::now();
        let duration_ms = now.duration_since(last_time).as_secs_f64() * 1000.0;
        last_time = now;
        (shared.callback)(&Frame { image, duration_ms });

        let elapsed = now.elapsed();
        if elapsed < FRAME_INTERVAL {
            thread::sleep(FRAME_INTERVAL - elapsed);
        }
    }
}

// ---------------------------------------------------------------------------
// One-shot screenshots
// ---------------------------------------------------------------------------

fn screenshot_monitor(monitor_index: i32, region: Rect) -> Result<ImageData> {
    // DXGI first for correctness with layered/accelerated content
    match screenshot_monitor_dxgi(monitor_index, region) {
        Ok(img) if !img.is_empty() => Ok(img),
        _ => screenshot_monitor_gdi(monitor_index, region),
    }
}

fn screenshot_monitor_dxgi(monitor_index: i32, region: Rect) -> Result<ImageData> {
    let dxgi = DxgiState::init(monitor_index)?;
    unsafe {
        let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        dxgi.duplication
            .AcquireNextFrame(500, &mut frame_info, &mut resource)
            .map_err(|e| Error::capture(format!("failed to acquire desktop frame: {e}")))?;

        let resource =
            resource.ok_or_else(|| Error::capture("no desktop resource acquired"))?;
        let texture: ID3D11Texture2D = resource
            .cast()
            .map_err(|e| Error::capture(format!("failed to get desktop texture: {e}")))?;
        dxgi.context.CopyResource(&dxgi.staging, &texture);

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        dxgi.context
            .Map(&dxgi.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
            .map_err(|e| Error::capture(format!("failed to map staging texture: {e}")))?;

        let image = read_mapped(&mapped, dxgi.width, dxgi.height, region);

        dxgi.context.Unmap(&dxgi.staging, 0);
        let _ = dxgi.duplication.ReleaseFrame();

        Ok(image.unwrap_or_default())
    }
}

fn screenshot_monitor_gdi(_monitor_index: i32, region: Rect) -> Result<ImageData> {
    unsafe {
        let screen_dc = GetDC(None);
        if screen_dc.is_invalid() {
            return Err(Error::capture("failed to acquire screen device context"));
        }

        let (screen_w, screen_h) = (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN));
        let area = if region.is_set() {
            match region.clamp_to(screen_w, screen_h) {
                Some(area) => area,
                None => {
                    ReleaseDC(None, screen_dc);
                    return Ok(ImageData::default());
                }
            }
        } else {
            CropArea { x: 0, y: 0, width: screen_w, height: screen_h }
        };

        let result = gdi_blit(screen_dc, area.x, area.y, area.width, area.height);
        ReleaseDC(None, screen_dc);
        result
    }
}

/// Blit a rectangle out of `src_dc` through a compatible bitmap and read
/// it back as a top-down 32-bit DIB.
unsafe fn gdi_blit(src_dc: HDC, x: i32, y: i32, width: i32, height: i32) -> Result<ImageData> {
    if width <= 0 || height <= 0 {
        return Ok(ImageData::default());
    }

    let mem_dc = CreateCompatibleDC(Some(src_dc));
    let bmp = CreateCompatibleBitmap(src_dc, width, height);
    let old_bmp = SelectObject(mem_dc, bmp.into());

    if BitBlt(mem_dc, 0, 0, width, height, Some(src_dc), x, y, SRCCOPY).is_err() {
        SelectObject(mem_dc, old_bmp);
        let _ = DeleteObject(bmp.into());
        let _ = DeleteDC(mem_dc);
        return Err(Error::capture("BitBlt failed"));
    }

    let result = read_dib(mem_dc, bmp, width, height);

    SelectObject(mem_dc, old_bmp);
    let _ = DeleteObject(bmp.into());
    let _ = DeleteDC(mem_dc);
    result
}

unsafe fn read_dib(
    mem_dc: HDC,
    bmp: windows::Win32::Graphics::Gdi::HBITMAP,
    width: i32,
    height: i32,
) -> Result<ImageData> {
    let mut bi = BITMAPINFO::default();
    bi.bmiHeader = BITMAPINFOHEADER {
        biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
        biWidth: width,
        biHeight: -height, // top-down
        biPlanes: 1,
        biBitCount: 32,
        biCompression: BI_RGB.0,
        ..Default::default()
    };

    let (w, h) = (width as usize, height as usize);
    let mut pixels = vec![0u8; checked_rgba_size(w, h)?];
    let copied = GetDIBits(
        mem_dc,
        bmp,
        0,
        height as u32,
        Some(pixels.as_mut_ptr() as *mut core::ffi::c_void),
        &mut bi,
        DIB_RGB_COLORS,
    );
    if copied == 0 {
        return Err(Error::capture("GetDIBits failed"));
    }

    bgra_to_rgba(&mut pixels, w * h);
    Ok(ImageData { data: pixels, width: w, height: h })
}

/// Window bounds as reported by the compositor (falls back to the plain
/// window rect when DWM is unavailable).
fn window_bounds(hwnd: HWND) -> Result<RECT> {
    unsafe {
        let mut rect = RECT::default();
        if DwmGetWindowAttribute(
            hwnd,
            DWMWA_EXTENDED_FRAME_BOUNDS,
            &mut rect as *mut RECT as *mut core::ffi::c_void,
            std::mem::size_of::<RECT>() as u32,
        )
        .is_err()
        {
            GetWindowRect(hwnd, &mut rect)
                .map_err(|_| Error::capture("window handle is invalid"))?;
        }
        Ok(rect)
    }
}

fn screenshot_window(hwnd: HWND, region: Rect) -> Result<ImageData> {
    unsafe {
        let rect = window_bounds(hwnd)?;
        let win_w = rect.right - rect.left;
        let win_h = rect.bottom - rect.top;
        if win_w <= 0 || win_h <= 0 {
            return Ok(ImageData::default());
        }

        let win_dc = GetDC(Some(hwnd));
        if win_dc.is_invalid() {
            return Err(Error::capture("failed to acquire window device context"));
        }

        let mem_dc = CreateCompatibleDC(Some(win_dc));
        let bmp = CreateCompatibleBitmap(win_dc, win_w, win_h);
        let old_bmp = SelectObject(mem_dc, bmp.into());

        // PrintWindow draws occluded content too; BitBlt is the fallback
        // for windows that refuse it.
        let mut drawn = PrintWindow(hwnd, mem_dc, PW_RENDERFULLCONTENT).as_bool();
        if !drawn {
            drawn = BitBlt(mem_dc, 0, 0, win_w, win_h, Some(win_dc), 0, 0, SRCCOPY).is_ok();
        }
        if !drawn {
            SelectObject(mem_dc, old_bmp);
            let _ = DeleteObject(bmp.into());
            let _ = DeleteDC(mem_dc);
            ReleaseDC(Some(hwnd), win_dc);
            return Err(Error::capture("failed to draw window contents"));
        }

        let full = read_dib(mem_dc, bmp, win_w, win_h);

        SelectObject(mem_dc, old_bmp);
        let _ = DeleteObject(bmp.into());
        let _ = DeleteDC(mem_dc);
        ReleaseDC(Some(hwnd), win_dc);

        let full = full?;
        if !region.is_set() {
            return Ok(full);
        }
        match region.clamp_to(win_w, win_h) {
            Some(area) => crate::convert::crop_rgba(&full, area),
            None => Ok(ImageData::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

pub(crate) fn enumerate_monitors() -> Vec<Monitor> {
    let mut result = Vec::new();
    unsafe {
        let Ok(factory) = CreateDXGIFactory1::<IDXGIFactory1>() else {
            return result;
        };

        let mut adapter_index = 0u32;
        while let Ok(adapter) = factory.EnumAdapters1(adapter_index) {
            let mut output_index = 0u32;
            while let Ok(output) = adapter.EnumOutputs(output_index) {
                if let Ok(desc) = output.GetDesc() {
                    result.push(monitor_from_desc(result.len() as i32, &desc));
                }
                output_index += 1;
            }
            adapter_index += 1;
        }
    }
    result
}

unsafe fn monitor_from_desc(id: i32, desc: &DXGI_OUTPUT_DESC) -> Monitor {
    let coords = desc.DesktopCoordinates;
    let width = coords.right - coords.left;

    let mut mi = MONITORINFOEXW::default();
    mi.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;
    let _ = GetMonitorInfoW(desc.Monitor, &mut mi.monitorInfo as *mut MONITORINFO);

    // DPI scale from the ratio of physical to logical horizontal resolution
    let mut scale = 1.0f32;
    let dc = CreateDCW(
        w!("DISPLAY"),
        PCWSTR::from_raw(mi.szDevice.as_ptr()),
        PCWSTR::null(),
        None,
    );
    if !dc.is_invalid() {
        let logical_w = GetDeviceCaps(Some(dc), HORZRES);
        if logical_w > 0 {
            scale = width as f32 / logical_w as f32;
        }
        let _ = DeleteDC(dc);
    }

    Monitor {
        id,
        name: utf16_to_string(&desc.DeviceName),
        x: coords.left,
        y: coords.top,
        width,
        height: coords.bottom - coords.top,
        scale: scale.max(1.0),
    }
}

fn utf16_to_string(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

pub(crate) fn enumerate_windows() -> Vec<Window> {
    let mut result: Vec<Window> = Vec::new();
    unsafe {
        let _ = EnumWindows(
            Some(enum_windows_proc),
            LPARAM(&mut result as *mut Vec<Window> as isize),
        );
    }
    result
}

unsafe extern "system" fn enum_windows_proc(
    hwnd: HWND,
    lparam: LPARAM,
) -> windows::Win32::Foundation::BOOL {
    let windows_out = &mut *(lparam.0 as *mut Vec<Window>);

    if !IsWindowVisible(hwnd).as_bool() {
        return true.into();
    }

    let title_len = GetWindowTextLengthW(hwnd);
    if title_len <= 0 {
        return true.into();
    }

    // Skip tool windows and DWM-cloaked windows (hidden UWP apps,
    // other virtual desktops).
    let ex_style = GetWindowLongW(hwnd, GWL_EXSTYLE) as u32;
    if ex_style & WS_EX_TOOLWINDOW.0 != 0 {
        return true.into();
    }
    let mut cloaked: u32 = 0;
    let _ = DwmGetWindowAttribute(
        hwnd,
        DWMWA_CLOAKED,
        &mut cloaked as *mut u32 as *mut core::ffi::c_void,
        std::mem::size_of::<u32>() as u32,
    );
    if cloaked != 0 {
        return true.into();
    }

    let mut title = vec![0u16; title_len as usize + 1];
    let copied = GetWindowTextW(hwnd, &mut title);
    if copied <= 0 {
        return true.into();
    }
    let name = String::from_utf16_lossy(&title[..copied as usize]);

    let Ok(rect) = window_bounds(hwnd) else {
        return true.into();
    };

    windows_out.push(Window {
        id: hwnd.0 as isize as u64,
        name,
        x: rect.left,
        y: rect.top,
        width: rect.right - rect.left,
        height: rect.bottom - rect.top,
    });

    true.into()
}

// ---------------------------------------------------------------------------
// Permission diagnostics
// ---------------------------------------------------------------------------

pub(crate) fn check_platform_permissions() -> PermissionCheck {
    let mut result = PermissionCheck::default();

    unsafe {
        let has_output = match CreateDXGIFactory1::<IDXGIFactory1>() {
            Ok(factory) => {
                let mut found = false;
                let mut ai = 0u32;
                while let Ok(adapter) = factory.EnumAdapters1(ai) {
                    if adapter.EnumOutputs(0).is_ok() {
                        found = true;
                        break;
                    }
                    ai += 1;
                }
                Some(found)
            }
            Err(_) => None,
        };

        match has_output {
            Some(true) => {
                result.status = PermissionStatus::Ok;
                result.details.push("DXGI Desktop Duplication available.".into());
            }
            Some(false) => {
                result.status = PermissionStatus::Warning;
                result.details.push(
                    "No DXGI outputs found. This may happen in RDP sessions or headless \
                     environments. GDI fallback will be used."
                        .into(),
                );
            }
            None => {
                result.status = PermissionStatus::Warning;
                result
                    .details
                    .push("DXGI unavailable. GDI fallback will be used for capture.".into());
            }
        }

        if GetSystemMetrics(SM_REMOTESESSION) != 0 {
            if result.status == PermissionStatus::Ok {
                result.status = PermissionStatus::Warning;
            }
            result.details.push(
                "Remote Desktop session detected. DXGI Desktop Duplication may not work; \
                 GDI fallback will be used."
                    .into(),
            );
        }
    }

    result.summary = if result.status == PermissionStatus::Ok {
        "Windows (DXGI)".into()
    } else {
        "Windows (GDI fallback)".into()
    };
    result
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

pub(crate) fn make_backend() -> Result<Box<dyn Backend>> {
    Ok(Box::new(WindowsBackend::new()?))
}

pub(crate) fn make_backend_region(region: Rect) -> Result<Box<dyn Backend>> {
    Ok(Box::new(WindowsBackend::with_region(region)?))
}

pub(crate) fn make_backend_monitor(monitor: Monitor) -> Result<Box<dyn Backend>> {
    Ok(Box::new(WindowsBackend::with_monitor(&monitor)?))
}

pub(crate) fn make_backend_window(window: Window) -> Result<Box<dyn Backend>> {
    Ok(Box::new(WindowsBackend::with_window(&window)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_name_stops_at_nul() {
        let buf: Vec<u16> = "DISPLAY1\0\0\0".encode_utf16().collect();
        assert_eq!(utf16_to_string(&buf), "DISPLAY1");
    }

    #[test]
    fn permission_check_reports_a_summary() {
        let report = check_platform_permissions();
        assert!(report.summary.starts_with("Windows"));
        assert!(!report.details.is_empty());
    }
}
