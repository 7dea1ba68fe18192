//! Wayland screen capture backend.
//!
//! Pixels travel over PipeWire: the portal session (see [`crate::portal`])
//! brokers permission and hands back a connection fd plus a node id, and
//! this module consumes the video stream from that node. The PipeWire
//! main loop runs on a dedicated thread; a loop timer polls the stop
//! channel so `stop()` can quit the loop from outside.
//!
//! Monitor enumeration uses a minimal wayland-client connection reading
//! the `wl_output` globals. Window enumeration returns an empty list:
//! Wayland gives unprivileged clients no window list, and window capture
//! goes through the portal's interactive picker instead.

use std::cell::RefCell;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::convert::{bgra_to_rgba_into, checked_rgba_size, crop_rgba};
use crate::error::{Error, Result};
use crate::portal::{open_screencast_session, PortalSession};
use crate::types::{Frame, FrameCallback, ImageData, Monitor, Rect, Window};

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire pixel layout negotiated with the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PixelLayout {
    #[default]
    Bgrx,
    Bgra,
    Rgbx,
    Rgba,
}

impl PixelLayout {
    fn from_spa(format: spa::param::video::VideoFormat) -> Self {
        use spa::param::video::VideoFormat;
        match format {
            VideoFormat::RGBA => PixelLayout::Rgba,
            VideoFormat::RGBx => PixelLayout::Rgbx,
            VideoFormat::BGRA => PixelLayout::Bgra,
            VideoFormat::BGRx => PixelLayout::Bgrx,
            // Unknown formats are treated as BGRA, the common case.
            _ => PixelLayout::Bgra,
        }
    }
}

/// Format parameters captured from the stream's `param_changed` event.
#[derive(Debug, Clone, Copy, Default)]
struct StreamFormat {
    layout: PixelLayout,
    width: usize,
    height: usize,
}

/// State shared between the backend handle and the stream callbacks.
struct Shared {
    region: Mutex<Rect>,
    last_frame: Mutex<Instant>,
    paused: AtomicBool,
}

enum StreamCommand {
    Stop,
}

/// Wayland (portal + PipeWire) capture backend.
pub(crate) struct WaylandBackend {
    capture_window: bool,
    shared: Arc<Shared>,
    portal: Option<PortalSession>,
    command_tx: Option<Sender<StreamCommand>>,
    stream_thread: Option<JoinHandle<()>>,
}

impl WaylandBackend {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self::create(Rect::default(), false))
    }

    pub(crate) fn with_region(region: Rect) -> Result<Self> {
        Ok(Self::create(region, false))
    }

    pub(crate) fn with_monitor(_monitor: &Monitor) -> Result<Self> {
        // Monitor selection happens in the portal picker dialog; there is
        // no programmatic way to target a specific output.
        Ok(Self::create(Rect::default(), false))
    }

    pub(crate) fn with_window(_window: &Window) -> Result<Self> {
        Ok(Self::create(Rect::default(), true))
    }

    fn create(region: Rect, capture_window: bool) -> Self {
        pw::init();
        Self {
            capture_window,
            shared: Arc::new(Shared {
                region: Mutex::new(region),
                last_frame: Mutex::new(Instant::now()),
                paused: AtomicBool::new(false),
            }),
            portal: None,
            command_tx: None,
            stream_thread: None,
        }
    }

    fn ensure_portal(&mut self) -> Result<&PortalSession> {
        if self.portal.is_none() {
            self.portal = Some(open_screencast_session(self.capture_window)?);
        }
        Ok(self.portal.as_ref().unwrap())
    }
}

impl Backend for WaylandBackend {
    fn screenshot(&mut self, region: Rect) -> Result<ImageData> {
        let effective = if region.is_set() {
            region
        } else {
            *self.shared.region.lock().unwrap()
        };

        let portal = self.ensure_portal()?;
        let node_id = portal.node_id;
        let fd = portal
            .fd
            .try_clone()
            .map_err(|e| Error::capture(format!("failed to duplicate PipeWire fd: {e}")))?;

        let raw = capture_one_frame(node_id, fd)?;

        let mut image = convert_frame(&raw)?;
        if effective.is_set() {
            match effective.clamp_to(image.width as i32, image.height as i32) {
                Some(area) => image = crop_rgba(&image, area)?,
                None => return Ok(ImageData::default()),
            }
        }
        Ok(image)
    }

    fn start(&mut self, callback: FrameCallback) -> Result<()> {
        *self.shared.last_frame.lock().unwrap() = Instant::now();

        let portal = self.ensure_portal()?;
        let node_id = portal.node_id;
        debug!("streaming from portal session {}", portal.session_handle);
        let fd = portal
            .fd
            .try_clone()
            .map_err(|e| Error::capture(format!("failed to duplicate PipeWire fd: {e}")))?;

        let (command_tx, command_rx) = mpsc::channel();
        let shared = self.shared.clone();

        let handle = thread::Builder::new()
            .name("wayland-capture".into())
            .spawn(move || {
                if let Err(e) = run_stream_loop(node_id, fd, shared, callback, command_rx) {
                    warn!("PipeWire capture thread error: {e}");
                }
            })
            .map_err(|e| Error::capture(format!("failed to spawn capture thread: {e}")))?;

        self.command_tx = Some(command_tx);
        self.stream_thread = Some(handle);
        info!("Wayland capture started (node {node_id})");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(StreamCommand::Stop);
        }
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
        // Releasing the session closes the duplicated fd and drops the bus
        // connection; a restart goes through the portal again.
        self.portal = None;
    }

    fn pause(&self) {
        // Flag only: the process handler discards frames. Toggling the
        // stream's active state from outside the loop thread is unsafe.
        self.shared.paused.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        *self.shared.last_frame.lock().unwrap() = Instant::now();
    }

    fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    fn set_region(&mut self, region: Rect) {
        *self.shared.region.lock().unwrap() = region;
    }
}

impl Drop for WaylandBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Streaming loop (dedicated thread)
// ---------------------------------------------------------------------------

fn run_stream_loop(
    node_id: u32,
    fd: OwnedFd,
    shared: Arc<Shared>,
    callback: FrameCallback,
    command_rx: Receiver<StreamCommand>,
) -> Result<()> {
    let mainloop = pw::main_loop::MainLoop::new(None)
        .map_err(|e| Error::capture(format!("failed to create PipeWire main loop: {e}")))?;
    let context = pw::context::Context::new(&mainloop)
        .map_err(|e| Error::capture(format!("failed to create PipeWire context: {e}")))?;

    // `fd` is our duplicate of the portal's descriptor; a connect failure
    // drops (closes) it here while the portal keeps its own.
    let core = context
        .connect_fd(fd, None)
        .map_err(|e| Error::capture(format!("failed to connect to PipeWire: {e}")))?;

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Video",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Screen",
    };
    let stream = pw::stream::Stream::new(&core, "frametap", props)
        .map_err(|e| Error::capture(format!("failed to create PipeWire stream: {e}")))?;

    let format = Arc::new(Mutex::new(StreamFormat::default()));

    let _listener = stream
        .add_local_listener_with_user_data(())
        .param_changed({
            let format = format.clone();
            move |_stream, _ud, id, param| {
                if id == spa::param::ParamType::Format.as_raw() {
                    if let Some(new_format) = parse_format_param(param) {
                        debug!(
                            "stream format: {:?} {}x{}",
                            new_format.layout, new_format.width, new_format.height
                        );
                        *format.lock().unwrap() = new_format;
                    }
                }
            }
        })
        .process({
            let format = format.clone();
            let shared = shared.clone();
            let callback = callback.clone();
            move |stream, _ud| {
                process_frame(stream, &format, &shared, &callback);
            }
        })
        .register()
        .map_err(|e| Error::capture(format!("failed to register stream listener: {e}")))?;

    let values = format_enum_pod()?;
    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| Error::capture("failed to build format parameter pod"))?];

    stream
        .connect(
            spa::utils::Direction::Input,
            Some(node_id),
            pw::stream::StreamFlags::AUTOCONNECT | pw::stream::StreamFlags::MAP_BUFFERS,
            &mut params,
        )
        .map_err(|e| Error::capture(format!("failed to connect PipeWire stream: {e}")))?;

    // Poll the stop channel from a loop timer so stop() can quit the loop.
    let mainloop_weak = mainloop.downgrade();
    let timer = mainloop.loop_().add_timer(move |_| {
        match command_rx.try_recv() {
            Ok(StreamCommand::Stop) | Err(mpsc::TryRecvError::Disconnected) => {
                if let Some(ml) = mainloop_weak.upgrade() {
                    ml.quit();
                }
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }
    });
    timer
        .update_timer(Some(Duration::from_millis(33)), Some(Duration::from_millis(33)))
        .into_result()
        .map_err(|e| Error::capture(format!("failed to arm stop timer: {e}")))?;

    mainloop.run();
    debug!("PipeWire capture thread exiting");
    Ok(())
}

fn parse_format_param(param: Option<&Pod>) -> Option<StreamFormat> {
    let param = param?;
    let (media_type, media_subtype) = format_utils::parse_format(param).ok()?;
    if media_type != MediaType::Video || media_subtype != MediaSubtype::Raw {
        return None;
    }
    let mut info = spa::param::video::VideoInfoRaw::new();
    info.parse(param).ok()?;
    Some(StreamFormat {
        layout: PixelLayout::from_spa(info.format()),
        width: info.size().width as usize,
        height: info.size().height as usize,
    })
}

fn process_frame(
    stream: &pw::stream::StreamRef,
    format: &Mutex<StreamFormat>,
    shared: &Shared,
    callback: &FrameCallback,
) {
    let paused = shared.paused.load(Ordering::Acquire);

    let Some(mut buffer) = stream.dequeue_buffer() else {
        return;
    };
    if paused {
        // Dropping the buffer re-queues it so the server's pool keeps
        // cycling while we discard frames.
        return;
    }

    let fmt = *format.lock().unwrap();
    if fmt.width == 0 || fmt.height == 0 {
        return;
    }

    let datas = buffer.datas_mut();
    if datas.is_empty() {
        return;
    }
    let data = &mut datas[0];
    let chunk_stride = data.chunk().stride();
    let Some(slice) = data.data() else {
        return;
    };

    let stride = if chunk_stride > 0 {
        chunk_stride as usize
    } else {
        fmt.width * 4
    };
    let raw = RawShot {
        format: fmt,
        stride,
        bytes: match copy_frame_bytes(slice, fmt, stride) {
            Some(bytes) => bytes,
            None => return,
        },
    };
    // Re-queue as soon as the pixels are copied out; the server's buffer
    // pool is small.
    drop(buffer);

    let Ok(mut image) = convert_frame(&raw) else {
        return;
    };

    let region = *shared.region.lock().unwrap();
    if region.is_set() {
        match region.clamp_to(image.width as i32, image.height as i32) {
            Some(area) => match crop_rgba(&image, area) {
                Ok(cropped) => image = cropped,
                Err(_) => return,
            },
            None => return,
        }
    }

    let now = Instant::now();
    let duration_ms = {
        let mut last = shared.last_frame.lock().unwrap();
        let d = now.duration_since(*last).as_secs_f64() * 1000.0;
        *last = now;
        d
    };

    callback(&Frame { image, duration_ms });
}

/// A frame as it came off the wire: negotiated format, stride, raw bytes.
struct RawShot {
    format: StreamFormat,
    stride: usize,
    bytes: Vec<u8>,
}

fn copy_frame_bytes(slice: &[u8], fmt: StreamFormat, stride: usize) -> Option<Vec<u8>> {
    let needed = fmt
        .height
        .checked_sub(1)?
        .checked_mul(stride)?
        .checked_add(fmt.width * 4)?;
    if needed > slice.len() {
        warn!(
            "PipeWire buffer too small: have {} bytes, need {} for {}x{}",
            slice.len(),
            needed,
            fmt.width,
            fmt.height
        );
        return None;
    }
    Some(slice[..needed].to_vec())
}

/// Convert raw wire bytes into the canonical RGBA image.
fn convert_frame(raw: &RawShot) -> Result<ImageData> {
    let (w, h) = (raw.format.width, raw.format.height);
    let mut image = ImageData {
        data: vec![0u8; checked_rgba_size(w, h)?],
        width: w,
        height: h,
    };

    for y in 0..h {
        let row = &raw.bytes[y * raw.stride..y * raw.stride + w * 4];
        let out = &mut image.data[y * w * 4..(y + 1) * w * 4];
        match raw.format.layout {
            PixelLayout::Bgrx | PixelLayout::Bgra => bgra_to_rgba_into(row, out, w),
            PixelLayout::Rgba => out.copy_from_slice(row),
            PixelLayout::Rgbx => {
                out.copy_from_slice(row);
                for px in out.chunks_exact_mut(4) {
                    px[3] = 0xFF;
                }
            }
        }
    }
    Ok(image)
}

/// EnumFormat pod announcing the accepted layouts and size range.
fn format_enum_pod() -> Result<Vec<u8>> {
    let obj = spa::pod::object!(
        spa::utils::SpaTypes::ObjectParamFormat,
        spa::param::ParamType::EnumFormat,
        spa::pod::property!(
            spa::param::format::FormatProperties::MediaType,
            Id,
            spa::param::format::MediaType::Video
        ),
        spa::pod::property!(
            spa::param::format::FormatProperties::MediaSubtype,
            Id,
            spa::param::format::MediaSubtype::Raw
        ),
        spa::pod::property!(
            spa::param::format::FormatProperties::VideoFormat,
            Choice,
            Enum,
            Id,
            spa::param::video::VideoFormat::BGRx,
            spa::param::video::VideoFormat::BGRx,
            spa::param::video::VideoFormat::BGRA,
            spa::param::video::VideoFormat::RGBx,
            spa::param::video::VideoFormat::RGBA,
        ),
        spa::pod::property!(
            spa::param::format::FormatProperties::VideoSize,
            Choice,
            Range,
            Rectangle,
            spa::utils::Rectangle { width: 1920, height: 1080 },
            spa::utils::Rectangle { width: 1, height: 1 },
            spa::utils::Rectangle { width: 8192, height: 8192 }
        ),
    );

    let values = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| Error::capture(format!("failed to serialize format pod: {e:?}")))?
    .0
    .into_inner();
    Ok(values)
}

// ---------------------------------------------------------------------------
// One-shot capture (screenshot path)
// ---------------------------------------------------------------------------

/// Grab a single frame from the portal's node with a throwaway stream.
///
/// Runs a private main loop on the calling thread until the first frame
/// arrives or the 5-second safety timer fires.
fn capture_one_frame(node_id: u32, fd: OwnedFd) -> Result<RawShot> {
    let mainloop = pw::main_loop::MainLoop::new(None)
        .map_err(|e| Error::capture(format!("failed to create PipeWire main loop: {e}")))?;
    let context = pw::context::Context::new(&mainloop)
        .map_err(|e| Error::capture(format!("failed to create PipeWire context: {e}")))?;
    let core = context
        .connect_fd(fd, None)
        .map_err(|e| Error::capture(format!("failed to connect PipeWire for screenshot: {e}")))?;

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Video",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Screen",
    };
    let stream = pw::stream::Stream::new(&core, "frametap-screenshot", props)
        .map_err(|e| Error::capture(format!("failed to create PipeWire stream: {e}")))?;

    let shot: Rc<RefCell<(StreamFormat, Option<RawShot>)>> =
        Rc::new(RefCell::new((StreamFormat::default(), None)));

    let _listener = stream
        .add_local_listener_with_user_data(())
        .param_changed({
            let shot = shot.clone();
            move |_stream, _ud, id, param| {
                if id == spa::param::ParamType::Format.as_raw() {
                    if let Some(fmt) = parse_format_param(param) {
                        shot.borrow_mut().0 = fmt;
                    }
                }
            }
        })
        .process({
            let shot = shot.clone();
            let mainloop_weak = mainloop.downgrade();
            move |stream, _ud| {
                let mut state = shot.borrow_mut();
                if state.1.is_some() {
                    return;
                }
                let fmt = state.0;
                if fmt.width == 0 || fmt.height == 0 {
                    return;
                }
                let Some(mut buffer) = stream.dequeue_buffer() else {
                    return;
                };
                let datas = buffer.datas_mut();
                if datas.is_empty() {
                    return;
                }
                let data = &mut datas[0];
                let chunk_stride = data.chunk().stride();
                let Some(slice) = data.data() else {
                    return;
                };
                let stride = if chunk_stride > 0 {
                    chunk_stride as usize
                } else {
                    fmt.width * 4
                };
                if let Some(bytes) = copy_frame_bytes(slice, fmt, stride) {
                    state.1 = Some(RawShot { format: fmt, stride, bytes });
                    if let Some(ml) = mainloop_weak.upgrade() {
                        ml.quit();
                    }
                }
            }
        })
        .register()
        .map_err(|e| Error::capture(format!("failed to register stream listener: {e}")))?;

    let values = format_enum_pod()?;
    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| Error::capture("failed to build format parameter pod"))?];

    stream
        .connect(
            spa::utils::Direction::Input,
            Some(node_id),
            pw::stream::StreamFlags::AUTOCONNECT | pw::stream::StreamFlags::MAP_BUFFERS,
            &mut params,
        )
        .map_err(|e| Error::capture(format!("failed to connect PipeWire stream: {e}")))?;

    // Safety stop: give up if no frame shows within the timeout.
    let mainloop_weak = mainloop.downgrade();
    let timer = mainloop.loop_().add_timer(move |_| {
        if let Some(ml) = mainloop_weak.upgrade() {
            ml.quit();
        }
    });
    timer
        .update_timer(Some(SCREENSHOT_TIMEOUT), None)
        .into_result()
        .map_err(|e| Error::capture(format!("failed to arm screenshot timer: {e}")))?;

    mainloop.run();

    let mut state = shot.borrow_mut();
    state
        .1
        .take()
        .ok_or_else(|| Error::capture("screenshot timed out waiting for a PipeWire frame"))
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OutputInfo {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    scale: i32,
    make: String,
    model: String,
    has_mode: bool,
}

struct EnumState {
    outputs: Vec<OutputInfo>,
}

impl wayland_client::Dispatch<wayland_client::protocol::wl_registry::WlRegistry, ()> for EnumState {
    fn event(
        state: &mut Self,
        registry: &wayland_client::protocol::wl_registry::WlRegistry,
        event: wayland_client::protocol::wl_registry::Event,
        _data: &(),
        _conn: &wayland_client::Connection,
        qh: &wayland_client::QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_output::WlOutput;
        use wayland_client::protocol::wl_registry::Event;
        use wayland_client::Proxy;

        if let Event::Global { name, interface, version } = event {
            if interface == WlOutput::interface().name {
                let index = state.outputs.len();
                state.outputs.push(OutputInfo { scale: 1, ..Default::default() });
                registry.bind::<WlOutput, usize, Self>(name, version.min(4), qh, index);
            }
        }
    }
}

impl wayland_client::Dispatch<wayland_client::protocol::wl_output::WlOutput, usize> for EnumState {
    fn event(
        state: &mut Self,
        _output: &wayland_client::protocol::wl_output::WlOutput,
        event: wayland_client::protocol::wl_output::Event,
        index: &usize,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_output::{Event, Mode};

        let Some(info) = state.outputs.get_mut(*index) else {
            return;
        };
        match event {
            Event::Geometry { x, y, make, model, .. } => {
                info.x = x;
                info.y = y;
                info.make = make;
                info.model = model;
            }
            Event::Mode { flags, width, height, .. } => {
                if flags
                    .into_result()
                    .map(|f| f.contains(Mode::Current))
                    .unwrap_or(false)
                {
                    info.width = width;
                    info.height = height;
                    info.has_mode = true;
                }
            }
            Event::Scale { factor } => info.scale = factor,
            _ => {}
        }
    }
}

pub(crate) fn enumerate_monitors() -> Vec<Monitor> {
    let Ok(conn) = wayland_client::Connection::connect_to_env() else {
        return Vec::new();
    };
    let display = conn.display();
    let mut queue = conn.new_event_queue();
    let qh = queue.handle();
    let _registry = display.get_registry(&qh, ());

    let mut state = EnumState { outputs: Vec::new() };
    // First roundtrip discovers the globals (outputs get bound), the
    // second delivers geometry/mode/scale for the bound outputs.
    if queue.roundtrip(&mut state).is_err() || queue.roundtrip(&mut state).is_err() {
        return Vec::new();
    }

    state
        .outputs
        .iter()
        .enumerate()
        .filter(|(_, info)| info.has_mode)
        .map(|(i, info)| Monitor {
            id: i as i32,
            name: if info.make.is_empty() && info.model.is_empty() {
                format!("Display {i}")
            } else {
                format!("{} {}", info.make, info.model).trim().to_owned()
            },
            x: info.x,
            y: info.y,
            width: info.width,
            height: info.height,
            scale: info.scale.max(1) as f32,
        })
        .collect()
}

pub(crate) fn enumerate_windows() -> Vec<Window> {
    // No programmatic window list on Wayland; the portal picker handles
    // window selection interactively.
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spa_format_mapping() {
        use spa::param::video::VideoFormat;
        assert_eq!(PixelLayout::from_spa(VideoFormat::RGBA), PixelLayout::Rgba);
        assert_eq!(PixelLayout::from_spa(VideoFormat::BGRA), PixelLayout::Bgra);
        assert_eq!(PixelLayout::from_spa(VideoFormat::RGBx), PixelLayout::Rgbx);
        assert_eq!(PixelLayout::from_spa(VideoFormat::BGRx), PixelLayout::Bgrx);
        assert_eq!(PixelLayout::from_spa(VideoFormat::YUY2), PixelLayout::Bgra);
    }

    #[test]
    fn convert_frame_bgrx_swaps_channels() {
        // Two BGRx pixels with junk in the padding byte.
        let raw = RawShot {
            format: StreamFormat { layout: PixelLayout::Bgrx, width: 2, height: 1 },
            stride: 8,
            bytes: vec![200, 150, 100, 7, 10, 20, 30, 0],
        };
        let img = convert_frame(&raw).unwrap();
        // BGRA-style swap keeps byte 3 as-is for Bgrx/Bgra layouts.
        assert_eq!(img.data, vec![100, 150, 200, 7, 30, 20, 10, 0]);
    }

    #[test]
    fn convert_frame_rgbx_sets_alpha() {
        let raw = RawShot {
            format: StreamFormat { layout: PixelLayout::Rgbx, width: 1, height: 2 },
            stride: 4,
            bytes: vec![1, 2, 3, 0, 4, 5, 6, 0],
        };
        let img = convert_frame(&raw).unwrap();
        assert_eq!(img.data, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn convert_frame_respects_stride_padding() {
        // 1x2 RGBA frame with 8-byte stride (4 bytes padding per row).
        let raw = RawShot {
            format: StreamFormat { layout: PixelLayout::Rgba, width: 1, height: 2 },
            stride: 8,
            bytes: vec![1, 2, 3, 4, 99, 99, 99, 99, 5, 6, 7, 8],
        };
        let img = convert_frame(&raw).unwrap();
        assert_eq!(img.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn copy_frame_bytes_rejects_short_buffer() {
        let fmt = StreamFormat { layout: PixelLayout::Rgba, width: 4, height: 4 };
        assert!(copy_frame_bytes(&[0u8; 16], fmt, 16).is_none());
    }
}
