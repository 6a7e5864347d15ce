use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use wgpu::{
    Buffer, BufferDescriptor, BufferUsages, Device, Extent3d, Queue, Texture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsages, TextureView,
};

use crate::error::RenderError;
use crate::gpu::framebuffer::{Blitter, Framebuffer};

const CAPTURE_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
/// Frames a recording consumer may fall behind before new ones are dropped.
pub const STREAM_CAPACITY: usize = 8;

/// Tightly packed RGBA8 rows, top row first.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

enum CaptureRequest {
    Still(Sender<CapturedFrame>),
    StartStream(Sender<CapturedFrame>),
    StopStream,
}

/// Utility-side handle to the live presentation image.
#[derive(Clone)]
pub struct CaptureHandle {
    requests: Sender<CaptureRequest>,
}

impl CaptureHandle {
    /// Asks for the next presented frame. The receiver yields exactly one frame.
    pub fn request_still(&self) -> Result<Receiver<CapturedFrame>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.requests
            .send(CaptureRequest::Still(tx))
            .context("capture service is gone")?;
        Ok(rx)
    }

    /// Every presented frame until [`CaptureHandle::stop_stream`] or the receiver is dropped.
    pub fn start_stream(&self) -> Result<Receiver<CapturedFrame>> {
        let (tx, rx) = crossbeam_channel::bounded(STREAM_CAPACITY);
        self.requests
            .send(CaptureRequest::StartStream(tx))
            .context("capture service is gone")?;
        Ok(rx)
    }

    pub fn stop_stream(&self) -> Result<()> {
        self.requests
            .send(CaptureRequest::StopStream)
            .context("capture service is gone")
    }
}

/// Render-side owner of the readback resources.
pub struct CaptureService {
    requests: Receiver<CaptureRequest>,
    pending: Vec<Sender<CapturedFrame>>,
    in_flight: Vec<Sender<CapturedFrame>>,
    stream: Option<Sender<CapturedFrame>>,
    readback: Option<Readback>,
    blitter: Option<Blitter>,
}

/// Connected handle/service pair.
pub fn channel() -> (CaptureHandle, CaptureService) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        CaptureHandle { requests: tx },
        CaptureService {
            requests: rx,
            pending: Vec::new(),
            in_flight: Vec::new(),
            stream: None,
            readback: None,
            blitter: None,
        },
    )
}

impl CaptureService {
    fn wanted(&self) -> bool {
        !self.pending.is_empty() || self.stream.is_some()
    }

    /// Call once per frame after the presentation target was rendered.
    /// Finished readbacks are delivered, then a new copy is queued if anyone is waiting.
    pub fn service(
        &mut self,
        device: &Device,
        queue: &Queue,
        presentation: &Framebuffer,
    ) -> Result<(), RenderError> {
        self.drain_requests();
        self.collect(device);

        if !self.wanted() || self.readback.as_ref().is_some_and(Readback::is_map_pending) {
            return Ok(());
        }

        let (width, height) = presentation.size();
        if self.readback.as_ref().is_none_or(|r| r.size() != (width, height)) {
            if let Some(mut stale) = self.readback.take() {
                stale.dispose();
            }
            self.readback = Some(Readback::new(device, width, height));
        }
        let blitter = self
            .blitter
            .get_or_insert_with(|| Blitter::new(device, &[CAPTURE_FORMAT]));
        let Some(readback) = self.readback.as_mut() else {
            return Ok(());
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("capture"),
        });
        blitter.blit(device, &mut encoder, presentation, &readback.view, CAPTURE_FORMAT)?;
        readback.copy_to_staging(&mut encoder);
        queue.submit(Some(encoder.finish()));
        readback.request_map();
        self.in_flight.append(&mut self.pending);
        Ok(())
    }

    fn drain_requests(&mut self) {
        loop {
            match self.requests.try_recv() {
                Ok(CaptureRequest::Still(tx)) => self.pending.push(tx),
                Ok(CaptureRequest::StartStream(tx)) => {
                    log::info!("Capture stream started");
                    self.stream = Some(tx);
                }
                Ok(CaptureRequest::StopStream) => {
                    if self.stream.take().is_some() {
                        log::info!("Capture stream stopped");
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    fn collect(&mut self, device: &Device) {
        let Some(readback) = self.readback.as_mut() else {
            return;
        };
        match readback.take_frame(device) {
            Readout::Waiting => {}
            Readout::Frame(frame) => self.deliver(frame),
            Readout::Failed => {
                // Dropping the senders disconnects the waiting stills.
                self.in_flight.clear();
            }
        }
    }

    fn deliver(&mut self, frame: CapturedFrame) {
        for still in self.in_flight.drain(..) {
            // A dropped receiver just means nobody wants the still anymore.
            let _ = still.try_send(frame.clone());
        }
        if let Some(stream) = &self.stream {
            match stream.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::debug!("Capture stream consumer behind, frame dropped");
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::info!("Capture stream consumer went away");
                    self.stream = None;
                }
            }
        }
    }

    /// Ends every outstanding request and frees the readback resources.
    /// Stream consumers see their receiver disconnect.
    pub fn dispose(&mut self) {
        self.stream = None;
        self.pending.clear();
        self.in_flight.clear();
        if let Some(mut readback) = self.readback.take() {
            readback.dispose();
        }
        self.blitter = None;
    }
}

const MAP_PENDING: u8 = 0;
const MAP_READY: u8 = 1;
const MAP_FAILED: u8 = 2;

/// Outcome of polling an in-flight readback.
enum Readout {
    Waiting,
    Frame(CapturedFrame),
    Failed,
}

/// RGBA8 copy target with double-buffered staging for non-blocking readback.
struct Readback {
    texture: Texture,
    view: TextureView,
    width: u32,
    height: u32,
    staging: [Buffer; 2],
    layout: RowLayout,
    current: usize,
    map_pending: bool,
    map_state: Arc<AtomicU8>,
}

impl Readback {
    fn new(device: &Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("capture"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: CAPTURE_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let layout = RowLayout::new(width, height);
        let staging = [0, 1].map(|i| {
            device.create_buffer(&BufferDescriptor {
                label: Some(if i == 0 { "capture-staging-0" } else { "capture-staging-1" }),
                size: layout.buffer_size(),
                usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        });
        log::debug!("Capture readback allocated at {width}x{height}");
        Self {
            texture,
            view,
            width,
            height,
            staging,
            layout,
            current: 0,
            map_pending: false,
            map_state: Arc::new(AtomicU8::new(MAP_PENDING)),
        }
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn is_map_pending(&self) -> bool {
        self.map_pending
    }

    fn copy_to_staging(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.staging[self.current],
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.layout.padded),
                    rows_per_image: Some(self.height),
                },
            },
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Maps the buffer just copied into and flips to the other one.
    fn request_map(&mut self) {
        let state = Arc::new(AtomicU8::new(MAP_PENDING));
        let flag = Arc::clone(&state);
        self.staging[self.current]
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| match result {
                Ok(()) => flag.store(MAP_READY, Ordering::Release),
                Err(e) => {
                    log::warn!("Capture readback failed: {e}");
                    flag.store(MAP_FAILED, Ordering::Release);
                }
            });
        self.map_state = state;
        self.map_pending = true;
        self.current = 1 - self.current;
    }

    /// Non-blocking. A failed map releases the buffer for the next copy.
    fn take_frame(&mut self, device: &Device) -> Readout {
        if !self.map_pending {
            return Readout::Waiting;
        }
        if let Err(e) = device.poll(wgpu::PollType::Poll) {
            log::warn!("Device poll failed during capture: {e}");
        }
        match self.map_state.load(Ordering::Acquire) {
            MAP_READY => {}
            MAP_FAILED => {
                self.map_pending = false;
                return Readout::Failed;
            }
            _ => return Readout::Waiting,
        }

        let buffer = &self.staging[1 - self.current];
        let rgba = {
            let mapped = buffer.slice(..).get_mapped_range();
            self.layout.unpad(&mapped)
        };
        buffer.unmap();
        self.map_pending = false;
        Readout::Frame(CapturedFrame {
            width: self.width,
            height: self.height,
            rgba,
        })
    }

    fn dispose(&mut self) {
        for buffer in &self.staging {
            buffer.destroy();
        }
        self.texture.destroy();
    }
}

/// Row stride of a texture-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowLayout {
    unpadded: u32,
    padded: u32,
    rows: u32,
}

impl RowLayout {
    fn new(width: u32, height: u32) -> Self {
        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        Self {
            unpadded,
            padded: unpadded.div_ceil(align) * align,
            rows: height,
        }
    }

    fn buffer_size(&self) -> u64 {
        u64::from(self.padded) * u64::from(self.rows)
    }

    fn unpad(&self, data: &[u8]) -> Vec<u8> {
        if self.padded == self.unpadded {
            return data[..(self.unpadded * self.rows) as usize].to_vec();
        }
        let mut out = Vec::with_capacity((self.unpadded * self.rows) as usize);
        for row in 0..self.rows {
            let start = (row * self.padded) as usize;
            out.extend_from_slice(&data[start..start + self.unpadded as usize]);
        }
        out
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

/// Where stills and recordings go.
pub fn capture_dir() -> PathBuf {
    dirs::picture_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn save_png(frame: &CapturedFrame, path: &Path) -> Result<()> {
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .context("captured frame does not match its dimensions")?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("writing {}", path.display()))
}

/// Waits for one still on a background thread and writes it as `synthwave-<unix-ms>.png`.
pub fn save_still(handle: &CaptureHandle, dir: PathBuf) -> Result<JoinHandle<()>> {
    let frame = handle.request_still()?;
    std::thread::Builder::new()
        .name("synthwave-screenshot".into())
        .spawn(move || {
            let frame = match frame.recv_timeout(Duration::from_secs(2)) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("Screenshot timed out waiting for a frame");
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("Screenshot abandoned: no frame was captured");
                    return;
                }
            };
            let path = dir.join(format!("synthwave-{}.png", unix_millis()));
            match save_png(&frame, &path) {
                Ok(()) => log::info!("Screenshot saved to {}", path.display()),
                Err(e) => log::error!("Screenshot failed: {e:#}"),
            }
        })
        .context("spawning screenshot thread")
}

/// Writes streamed frames as a numbered PNG sequence until the stream stops.
pub struct Recorder {
    thread: JoinHandle<u32>,
}

impl Recorder {
    pub fn start(handle: &CaptureHandle, parent: &Path) -> Result<Self> {
        let dir = parent.join(format!("synthwave-{}", unix_millis()));
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let frames = handle.start_stream()?;
        let thread = std::thread::Builder::new()
            .name("synthwave-record".into())
            .spawn(move || {
                let mut written = 0;
                for frame in frames {
                    let path = dir.join(format!("frame-{written:05}.png"));
                    if let Err(e) = save_png(&frame, &path) {
                        log::error!("Recording stopped: {e:#}");
                        break;
                    }
                    written += 1;
                }
                log::info!("Recording finished: {written} frames in {}", dir.display());
                written
            })
            .context("spawning recording thread")?;
        Ok(Self { thread })
    }

    /// Stops the stream. The writer thread drains what is queued once the
    /// service lets go of its sender; join the returned handle after that.
    pub fn stop(self, handle: &CaptureHandle) -> JoinHandle<u32> {
        if let Err(e) = handle.stop_stream() {
            log::warn!("{e:#}");
        }
        self.thread
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_copy_alignment() {
        let layout = RowLayout::new(100, 3);
        assert_eq!(layout.unpadded, 400);
        assert_eq!(layout.padded, 512);
        assert_eq!(layout.buffer_size(), 1536);

        let aligned = RowLayout::new(64, 2);
        assert_eq!(aligned.padded, aligned.unpadded);
    }

    #[test]
    fn unpad_drops_row_tails() {
        let layout = RowLayout::new(1, 2);
        let mut data = vec![0u8; layout.buffer_size() as usize];
        data[..4].copy_from_slice(&[1, 2, 3, 4]);
        data[256..260].copy_from_slice(&[5, 6, 7, 8]);
        assert_eq!(layout.unpad(&data), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn requests_queue_until_serviced() {
        let (handle, mut service) = channel();
        let _still = handle.request_still().unwrap();
        let _stream = handle.start_stream().unwrap();
        service.drain_requests();
        assert_eq!(service.pending.len(), 1);
        assert!(service.stream.is_some());

        handle.stop_stream().unwrap();
        service.drain_requests();
        assert!(service.stream.is_none());
    }

    #[test]
    fn dropped_stream_consumer_ends_stream() {
        let (handle, mut service) = channel();
        drop(handle.start_stream().unwrap());
        service.drain_requests();
        service.deliver(CapturedFrame {
            width: 1,
            height: 1,
            rgba: vec![0; 4],
        });
        assert!(service.stream.is_none());
    }

    #[test]
    fn png_written_with_frame_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        let frame = CapturedFrame {
            width: 2,
            height: 1,
            rgba: vec![255, 0, 0, 255, 0, 255, 0, 255],
        };
        save_png(&frame, &path).unwrap();
        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.into_raw(), frame.rgba);
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let frame = CapturedFrame {
            width: 4,
            height: 4,
            rgba: vec![0; 4],
        };
        assert!(save_png(&frame, &dir.path().join("bad.png")).is_err());
    }

    #[test]
    fn recorder_writes_streamed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, mut service) = channel();
        let recorder = Recorder::start(&handle, dir.path()).unwrap();
        service.drain_requests();
        for _ in 0..3 {
            service.deliver(CapturedFrame {
                width: 1,
                height: 1,
                rgba: vec![9, 9, 9, 255],
            });
        }
        let thread = recorder.stop(&handle);
        service.drain_requests();
        assert!(service.stream.is_none());
        assert_eq!(thread.join().unwrap(), 3);
    }

    #[test]
    fn still_is_on_disk_once_its_writer_joins() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, mut service) = channel();
        let writer = save_still(&handle, dir.path().to_path_buf()).unwrap();
        service.drain_requests();
        service.in_flight.append(&mut service.pending);
        service.deliver(CapturedFrame {
            width: 1,
            height: 1,
            rgba: vec![1, 2, 3, 255],
        });
        writer.join().unwrap();
        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[test]
    fn failed_map_releases_waiting_stills() {
        let Some((device, queue)) = crate::gpu::context::test_device() else {
            return;
        };
        let (handle, mut service) = channel();
        let still = handle.request_still().unwrap();
        service.drain_requests();
        service.in_flight.append(&mut service.pending);

        let mut readback = Readback::new(&device, 4, 4);
        readback.map_pending = true;
        readback.map_state.store(MAP_FAILED, Ordering::Release);
        service.readback = Some(readback);

        service.collect(&device);
        assert!(service.in_flight.is_empty());
        assert!(matches!(still.try_recv(), Err(TryRecvError::Disconnected)));
        assert!(service.readback.as_ref().is_some_and(|r| !r.is_map_pending()));

        // The next request gets a fresh copy instead of waiting forever.
        let presentation = Framebuffer::new(&device, "p", 4, 4, TextureFormat::Rgba8Unorm).unwrap();
        let retry = handle.request_still().unwrap();
        service.service(&device, &queue, &presentation).unwrap();
        assert!(service.readback.as_ref().is_some_and(Readback::is_map_pending));
        assert_eq!(service.in_flight.len(), 1);
        drop(retry);
        service.dispose();
    }

    #[test]
    fn readback_delivers_presented_pixels() {
        let Some((device, queue)) = crate::gpu::context::test_device() else {
            return;
        };
        let presentation = Framebuffer::new(&device, "p", 4, 2, TextureFormat::Rgba8Unorm).unwrap();
        {
            let mut encoder = device.create_command_encoder(&Default::default());
            drop(presentation.bind(&mut encoder, Some(wgpu::Color::RED)));
            queue.submit(Some(encoder.finish()));
        }

        let (handle, mut service) = channel();
        let still = handle.request_still().unwrap();
        service.service(&device, &queue, &presentation).unwrap();
        let mut frame = None;
        for _ in 0..100 {
            let _ = device.poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            });
            service.service(&device, &queue, &presentation).unwrap();
            if let Ok(f) = still.try_recv() {
                frame = Some(f);
                break;
            }
        }
        let frame = frame.unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.rgba.len(), 32);
        assert_eq!(&frame.rgba[..4], &[255, 0, 0, 255]);
        service.dispose();
    }
}
