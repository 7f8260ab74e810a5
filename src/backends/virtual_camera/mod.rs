// SPDX-License-Identifier: GPL-3.0-only

//! In-process virtual camera hardware
//!
//! [`VirtualHardware`] implements the hardware service contract without any
//! real device behind it. It behaves like an asynchronous camera service:
//! every open, configuration and capture completes through a callback posted
//! to the caller's [`ExecutionContext`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ VirtualHardware  │  ← profile + open-device registry
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  VirtualDevice   │  ← one live session at a time
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  VirtualSession  │  ← FrameLoop pump for repeating requests,
//! └──────────────────┘    JPEG test pattern for still captures
//! ```

pub mod encoder;
pub mod profile;

pub use encoder::VirtualEncoder;
pub use profile::{DeviceProfile, HardwareProfile};

use crate::backends::camera::frame_loop::{FrameLoop, LoopAction, frame_interval};
use crate::backends::camera::{
    BackendError, BackendResult, CameraDevice, CaptureCallback, CaptureEvent, CaptureFailureReason, CaptureRequest,
    CaptureSession, Capability, Characteristics, DeviceCallback, DeviceEvent, DeviceId, EncoderConfig,
    ExecutionContext, HardwareService, SessionCallback, SessionConfiguration, SessionEvent, SessionType, Size,
    StreamFormat, StreamTarget, TargetKind, VideoEncoder,
};
use crate::constants::{still, timing};
use crate::utils::lock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

/// Preview rate each high-speed burst entry stands for
const HIGH_SPEED_BURST_BASE_FPS: u32 = 30;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct OpenRecord {
    device: Weak<VirtualDevice>,
    callback: DeviceCallback,
    context: ExecutionContext,
}

type Registry = Mutex<HashMap<DeviceId, OpenRecord>>;

/// Simulated hardware service
pub struct VirtualHardware {
    profile: HardwareProfile,
    permission_granted: AtomicBool,
    registry: Arc<Registry>,
}

impl Default for VirtualHardware {
    fn default() -> Self {
        Self::new(HardwareProfile::builtin())
    }
}

impl VirtualHardware {
    pub fn new(profile: HardwareProfile) -> Self {
        let permission_granted = AtomicBool::new(profile.permission_granted);
        Self {
            profile,
            permission_granted,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    /// Grant or revoke the camera permission
    pub fn set_permission_granted(&self, granted: bool) {
        self.permission_granted.store(granted, Ordering::SeqCst);
    }

    /// Devices currently held open by a client
    pub fn open_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = lock(&self.registry).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Simulate the device being unplugged or taken by a higher-priority client
    ///
    /// Returns false if the device was not open.
    pub fn simulate_disconnect(&self, id: &DeviceId) -> bool {
        self.fail_device(id, DeviceEvent::Disconnected)
    }

    /// Simulate a fatal device error with the given code
    pub fn simulate_error(&self, id: &DeviceId, code: i32) -> bool {
        self.fail_device(id, DeviceEvent::Error(code))
    }

    fn fail_device(&self, id: &DeviceId, event: DeviceEvent) -> bool {
        let Some(record) = lock(&self.registry).remove(id) else {
            return false;
        };
        info!(device = %id, event = ?event, "Simulating device failure");
        if let Some(device) = record.device.upgrade() {
            device.shut_down();
        }
        let callback = record.callback;
        record.context.execute(move || callback(event));
        true
    }
}

impl HardwareService for VirtualHardware {
    fn permission_granted(&self) -> bool {
        self.permission_granted.load(Ordering::SeqCst)
    }

    fn device_ids(&self) -> BackendResult<Vec<DeviceId>> {
        Ok(self.profile.devices.iter().map(|device| device.id.clone()).collect())
    }

    fn characteristics(&self, id: &DeviceId) -> BackendResult<Characteristics> {
        self.profile
            .device(id)
            .map(|device| device.characteristics.clone())
            .ok_or_else(|| BackendError::DeviceNotFound(id.to_string()))
    }

    fn concurrent_device_ids(&self) -> BackendResult<Vec<BTreeSet<DeviceId>>> {
        Ok(self.profile.concurrent_device_ids.clone())
    }

    fn supports_session_configuration(&self) -> bool {
        self.profile.supports_session_configuration
    }

    fn open_device(&self, id: &DeviceId, callback: DeviceCallback, context: &ExecutionContext) -> BackendResult<()> {
        if !self.permission_granted() {
            return Err(BackendError::Other("camera permission not granted".to_string()));
        }
        let profile = self
            .profile
            .device(id)
            .ok_or_else(|| BackendError::DeviceNotFound(id.to_string()))?;

        let device = {
            let mut registry = lock(&self.registry);
            if registry.contains_key(id) {
                return Err(BackendError::DeviceInUse(id.to_string()));
            }
            let device = Arc::new(VirtualDevice {
                id: id.clone(),
                characteristics: profile.characteristics.clone(),
                registry: Arc::downgrade(&self.registry),
                closed: AtomicBool::new(false),
                session: Mutex::new(None),
            });
            registry.insert(
                id.clone(),
                OpenRecord {
                    device: Arc::downgrade(&device),
                    callback: Arc::clone(&callback),
                    context: context.clone(),
                },
            );
            device
        };

        debug!(device = %id, context = context.name(), "Virtual device opening");
        context.execute(move || callback(DeviceEvent::Opened(device)));
        Ok(())
    }

    fn prepare_encoder(&self, config: &EncoderConfig) -> BackendResult<Box<dyn VideoEncoder>> {
        Ok(Box::new(VirtualEncoder::prepare(config)?))
    }
}

/// An opened virtual device
pub struct VirtualDevice {
    id: DeviceId,
    characteristics: Characteristics,
    registry: Weak<Registry>,
    closed: AtomicBool,
    session: Mutex<Option<Arc<VirtualSession>>>,
}

impl VirtualDevice {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the device and its session without touching the registry
    fn shut_down(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(session) = lock(&self.session).take() {
            session.close();
        }
        debug!(device = %self.id, "Virtual device closed");
    }

    /// Why `targets` cannot form a session of `session_type`, if they can't
    fn validate(&self, session_type: SessionType, targets: &[StreamTarget]) -> Option<String> {
        if targets.is_empty() {
            return Some("no outputs".to_string());
        }
        if let Some(max) = self.characteristics.max_output_streams {
            if max > 0 && targets.len() > max as usize {
                return Some(format!("{} outputs exceed the limit of {max}", targets.len()));
            }
        }
        if session_type == SessionType::ConstrainedHighSpeed {
            if !self
                .characteristics
                .has_capability(Capability::ConstrainedHighSpeedVideo)
            {
                return Some("device has no high speed video".to_string());
            }
            let sizes = self
                .characteristics
                .stream_configuration
                .as_ref()
                .map(|map| map.high_speed_video_sizes())
                .unwrap_or_default();
            if let Some(target) = targets.iter().find(|target| !sizes.contains(&target.size())) {
                return Some(format!("{} is not a high speed size", target.size()));
            }
        }
        None
    }

    fn configure(
        &self,
        session_type: SessionType,
        targets: Vec<StreamTarget>,
        callback: SessionCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()> {
        if self.is_closed() {
            return Err(BackendError::Closed(format!("device {}", self.id)));
        }

        // A new session always replaces the previous one
        if let Some(previous) = lock(&self.session).take() {
            previous.close();
        }

        if let Some(reason) = self.validate(session_type, &targets) {
            warn!(device = %self.id, %reason, "Virtual session configuration failed");
            context.execute(move || callback(SessionEvent::ConfigureFailed));
            return Ok(());
        }

        let session = Arc::new(VirtualSession::new(session_type, targets));
        info!(
            device = %self.id,
            session = session.id,
            session_type = ?session_type,
            outputs = session.targets.len(),
            "Virtual session configured"
        );
        *lock(&self.session) = Some(Arc::clone(&session));
        context.execute(move || callback(SessionEvent::Configured(session)));
        Ok(())
    }
}

impl CameraDevice for VirtualDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn create_session(
        &self,
        configuration: SessionConfiguration,
        callback: SessionCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()> {
        let targets = configuration.targets();
        self.configure(configuration.session_type, targets, callback, context)
    }

    fn create_session_with_targets(
        &self,
        targets: Vec<StreamTarget>,
        callback: SessionCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()> {
        self.configure(SessionType::Regular, targets, callback, context)
    }

    fn close(&self) {
        self.shut_down();
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        let ours = registry
            .get(&self.id)
            .is_some_and(|record| std::ptr::eq(record.device.as_ptr(), self));
        if ours {
            registry.remove(&self.id);
        }
    }
}

/// A configured virtual session
pub struct VirtualSession {
    id: u64,
    session_type: SessionType,
    targets: Vec<StreamTarget>,
    closed: Arc<AtomicBool>,
    pump: Mutex<Option<FrameLoop>>,
}

impl VirtualSession {
    fn new(session_type: SessionType, targets: Vec<StreamTarget>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            session_type,
            targets,
            closed: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        }
    }

    pub fn targets(&self) -> &[StreamTarget] {
        &self.targets
    }

    /// Whether a repeating request is currently producing frames
    pub fn is_streaming(&self) -> bool {
        lock(&self.pump).as_ref().is_some_and(FrameLoop::is_running)
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed(format!("session {}", self.id)));
        }
        Ok(())
    }

    fn check_targets(&self, request: &CaptureRequest) -> BackendResult<()> {
        if request.targets().is_empty() {
            return Err(BackendError::Other("request has no targets".to_string()));
        }
        match request.targets().iter().find(|target| !self.targets.contains(target)) {
            Some(target) => Err(BackendError::Other(format!(
                "{:?} target is not part of session {}",
                target.kind(),
                self.id
            ))),
            None => Ok(()),
        }
    }

    /// Replace the frame pump with one feeding `targets` at `fps`
    fn start_pump(&self, targets: Vec<StreamTarget>, fps: u32) -> BackendResult<()> {
        self.stop_pump();

        let closed = Arc::clone(&self.closed);
        let name = format!("virtual-session-{}", self.id);
        let pump = FrameLoop::start(&name, frame_interval(fps), move |index| {
            if closed.load(Ordering::SeqCst) {
                return LoopAction::Stop;
            }
            for target in &targets {
                target.surface().queue_buffer(synthetic_frame(index, target.size()));
            }
            LoopAction::Continue
        })
        .map_err(|e| BackendError::Io(e.to_string()))?;

        debug!(session = self.id, fps, "Frame pump started");
        *lock(&self.pump) = Some(pump);
        Ok(())
    }

    fn stop_pump(&self) {
        let pump = lock(&self.pump).take();
        if let Some(mut pump) = pump {
            pump.stop();
            debug!(session = self.id, frames = pump.frame_count(), "Frame pump stopped");
        }
    }
}

impl CaptureSession for VirtualSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn session_type(&self) -> SessionType {
        self.session_type
    }

    fn set_repeating_request(&self, request: &CaptureRequest) -> BackendResult<()> {
        self.ensure_open()?;
        if self.session_type == SessionType::ConstrainedHighSpeed {
            return Err(BackendError::Unsupported(
                "high speed sessions only accept request bursts".to_string(),
            ));
        }
        self.check_targets(request)?;
        let fps = request
            .target_fps_range()
            .map_or(timing::VIRTUAL_PREVIEW_FPS, |range| range.upper);
        self.start_pump(request.targets().to_vec(), fps)
    }

    fn set_repeating_burst(&self, requests: &[CaptureRequest]) -> BackendResult<()> {
        self.ensure_open()?;
        let first = requests
            .first()
            .ok_or_else(|| BackendError::Other("empty request burst".to_string()))?;
        for request in requests {
            self.check_targets(request)?;
        }
        let fps = first
            .target_fps_range()
            .map_or(timing::VIRTUAL_PREVIEW_FPS, |range| range.upper);
        self.start_pump(first.targets().to_vec(), fps)
    }

    fn create_high_speed_request_list(&self, request: &CaptureRequest) -> BackendResult<Vec<CaptureRequest>> {
        self.ensure_open()?;
        if self.session_type != SessionType::ConstrainedHighSpeed {
            return Err(BackendError::Unsupported(
                "request lists need a high speed session".to_string(),
            ));
        }
        let range = request
            .target_fps_range()
            .ok_or_else(|| BackendError::Unsupported("high speed request without fps range".to_string()))?;
        let count = (range.upper / HIGH_SPEED_BURST_BASE_FPS).max(1) as usize;
        Ok(vec![request.clone(); count])
    }

    fn capture(&self, request: &CaptureRequest, callback: CaptureCallback, context: &ExecutionContext) -> BackendResult<()> {
        self.ensure_open()?;
        self.check_targets(request)?;

        let closed = Arc::clone(&self.closed);
        let targets = request.targets().to_vec();
        let session = self.id;
        context.execute(move || {
            if closed.load(Ordering::SeqCst) {
                callback(CaptureEvent::Failed(CaptureFailureReason::Flushed));
                return;
            }
            for target in &targets {
                let buffer = if is_still_target(target) {
                    match render_test_pattern(target.size(), session) {
                        Ok(jpeg) => jpeg,
                        Err(e) => {
                            warn!(session, error = %e, "Test pattern encoding failed");
                            callback(CaptureEvent::Failed(CaptureFailureReason::Error));
                            return;
                        }
                    }
                } else {
                    synthetic_frame(0, target.size())
                };
                target.surface().queue_buffer(buffer);
            }
            callback(CaptureEvent::Completed);
        });
        Ok(())
    }

    fn stop_repeating(&self) -> BackendResult<()> {
        self.ensure_open()?;
        self.stop_pump();
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_pump();
        debug!(session = self.id, "Virtual session closed");
    }
}

impl Drop for VirtualSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_still_target(target: &StreamTarget) -> bool {
    target.kind() == TargetKind::StillImage || target.format() == StreamFormat::Jpeg
}

/// Compact frame descriptor: index then width and height, little endian
fn synthetic_frame(index: u64, size: Size) -> Vec<u8> {
    let mut frame = Vec::with_capacity(16);
    frame.extend_from_slice(&index.to_le_bytes());
    frame.extend_from_slice(&size.width.to_le_bytes());
    frame.extend_from_slice(&size.height.to_le_bytes());
    frame
}

/// Gradient test pattern encoded as JPEG
fn render_test_pattern(size: Size, seed: u64) -> Result<Vec<u8>, image::ImageError> {
    let width = size.width.max(1);
    let height = size.height.max(1);
    let tint = (seed.wrapping_mul(47) % 256) as u8;
    let pattern = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width) as u8,
            (y * 255 / height) as u8,
            tint,
        ])
    });

    let mut buf = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, still::JPEG_QUALITY);
    encoder.encode_image(&pattern)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{CaptureRequest, FpsRange, OutputConfiguration, RequestTemplate, Surface};
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSurface {
        buffers: Mutex<Vec<Vec<u8>>>,
    }

    impl Surface for CountingSurface {
        fn queue_buffer(&self, buffer: Vec<u8>) {
            self.buffers.lock().unwrap().push(buffer);
        }
    }

    fn target(kind: TargetKind, size: Size) -> (StreamTarget, Arc<CountingSurface>) {
        let surface = Arc::new(CountingSurface::default());
        let format = if kind == TargetKind::StillImage {
            StreamFormat::Jpeg
        } else {
            StreamFormat::Private
        };
        (StreamTarget::new(kind, size, format, surface.clone()), surface)
    }

    fn open(hardware: &VirtualHardware, id: &str, context: &ExecutionContext) -> Arc<dyn CameraDevice> {
        let (tx, rx) = mpsc::channel();
        let callback: DeviceCallback = Arc::new(move |event| {
            if let DeviceEvent::Opened(device) = event {
                let _ = tx.send(device);
            }
        });
        hardware.open_device(&DeviceId::from(id), callback, context).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    fn configure(
        device: &Arc<dyn CameraDevice>,
        session_type: SessionType,
        targets: &[StreamTarget],
        context: &ExecutionContext,
    ) -> Option<Arc<dyn CaptureSession>> {
        let (tx, rx) = mpsc::channel();
        let configuration = SessionConfiguration {
            session_type,
            outputs: targets.iter().cloned().map(OutputConfiguration::new).collect(),
        };
        device
            .create_session(
                configuration,
                Box::new(move |event| {
                    let _ = tx.send(match event {
                        SessionEvent::Configured(session) => Some(session),
                        SessionEvent::ConfigureFailed => None,
                    });
                }),
                context,
            )
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_second_open_is_rejected_until_close() {
        let hardware = VirtualHardware::default();
        let context = ExecutionContext::start("test").unwrap();
        let device = open(&hardware, "0", &context);

        let result = hardware.open_device(&DeviceId::from("0"), Arc::new(|_| {}), &context);
        assert!(matches!(result, Err(BackendError::DeviceInUse(_))));

        device.close();
        assert!(hardware.open_devices().is_empty());
        assert!(matches!(
            hardware.open_device(&DeviceId::from("9"), Arc::new(|_| {}), &context),
            Err(BackendError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_repeating_request_feeds_targets() {
        let hardware = VirtualHardware::default();
        let context = ExecutionContext::start("test").unwrap();
        let device = open(&hardware, "0", &context);
        let (preview, surface) = target(TargetKind::Preview, Size::new(640, 480));

        let session = configure(&device, SessionType::Regular, &[preview.clone()], &context).unwrap();
        let request = CaptureRequest::builder(RequestTemplate::Preview)
            .add_target(&preview)
            .target_fps_range(FpsRange::new(120, 120))
            .build();
        session.set_repeating_request(&request).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        session.stop_repeating().unwrap();

        let frames = surface.buffers.lock().unwrap().len();
        assert!(frames > 0);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(surface.buffers.lock().unwrap().len(), frames);
    }

    #[test]
    fn test_high_speed_session_needs_bursts() {
        let hardware = VirtualHardware::default();
        let context = ExecutionContext::start("test").unwrap();
        let device = open(&hardware, "0", &context);
        let (preview, _) = target(TargetKind::Preview, Size::new(1280, 720));

        let session = configure(&device, SessionType::ConstrainedHighSpeed, &[preview.clone()], &context).unwrap();
        let request = CaptureRequest::builder(RequestTemplate::Record)
            .add_target(&preview)
            .target_fps_range(FpsRange::new(240, 240))
            .build();

        assert!(matches!(
            session.set_repeating_request(&request),
            Err(BackendError::Unsupported(_))
        ));
        let burst = session.create_high_speed_request_list(&request).unwrap();
        assert_eq!(burst.len(), 8);
        session.set_repeating_burst(&burst).unwrap();
        session.close();
    }

    #[test]
    fn test_high_speed_rejected_for_unsupported_size_or_device() {
        let hardware = VirtualHardware::default();
        let context = ExecutionContext::start("test").unwrap();

        let rear = open(&hardware, "0", &context);
        let (odd, _) = target(TargetKind::Preview, Size::new(640, 480));
        assert!(configure(&rear, SessionType::ConstrainedHighSpeed, &[odd], &context).is_none());

        let front = open(&hardware, "1", &context);
        let (preview, _) = target(TargetKind::Preview, Size::new(1280, 720));
        assert!(configure(&front, SessionType::ConstrainedHighSpeed, &[preview], &context).is_none());
    }

    #[test]
    fn test_new_session_closes_previous() {
        let hardware = VirtualHardware::default();
        let context = ExecutionContext::start("test").unwrap();
        let device = open(&hardware, "0", &context);
        let (preview, _) = target(TargetKind::Preview, Size::new(640, 480));

        let first = configure(&device, SessionType::Regular, &[preview.clone()], &context).unwrap();
        let second = configure(&device, SessionType::Regular, &[preview.clone()], &context).unwrap();
        assert_ne!(first.id(), second.id());

        let request = CaptureRequest::builder(RequestTemplate::Preview).add_target(&preview).build();
        assert!(matches!(first.set_repeating_request(&request), Err(BackendError::Closed(_))));
        assert!(second.set_repeating_request(&request).is_ok());
        device.close();
        assert!(matches!(second.set_repeating_request(&request), Err(BackendError::Closed(_))));
    }

    #[test]
    fn test_capture_writes_jpeg_to_still_target() {
        let hardware = VirtualHardware::default();
        let context = ExecutionContext::start("test").unwrap();
        let device = open(&hardware, "0", &context);
        let (still, surface) = target(TargetKind::StillImage, Size::new(64, 48));

        let session = configure(&device, SessionType::Regular, &[still.clone()], &context).unwrap();
        let (tx, rx) = mpsc::channel();
        let request = CaptureRequest::builder(RequestTemplate::StillCapture).add_target(&still).build();
        session
            .capture(&request, Box::new(move |event| tx.send(event).unwrap()), &context)
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), CaptureEvent::Completed);
        let buffers = surface.buffers.lock().unwrap();
        assert_eq!(buffers.len(), 1);
        let decoded = image::load_from_memory(&buffers[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn test_disconnect_notifies_and_frees_device() {
        let hardware = VirtualHardware::default();
        let context = ExecutionContext::start("test").unwrap();
        let (tx, rx) = mpsc::channel();
        let callback: DeviceCallback = Arc::new(move |event| {
            let _ = tx.send(format!("{event:?}"));
        });
        hardware.open_device(&DeviceId::from("0"), callback, &context).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "Opened(0)");

        assert!(hardware.simulate_disconnect(&DeviceId::from("0")));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "Disconnected");
        assert!(hardware.open_devices().is_empty());
        assert!(!hardware.simulate_disconnect(&DeviceId::from("0")));
    }
}
