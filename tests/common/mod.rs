// SPDX-License-Identifier: GPL-3.0-only

//! Scripted hardware double
//!
//! Every asynchronous callback the controller hands to [`ScriptedHardware`]
//! is held until the test releases it, so races such as "teardown before the
//! device opens" are played out deterministically. Every hardware call is
//! recorded as a [`Call`].

#![allow(dead_code)]

use camera_control::backends::camera::{
    BackendError, BackendResult, CameraDevice, CaptureCallback, CaptureEvent, CaptureRequest, CaptureSession,
    Capability, Characteristics, DeviceCallback, DeviceEvent, DeviceId, EncoderConfig, ExecutionContext, FpsRange,
    FrameDuration, HardwareService, HighSpeedVideoConfiguration, LensFacing, SessionCallback, SessionConfiguration,
    SessionEvent, SessionType, Size, StreamConfigurationMap, StreamFormat, StreamTarget, Surface, TargetKind,
    VideoEncoder,
};
use camera_control::storage::FileMediaStore;
use camera_control::{CameraEvent, Config, EventReceiver, SessionController};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(2);

pub const STILL_SIZE: Size = Size::new(1920, 1080);

/// One recorded hardware call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    OpenDevice(DeviceId),
    CloseDevice(DeviceId),
    CreateSession {
        session_type: SessionType,
        outputs: usize,
        explicit: bool,
    },
    CloseSession(u64),
    SetRepeating(u64),
    SetBurst { session: u64, requests: usize },
    Capture(u64),
    StopRepeating(u64),
    PrepareEncoder { frame_rate: u32 },
    EncoderStart,
    EncoderStop,
    EncoderReset,
    EncoderRelease,
}

struct PendingOpen {
    id: DeviceId,
    callback: DeviceCallback,
    context: ExecutionContext,
}

struct PendingSession {
    session_type: SessionType,
    targets: Vec<StreamTarget>,
    callback: SessionCallback,
    context: ExecutionContext,
}

struct PendingCapture {
    callback: CaptureCallback,
    context: ExecutionContext,
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    opens: VecDeque<PendingOpen>,
    sessions: VecDeque<PendingSession>,
    captures: VecDeque<PendingCapture>,
    controller_context: Option<ExecutionContext>,
    fail_repeating: bool,
    fail_encoder_prepare: bool,
    before_repeating: Option<Box<dyn FnOnce() + Send>>,
}

type SharedScript = Arc<Mutex<Script>>;

fn record(script: &SharedScript, call: Call) {
    script.lock().unwrap().calls.push(call);
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(100);

/// Back camera with regular and high-speed sizes
pub fn rear_characteristics() -> Characteristics {
    let sizes = vec![
        Size::new(4000, 3000),
        Size::new(1920, 1080),
        Size::new(1280, 720),
        Size::new(640, 480),
    ];
    Characteristics {
        lens_facing: Some(LensFacing::Back),
        capabilities: Some(vec![Capability::BackwardCompatible, Capability::ConstrainedHighSpeedVideo]),
        max_output_streams: Some(3),
        stream_configuration: Some(StreamConfigurationMap {
            min_frame_durations: sizes
                .iter()
                .map(|&size| FrameDuration {
                    size,
                    duration_ns: 33_333_333,
                })
                .collect(),
            output_sizes: sizes,
            high_speed_video: vec![HighSpeedVideoConfiguration {
                size: Size::new(1280, 720),
                fps_ranges: vec![FpsRange::new(30, 30), FpsRange::new(120, 120), FpsRange::new(30, 240)],
            }],
        }),
        ae_target_fps_ranges: Some(vec![FpsRange::new(15, 30), FpsRange::new(30, 30)]),
        ..Default::default()
    }
}

pub fn front_characteristics() -> Characteristics {
    Characteristics {
        lens_facing: Some(LensFacing::Front),
        capabilities: Some(vec![Capability::BackwardCompatible]),
        stream_configuration: Some(StreamConfigurationMap {
            output_sizes: vec![Size::new(1920, 1080), Size::new(640, 480)],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Hardware service whose callbacks fire only when the test says so
pub struct ScriptedHardware {
    devices: Vec<(DeviceId, Characteristics)>,
    unreadable: BTreeSet<DeviceId>,
    concurrent: Vec<BTreeSet<DeviceId>>,
    session_configuration: bool,
    permission: AtomicBool,
    script: SharedScript,
}

impl ScriptedHardware {
    pub fn new(devices: Vec<(&str, Characteristics)>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|(id, characteristics)| (DeviceId::from(id), characteristics))
                .collect(),
            unreadable: BTreeSet::new(),
            concurrent: Vec::new(),
            session_configuration: true,
            permission: AtomicBool::new(true),
            script: SharedScript::default(),
        }
    }

    /// Front camera "0" enumerated before rear camera "1"
    pub fn front_and_rear() -> Self {
        Self::new(vec![("0", front_characteristics()), ("1", rear_characteristics())])
    }

    pub fn without_session_configuration(mut self) -> Self {
        self.session_configuration = false;
        self
    }

    pub fn with_unreadable(mut self, id: &str) -> Self {
        self.unreadable.insert(DeviceId::from(id));
        self
    }

    pub fn with_concurrent(mut self, group: &[&str]) -> Self {
        self.concurrent.push(group.iter().map(|&id| DeviceId::from(id)).collect());
        self
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn fail_repeating(&self, fail: bool) {
        self.script.lock().unwrap().fail_repeating = fail;
    }

    /// Run `hook` on the calling thread when the next repeating request arrives
    pub fn before_next_repeating(&self, hook: impl FnOnce() + Send + 'static) {
        self.script.lock().unwrap().before_repeating = Some(Box::new(hook));
    }

    pub fn fail_encoder_prepare(&self, fail: bool) {
        self.script.lock().unwrap().fail_encoder_prepare = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn pending_opens(&self) -> usize {
        self.script.lock().unwrap().opens.len()
    }

    pub fn pending_sessions(&self) -> usize {
        self.script.lock().unwrap().sessions.len()
    }

    pub fn pending_captures(&self) -> usize {
        self.script.lock().unwrap().captures.len()
    }

    /// Deliver "opened" for the oldest pending open
    pub fn complete_open(&self) -> Arc<ScriptedDevice> {
        let pending = self.script.lock().unwrap().opens.pop_front().expect("no pending open");
        let device = Arc::new(ScriptedDevice {
            id: pending.id,
            callback: Arc::clone(&pending.callback),
            context: pending.context.clone(),
            closed: AtomicBool::new(false),
            script: Arc::clone(&self.script),
        });

        let handle: Arc<dyn CameraDevice> = device.clone();
        let callback = pending.callback;
        pending.context.execute(move || callback(DeviceEvent::Opened(handle)));
        pending.context.flush(TIMEOUT);
        device
    }

    /// Fail the oldest pending open with a device error
    pub fn fail_open(&self, code: i32) {
        let pending = self.script.lock().unwrap().opens.pop_front().expect("no pending open");
        let callback = pending.callback;
        pending.context.execute(move || callback(DeviceEvent::Error(code)));
        pending.context.flush(TIMEOUT);
    }

    /// Deliver "configured" for the oldest pending configuration
    pub fn complete_session(&self) -> Arc<ScriptedSession> {
        let pending = self.script.lock().unwrap().sessions.pop_front().expect("no pending session");
        let session = Arc::new(ScriptedSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst),
            session_type: pending.session_type,
            targets: pending.targets,
            closed: AtomicBool::new(false),
            script: Arc::clone(&self.script),
        });

        let handle: Arc<dyn CaptureSession> = session.clone();
        let callback = pending.callback;
        pending.context.execute(move || callback(SessionEvent::Configured(handle)));
        pending.context.flush(TIMEOUT);
        session
    }

    /// Deliver "configure failed" for the oldest pending configuration
    pub fn fail_session(&self) {
        let pending = self.script.lock().unwrap().sessions.pop_front().expect("no pending session");
        let callback = pending.callback;
        pending.context.execute(move || callback(SessionEvent::ConfigureFailed));
        pending.context.flush(TIMEOUT);
    }

    /// Deliver the outcome of the oldest pending capture; returns its context
    pub fn complete_capture(&self, event: CaptureEvent) -> ExecutionContext {
        let pending = self.script.lock().unwrap().captures.pop_front().expect("no pending capture");
        let callback = pending.callback;
        pending.context.execute(move || callback(event));
        pending.context.flush(TIMEOUT);
        pending.context
    }

    /// Wait for everything queued on the controller context to run
    pub fn flush_controller(&self) {
        let context = self.script.lock().unwrap().controller_context.clone();
        if let Some(context) = context {
            context.flush(TIMEOUT);
        }
    }
}

impl HardwareService for ScriptedHardware {
    fn permission_granted(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn device_ids(&self) -> BackendResult<Vec<DeviceId>> {
        Ok(self.devices.iter().map(|(id, _)| id.clone()).collect())
    }

    fn characteristics(&self, id: &DeviceId) -> BackendResult<Characteristics> {
        if self.unreadable.contains(id) {
            return Err(BackendError::Other(format!("cannot read {id}")));
        }
        self.devices
            .iter()
            .find(|(device, _)| device == id)
            .map(|(_, characteristics)| characteristics.clone())
            .ok_or_else(|| BackendError::DeviceNotFound(id.to_string()))
    }

    fn concurrent_device_ids(&self) -> BackendResult<Vec<BTreeSet<DeviceId>>> {
        Ok(self.concurrent.clone())
    }

    fn supports_session_configuration(&self) -> bool {
        self.session_configuration
    }

    fn open_device(&self, id: &DeviceId, callback: DeviceCallback, context: &ExecutionContext) -> BackendResult<()> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::OpenDevice(id.clone()));
        script.controller_context = Some(context.clone());
        script.opens.push_back(PendingOpen {
            id: id.clone(),
            callback,
            context: context.clone(),
        });
        Ok(())
    }

    fn prepare_encoder(&self, config: &EncoderConfig) -> BackendResult<Box<dyn VideoEncoder>> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::PrepareEncoder {
            frame_rate: config.frame_rate,
        });
        if script.fail_encoder_prepare {
            return Err(BackendError::Encoder("scripted prepare failure".to_string()));
        }
        std::fs::write(&config.output_path, b"scripted video").map_err(|e| BackendError::Io(e.to_string()))?;

        let target = StreamTarget::new(
            TargetKind::Encoder,
            config.size,
            StreamFormat::Private,
            Arc::new(CountingSurface::default()),
        );
        Ok(Box::new(ScriptedEncoder {
            target,
            script: Arc::clone(&self.script),
        }))
    }
}

pub struct ScriptedDevice {
    id: DeviceId,
    callback: DeviceCallback,
    context: ExecutionContext,
    closed: AtomicBool,
    script: SharedScript,
}

impl ScriptedDevice {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn disconnect(&self) {
        let callback = Arc::clone(&self.callback);
        self.context.execute(move || callback(DeviceEvent::Disconnected));
        self.context.flush(TIMEOUT);
    }

    pub fn error(&self, code: i32) {
        let callback = Arc::clone(&self.callback);
        self.context.execute(move || callback(DeviceEvent::Error(code)));
        self.context.flush(TIMEOUT);
    }

    fn queue(&self, session_type: SessionType, targets: Vec<StreamTarget>, explicit: bool, callback: SessionCallback, context: &ExecutionContext) -> BackendResult<()> {
        if self.is_closed() {
            return Err(BackendError::Closed(self.id.to_string()));
        }
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::CreateSession {
            session_type,
            outputs: targets.len(),
            explicit,
        });
        script.sessions.push_back(PendingSession {
            session_type,
            targets,
            callback,
            context: context.clone(),
        });
        Ok(())
    }
}

impl CameraDevice for ScriptedDevice {
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
        self.queue(configuration.session_type, targets, true, callback, context)
    }

    fn create_session_with_targets(
        &self,
        targets: Vec<StreamTarget>,
        callback: SessionCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()> {
        self.queue(SessionType::Regular, targets, false, callback, context)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            record(&self.script, Call::CloseDevice(self.id.clone()));
        }
    }
}

pub struct ScriptedSession {
    id: u64,
    session_type: SessionType,
    targets: Vec<StreamTarget>,
    closed: AtomicBool,
    script: SharedScript,
}

impl ScriptedSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> &[StreamTarget] {
        &self.targets
    }

    /// Write `bytes` into the session's still-image target
    pub fn deliver_still(&self, bytes: Vec<u8>) {
        let still = self
            .targets
            .iter()
            .find(|target| target.kind() == TargetKind::StillImage)
            .expect("session has no still target");
        still.surface().queue_buffer(bytes);
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.is_closed() {
            return Err(BackendError::Closed(format!("session {}", self.id)));
        }
        Ok(())
    }
}

impl CaptureSession for ScriptedSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn session_type(&self) -> SessionType {
        self.session_type
    }

    fn set_repeating_request(&self, _request: &CaptureRequest) -> BackendResult<()> {
        let hook = self.script.lock().unwrap().before_repeating.take();
        if let Some(hook) = hook {
            hook();
        }
        self.ensure_open()?;
        record(&self.script, Call::SetRepeating(self.id));
        if self.script.lock().unwrap().fail_repeating {
            return Err(BackendError::Other("scripted repeating failure".to_string()));
        }
        if self.session_type == SessionType::ConstrainedHighSpeed {
            return Err(BackendError::Unsupported("high speed session".to_string()));
        }
        Ok(())
    }

    fn set_repeating_burst(&self, requests: &[CaptureRequest]) -> BackendResult<()> {
        self.ensure_open()?;
        record(
            &self.script,
            Call::SetBurst {
                session: self.id,
                requests: requests.len(),
            },
        );
        Ok(())
    }

    fn create_high_speed_request_list(&self, request: &CaptureRequest) -> BackendResult<Vec<CaptureRequest>> {
        let fps = request.target_fps_range().map_or(30, |range| range.upper);
        Ok(vec![request.clone(); (fps / 30).max(1) as usize])
    }

    fn capture(&self, _request: &CaptureRequest, callback: CaptureCallback, context: &ExecutionContext) -> BackendResult<()> {
        self.ensure_open()?;
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Capture(self.id));
        script.captures.push_back(PendingCapture {
            callback,
            context: context.clone(),
        });
        Ok(())
    }

    fn stop_repeating(&self) -> BackendResult<()> {
        self.ensure_open()?;
        record(&self.script, Call::StopRepeating(self.id));
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            record(&self.script, Call::CloseSession(self.id));
        }
    }
}

struct ScriptedEncoder {
    target: StreamTarget,
    script: SharedScript,
}

impl VideoEncoder for ScriptedEncoder {
    fn input_target(&self) -> StreamTarget {
        self.target.clone()
    }

    fn start(&mut self) -> BackendResult<()> {
        record(&self.script, Call::EncoderStart);
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        record(&self.script, Call::EncoderStop);
        Ok(())
    }

    fn reset(&mut self) {
        record(&self.script, Call::EncoderReset);
    }

    fn release(&mut self) {
        record(&self.script, Call::EncoderRelease);
    }
}

#[derive(Default)]
pub struct CountingSurface {
    frames: AtomicU64,
}

impl CountingSurface {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

impl Surface for CountingSurface {
    fn queue_buffer(&self, _buffer: Vec<u8>) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn preview_target(size: Size) -> StreamTarget {
    StreamTarget::new(TargetKind::Preview, size, StreamFormat::Private, Arc::new(CountingSurface::default()))
}

/// Controller wired to scripted hardware and a temporary media store
pub struct Harness {
    pub hardware: Arc<ScriptedHardware>,
    pub controller: SessionController,
    pub events: EventReceiver,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(hardware: ScriptedHardware) -> Self {
        Self::with_config(hardware, Config::default())
    }

    pub fn with_config(hardware: ScriptedHardware, config: Config) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileMediaStore::new(
            dir.path().join("photos"),
            dir.path().join("videos"),
            dir.path().join("staging"),
            config.still_image_buffers,
        ));
        let hardware = Arc::new(hardware);
        let (controller, events) = SessionController::new(hardware.clone(), store, config);
        Self {
            hardware,
            controller,
            events,
            dir,
        }
    }

    /// Open, bind a preview target and bring the first session up
    pub fn open_active(&self, preview_size: Size) -> (Arc<ScriptedDevice>, Arc<ScriptedSession>) {
        self.controller.open(STILL_SIZE).unwrap();
        self.controller.set_preview_surface(preview_target(preview_size)).unwrap();
        let device = self.hardware.complete_open();
        let session = self.hardware.complete_session();
        (device, session)
    }

    /// Notifications delivered so far
    pub fn drain_events(&mut self) -> Vec<CameraEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
