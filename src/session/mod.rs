// SPDX-License-Identifier: GPL-3.0-only

//! Session controller
//!
//! [`SessionController`] owns the opened device and the one live capture
//! session. Every hardware callback is turned into a state machine event (see
//! [`state`]) and dispatched; the resulting effects are carried out after the
//! controller lock is released, so a callback that runs inline never deadlocks.
//!
//! All public calls return as soon as the hardware request is issued. Results
//! arrive on the [`EventReceiver`] returned by [`SessionController::new`] and
//! through the state watch from [`SessionController::subscribe_state`].

pub mod capture;
pub mod events;
pub mod lifecycle;
pub mod recording;
pub mod state;
pub mod strategy;
pub mod targets;

pub use events::{CameraEvent, EventReceiver};
pub use recording::{RecordingMode, RecordingPhase, negotiate_slow_motion_fps};
pub use state::ControllerState;
pub use targets::{SessionIntent, SessionPlan, TargetSet};

use crate::backends::camera::{
    DeviceCallback, DeviceEvent, DeviceHandle, DeviceId, ExecutionContext, HardwareService, LensFacing,
    SessionCallback, SessionEvent, SessionHandle, SessionType, Size, StreamTarget,
};
use crate::capabilities::{self, CameraInfo};
use crate::config::Config;
use crate::constants::{still, timing};
use crate::errors::{CameraError, CameraResult};
use crate::storage::{ImageQueue, MediaStore};
use crate::utils::lock;
use events::EventSender;
use lifecycle::ResourceLifecycle;
use recording::RecordingSession;
use state::{Effect, Epoch, Event, Generation, Phase, transition};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strategy::SessionStrategy;
use tokio::sync::watch;
use tracing::{debug, info, warn};

type ControllerPhase = Phase<DeviceHandle, SessionHandle, SessionPlan>;
type ControllerEvent = Event<DeviceHandle, SessionHandle, SessionPlan>;
type ControllerEffect = Effect<DeviceHandle, SessionHandle, SessionPlan>;

/// Controls one camera device through a [`HardwareService`]
pub struct SessionController {
    core: Arc<Core>,
}

struct Core {
    hardware: Arc<dyn HardwareService>,
    store: Arc<dyn MediaStore>,
    config: Config,
    strategy: Box<dyn SessionStrategy>,
    lifecycle: ResourceLifecycle,
    events: EventSender,
    state_tx: watch::Sender<ControllerState>,
    next_epoch: AtomicU64,
    next_generation: AtomicU64,
    inner: Mutex<Inner>,
}

struct Inner {
    phase: ControllerPhase,
    targets: TargetSet,
    /// Controller context; every hardware callback is delivered on it
    context: Option<ExecutionContext>,
    device_id: Option<DeviceId>,
    still_reader: Option<Arc<ImageQueue>>,
    recording: Option<RecordingSession>,
}

impl SessionController {
    /// Create a controller and the receiver for its notifications
    ///
    /// The session configuration strategy is chosen here, once.
    pub fn new(
        hardware: Arc<dyn HardwareService>,
        store: Arc<dyn MediaStore>,
        config: Config,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = EventSender::channel();
        let strategy = strategy::select_strategy(config.session_strategy, hardware.as_ref());
        let (state_tx, _) = watch::channel(ControllerState::Closed);

        let core = Arc::new(Core {
            hardware,
            store,
            config,
            strategy,
            lifecycle: ResourceLifecycle::new(),
            events,
            state_tx,
            next_epoch: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                targets: TargetSet::default(),
                context: None,
                device_id: None,
                still_reader: None,
                recording: None,
            }),
        });

        (Self { core }, receiver)
    }

    /// Start opening the preferred device with a still sink at `resolution`
    ///
    /// Returns once the open request is issued; readiness is observed through
    /// the state watch, failures after this point through the event channel.
    pub fn open(&self, resolution: Size) -> CameraResult<()> {
        self.core.open(resolution)
    }

    /// Bind a new preview target; reconfigures the session if a device is open
    pub fn set_preview_surface(&self, target: StreamTarget) -> CameraResult<()> {
        self.core.set_preview_surface(target)
    }

    /// Configure a preview session for the current target set
    pub fn create_session(&self) -> CameraResult<()> {
        self.core.create_preview_session()
    }

    /// Release session, device, sinks, encoder and context; idempotent
    pub fn close(&self) {
        self.core.teardown();
    }

    /// Stop delivering notifications
    pub fn clear_listener(&self) {
        self.core.events.clear();
    }

    pub fn state(&self) -> ControllerState {
        *self.core.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.core.state_tx.subscribe()
    }

    /// Wait until the controller reaches `state`, at most `timeout`
    pub async fn wait_for_state(&self, state: ControllerState, timeout: Duration) -> bool {
        let mut receiver = self.subscribe_state();
        tokio::time::timeout(timeout, receiver.wait_for(|current| *current == state))
            .await
            .is_ok_and(|result| result.is_ok())
    }

    /// Device selected by the last open
    pub fn device_id(&self) -> Option<DeviceId> {
        lock(&self.core.inner).device_id.clone()
    }

    /// Size of the current still-image sink
    pub fn still_size(&self) -> Option<Size> {
        lock(&self.core.inner).targets.still().map(|target| target.size())
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.core.inner).recording.is_some()
    }

    /// Capability snapshot of every device of the hardware service
    pub fn describe_all_devices(&self) -> CameraResult<Vec<CameraInfo>> {
        capabilities::describe_all_devices(self.core.hardware.as_ref())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.core.teardown();
    }
}

impl Core {
    fn open(self: &Arc<Self>, resolution: Size) -> CameraResult<()> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.begin_open(epoch) {
            return Err(CameraError::AlreadyOpen);
        }
        self.lifecycle.reset();

        if let Err(e) = self.issue_open(epoch, resolution) {
            warn!(error = %e, "Open failed");
            self.dispatch(Event::OpenAborted { epoch });
            return Err(e);
        }
        Ok(())
    }

    /// Move Closed -> Opening atomically; false if not Closed
    fn begin_open(&self, epoch: Epoch) -> bool {
        let mut inner = lock(&self.inner);
        if !matches!(inner.phase, Phase::Closed) {
            return false;
        }
        let effects = self.step(&mut inner, Event::OpenRequested { epoch });
        debug_assert!(effects.is_empty());
        true
    }

    fn issue_open(self: &Arc<Self>, epoch: Epoch, resolution: Size) -> CameraResult<()> {
        if !self.hardware.permission_granted() {
            return Err(CameraError::PermissionDenied);
        }

        let device_id = self.choose_device()?;
        let still_size = self.choose_still_size(&device_id, resolution);
        info!(device = %device_id, still = %still_size, epoch, "Opening camera");

        let context = self.ensure_context()?;
        self.install_still_sink(still_size, &context)?;

        let abandoned = {
            let mut inner = lock(&self.inner);
            inner.device_id = Some(device_id.clone());
            inner.recording.take()
        };
        if let Some(recording) = abandoned {
            debug!("Abandoning recording left over from a lost device");
            recording.abandon();
        }

        let weak = Arc::downgrade(self);
        let callback: DeviceCallback = Arc::new(move |event| match weak.upgrade() {
            Some(core) => core.on_device_event(epoch, event),
            None => {
                if let DeviceEvent::Opened(device) = event {
                    device.close();
                }
            }
        });

        self.hardware.open_device(&device_id, callback, &context)?;
        Ok(())
    }

    /// First rear-facing device, else the first enumerated one
    fn choose_device(&self) -> CameraResult<DeviceId> {
        let ids = self.hardware.device_ids()?;
        let first = ids.first().cloned().ok_or(CameraError::NoDeviceAvailable)?;

        let rear = ids.into_iter().find(|id| {
            self.hardware
                .characteristics(id)
                .map(|c| c.lens_facing == Some(LensFacing::Back))
                .unwrap_or(false)
        });
        Ok(rear.unwrap_or(first))
    }

    /// Exact match, else the advertised size nearest by area, else the default
    ///
    /// An unadvertised request resolves to the nearest advertised size rather
    /// than the fixed 1920x1080 default, which is only used when the device
    /// advertises no output sizes. Anything but an exact match is reported as
    /// unsupported.
    fn choose_still_size(&self, id: &DeviceId, requested: Size) -> Size {
        let sizes = self
            .hardware
            .characteristics(id)
            .ok()
            .and_then(|c| c.stream_configuration)
            .map(|map| map.output_sizes)
            .unwrap_or_default();

        if sizes.contains(&requested) {
            return requested;
        }

        let fallback = sizes
            .iter()
            .copied()
            .min_by_key(|size| size.area().abs_diff(requested.area()))
            .unwrap_or(still::DEFAULT_RESOLUTION);

        self.report(CameraError::UnsupportedResolution {
            requested: requested.to_string(),
            fallback: fallback.to_string(),
        });
        fallback
    }

    fn ensure_context(&self) -> CameraResult<ExecutionContext> {
        let mut inner = lock(&self.inner);
        if let Some(context) = inner.context.as_ref().filter(|c| c.is_accepting()) {
            return Ok(context.clone());
        }
        let context = ExecutionContext::start(timing::CONTROLLER_CONTEXT)
            .map_err(|e| CameraError::Backend(format!("failed to start callback context: {e}")))?;
        inner.context = Some(context.clone());
        Ok(context)
    }

    fn install_still_sink(self: &Arc<Self>, size: Size, context: &ExecutionContext) -> CameraResult<()> {
        let sink = self.store.allocate_still_image_sink(size)?;

        let weak = Arc::downgrade(self);
        sink.reader.set_on_image_available(
            Arc::new(move |reader: &ImageQueue| {
                let Some(image) = reader.acquire_latest_image() else {
                    return;
                };
                let bytes = image.data().to_vec();
                drop(image);
                if let Some(core) = weak.upgrade() {
                    core.on_still_image(bytes);
                }
            }),
            context,
        );

        let previous = {
            let mut inner = lock(&self.inner);
            inner.targets.set_still(Some(sink.target));
            inner.still_reader.replace(sink.reader)
        };
        if let Some(previous) = previous {
            previous.close();
        }
        Ok(())
    }

    fn on_device_event(self: &Arc<Self>, epoch: Epoch, event: DeviceEvent) {
        debug!(epoch, event = ?event, "Device event");
        let event = match event {
            DeviceEvent::Opened(device) => Event::DeviceOpened { epoch, device },
            DeviceEvent::Disconnected => Event::DeviceDisconnected { epoch },
            DeviceEvent::Error(code) => Event::DeviceError { epoch, code },
        };
        self.dispatch(event);
    }

    fn set_preview_surface(self: &Arc<Self>, target: StreamTarget) -> CameraResult<()> {
        if self.lifecycle.is_torn_down() {
            return Err(CameraError::NotReady);
        }

        let (has_device, recording) = {
            let mut inner = lock(&self.inner);
            inner.targets.set_preview(Some(target));
            (inner.phase.device().is_some(), inner.recording.is_some())
        };

        if !has_device {
            debug!("Preview target stored, no device open yet");
            return Ok(());
        }
        if recording {
            // Picked up when the recording stops and the preview session returns
            debug!("Preview target stored, recording in progress");
            return Ok(());
        }
        self.create_preview_session()
    }

    fn create_preview_session(self: &Arc<Self>) -> CameraResult<()> {
        let plan = {
            let inner = lock(&self.inner);
            if self.lifecycle.is_torn_down() || inner.phase.device().is_none() {
                return Err(CameraError::NotReady);
            }
            inner.targets.preview_plan().ok_or(CameraError::NotReady)?
        };
        self.request_configuration(plan);
        Ok(())
    }

    /// Ask the state machine to bind `plan` under a fresh generation
    fn request_configuration(self: &Arc<Self>, plan: SessionPlan) -> Generation {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, intent = ?plan.intent, session_type = ?plan.session_type, "Requesting session");
        self.dispatch(Event::ConfigureRequested { generation, plan });
        generation
    }

    /// Run one transition under the lock and return its effects
    fn step(&self, inner: &mut Inner, event: ControllerEvent) -> Vec<ControllerEffect> {
        let phase = std::mem::replace(&mut inner.phase, Phase::Closed);
        let (next, effects) = transition(phase, event);
        inner.phase = next;

        let state = inner.phase.state();
        if *self.state_tx.borrow() != state {
            debug!(%state, "Controller state changed");
        }
        self.state_tx.send_replace(state);
        effects
    }

    fn dispatch(self: &Arc<Self>, event: ControllerEvent) {
        let effects = {
            let mut inner = lock(&self.inner);
            self.step(&mut inner, event)
        };
        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(self: &Arc<Self>, effect: ControllerEffect) {
        match effect {
            Effect::BeginConfiguration => {
                let plan = lock(&self.inner).targets.preview_plan();
                match plan {
                    Some(plan) => {
                        self.request_configuration(plan);
                    }
                    None => debug!("Device open, waiting for a preview target"),
                }
            }
            Effect::ConfigureSession {
                device,
                generation,
                plan,
            } => self.configure_session(device, generation, plan),
            Effect::StartStreaming { session, plan } => self.start_streaming(session, plan),
            Effect::CloseSession(session) => {
                debug!(session = session.id(), "Closing session");
                session.close();
            }
            Effect::CloseDevice(device) => {
                debug!(device = %device.id(), "Closing device");
                device.close();
            }
            Effect::Report(error) => self.report(error),
        }
    }

    fn configure_session(self: &Arc<Self>, device: DeviceHandle, generation: Generation, plan: SessionPlan) {
        let Some(context) = lock(&self.inner).context.clone() else {
            self.dispatch(Event::SessionConfigureFailed { generation });
            return;
        };

        let weak = Arc::downgrade(self);
        let callback: SessionCallback = Box::new(move |event| match (weak.upgrade(), event) {
            (Some(core), SessionEvent::Configured(session)) => {
                core.dispatch(Event::SessionConfigured { generation, session });
            }
            (Some(core), SessionEvent::ConfigureFailed) => {
                core.dispatch(Event::SessionConfigureFailed { generation });
            }
            (None, SessionEvent::Configured(session)) => session.close(),
            (None, SessionEvent::ConfigureFailed) => {}
        });

        if let Err(e) = self.strategy.configure(&device, &plan, callback, &context) {
            warn!(generation, error = %e, "Session configuration request rejected");
            self.dispatch(Event::SessionConfigureFailed { generation });
        }
    }

    fn start_streaming(self: &Arc<Self>, session: SessionHandle, plan: SessionPlan) {
        if !self.is_current_session(&session) {
            debug!(session = session.id(), "Session superseded before streaming started");
            return;
        }

        let submitted = if session.session_type() == SessionType::ConstrainedHighSpeed {
            session
                .create_high_speed_request_list(&plan.request)
                .and_then(|burst| session.set_repeating_burst(&burst))
        } else {
            session.set_repeating_request(&plan.request)
        };

        if let Err(e) = submitted {
            // A newer configuration replaces the phase before it closes this session
            if !self.is_current_session(&session) {
                debug!(session = session.id(), error = %e, "Session superseded while streaming started");
                return;
            }
            self.report(CameraError::PreviewStartFailed(e.to_string()));
            return;
        }
        info!(session = session.id(), intent = ?plan.intent, "Streaming started");

        if plan.intent == SessionIntent::Recording {
            let started = lock(&self.inner).recording.as_mut().map(RecordingSession::start);
            match started {
                Some(Ok(())) => info!("Recording started"),
                Some(Err(e)) => self.report(e),
                None => self.report(CameraError::RecorderStartFailed("no recording prepared".to_string())),
            }
        }
    }

    fn is_current_session(&self, session: &SessionHandle) -> bool {
        lock(&self.inner)
            .phase
            .session()
            .is_some_and(|current| current.id() == session.id())
    }

    /// Surface an asynchronous failure unless teardown has begun
    fn report(&self, error: CameraError) {
        if self.lifecycle.is_torn_down() {
            debug!(error = %error, "Suppressing error after teardown");
            return;
        }
        warn!(error = %error, "Camera error");
        self.events.emit(CameraEvent::Error(error));
    }

    /// Release everything exactly once: session, device, sinks, encoder, context
    fn teardown(self: &Arc<Self>) {
        if !self.lifecycle.begin_teardown() {
            debug!("Teardown already performed");
            return;
        }
        info!("Releasing camera resources");

        self.dispatch(Event::TeardownRequested);

        let (reader, recording, context) = {
            let mut inner = lock(&self.inner);
            inner.targets.set_still(None);
            inner.targets.set_encoder(None);
            (inner.still_reader.take(), inner.recording.take(), inner.context.take())
        };

        if let Some(reader) = reader {
            reader.close();
        }
        if let Some(recording) = recording {
            recording.abandon();
        }
        if let Some(context) = context {
            context.quit_safely();
            if !context.join(self.config.context_join_timeout()) {
                debug!(context = context.name(), "Context not joined");
            }
        }

        self.dispatch(Event::TeardownCompleted);
    }
}
