// SPDX-License-Identifier: GPL-3.0-only

//! Hardware service contract
//!
//! The controller consumes an asynchronous hardware service through the traits
//! in this module. Every call returns as soon as the request is issued; results
//! arrive later through callbacks delivered on a caller-supplied
//! [`ExecutionContext`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  SessionController  │  ← Owns device + session handles
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   HardwareService   │  ← enumerate / characteristics / open
//! └──────────┬──────────┘
//!            │
//!      ┌─────┴──────┐
//!      ▼            ▼
//! ┌──────────┐ ┌──────────────┐
//! │  Device  │ │ CaptureSession│  ← per-open / per-configuration handles
//! └──────────┘ └──────────────┘
//! ```

pub mod context;
pub mod frame_loop;
pub mod types;

pub use context::ExecutionContext;
pub use types::*;

use std::collections::BTreeSet;
use std::sync::Arc;

/// Shared handle to an opened device
pub type DeviceHandle = Arc<dyn CameraDevice>;

/// Shared handle to a configured capture session
pub type SessionHandle = Arc<dyn CaptureSession>;

/// Entry point of a hardware service
pub trait HardwareService: Send + Sync {
    /// Whether the process currently holds the camera permission
    fn permission_granted(&self) -> bool;

    /// Enumerate device ids in service order
    fn device_ids(&self) -> BackendResult<Vec<DeviceId>>;

    /// Read the static characteristics of one device
    fn characteristics(&self, id: &DeviceId) -> BackendResult<Characteristics>;

    /// Sets of device ids that may be streamed concurrently
    fn concurrent_device_ids(&self) -> BackendResult<Vec<BTreeSet<DeviceId>>>;

    /// Whether devices accept explicit [`SessionConfiguration`]s
    ///
    /// Services without it only understand a raw target list.
    fn supports_session_configuration(&self) -> bool;

    /// Start opening a device
    ///
    /// `callback` receives [`DeviceEvent::Opened`] (or `Error`) on `context`,
    /// followed later by any disconnect or error notifications.
    fn open_device(
        &self,
        id: &DeviceId,
        callback: DeviceCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()>;

    /// Create and prepare an encoder for one recording
    fn prepare_encoder(&self, config: &EncoderConfig) -> BackendResult<Box<dyn VideoEncoder>>;
}

/// An opened device
pub trait CameraDevice: Send + Sync {
    fn id(&self) -> &DeviceId;

    /// Configure a session from explicit output configurations
    fn create_session(
        &self,
        configuration: SessionConfiguration,
        callback: SessionCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()>;

    /// Configure a regular session from a raw target list
    fn create_session_with_targets(
        &self,
        targets: Vec<StreamTarget>,
        callback: SessionCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()>;

    /// Close the device; sessions created from it stop working
    fn close(&self);
}

/// A configured capture session bound to a fixed set of targets
pub trait CaptureSession: Send + Sync {
    /// Unique id, used to tell sessions apart
    fn id(&self) -> u64;

    fn session_type(&self) -> SessionType;

    fn set_repeating_request(&self, request: &CaptureRequest) -> BackendResult<()>;

    fn set_repeating_burst(&self, requests: &[CaptureRequest]) -> BackendResult<()>;

    /// Expand one request into the burst list a high-speed session needs
    fn create_high_speed_request_list(
        &self,
        request: &CaptureRequest,
    ) -> BackendResult<Vec<CaptureRequest>>;

    /// Submit a one-shot request; `callback` fires once on `context`
    fn capture(
        &self,
        request: &CaptureRequest,
        callback: CaptureCallback,
        context: &ExecutionContext,
    ) -> BackendResult<()>;

    fn stop_repeating(&self) -> BackendResult<()>;

    fn close(&self);
}

/// Encoder sink fed through its input surface
pub trait VideoEncoder: Send {
    /// Target the session binds to feed the encoder
    fn input_target(&self) -> StreamTarget;

    fn start(&mut self) -> BackendResult<()>;

    fn stop(&mut self) -> BackendResult<()>;

    /// Return to the idle state; the encoder can no longer be started
    fn reset(&mut self);

    /// Release all encoder resources
    fn release(&mut self);
}
