// SPDX-License-Identifier: GPL-3.0-only

//! Camera Control - session control for asynchronous camera hardware
//!
//! This library opens a camera device, negotiates its output streams, takes
//! still pictures and records video (including constrained high-speed slow
//! motion) on top of an asynchronous hardware service.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Hardware service contract and the in-process virtual camera
//! - [`session`]: Session controller, capture coordination and recording
//! - [`capabilities`]: Read-only capability listing for every device
//! - [`config`]: User configuration handling
//! - [`storage`]: Still-image sink and media persistence
//!
//! # Example
//!
//! ```no_run
//! use camera_control::backends::virtual_camera::VirtualHardware;
//! use camera_control::storage::FileMediaStore;
//! use camera_control::{Config, SessionController};
//! use std::sync::Arc;
//!
//! let config = Config::load();
//! let store = Arc::new(FileMediaStore::from_config(&config));
//! let (controller, _events) = SessionController::new(Arc::new(VirtualHardware::default()), store, config);
//! controller.open(camera_control::constants::still::DEFAULT_RESOLUTION)?;
//! # Ok::<(), camera_control::CameraError>(())
//! ```

pub mod backends;
pub mod capabilities;
pub mod config;
pub mod constants;
pub mod errors;
pub mod session;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use capabilities::CameraInfo;
pub use config::Config;
pub use errors::{CameraError, CameraResult};
pub use session::{CameraEvent, ControllerState, EventReceiver, SessionController};
