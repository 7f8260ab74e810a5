// SPDX-License-Identifier: GPL-3.0-only

//! Hardware backends
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              SessionController               │
//! └────────────────────┬────────────────────────┘
//!                      │ HardwareService
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │      camera      │  │ virtual_camera  │  │
//! │  │ (contract+types) │  │  (in-process)   │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: the hardware service contract, shared types, execution contexts
//! - [`virtual_camera`]: a simulated hardware service with built-in device profiles

pub mod camera;
pub mod virtual_camera;
