// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Taking photos
//! - Recording videos
//!
//! Every command runs against the virtual camera hardware.

use camera_control::backends::camera::{Size, StreamFormat, StreamTarget, Surface, TargetKind};
use camera_control::backends::virtual_camera::{HardwareProfile, VirtualHardware};
use camera_control::capabilities;
use camera_control::session::RecordingPhase;
use camera_control::storage::{AssetRef, FileMediaStore};
use camera_control::{CameraEvent, Config, ControllerState, EventReceiver, SessionController};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Time allowed for the device to open and the first session to stream
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for a still capture to be persisted
const PICTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Preview sink that only counts the frames it receives
#[derive(Default)]
struct CountingPreview {
    frames: AtomicU64,
}

impl Surface for CountingPreview {
    fn queue_buffer(&self, _buffer: Vec<u8>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

fn load_hardware(profile: Option<&Path>) -> Result<Arc<VirtualHardware>, Box<dyn std::error::Error>> {
    let profile = match profile {
        Some(path) => HardwareProfile::load(path)?,
        None => HardwareProfile::builtin(),
    };
    Ok(Arc::new(VirtualHardware::new(profile)))
}

fn requested_size(config: &Config, width: Option<u32>, height: Option<u32>) -> Size {
    Size::new(
        width.unwrap_or(config.default_resolution.width),
        height.unwrap_or(config.default_resolution.height),
    )
}

/// List all available cameras
pub fn list_cameras(profile: Option<&Path>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let hardware = load_hardware(profile)?;
    let cameras = capabilities::describe_all_devices(hardware.as_ref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&cameras)?);
        return Ok(());
    }

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for camera in &cameras {
        println!("  [{}] max streams: {}", camera.id, camera.max_streams);

        // Show top 3 resolutions with their best fixed frame rate
        let formats: Vec<String> = camera
            .resolution_fps
            .iter()
            .take(3)
            .map(|entry| format!("{}@{}fps", entry.size, entry.fps.iter().max().copied().unwrap_or(0)))
            .collect();
        if !formats.is_empty() {
            println!("      Formats: {}", formats.join(", "));
        }

        let ranges: Vec<String> = camera.fps_ranges.iter().map(ToString::to_string).collect();
        if !ranges.is_empty() {
            println!("      FPS ranges: {}", ranges.join(", "));
        }
        println!(
            "      EV: [{}, {}]  Zoom: {}x  FOV: {:.2} x {:.2} rad",
            camera.ev_range.lower,
            camera.ev_range.upper,
            camera.max_digital_zoom,
            camera.horizontal_fov,
            camera.vertical_fov
        );
        if !camera.awb_modes.is_empty() {
            let modes: Vec<String> = camera.awb_modes.iter().map(|mode| format!("{mode:?}")).collect();
            println!("      White balance: {}", modes.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Open the preferred camera and wait until the preview streams
async fn open_with_preview(
    profile: Option<&Path>,
    config: Config,
    size: Size,
) -> Result<(SessionController, EventReceiver, Arc<CountingPreview>), Box<dyn std::error::Error>> {
    let hardware = load_hardware(profile)?;
    let store = Arc::new(FileMediaStore::from_config(&config));
    let (controller, events) = SessionController::new(hardware, store, config);

    let preview = Arc::new(CountingPreview::default());
    let target = StreamTarget::new(TargetKind::Preview, size, StreamFormat::Private, preview.clone());

    controller.open(size)?;
    controller.set_preview_surface(target)?;

    if !controller.wait_for_state(ControllerState::Active, READY_TIMEOUT).await {
        controller.close();
        return Err(format!("Camera not ready after {READY_TIMEOUT:?}").into());
    }
    if let Some(id) = controller.device_id() {
        println!("Using camera: {id}");
    }
    Ok((controller, events, preview))
}

/// Take a photo
pub async fn take_photo(
    profile: Option<&Path>,
    width: Option<u32>,
    height: Option<u32>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load();
    if let Some(dir) = output {
        config.photos_dir = Some(dir);
    }
    let size = requested_size(&config, width, height);

    let (controller, mut events, _preview) = open_with_preview(profile, config, size).await?;
    if let Some(still) = controller.still_size() {
        println!("Capture format: {still}");
    }

    println!("Capturing...");
    controller.take_picture()?;

    let result = wait_for_picture(&mut events).await;
    controller.close();

    let asset = result?;
    println!("Photo saved: {asset}");
    Ok(())
}

async fn wait_for_picture(events: &mut EventReceiver) -> Result<AssetRef, Box<dyn std::error::Error>> {
    let deadline = tokio::time::Instant::now() + PICTURE_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, events.next()).await {
            Ok(Some(CameraEvent::PictureTaken(asset))) => return Ok(asset),
            // A substituted resolution is not fatal
            Ok(Some(CameraEvent::Error(error @ camera_control::CameraError::UnsupportedResolution { .. }))) => {
                eprintln!("Warning: {error}");
            }
            Ok(Some(CameraEvent::Error(error))) => return Err(error.into()),
            Ok(None) => return Err("Event channel closed".into()),
            Err(_) => return Err(format!("No picture after {PICTURE_TIMEOUT:?}").into()),
        }
    }
}

/// Record a video
pub async fn record_video(
    profile: Option<&Path>,
    duration: u64,
    slow_motion: bool,
    width: Option<u32>,
    height: Option<u32>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load();
    if let Some(dir) = output {
        config.videos_dir = Some(dir);
    }
    let size = requested_size(&config, width, height);

    let (controller, mut events, preview) = open_with_preview(profile, config, size).await?;

    if slow_motion {
        controller.start_slow_motion_record(size)?;
    } else {
        controller.start_record(size)?;
    }

    if !controller.wait_for_state(ControllerState::Active, READY_TIMEOUT).await {
        controller.close();
        return Err("Recording session did not start".into());
    }
    println!(
        "Recording {}{} for {duration}s (Ctrl+C to stop)...",
        size,
        if slow_motion { " in slow motion" } else { "" }
    );

    let failure = tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration)) => None,
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted, stopping recording");
            None
        }
        error = next_error(&mut events) => error,
    };
    if let Some(error) = failure {
        controller.close();
        return Err(error.into());
    }

    if controller.recording_phase() != Some(RecordingPhase::Encoding) {
        tracing::warn!("Encoder never started");
    }

    let result = if slow_motion {
        controller.stop_slow_motion_record()
    } else {
        controller.stop_record()
    };
    println!("Preview frames: {}", preview.frames.load(Ordering::Relaxed));
    controller.close();

    let asset = result?;
    println!("Video saved: {asset}");
    Ok(())
}

/// First fatal error on the event channel; pending forever if none arrives
async fn next_error(events: &mut EventReceiver) -> Option<camera_control::CameraError> {
    while let Some(event) = events.next().await {
        match event {
            CameraEvent::Error(camera_control::CameraError::UnsupportedResolution { requested, fallback }) => {
                eprintln!("Warning: {requested} not supported, using {fallback}");
            }
            CameraEvent::Error(error) => return Some(error),
            CameraEvent::PictureTaken(_) => {}
        }
    }
    std::future::pending().await
}
