// SPDX-License-Identifier: GPL-3.0-only

//! Storage collaborator
//!
//! Allocates the still-image sink, turns captured JPEG bytes into photo files
//! and moves finished recordings from the staging directory into the videos
//! directory.

use crate::backends::camera::{ExecutionContext, Size, StreamFormat, StreamTarget, Surface, TargetKind};
use crate::config::Config;
use crate::constants::{app_info, recording, still};
use crate::utils::lock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("{path}: {message}")]
    Io { path: String, message: String },
    #[error("Image sink is closed")]
    SinkClosed,
}

impl StorageError {
    fn io(path: &Path, err: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Reference to a persisted media asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub path: PathBuf,
}

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Still-image sink: the writable target plus the queue images arrive in
pub struct StillImageSink {
    pub target: StreamTarget,
    pub reader: Arc<ImageQueue>,
}

pub trait MediaStore: Send + Sync {
    fn allocate_still_image_sink(&self, size: Size) -> StorageResult<StillImageSink>;

    fn persist_image(&self, bytes: &[u8]) -> StorageResult<AssetRef>;

    fn allocate_video_file(&self) -> StorageResult<PathBuf>;

    fn persist_video(&self, path: &Path) -> StorageResult<AssetRef>;
}

/// Called on the registered context whenever an image becomes available
pub type ImageAvailableListener = Arc<dyn Fn(&ImageQueue) + Send + Sync>;

/// Bounded queue of encoded still images
///
/// At most `max_images` images exist at once, counting both queued ones and
/// ones acquired but not yet dropped. When full, the oldest queued image is
/// discarded; if every slot is held by the consumer the new image is dropped.
pub struct ImageQueue {
    size: Size,
    max_images: usize,
    self_ref: Weak<ImageQueue>,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Vec<u8>>,
    outstanding: usize,
    listener: Option<(ImageAvailableListener, ExecutionContext)>,
    closed: bool,
}

impl ImageQueue {
    pub fn new(size: Size, max_images: usize) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            size,
            max_images: max_images.max(1),
            self_ref: self_ref.clone(),
            state: Mutex::new(QueueState::default()),
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    /// Register the availability listener; it runs on `context`
    pub fn set_on_image_available(&self, listener: ImageAvailableListener, context: &ExecutionContext) {
        lock(&self.state).listener = Some((listener, context.clone()));
    }

    /// Take the newest queued image, discarding older ones
    pub fn acquire_latest_image(&self) -> Option<Image> {
        let mut state = lock(&self.state);
        let latest = state.pending.pop_back()?;
        state.pending.clear();
        state.outstanding += 1;
        Some(Image {
            data: latest,
            queue: self.self_ref.clone(),
        })
    }

    /// Images currently queued and not yet acquired
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Images acquired and not yet released
    pub fn outstanding_count(&self) -> usize {
        lock(&self.state).outstanding
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Drop queued images and the listener; later buffers are discarded
    pub fn close(&self) {
        let mut state = lock(&self.state);
        if !state.closed {
            debug!(size = %self.size, "Closing image queue");
        }
        state.closed = true;
        state.pending.clear();
        state.listener = None;
    }

    fn release(&self) {
        let mut state = lock(&self.state);
        state.outstanding = state.outstanding.saturating_sub(1);
    }
}

impl Surface for ImageQueue {
    fn queue_buffer(&self, buffer: Vec<u8>) {
        let notify = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            if state.pending.len() + state.outstanding >= self.max_images {
                if state.pending.pop_front().is_none() {
                    warn!(max_images = self.max_images, "All images held by consumer, dropping frame");
                    return;
                }
            }
            state.pending.push_back(buffer);
            state.listener.clone()
        };

        if let Some((listener, context)) = notify {
            let queue = self.self_ref.clone();
            context.execute(move || {
                if let Some(queue) = queue.upgrade() {
                    listener(&queue);
                }
            });
        }
    }
}

/// An acquired image; returned to its queue when dropped
pub struct Image {
    data: Vec<u8>,
    queue: Weak<ImageQueue>,
}

impl Image {
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.release();
        }
    }
}

/// Storage backed by plain directories
pub struct FileMediaStore {
    photos_dir: PathBuf,
    videos_dir: PathBuf,
    staging_dir: PathBuf,
    max_images: usize,
}

impl FileMediaStore {
    pub fn new(photos_dir: PathBuf, videos_dir: PathBuf, staging_dir: PathBuf, max_images: usize) -> Self {
        Self {
            photos_dir,
            videos_dir,
            staging_dir,
            max_images,
        }
    }

    /// Directories from the config overrides, else the platform media dirs
    pub fn from_config(config: &Config) -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        let photos_dir = config.photos_dir.clone().unwrap_or_else(|| {
            dirs::picture_dir()
                .unwrap_or_else(|| home.join("Pictures"))
                .join(app_info::MEDIA_SUBDIR)
        });
        let videos_dir = config.videos_dir.clone().unwrap_or_else(|| {
            dirs::video_dir()
                .unwrap_or_else(|| home.join("Videos"))
                .join(app_info::MEDIA_SUBDIR)
        });
        let staging_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(app_info::APP_DIR)
            .join("staging");

        Self::new(photos_dir, videos_dir, staging_dir, config.still_image_buffers)
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    pub fn videos_dir(&self) -> &Path {
        &self.videos_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn ensure_dir(dir: &Path) -> StorageResult<()> {
        std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))
    }

    /// `base` + `ext`, or `base_<short uuid>` + `ext` if that already exists
    fn unique_path(dir: &Path, base: &str, ext: &str) -> PathBuf {
        let candidate = dir.join(format!("{base}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        dir.join(format!("{base}_{}{ext}", &suffix[..8]))
    }
}

impl MediaStore for FileMediaStore {
    fn allocate_still_image_sink(&self, size: Size) -> StorageResult<StillImageSink> {
        let reader = ImageQueue::new(size, self.max_images);
        let target = StreamTarget::new(TargetKind::StillImage, size, StreamFormat::Jpeg, reader.clone());
        Ok(StillImageSink { target, reader })
    }

    fn persist_image(&self, bytes: &[u8]) -> StorageResult<AssetRef> {
        Self::ensure_dir(&self.photos_dir)?;
        let stamp = chrono::Local::now().format(still::TIMESTAMP_FORMAT);
        let base = format!("{}{}", still::FILE_PREFIX, stamp);
        let path = Self::unique_path(&self.photos_dir, &base, still::FILE_SUFFIX);

        std::fs::write(&path, bytes).map_err(|e| StorageError::io(&path, e))?;
        info!(path = %path.display(), bytes = bytes.len(), "Photo saved");
        Ok(AssetRef { path })
    }

    fn allocate_video_file(&self) -> StorageResult<PathBuf> {
        Self::ensure_dir(&self.staging_dir)?;
        let millis = chrono::Utc::now().timestamp_millis();
        let ext = format!(".{}", recording::VIDEO_EXTENSION);
        let path = Self::unique_path(&self.staging_dir, &millis.to_string(), &ext);
        debug!(path = %path.display(), "Allocated video file");
        Ok(path)
    }

    fn persist_video(&self, path: &Path) -> StorageResult<AssetRef> {
        Self::ensure_dir(&self.videos_dir)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| StorageError::Io {
                path: path.display().to_string(),
                message: "not a file path".to_string(),
            })?
            .to_owned();
        let destination = self.videos_dir.join(file_name);

        std::fs::copy(path, &destination).map_err(|e| StorageError::io(path, e))?;
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove staged video");
        }
        info!(path = %destination.display(), "Video saved");
        Ok(AssetRef { path: destination })
    }
}
