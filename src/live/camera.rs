//! カメラデバイス
//!
//! `CameraDevice::open` でストリームを取得し、`CameraStream::grab` で静止画を切り出す。
//! ストリームは `release` で明示的に閉じる（閉じ忘れても Drop で閉じる）。

use crate::error::{DashboardError, Result};
use crate::scanner::scan_folder;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// 要求する解像度（上限）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    pub width: u32,
    pub height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

pub trait CameraDevice: Send + Sync + 'static {
    type Stream: CameraStream;

    /// カメラを開く。権限拒否・未接続・使用中はそれぞれ別のエラーになる
    fn open(&self, constraints: &StreamConstraints) -> Result<Self::Stream>;
}

pub trait CameraStream: Send + 'static {
    /// 現在のフレームを静止画として取得
    fn grab(&mut self) -> Result<RgbImage>;

    /// ストリームとハードウェアトラックを解放する
    fn release(self)
    where
        Self: Sized;
}

// ========== SyntheticCamera ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    Permission,
    NotFound,
    Busy,
}

impl From<OpenFailure> for DashboardError {
    fn from(failure: OpenFailure) -> Self {
        match failure {
            OpenFailure::Permission => DashboardError::Permission,
            OpenFailure::NotFound => DashboardError::DeviceNotFound,
            OpenFailure::Busy => DashboardError::DeviceBusy,
        }
    }
}

/// フレーム取得時に起こす障害
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrabFault {
    #[default]
    None,
    /// 取得そのものが失敗する
    Error,
    /// 0x0 のフレームを返す（エンコードできない）
    Empty,
}

#[derive(Debug, Default)]
struct SyntheticState {
    active: usize,
    opened: usize,
    grabbed: u64,
    next_failure: Option<OpenFailure>,
    grab_fault: GrabFault,
}

/// 生成フレームを返すカメラ（テスト・デモ用）
///
/// 開いているストリーム数を数えるので、多重オープンの検出に使える。
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    state: Arc<Mutex<SyntheticState>>,
    frame_size: (u32, u32),
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self::with_frame_size(32, 24)
    }

    pub fn with_frame_size(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SyntheticState::default())),
            frame_size: (width, height),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyntheticState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 次回の open を失敗させる
    pub fn fail_next_open(&self, failure: OpenFailure) {
        self.lock().next_failure = Some(failure);
    }

    pub fn set_grab_fault(&self, fault: GrabFault) {
        self.lock().grab_fault = fault;
    }

    pub fn active_streams(&self) -> usize {
        self.lock().active
    }

    pub fn total_opened(&self) -> usize {
        self.lock().opened
    }

    pub fn frames_grabbed(&self) -> u64 {
        self.lock().grabbed
    }
}

impl CameraDevice for SyntheticCamera {
    type Stream = SyntheticStream;

    fn open(&self, constraints: &StreamConstraints) -> Result<SyntheticStream> {
        let mut state = self.lock();
        if let Some(failure) = state.next_failure.take() {
            return Err(failure.into());
        }
        state.active += 1;
        state.opened += 1;
        debug!(active = state.active, "synthetic camera opened");

        let (width, height) = self.frame_size;
        Ok(SyntheticStream {
            state: self.state.clone(),
            width: width.min(constraints.width),
            height: height.min(constraints.height),
            released: false,
        })
    }
}

#[derive(Debug)]
pub struct SyntheticStream {
    state: Arc<Mutex<SyntheticState>>,
    width: u32,
    height: u32,
    released: bool,
}

impl SyntheticStream {
    fn close(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.active = state.active.saturating_sub(1);
    }
}

impl CameraStream for SyntheticStream {
    fn grab(&mut self) -> Result<RgbImage> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.grab_fault {
            GrabFault::Error => return Err(DashboardError::Device("フレームを取得できません".into())),
            GrabFault::Empty => return Ok(RgbImage::new(0, 0)),
            GrabFault::None => {}
        }
        state.grabbed += 1;
        let shade = (state.grabbed * 37 % 256) as u8;
        Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([shade, (x * 7 % 256) as u8, (y * 11 % 256) as u8])
        }))
    }

    fn release(mut self) {
        self.close();
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.close();
    }
}

// ========== FolderCamera ==========

/// フォルダ内の画像を順番に（ループして）再生するカメラ
#[derive(Debug, Clone)]
pub struct FolderCamera {
    folder: PathBuf,
    frames: Arc<[PathBuf]>,
}

impl FolderCamera {
    pub fn new(folder: &Path) -> Result<Self> {
        let frames = scan_folder(folder).map_err(|e| match e {
            DashboardError::FolderNotFound(_) => DashboardError::DeviceNotFound,
            other => other,
        })?;
        if frames.is_empty() {
            return Err(DashboardError::NoImagesFound(folder.display().to_string()));
        }
        Ok(Self {
            folder: folder.to_path_buf(),
            frames: frames.into(),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl CameraDevice for FolderCamera {
    type Stream = FolderStream;

    fn open(&self, constraints: &StreamConstraints) -> Result<FolderStream> {
        if !self.folder.is_dir() {
            return Err(DashboardError::DeviceNotFound);
        }
        debug!(folder = %self.folder.display(), frames = self.frames.len(), "folder camera opened");
        Ok(FolderStream {
            frames: self.frames.clone(),
            cursor: 0,
            constraints: *constraints,
        })
    }
}

#[derive(Debug)]
pub struct FolderStream {
    frames: Arc<[PathBuf]>,
    cursor: usize,
    constraints: StreamConstraints,
}

impl CameraStream for FolderStream {
    fn grab(&mut self) -> Result<RgbImage> {
        let path = &self.frames[self.cursor % self.frames.len()];
        self.cursor += 1;

        let image = image::open(path)
            .map_err(|e| DashboardError::Device(format!("{}: {}", path.display(), e)))?;
        let StreamConstraints { width, height } = self.constraints;
        let image = if image.width() > width || image.height() > height {
            image.resize(width, height, FilterType::Triangle)
        } else {
            image
        };
        Ok(image.to_rgb8())
    }

    fn release(self) {
        debug!(grabbed = self.cursor, "folder camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_synthetic_open_failures_map_to_distinct_errors() {
        let camera = SyntheticCamera::new();
        let constraints = StreamConstraints::default();

        camera.fail_next_open(OpenFailure::Permission);
        assert!(matches!(camera.open(&constraints), Err(DashboardError::Permission)));
        camera.fail_next_open(OpenFailure::NotFound);
        assert!(matches!(camera.open(&constraints), Err(DashboardError::DeviceNotFound)));
        camera.fail_next_open(OpenFailure::Busy);
        assert!(matches!(camera.open(&constraints), Err(DashboardError::DeviceBusy)));

        assert_eq!(camera.active_streams(), 0);
        assert!(camera.open(&constraints).is_ok());
    }

    #[test]
    fn test_synthetic_stream_counts_release_once() {
        let camera = SyntheticCamera::new();
        let mut stream = camera.open(&StreamConstraints::default()).unwrap();
        assert_eq!(camera.active_streams(), 1);

        let frame = stream.grab().unwrap();
        assert_eq!(frame.dimensions(), (32, 24));

        stream.release();
        assert_eq!(camera.active_streams(), 0);

        let dropped = camera.open(&StreamConstraints::default()).unwrap();
        drop(dropped);
        assert_eq!(camera.active_streams(), 0);
        assert_eq!(camera.total_opened(), 2);
    }

    #[test]
    fn test_synthetic_grab_faults() {
        let camera = SyntheticCamera::new();
        let mut stream = camera.open(&StreamConstraints::default()).unwrap();
        camera.set_grab_fault(GrabFault::Empty);
        assert_eq!(stream.grab().unwrap().dimensions(), (0, 0));
        camera.set_grab_fault(GrabFault::Error);
        assert!(matches!(stream.grab(), Err(DashboardError::Device(_))));
    }

    #[test]
    fn test_folder_camera_loops_and_fits_constraints() {
        let dir = TempDir::new().unwrap();
        RgbImage::new(40, 20).save(dir.path().join("a.png")).unwrap();
        RgbImage::new(8, 8).save(dir.path().join("b.png")).unwrap();

        let camera = FolderCamera::new(dir.path()).unwrap();
        assert_eq!(camera.frame_count(), 2);

        let constraints = StreamConstraints { width: 20, height: 20 };
        let mut stream = camera.open(&constraints).unwrap();
        assert_eq!(stream.grab().unwrap().dimensions(), (20, 10));
        assert_eq!(stream.grab().unwrap().dimensions(), (8, 8));
        assert_eq!(stream.grab().unwrap().dimensions(), (20, 10));
        stream.release();
    }

    #[test]
    fn test_folder_camera_missing_folder() {
        let result = FolderCamera::new(Path::new("/nonexistent/camera"));
        assert!(matches!(result, Err(DashboardError::DeviceNotFound)));
    }
}
