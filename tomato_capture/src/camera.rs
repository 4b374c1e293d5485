use crate::config::CameraConfig;
use opencv::{core::Mat, prelude::*, videoio};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Camera {0} is not available")]
    Unavailable(i32),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Camera returned an empty frame")]
    EmptyFrame,
}

#[derive(Default)]
struct CameraState {
    capture: Option<videoio::VideoCapture>,
    leases: usize,
}

/// A capture device that is opened on demand and released explicitly.
///
/// Every method except `is_open` and `device_index` may block on the device
/// and belongs on the blocking thread pool.
pub struct Camera {
    device_index: i32,
    state: Mutex<CameraState>,
    // Mirrors `state.capture`; only written with the state lock held.
    opened: AtomicBool,
}

impl Camera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            device_index: config.device_index,
            state: Mutex::new(CameraState::default()),
            opened: AtomicBool::new(false),
        }
    }

    pub fn device_index(&self) -> i32 {
        self.device_index
    }

    fn open_capture(device_index: i32) -> Result<videoio::VideoCapture, CameraError> {
        let capture = videoio::VideoCapture::new(device_index, videoio::CAP_ANY)
            .map_err(CameraError::OpenCameraFailed)?;
        if !capture.is_opened().map_err(CameraError::OpenCameraFailed)? {
            return Err(CameraError::Unavailable(device_index));
        }
        Ok(capture)
    }

    fn ensure_open(&self, state: &mut CameraState) -> Result<(), CameraError> {
        let opened = match state.capture.as_ref() {
            Some(capture) => capture.is_opened().unwrap_or(false),
            None => false,
        };
        if !opened {
            self.release(state);
            state.capture = Some(Self::open_capture(self.device_index)?);
            self.opened.store(true, Ordering::Release);
            tracing::info!("Camera {} opened", self.device_index);
        }
        Ok(())
    }

    pub fn open(&self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        self.ensure_open(&mut state)
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        self.release(&mut state);
    }

    fn release(&self, state: &mut CameraState) {
        self.opened.store(false, Ordering::Release);
        if let Some(mut capture) = state.capture.take() {
            if let Err(e) = capture.release() {
                tracing::warn!("Failed to release camera {}: {:?}", self.device_index, e);
            }
            tracing::info!("Camera {} closed", self.device_index);
        }
    }

    /// Never waits on the device, so it is safe to call from async code.
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Whether the device can be used right now. A closed device is opened
    /// and released again.
    pub fn probe(&self) -> bool {
        // Held across the trial open so a stream cannot open the device
        // underneath it.
        let _state = self.state.lock();
        if self.is_open() {
            return true;
        }
        match Self::open_capture(self.device_index) {
            Ok(mut capture) => {
                let _ = capture.release();
                true
            }
            Err(e) => {
                tracing::debug!("Camera {} probe failed: {}", self.device_index, e);
                false
            }
        }
    }

    /// Registers a reader. The device is opened by the first read and stays
    /// open until the returned lease and every other lease are dropped.
    pub fn acquire(self: &Arc<Self>) -> CameraLease {
        let mut state = self.state.lock();
        state.leases += 1;
        CameraLease {
            camera: Arc::clone(self),
        }
    }

    fn read_frame(&self) -> Result<Mat, CameraError> {
        let mut state = self.state.lock();
        self.ensure_open(&mut state)?;

        let capture = state
            .capture
            .as_mut()
            .ok_or(CameraError::Unavailable(self.device_index))?;

        let mut frame = Mat::default();
        let grabbed = capture
            .read(&mut frame)
            .map_err(CameraError::ReadFrameFailed)?;
        if !grabbed || frame.empty() {
            return Err(CameraError::EmptyFrame);
        }
        Ok(frame)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        self.release(&mut state);
    }
}

pub struct CameraLease {
    camera: Arc<Camera>,
}

impl CameraLease {
    pub fn read_frame(&self) -> Result<Mat, CameraError> {
        self.camera.read_frame()
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        let mut state = self.camera.state.lock();
        state.leases = state.leases.saturating_sub(1);
        if state.leases == 0 {
            self.camera.release(&mut state);
        }
    }
}
