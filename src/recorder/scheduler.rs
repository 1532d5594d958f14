//! Recording scheduler
//!
//! Owns one device and its configuration document, and runs a control loop
//! that starts, splits and stops recordings as wall-clock time passes.
//!
//! Locking: `transition` serialises lifecycle changes (start, split, stop,
//! config changes and the loop's own actions) and may be held across device
//! calls. `inner` guards the config/session pair and is only ever held
//! briefly, never across a device call, so `get_config` does not wait on
//! I/O. Lock order is always `transition` then `inner`.

use super::filename::{sidecar_path, FilenameAllocator, FilenameTemplate};
use super::state::{LoopAction, RecordingSession, SchedulerOptions, SchedulerState, SchedulerStatus};
use super::timestamp::{append_marker, read_marker};
use crate::config::{ConfigStore, RecordingConfig};
use crate::device::{Device, DeviceError, MediaKind};
use crate::utils::{AppError, AppResult};
use chrono::Local;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Proof that the caller holds the transition lock
type Transition<'a> = MutexGuard<'a, ()>;

struct Inner {
    config: RecordingConfig,
    session: Option<RecordingSession>,
    fault: Option<String>,
    running: bool,
}

struct SchedulerCore {
    device: Arc<dyn Device>,
    store: Option<ConfigStore>,
    options: SchedulerOptions,
    defaults: RecordingConfig,
    host: String,
    transition: Mutex<()>,
    inner: Mutex<Inner>,
    wake: Condvar,
}

/// Drives one recording device.
pub struct RecordingScheduler {
    core: Arc<SchedulerCore>,
    resume_recording: bool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecordingScheduler {
    /// Create a scheduler, loading its config from `store` when given.
    ///
    /// A stored document with `recording: true` resumes recording once the
    /// control loop is started.
    pub fn new(
        device: Arc<dyn Device>,
        store: Option<ConfigStore>,
        options: SchedulerOptions,
    ) -> AppResult<Self> {
        let defaults = RecordingConfig::defaults(device.kind());
        let mut config = match store.as_ref().map(ConfigStore::load).transpose()?.flatten() {
            Some(document) => defaults.overlay(&document)?,
            None => defaults.clone(),
        };
        FilenameTemplate::parse(&config.filename_template)?;

        let resume_recording = config.recording;
        config.recording = false;

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());

        Ok(Self {
            core: Arc::new(SchedulerCore {
                device,
                store,
                options,
                defaults,
                host,
                transition: Mutex::new(()),
                inner: Mutex::new(Inner {
                    config,
                    session: None,
                    fault: None,
                    running: false,
                }),
                wake: Condvar::new(),
            }),
            resume_recording,
            worker: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.core.device.kind()
    }

    /// Start the control loop. Calling it again while running is a no-op.
    pub fn start(&self) -> AppResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        {
            let mut inner = self.core.inner.lock();
            if let Some(fault) = &inner.fault {
                return Err(AppError::Faulted(fault.clone()));
            }
            inner.running = true;
        }

        let core = Arc::clone(&self.core);
        let handle = std::thread::Builder::new()
            .name(format!("{:?}-scheduler", self.kind()).to_lowercase())
            .spawn(move || core.run_loop())?;
        *worker = Some(handle);

        tracing::info!("{:?} scheduler started", self.kind());

        if self.resume_recording {
            tracing::info!("Resuming recording from stored config");
            self.start_recording()?;
        }
        Ok(())
    }

    /// Stop the control loop, finish any recording and close the device.
    ///
    /// Idempotent; returns once the loop thread has exited.
    pub fn stop(&self) -> AppResult<()> {
        let handle = match self.worker.lock().take() {
            Some(handle) => handle,
            None => return Ok(()),
        };

        {
            let mut inner = self.core.inner.lock();
            inner.running = false;
            self.core.wake.notify_all();
        }
        if handle.join().is_err() {
            tracing::error!("{:?} control loop panicked", self.kind());
        }

        if let Err(error) = self.stop_recording() {
            tracing::warn!("Failed to stop recording during shutdown: {}", error);
        }
        self.core.device.close()?;

        tracing::info!("{:?} scheduler stopped", self.kind());
        Ok(())
    }

    /// Deep copy of the current config
    pub fn get_config(&self) -> RecordingConfig {
        self.core.inner.lock().config.clone()
    }

    /// Replace or merge the config, applying whatever changed.
    ///
    /// A replace keeps the current `recording` flag unless the patch names
    /// it. Device settings are applied before the new document is committed,
    /// so a rejected setting leaves the config unchanged. Recording is
    /// reconciled last.
    pub fn set_config(&self, patch: &Value, merge: bool, persist: bool) -> AppResult<()> {
        let core = &self.core;
        let held = core.transition.lock();

        let (previous, next, changed) = {
            let inner = core.inner.lock();
            core.ensure_usable(&inner)?;

            let next = if merge {
                inner.config.overlay(patch)?
            } else {
                let base = RecordingConfig {
                    recording: inner.config.recording,
                    ..core.defaults.clone()
                };
                base.overlay(patch)?
            };
            FilenameTemplate::parse(&next.filename_template)?;

            let changed = inner.config.changed_keys(&next)?;
            tracing::debug!("set_config: merge={} delta={:?}", merge, changed);
            (inner.config.clone(), next, changed)
        };

        for (key, value) in previous.changed_settings(&next) {
            tracing::debug!("set_config: applying setting {} = {}", key, value);
            core.device.apply_setting(key, value)?;
        }

        {
            let mut inner = core.inner.lock();
            let mut committed = next.clone();
            // Follows the device; reconciled below
            committed.recording = inner.config.recording;
            inner.config = committed;
        }

        if persist {
            match &core.store {
                Some(store) => store.save(&next)?,
                None => tracing::warn!("set_config: persist requested but no config store"),
            }
        }

        if changed.iter().any(|key| key == "recording") {
            if next.recording {
                core.start_locked(&held)?;
            } else {
                core.stop_locked(&held)?;
            }
        }
        Ok(())
    }

    pub fn start_recording(&self) -> AppResult<()> {
        let held = self.core.transition.lock();
        self.core.start_locked(&held)
    }

    pub fn split_recording(&self) -> AppResult<()> {
        let held = self.core.transition.lock();
        self.core.split_locked(&held)
    }

    /// Stop the current recording; a no-op when nothing is recording
    pub fn stop_recording(&self) -> AppResult<()> {
        let held = self.core.transition.lock();
        self.core.stop_locked(&held)
    }

    pub fn is_recording(&self) -> bool {
        self.core.inner.lock().session.is_some()
    }

    pub fn state(&self) -> SchedulerState {
        self.core.inner.lock().state()
    }

    pub fn status(&self) -> SchedulerStatus {
        let inner = self.core.inner.lock();
        SchedulerStatus {
            state: inner.state(),
            current_filename: inner.session.as_ref().map(|s| s.current_filename.clone()),
            segment_index: inner.session.as_ref().map(|s| s.segment_index),
            elapsed_ms: inner
                .session
                .as_ref()
                .map(|s| s.started_at.elapsed().as_millis() as u64),
            fault: inner.fault.clone(),
        }
    }

    /// Still image from the device at the configured stream resolution
    pub fn current_frame(&self) -> AppResult<Vec<u8>> {
        let resolution = {
            let inner = self.core.inner.lock();
            self.core.ensure_usable(&inner)?;
            inner.config.stream_resolution
        };
        Ok(self.core.device.capture(resolution)?)
    }

    /// Directory recordings are written to
    pub fn output_directory(&self) -> PathBuf {
        self.core.inner.lock().config.output_directory.clone()
    }
}

impl Drop for RecordingScheduler {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            tracing::warn!("Scheduler shutdown on drop failed: {}", error);
        }
    }
}

impl Inner {
    fn state(&self) -> SchedulerState {
        if self.fault.is_some() {
            SchedulerState::Faulted
        } else if self.session.is_some() {
            SchedulerState::Recording
        } else {
            SchedulerState::Idle
        }
    }
}

impl SchedulerCore {
    fn ensure_usable(&self, inner: &Inner) -> AppResult<()> {
        match &inner.fault {
            Some(fault) => Err(AppError::Faulted(fault.clone())),
            None => Ok(()),
        }
    }

    fn allocate_filename(&self, config: &RecordingConfig, index: u32) -> AppResult<(PathBuf, u32)> {
        let template = FilenameTemplate::parse(&config.filename_template)?;
        if !config.output_directory.as_os_str().is_empty() && !config.output_directory.exists() {
            tracing::debug!("Making directory {:?}", config.output_directory);
            std::fs::create_dir_all(&config.output_directory)?;
        }

        let allocator = FilenameAllocator {
            directory: &config.output_directory,
            template: &template,
            extension: self.device.kind().extension(),
            host: &self.host,
            retry_limit: self.options.filename_retry_limit,
        };
        let (path, index) = allocator.allocate(index, Local::now())?;
        tracing::debug!("Next filename {:?} (index {})", path, index);
        Ok((path, index))
    }

    /// Append a frame marker to the sidecar of `media`
    fn mark(&self, media: &Path) -> AppResult<()> {
        let (index, timestamp) = read_marker(
            self.device.as_ref(),
            self.options.timestamp_retry_limit,
            self.options.timestamp_retry_wait,
        )?;
        append_marker(&sidecar_path(media), index, timestamp)
    }

    fn start_locked(&self, _held: &Transition<'_>) -> AppResult<()> {
        let config = {
            let inner = self.inner.lock();
            self.ensure_usable(&inner)?;
            if inner.session.is_some() {
                return Err(AppError::AlreadyRecording);
            }
            inner.config.clone()
        };

        let (path, index) = self.allocate_filename(&config, 0)?;
        self.device.start_recording(&path)?;
        let mut session = RecordingSession::new(path.clone(), index, Instant::now());

        if config.timestamp_period_ms != 0 {
            if let Err(error) = self.mark(&path) {
                tracing::warn!("Initial timestamp for {:?} failed, rolling back: {}", path, error);
                if let Err(stop_error) = self.device.stop_recording() {
                    tracing::warn!("Rollback stop failed: {}", stop_error);
                }
                return Err(error);
            }
            session.last_timestamp_at = Some(Instant::now());
        }

        let mut inner = self.inner.lock();
        inner.session = Some(session);
        inner.config.recording = true;
        self.wake.notify_all();
        tracing::info!("Recording started: {:?}", path);
        Ok(())
    }

    fn split_locked(&self, _held: &Transition<'_>) -> AppResult<()> {
        let (config, current_index) = {
            let inner = self.inner.lock();
            self.ensure_usable(&inner)?;
            let session = inner.session.as_ref().ok_or(AppError::NotRecording)?;
            (inner.config.clone(), session.segment_index)
        };

        let (path, index) = self.allocate_filename(&config, current_index + 1)?;
        self.device.split_recording(&path)?;

        let mut inner = self.inner.lock();
        if let Some(session) = inner.session.as_mut() {
            session.current_filename = path.clone();
            session.last_split_at = Instant::now();
            session.segment_index = index;
        }
        tracing::info!("Recording split: {:?}", path);
        Ok(())
    }

    fn stop_locked(&self, _held: &Transition<'_>) -> AppResult<()> {
        let (filename, timestamps) = {
            let inner = self.inner.lock();
            match &inner.session {
                Some(session) => (
                    session.current_filename.clone(),
                    inner.config.timestamp_period_ms != 0,
                ),
                None => return Ok(()),
            }
        };

        if timestamps {
            if let Err(error) = self.mark(&filename) {
                tracing::warn!("Final timestamp for {:?} failed: {}", filename, error);
            }
        }

        let result = self.device.stop_recording();
        {
            let mut inner = self.inner.lock();
            inner.session = None;
            inner.config.recording = false;
        }
        result?;

        tracing::info!("Recording stopped: {:?}", filename);
        Ok(())
    }

    fn timestamp_locked(&self, _held: &Transition<'_>) -> AppResult<()> {
        let filename = {
            let mut inner = self.inner.lock();
            match inner.session.as_mut() {
                Some(session) => {
                    session.last_timestamp_at = Some(Instant::now());
                    session.current_filename.clone()
                }
                None => return Ok(()),
            }
        };
        self.mark(&filename)
    }

    fn run_loop(self: Arc<Self>) {
        tracing::debug!("Control loop running");

        loop {
            let held = self.transition.lock();
            let mut inner = self.inner.lock();
            if !inner.running {
                break;
            }

            let due = inner
                .session
                .as_ref()
                .map(|session| session.next_action(&inner.config, Instant::now()));
            let action = match due {
                Some(action) => action,
                None => {
                    drop(held);
                    self.wake.wait_for(&mut inner, self.options.idle_wait);
                    continue;
                }
            };
            drop(inner);

            let result = match action {
                LoopAction::Wait => {
                    drop(held);
                    self.device.wait(self.options.tick).map_err(AppError::from)
                }
                LoopAction::Stop => self.stop_locked(&held),
                LoopAction::Split => {
                    let result = self.split_locked(&held);
                    if result.is_err() {
                        // Retry on the next interval rather than every tick
                        if let Some(session) = self.inner.lock().session.as_mut() {
                            session.last_split_at = Instant::now();
                        }
                    }
                    result
                }
                LoopAction::Timestamp => self.timestamp_locked(&held),
            };

            if let Err(error) = result {
                if matches!(error, AppError::Device(DeviceError { fatal: true, .. })) {
                    tracing::error!("Unrecoverable device failure, faulting scheduler: {}", error);
                    self.fault(error.to_string());
                    break;
                }
                tracing::error!("Control loop {:?} failed: {}", action, error);
            }
        }

        tracing::debug!("Control loop exited");
    }

    fn fault(&self, reason: String) {
        let had_session = {
            let mut inner = self.inner.lock();
            inner.fault = Some(reason);
            inner.config.recording = false;
            inner.session.take().is_some()
        };
        if had_session {
            if let Err(error) = self.device.stop_recording() {
                tracing::warn!("Stop after fault failed: {}", error);
            }
        }
    }
}
