#![warn(missing_docs)]
//! # liveness-capture
//!
//! ## Purpose
//! Owns the camera stream and the recording sink for one capture session.
//!
//! ## Responsibilities
//! - Define backend-agnostic camera and recorder traits.
//! - Probe the recorder for the best supported codec from a preference list.
//! - Buffer recorder chunks in arrival order and assemble the artifact.
//! - Guarantee the camera is released on every exit path, idempotently.
//! - Expose a deterministic synthetic backend for CI and unit tests.
//!
//! ## Data flow
//! [`acquire_camera`] -> [`CameraHandle`] -> [`CaptureResourceManager::install`]
//! -> [`CaptureResourceManager::begin_recording`] -> recorder delivers
//! [`RecorderEvent`]s through a callback -> [`CaptureResourceManager::accept_chunk`]
//! -> [`CaptureResourceManager::finish`] yields artifact bytes.
//!
//! ## Ownership and lifetimes
//! A [`CameraHandle`] exclusively owns its platform stream. Dropping the handle
//! (or the manager holding it) stops the hardware tracks, so abnormal teardown
//! cannot leak the camera.
//!
//! ## Error model
//! Permission, device, codec and recorder failures are reported as
//! [`CaptureError`] values. Release never fails.
//!
//! ## Security and privacy notes
//! Recorded bytes stay in memory and are never persisted or logged; callers
//! identify artifacts by length and digest only.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

/// Container format of a recorded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    /// WebM container.
    WebM,
    /// MP4 container.
    Mp4,
}

impl Container {
    /// MIME type used when uploading the artifact.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::WebM => "video/webm",
            Self::Mp4 => "video/mp4",
        }
    }

    /// File extension used when uploading the artifact.
    pub fn extension(self) -> &'static str {
        match self {
            Self::WebM => "webm",
            Self::Mp4 => "mp4",
        }
    }
}

/// One recorder output format candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoCodec {
    /// Full MIME string probed against the recorder.
    pub mime: &'static str,
    /// Container the recorder writes for this codec.
    pub container: Container,
}

/// Recorder formats in descending preference order.
pub const CODEC_PREFERENCES: [VideoCodec; 4] = [
    VideoCodec {
        mime: "video/webm;codecs=vp9",
        container: Container::WebM,
    },
    VideoCodec {
        mime: "video/webm;codecs=vp8",
        container: Container::WebM,
    },
    VideoCodec {
        mime: "video/webm",
        container: Container::WebM,
    },
    VideoCodec {
        mime: "video/mp4",
        container: Container::Mp4,
    },
];

/// Preferred camera facing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Front camera facing the user.
    User,
    /// Rear camera.
    Environment,
}

/// Stream request forwarded to the camera backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
    /// Target frame width in pixels.
    pub width: u32,
    /// Target frame height in pixels.
    pub height: u32,
    /// Preferred facing direction.
    pub facing: FacingMode,
    /// Whether an audio track is requested.
    pub audio: bool,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            facing: FacingMode::User,
            audio: false,
        }
    }
}

/// Asynchronous recorder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// One encoded chunk became available.
    Chunk(Vec<u8>),
    /// The recorder flushed its last chunk after a stop request.
    Finalized,
    /// The recorder failed; no further chunks follow.
    Failed(String),
}

/// Callback invoked by recorders for every [`RecorderEvent`].
///
/// Recorders may invoke it from any thread.
pub type RecorderCallback = Box<dyn FnMut(RecorderEvent) + Send>;

/// Trait implemented by platform camera providers.
pub trait CameraBackend: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Requests a video stream.
    ///
    /// # Errors
    /// Returns [`CaptureError::PermissionDenied`] or
    /// [`CaptureError::DeviceUnavailable`] when no stream can be opened.
    fn open_stream(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn CameraStream>, CaptureError>;

    /// Returns `true` when the recorder can encode `mime`.
    fn supports_codec(&self, mime: &str) -> bool;
}

/// Live camera stream with an attached recorder.
pub trait CameraStream: Send {
    /// Starts the recorder. Chunks and finalization arrive through `on_event`.
    ///
    /// # Errors
    /// Returns [`CaptureError::Recorder`] when recording cannot start.
    fn start_recorder(
        &mut self,
        codec: VideoCodec,
        on_event: RecorderCallback,
    ) -> Result<(), CaptureError>;

    /// Asks the recorder to flush and finalize. Must tolerate repeated calls.
    fn stop_recorder(&mut self);

    /// Stops every underlying hardware track. Must tolerate repeated calls.
    fn stop_tracks(&mut self);
}

/// Returns the first preferred codec the backend supports.
///
/// # Errors
/// Returns [`CaptureError::UnsupportedCodec`] when no candidate is supported.
pub fn select_codec(backend: &dyn CameraBackend) -> Result<VideoCodec, CaptureError> {
    CODEC_PREFERENCES
        .iter()
        .copied()
        .find(|codec| backend.supports_codec(codec.mime))
        .ok_or(CaptureError::UnsupportedCodec)
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Exclusive ownership of one open camera stream.
///
/// Dropping the handle releases the stream.
pub struct CameraHandle {
    id: u64,
    stream: Box<dyn CameraStream>,
    released: bool,
}

impl CameraHandle {
    /// Wraps an open stream.
    pub fn new(stream: Box<dyn CameraStream>) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            stream,
            released: false,
        }
    }

    /// Process-unique handle identifier for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` once [`CameraHandle::release`] ran.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stops the recorder and all hardware tracks.
    ///
    /// # Returns
    /// `true` when this call performed the release, `false` when the handle
    /// was already released.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.stream.stop_recorder();
        self.stream.stop_tracks();
        self.released = true;
        info!(stage = "capture", action = "release", handle = self.id);
        true
    }

    fn stream_mut(&mut self) -> &mut dyn CameraStream {
        self.stream.as_mut()
    }
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Requests a camera stream at the given constraints.
///
/// May block on a platform permission prompt; callers run it off the
/// session owner's thread.
///
/// # Errors
/// Propagates backend acquisition failures.
pub fn acquire_camera(
    backend: &dyn CameraBackend,
    constraints: &CameraConstraints,
) -> Result<CameraHandle, CaptureError> {
    let stream = backend.open_stream(constraints)?;
    let handle = CameraHandle::new(stream);
    info!(
        stage = "capture",
        action = "acquire",
        handle = handle.id(),
        backend = backend.name(),
        width = constraints.width,
        height = constraints.height
    );
    Ok(handle)
}

/// Ordered chunk buffer for one recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingSink {
    chunks: Vec<Vec<u8>>,
    total_bytes: usize,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one chunk in arrival order. Empty chunks are dropped.
    ///
    /// # Returns
    /// `true` when the chunk was buffered.
    pub fn push_chunk(&mut self, chunk: Vec<u8>) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
        true
    }

    /// Number of buffered chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Sum of buffered chunk lengths.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Returns `true` when no chunk was buffered.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Concatenates chunks in arrival order and empties the sink.
    ///
    /// # Errors
    /// Returns [`CaptureError::EmptyArtifact`] when no chunk was buffered.
    pub fn finish(&mut self) -> Result<Vec<u8>, CaptureError> {
        if self.chunks.is_empty() {
            return Err(CaptureError::EmptyArtifact);
        }
        let artifact = self.chunks.concat();
        self.clear();
        Ok(artifact)
    }

    /// Drops all buffered chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
    }
}

/// Session-scoped owner of the camera handle and recording sink.
pub struct CaptureResourceManager {
    backend: Arc<dyn CameraBackend>,
    constraints: CameraConstraints,
    handle: Option<CameraHandle>,
    sink: RecordingSink,
    codec: Option<VideoCodec>,
    recording: bool,
}

impl CaptureResourceManager {
    /// Creates a manager that holds no camera yet.
    pub fn new(backend: Arc<dyn CameraBackend>, constraints: CameraConstraints) -> Self {
        Self {
            backend,
            constraints,
            handle: None,
            sink: RecordingSink::new(),
            codec: None,
            recording: false,
        }
    }

    /// Shared backend, for running [`acquire_camera`] on another thread.
    pub fn backend(&self) -> Arc<dyn CameraBackend> {
        Arc::clone(&self.backend)
    }

    /// Stream constraints requested on acquisition.
    pub fn constraints(&self) -> CameraConstraints {
        self.constraints
    }

    /// Acquires a camera synchronously and takes ownership of it.
    ///
    /// # Errors
    /// See [`acquire_camera`] and [`CaptureResourceManager::install`].
    pub fn acquire(&mut self) -> Result<(), CaptureError> {
        let handle = acquire_camera(self.backend.as_ref(), &self.constraints)?;
        self.install(handle)
    }

    /// Takes ownership of an acquired handle.
    ///
    /// # Errors
    /// Returns [`CaptureError::AlreadyHeld`] when a live handle is already
    /// installed; the offered handle is released.
    pub fn install(&mut self, mut handle: CameraHandle) -> Result<(), CaptureError> {
        if self.handle.is_some() {
            handle.release();
            return Err(CaptureError::AlreadyHeld);
        }
        self.sink.clear();
        self.codec = None;
        self.recording = false;
        self.handle = Some(handle);
        Ok(())
    }

    /// Starts buffering with the best supported codec.
    ///
    /// # Errors
    /// Returns [`CaptureError::NotHeld`] without a camera,
    /// [`CaptureError::UnsupportedCodec`] when probing fails, or the
    /// recorder's start error.
    pub fn begin_recording(&mut self, on_event: RecorderCallback) -> Result<VideoCodec, CaptureError> {
        let codec = select_codec(self.backend.as_ref())?;
        let handle = self.handle.as_mut().ok_or(CaptureError::NotHeld)?;
        handle.stream_mut().start_recorder(codec, on_event)?;
        self.codec = Some(codec);
        self.recording = true;
        info!(
            stage = "capture",
            action = "record_start",
            handle = handle.id(),
            codec = codec.mime
        );
        Ok(codec)
    }

    /// Buffers one delivered chunk.
    pub fn accept_chunk(&mut self, chunk: Vec<u8>) -> bool {
        let len = chunk.len();
        let accepted = self.sink.push_chunk(chunk);
        debug!(stage = "capture", action = "chunk", len, accepted);
        accepted
    }

    /// Asks the recorder to finalize. Repeated calls are no-ops.
    pub fn request_stop(&mut self) {
        if !self.recording {
            return;
        }
        self.recording = false;
        if let Some(handle) = self.handle.as_mut() {
            handle.stream_mut().stop_recorder();
            info!(stage = "capture", action = "record_stop", handle = handle.id());
        }
    }

    /// Assembles the artifact from buffered chunks.
    ///
    /// # Errors
    /// Returns [`CaptureError::EmptyArtifact`] when nothing was recorded.
    pub fn finish(&mut self) -> Result<Vec<u8>, CaptureError> {
        self.sink.finish()
    }

    /// Releases the camera if held. Safe to call any number of times.
    ///
    /// # Returns
    /// `true` when a held camera was released by this call.
    pub fn release(&mut self) -> bool {
        self.recording = false;
        match self.handle.take() {
            Some(mut handle) => handle.release(),
            None => false,
        }
    }

    /// Releases the camera and drops all buffered chunks.
    pub fn reset(&mut self) {
        self.release();
        self.sink.clear();
        self.codec = None;
    }

    /// Returns `true` while a camera handle is installed.
    pub fn is_holding(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns `true` between recorder start and the stop request.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Codec chosen for the current recording.
    pub fn codec(&self) -> Option<VideoCodec> {
        self.codec
    }

    /// Number of buffered chunks.
    pub fn chunk_count(&self) -> usize {
        self.sink.chunk_count()
    }

    /// Total buffered bytes.
    pub fn buffered_bytes(&self) -> usize {
        self.sink.total_bytes()
    }
}

impl Drop for CaptureResourceManager {
    fn drop(&mut self) {
        self.release();
    }
}

/// Scripted acquisition result for [`SyntheticCameraBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticAccess {
    /// Stream opens normally.
    Grant,
    /// Platform denies permission.
    Deny,
    /// No camera device exists.
    NoDevice,
}

/// Scripted recorder behavior for [`SyntheticCameraBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticRecorder {
    /// On stop, deliver chunks of these sizes, then finalize.
    Deliver(Vec<usize>),
    /// Never deliver anything, not even finalization.
    Stall,
    /// On stop, report a recorder failure.
    Fail(String),
}

/// Observable counters shared by a synthetic backend and its streams.
#[derive(Debug, Default)]
pub struct SyntheticProbe {
    opened: AtomicUsize,
    tracks_stopped: AtomicUsize,
    recorders_started: AtomicUsize,
}

impl SyntheticProbe {
    /// Number of successfully opened streams.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of streams whose tracks were stopped.
    pub fn released(&self) -> usize {
        self.tracks_stopped.load(Ordering::SeqCst)
    }

    /// Number of streams currently open.
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.released())
    }

    /// Number of recorders started.
    pub fn recorders_started(&self) -> usize {
        self.recorders_started.load(Ordering::SeqCst)
    }
}

/// Deterministic backend for tests and CI.
#[derive(Debug)]
pub struct SyntheticCameraBackend {
    access: SyntheticAccess,
    recorder: SyntheticRecorder,
    supported: Vec<String>,
    rng: Arc<Mutex<StdRng>>,
    probe: Arc<SyntheticProbe>,
}

impl SyntheticCameraBackend {
    /// Creates a backend that grants access, supports every preferred codec,
    /// and delivers three 2 KiB chunks on stop.
    pub fn new() -> Self {
        Self {
            access: SyntheticAccess::Grant,
            recorder: SyntheticRecorder::Deliver(vec![2_048; 3]),
            supported: CODEC_PREFERENCES
                .iter()
                .map(|codec| codec.mime.to_string())
                .collect(),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(7))),
            probe: Arc::new(SyntheticProbe::default()),
        }
    }

    /// Sets the acquisition outcome.
    pub fn with_access(mut self, access: SyntheticAccess) -> Self {
        self.access = access;
        self
    }

    /// Sets the recorder behavior.
    pub fn with_recorder(mut self, recorder: SyntheticRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    /// Restricts the codecs the recorder reports as supported.
    pub fn with_supported_codecs(mut self, mimes: &[&str]) -> Self {
        self.supported = mimes.iter().map(|mime| (*mime).to_string()).collect();
        self
    }

    /// Reseeds chunk byte generation.
    pub fn with_seed(self, seed: u64) -> Self {
        if let Ok(mut rng) = self.rng.lock() {
            *rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    /// Shared counters for assertions.
    pub fn probe(&self) -> Arc<SyntheticProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for SyntheticCameraBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for SyntheticCameraBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open_stream(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn CameraStream>, CaptureError> {
        match self.access {
            SyntheticAccess::Deny => Err(CaptureError::PermissionDenied(
                "synthetic backend denied camera access".to_string(),
            )),
            SyntheticAccess::NoDevice => Err(CaptureError::DeviceUnavailable(
                "synthetic backend has no camera".to_string(),
            )),
            SyntheticAccess::Grant => {
                self.probe.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(SyntheticStream {
                    _constraints: *constraints,
                    recorder: self.recorder.clone(),
                    rng: Arc::clone(&self.rng),
                    probe: Arc::clone(&self.probe),
                    on_event: None,
                    tracks_live: true,
                }))
            }
        }
    }

    fn supports_codec(&self, mime: &str) -> bool {
        self.supported.iter().any(|supported| supported == mime)
    }
}

struct SyntheticStream {
    _constraints: CameraConstraints,
    recorder: SyntheticRecorder,
    rng: Arc<Mutex<StdRng>>,
    probe: Arc<SyntheticProbe>,
    on_event: Option<RecorderCallback>,
    tracks_live: bool,
}

impl SyntheticStream {
    fn chunk_bytes(&self, len: usize) -> Vec<u8> {
        let mut chunk = vec![0_u8; len];
        if let Ok(mut rng) = self.rng.lock() {
            rng.fill(chunk.as_mut_slice());
        }
        chunk
    }
}

impl CameraStream for SyntheticStream {
    fn start_recorder(
        &mut self,
        _codec: VideoCodec,
        on_event: RecorderCallback,
    ) -> Result<(), CaptureError> {
        if !self.tracks_live {
            return Err(CaptureError::Recorder(
                "cannot record from a stopped stream".to_string(),
            ));
        }
        self.probe.recorders_started.fetch_add(1, Ordering::SeqCst);
        self.on_event = Some(on_event);
        Ok(())
    }

    fn stop_recorder(&mut self) {
        let Some(mut on_event) = self.on_event.take() else {
            return;
        };

        match self.recorder.clone() {
            SyntheticRecorder::Deliver(sizes) => {
                for len in sizes {
                    on_event(RecorderEvent::Chunk(self.chunk_bytes(len)));
                }
                on_event(RecorderEvent::Finalized);
            }
            SyntheticRecorder::Stall => {}
            SyntheticRecorder::Fail(reason) => on_event(RecorderEvent::Failed(reason)),
        }
    }

    fn stop_tracks(&mut self) {
        if self.tracks_live {
            self.tracks_live = false;
            self.probe.tracks_stopped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Capture layer error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The platform denied camera access.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    /// No usable camera device.
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),
    /// No preferred codec is supported by the recorder.
    #[error("no supported recording codec")]
    UnsupportedCodec,
    /// Recorder start or finalize failure.
    #[error("recorder failure: {0}")]
    Recorder(String),
    /// Zero chunks were recorded.
    #[error("no video data recorded")]
    EmptyArtifact,
    /// A camera is already held by this manager.
    #[error("camera already held by this session")]
    AlreadyHeld,
    /// No camera is held by this manager.
    #[error("no camera held by this session")]
    NotHeld,
}
