#![warn(missing_docs)]
//! # liveness-session
//!
//! ## Purpose
//! The capture-session state machine: ties the instruction timeline to the
//! recorder, enforces the safety cutoff, validates the artifact, and
//! reconciles the verifier's answer into a terminal state.
//!
//! ## Responsibilities
//! - Accept user commands (start, stop, cancel, reset) and reject illegal ones
//!   without side effects.
//! - Consume asynchronous results (camera grant, ticks, recorder events,
//!   verdicts) through one serialized entry point, [`SessionController::handle`].
//! - Emit [`SessionEffect`]s for work that must run off the owner's thread.
//! - Release the camera on every exit path.
//!
//! ## State machine
//! ```text
//! Idle --start--> AwaitingPermission --granted--> Recording
//! AwaitingPermission --denied/no device--> Failed
//! Recording --timeline complete | safety cutoff | stop--> Stopping
//! Stopping --finalized, valid artifact--> Submitting
//! Stopping --empty/undersized/oversized artifact | recorder fault--> Failed
//! Submitting --verdict--> Succeeded | Failed
//! Succeeded | Failed --reset--> Idle
//! AwaitingPermission | Recording | Stopping --cancel--> Idle
//! ```
//!
//! ## Data flow
//! Producers (ticker, recorder callback, acquisition and submission workers)
//! turn their results into [`SessionInput`]s tagged with the attempt number
//! they belong to. Inputs from an older attempt are discarded.
//!
//! ## Ownership and lifetimes
//! The controller exclusively owns the [`CaptureResourceManager`]; dropping the
//! controller releases the camera.
//!
//! ## Error model
//! Rejected commands return [`SessionError`] and leave state untouched. Every
//! capture or submission failure becomes the terminal `Failed` state with a
//! [`FailureKind`] and a user-facing message; nothing propagates past here.
//!
//! ## Security and privacy notes
//! Artifact bytes are never logged.

use std::sync::Arc;

use liveness_capture::{
    CameraConstraints, CameraHandle, CaptureError, CaptureResourceManager, RecorderCallback,
    RecorderEvent,
};
use liveness_core::{
    FailureKind, InstructionStep, InstructionTimeline, SessionConfig, SessionStatus, SubjectId,
    VerificationVerdict,
};
use liveness_verify::{ArtifactUpload, SubmissionOutcome};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Monotonic number identifying one start request.
pub type AttemptId = u64;

/// Destination for recorder events, invoked from the recorder's thread.
pub trait RecorderRoute: Send + Sync {
    /// Forwards one recorder event tagged with its attempt.
    fn deliver(&self, attempt: AttemptId, event: RecorderEvent);
}

/// User request to begin a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// Subject resolved once from the identity store.
    pub subject: SubjectId,
    /// Result of the prior profile-store status query.
    pub has_profile_picture: bool,
}

/// One serialized input to the controller.
#[derive(Debug)]
pub enum SessionInput {
    /// User asked to start.
    Start(StartRequest),
    /// Camera acquisition resolved.
    CameraResolved {
        /// Attempt that requested the camera.
        attempt: AttemptId,
        /// Acquired handle or failure.
        result: Result<CameraHandle, CaptureError>,
    },
    /// Periodic timeline tick.
    Tick {
        /// Attempt the ticker was started for.
        attempt: AttemptId,
    },
    /// Recorder output.
    Recorder {
        /// Attempt the recorder belongs to.
        attempt: AttemptId,
        /// Delivered event.
        event: RecorderEvent,
    },
    /// User asked to finish recording early.
    Stop,
    /// User abandoned the attempt.
    Cancel,
    /// Verifier answer (or synthesized fault) arrived.
    SubmissionResolved {
        /// Attempt that was submitted.
        attempt: AttemptId,
        /// Mapped outcome.
        outcome: SubmissionOutcome,
    },
    /// User acknowledged a terminal state.
    Reset,
}

/// Artifact upload handed to the submission worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// Attempt being submitted.
    pub attempt: AttemptId,
    /// Subject the artifact is keyed by.
    pub subject: SubjectId,
    /// Packaged artifact.
    pub upload: ArtifactUpload,
}

/// Work the runtime must perform on the controller's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Open the camera and report back with [`SessionInput::CameraResolved`].
    AcquireCamera {
        /// Attempt requesting the camera.
        attempt: AttemptId,
        /// Stream constraints.
        constraints: CameraConstraints,
    },
    /// Start sending [`SessionInput::Tick`] every `interval_ms`.
    StartTicker {
        /// Attempt to tag ticks with.
        attempt: AttemptId,
        /// Tick period.
        interval_ms: u64,
    },
    /// Stop the periodic ticker.
    StopTicker,
    /// Upload the artifact and report back with
    /// [`SessionInput::SubmissionResolved`].
    Submit(SubmissionRequest),
}

/// Why recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Elapsed time reached the end of the instruction script.
    TimelineComplete,
    /// Elapsed time reached the unconditional maximum.
    SafetyCutoff,
    /// User requested an early stop.
    Explicit,
    /// Recorder finalized without being asked.
    RecorderEnded,
}

/// Observable state of the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Current attempt number (0 before the first start).
    pub attempt: AttemptId,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Subject of the current attempt.
    pub subject: Option<SubjectId>,
    /// Displayed step, valid only while recording.
    pub current_step_index: Option<usize>,
    /// Recording time so far.
    pub elapsed_ms: u64,
    /// Timeline progress in `[0, 1]`.
    pub progress_fraction: f64,
    /// Buffered recorder chunks.
    pub chunk_count: usize,
    /// Buffered recorder bytes.
    pub buffered_bytes: usize,
    /// Whether the camera is currently held.
    pub holding_camera: bool,
    /// Why recording ended, once it has.
    pub stop_reason: Option<StopReason>,
    /// Failure classification on `Failed`.
    pub failure: Option<FailureKind>,
    /// User-facing message on terminal states.
    pub result_message: Option<String>,
    /// Verifier verdict, stored as received.
    pub result_details: Option<VerificationVerdict>,
}

#[derive(Debug, Clone, Default)]
struct CaptureSession {
    subject: Option<SubjectId>,
    started_at_ms: u64,
    current_step_index: usize,
    elapsed_ms: u64,
    progress_fraction: f64,
    stop_reason: Option<StopReason>,
    failure: Option<FailureKind>,
    result_message: Option<String>,
    result_details: Option<VerificationVerdict>,
}

/// Single owner of one capture session.
pub struct SessionController {
    config: SessionConfig,
    timeline: InstructionTimeline,
    capture: CaptureResourceManager,
    recorder_route: Arc<dyn RecorderRoute>,
    attempt: AttemptId,
    status: SessionStatus,
    session: CaptureSession,
}

impl SessionController {
    /// Creates an idle controller.
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] when `config` is invalid.
    pub fn new(
        config: SessionConfig,
        timeline: InstructionTimeline,
        capture: CaptureResourceManager,
        recorder_route: Arc<dyn RecorderRoute>,
    ) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|error| SessionError::Config(error.to_string()))?;
        if config.truncates(&timeline) {
            warn!(
                stage = "session",
                action = "config",
                timeline_ms = timeline.total_duration_ms(),
                cutoff_ms = config.safety_cutoff_ms,
                "instruction script outlasts the safety cutoff"
            );
        }

        Ok(Self {
            config,
            timeline,
            capture,
            recorder_route,
            attempt: 0,
            status: SessionStatus::Idle,
            session: CaptureSession::default(),
        })
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Current attempt number.
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Instruction script.
    pub fn timeline(&self) -> &InstructionTimeline {
        &self.timeline
    }

    /// Step to display, valid only while recording.
    pub fn current_step(&self) -> Option<&InstructionStep> {
        if self.status != SessionStatus::Recording {
            return None;
        }
        self.timeline.step(self.session.current_step_index)
    }

    /// Returns `true` while the camera is held.
    pub fn holds_camera(&self) -> bool {
        self.capture.is_holding()
    }

    /// Captures an observable copy of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            attempt: self.attempt,
            status: self.status,
            subject: self.session.subject.clone(),
            current_step_index: (self.status == SessionStatus::Recording)
                .then_some(self.session.current_step_index),
            elapsed_ms: self.session.elapsed_ms,
            progress_fraction: self.session.progress_fraction,
            chunk_count: self.capture.chunk_count(),
            buffered_bytes: self.capture.buffered_bytes(),
            holding_camera: self.capture.is_holding(),
            stop_reason: self.session.stop_reason,
            failure: self.session.failure,
            result_message: self.session.result_message.clone(),
            result_details: self.session.result_details.clone(),
        }
    }

    /// Applies one input at monotonic time `now_ms`.
    ///
    /// # Errors
    /// Returns [`SessionError`] when a user command is not legal in the
    /// current state. Stale asynchronous results are discarded silently.
    pub fn handle(
        &mut self,
        input: SessionInput,
        now_ms: u64,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        match input {
            SessionInput::Start(request) => self.start(request),
            SessionInput::CameraResolved { attempt, result } => {
                Ok(self.on_camera_resolved(attempt, result, now_ms))
            }
            SessionInput::Tick { attempt } => Ok(self.on_tick(attempt, now_ms)),
            SessionInput::Recorder { attempt, event } => Ok(self.on_recorder(attempt, event)),
            SessionInput::Stop => self.stop(),
            SessionInput::Cancel => self.cancel(),
            SessionInput::SubmissionResolved { attempt, outcome } => {
                Ok(self.on_submission_resolved(attempt, outcome))
            }
            SessionInput::Reset => self.reset(),
        }
    }

    /// Releases everything and returns to `Idle`, discarding any in-flight
    /// acquisition or submission.
    pub fn shutdown(&mut self) -> Vec<SessionEffect> {
        self.capture.reset();
        self.attempt += 1;
        self.session = CaptureSession::default();
        self.transition(SessionStatus::Idle);
        vec![SessionEffect::StopTicker]
    }

    fn start(&mut self, request: StartRequest) -> Result<Vec<SessionEffect>, SessionError> {
        if self.status != SessionStatus::Idle {
            warn!(stage = "session", action = "start_rejected", status = ?self.status);
            return Err(SessionError::InvalidCommand {
                command: "start",
                status: self.status,
            });
        }
        if !request.has_profile_picture {
            warn!(
                stage = "session",
                action = "start_rejected",
                "profile picture is not on record"
            );
            return Err(SessionError::ProfilePictureMissing);
        }

        self.attempt += 1;
        self.session = CaptureSession {
            subject: Some(request.subject),
            ..CaptureSession::default()
        };
        self.transition(SessionStatus::AwaitingPermission);

        Ok(vec![SessionEffect::AcquireCamera {
            attempt: self.attempt,
            constraints: self.capture.constraints(),
        }])
    }

    fn on_camera_resolved(
        &mut self,
        attempt: AttemptId,
        result: Result<CameraHandle, CaptureError>,
        now_ms: u64,
    ) -> Vec<SessionEffect> {
        if attempt != self.attempt || self.status != SessionStatus::AwaitingPermission {
            if let Ok(mut handle) = result {
                handle.release();
            }
            debug!(stage = "session", action = "stale_camera", attempt);
            return Vec::new();
        }

        let handle = match result {
            Ok(handle) => handle,
            Err(error) => {
                self.fail(failure_for_capture(&error), None);
                return Vec::new();
            }
        };

        if let Err(error) = self.capture.install(handle) {
            self.fail(failure_for_capture(&error), None);
            return Vec::new();
        }

        let route = Arc::clone(&self.recorder_route);
        let callback: RecorderCallback = Box::new(move |event| route.deliver(attempt, event));
        if let Err(error) = self.capture.begin_recording(callback) {
            self.fail(failure_for_capture(&error), None);
            return Vec::new();
        }

        self.session.started_at_ms = now_ms;
        self.session.elapsed_ms = 0;
        self.session.current_step_index = 0;
        self.session.progress_fraction = 0.0;
        self.transition(SessionStatus::Recording);

        vec![SessionEffect::StartTicker {
            attempt,
            interval_ms: self.config.tick_ms,
        }]
    }

    fn on_tick(&mut self, attempt: AttemptId, now_ms: u64) -> Vec<SessionEffect> {
        if attempt != self.attempt || self.status != SessionStatus::Recording {
            return Vec::new();
        }

        let elapsed_ms = now_ms
            .saturating_sub(self.session.started_at_ms)
            .max(self.session.elapsed_ms);
        self.session.elapsed_ms = elapsed_ms;
        self.session.progress_fraction = self.timeline.progress_fraction(elapsed_ms);

        // Advance at most one step per tick.
        let target = self.timeline.display_index(elapsed_ms);
        if target > self.session.current_step_index {
            self.session.current_step_index += 1;
            info!(
                stage = "session",
                action = "step",
                attempt,
                step = self.session.current_step_index,
                elapsed_ms
            );
        }

        if self.timeline.is_complete(elapsed_ms) {
            self.begin_stop(StopReason::TimelineComplete)
        } else if elapsed_ms >= self.config.safety_cutoff_ms {
            self.begin_stop(StopReason::SafetyCutoff)
        } else {
            Vec::new()
        }
    }

    fn stop(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        match self.status {
            SessionStatus::Recording => Ok(self.begin_stop(StopReason::Explicit)),
            status @ (SessionStatus::Idle | SessionStatus::AwaitingPermission) => {
                Err(SessionError::InvalidCommand {
                    command: "stop",
                    status,
                })
            }
            // Recording already ended; a repeated stop has nothing to do.
            _ => Ok(Vec::new()),
        }
    }

    fn begin_stop(&mut self, reason: StopReason) -> Vec<SessionEffect> {
        if self.status != SessionStatus::Recording {
            return Vec::new();
        }
        self.session.stop_reason = Some(reason);
        info!(
            stage = "session",
            action = "stop",
            attempt = self.attempt,
            reason = ?reason,
            elapsed_ms = self.session.elapsed_ms
        );
        self.transition(SessionStatus::Stopping);
        self.capture.request_stop();
        vec![SessionEffect::StopTicker]
    }

    fn on_recorder(&mut self, attempt: AttemptId, event: RecorderEvent) -> Vec<SessionEffect> {
        let active = matches!(
            self.status,
            SessionStatus::Recording | SessionStatus::Stopping
        );
        if attempt != self.attempt || !active {
            debug!(stage = "session", action = "stale_recorder_event", attempt);
            return Vec::new();
        }

        match event {
            RecorderEvent::Chunk(bytes) => {
                self.capture.accept_chunk(bytes);
                Vec::new()
            }
            RecorderEvent::Finalized => {
                let mut effects = self.begin_stop(StopReason::RecorderEnded);
                effects.extend(self.finalize());
                effects
            }
            RecorderEvent::Failed(reason) => {
                let was_recording = self.status == SessionStatus::Recording;
                self.fail(FailureKind::RecorderFault, None);
                warn!(stage = "session", action = "recorder_failed", reason = %reason);
                if was_recording {
                    vec![SessionEffect::StopTicker]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn finalize(&mut self) -> Vec<SessionEffect> {
        let artifact = match self.capture.finish() {
            Ok(artifact) => artifact,
            Err(error) => {
                self.fail(failure_for_capture(&error), None);
                return Vec::new();
            }
        };

        if artifact.len() < self.config.min_artifact_bytes {
            warn!(
                stage = "session",
                action = "artifact_rejected",
                bytes = artifact.len(),
                floor = self.config.min_artifact_bytes
            );
            self.fail(FailureKind::EmptyArtifact, None);
            return Vec::new();
        }
        if artifact.len() > self.config.max_artifact_bytes {
            warn!(
                stage = "session",
                action = "artifact_rejected",
                bytes = artifact.len(),
                ceiling = self.config.max_artifact_bytes
            );
            self.fail(FailureKind::ArtifactTooLarge, None);
            return Vec::new();
        }

        let Some(codec) = self.capture.codec() else {
            self.fail(FailureKind::RecorderFault, None);
            return Vec::new();
        };
        let Some(subject) = self.session.subject.clone() else {
            self.fail(FailureKind::RecorderFault, None);
            return Vec::new();
        };

        // Camera goes back before the upload starts.
        self.capture.release();

        let upload = ArtifactUpload::new(
            artifact,
            codec.container.mime_type(),
            codec.container.extension(),
        );
        info!(
            stage = "session",
            action = "artifact_ready",
            attempt = self.attempt,
            bytes = upload.len(),
            digest = %upload.digest
        );
        self.transition(SessionStatus::Submitting);

        vec![SessionEffect::Submit(SubmissionRequest {
            attempt: self.attempt,
            subject,
            upload,
        })]
    }

    fn on_submission_resolved(
        &mut self,
        attempt: AttemptId,
        outcome: SubmissionOutcome,
    ) -> Vec<SessionEffect> {
        if attempt != self.attempt || self.status != SessionStatus::Submitting {
            debug!(stage = "session", action = "stale_verdict", attempt);
            return Vec::new();
        }

        let verdict = outcome.verdict;
        if verdict.success {
            self.session.result_message = Some(verdict.message.clone());
            self.session.result_details = Some(verdict);
            self.transition(SessionStatus::Succeeded);
            return Vec::new();
        }

        let kind = if outcome.source == liveness_verify::VerdictSource::Synthesized {
            FailureKind::TransportFault
        } else {
            FailureKind::VerifierRejected
        };
        let message = (!verdict.message.trim().is_empty()).then(|| verdict.message.clone());
        self.session.result_details = Some(verdict);
        self.fail(kind, message);
        Vec::new()
    }

    fn cancel(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        match self.status {
            SessionStatus::Idle => Ok(Vec::new()),
            status if status.is_cancellable() => {
                self.capture.reset();
                self.session = CaptureSession::default();
                info!(stage = "session", action = "cancel", attempt = self.attempt);
                self.transition(SessionStatus::Idle);
                Ok(vec![SessionEffect::StopTicker])
            }
            status => {
                warn!(stage = "session", action = "cancel_rejected", status = ?status);
                Err(SessionError::InvalidCommand {
                    command: "cancel",
                    status,
                })
            }
        }
    }

    fn reset(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        match self.status {
            SessionStatus::Idle => Ok(Vec::new()),
            status if status.is_terminal() => {
                self.capture.reset();
                self.session = CaptureSession::default();
                self.transition(SessionStatus::Idle);
                Ok(Vec::new())
            }
            status => Err(SessionError::InvalidCommand {
                command: "reset",
                status,
            }),
        }
    }

    fn fail(&mut self, kind: FailureKind, message: Option<String>) {
        self.capture.reset();
        let message = message.unwrap_or_else(|| kind.default_message().to_string());
        error!(
            stage = "session",
            action = "failed",
            attempt = self.attempt,
            kind = ?kind,
            message = %message
        );
        self.session.failure = Some(kind);
        self.session.result_message = Some(message);
        self.transition(SessionStatus::Failed);
    }

    fn transition(&mut self, to: SessionStatus) {
        if self.status == to {
            return;
        }
        info!(
            stage = "session",
            action = "transition",
            attempt = self.attempt,
            from = ?self.status,
            to = ?to
        );
        self.status = to;
    }
}

fn failure_for_capture(error: &CaptureError) -> FailureKind {
    match error {
        CaptureError::PermissionDenied(_) => FailureKind::PermissionDenied,
        CaptureError::DeviceUnavailable(_) => FailureKind::DeviceUnavailable,
        CaptureError::UnsupportedCodec => FailureKind::UnsupportedCodec,
        CaptureError::EmptyArtifact => FailureKind::EmptyArtifact,
        CaptureError::Recorder(_) | CaptureError::AlreadyHeld | CaptureError::NotHeld => {
            FailureKind::RecorderFault
        }
    }
}

/// Rejected command errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Configuration is invalid.
    #[error("invalid session config: {0}")]
    Config(String),
    /// Start requires a reference picture on record.
    #[error("a profile picture must be uploaded before verification")]
    ProfilePictureMissing,
    /// Command is not legal in the current status.
    #[error("cannot {command} while {status:?}")]
    InvalidCommand {
        /// Rejected command name.
        command: &'static str,
        /// Status at the time of the command.
        status: SessionStatus,
    },
}
