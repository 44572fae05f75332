#![warn(missing_docs)]
//! # liveness-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `liveness` workspace.
//!
//! ## Responsibilities
//! - Represent the scripted instruction sequence and map elapsed time onto it.
//! - Hold the tunable session constants (tick, safety cutoff, artifact bounds).
//! - Model session status, failure kinds, and the verifier's verdict.
//!
//! ## Data flow
//! The session controller owns an [`InstructionTimeline`] built from
//! [`InstructionStep`] values and polls [`InstructionTimeline::position`] on
//! every tick. Verdicts produced by the submission client are stored verbatim
//! as [`VerificationVerdict`] on the terminal session state.
//!
//! ## Ownership and lifetimes
//! Steps are immutable after construction and the timeline owns its copy, so
//! it can be shared read-only between the controller and any UI projection.
//!
//! ## Error model
//! Invalid configuration (empty script, zero-length step, zero tick, blank
//! subject identifier) returns [`CoreError`]. Timeline lookups cannot fail.
//!
//! ## Security and privacy notes
//! Subject identifiers are opaque and never transformed. Verdict details are
//! carried as opaque JSON and are not interpreted here.
//!
//! ## Example
//! ```rust
//! use liveness_core::{InstructionStep, InstructionTimeline, TimelinePosition};
//!
//! let timeline = InstructionTimeline::new(vec![
//!     InstructionStep::new("Look", "Look at the camera", 1_000).unwrap(),
//!     InstructionStep::new("Blink", "Blink twice", 1_000).unwrap(),
//! ])
//! .unwrap();
//! assert_eq!(
//!     timeline.position(1_000),
//!     TimelinePosition::Step { index: 1, step_start_ms: 1_000 }
//! );
//! assert_eq!(timeline.position(2_000), TimelinePosition::Complete);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};

/// Default timeline polling interval.
pub const DEFAULT_TICK_MS: u64 = 100;
/// Default unconditional maximum recording duration.
pub const DEFAULT_SAFETY_CUTOFF_MS: u64 = 15_000;
/// Default minimum artifact size accepted for submission.
pub const DEFAULT_MIN_ARTIFACT_BYTES: usize = 1_024;
/// Default maximum artifact size accepted by the verifier.
pub const DEFAULT_MAX_ARTIFACT_BYTES: usize = 50 * 1_024 * 1_024;

/// Opaque identifier of the person being verified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Creates a validated subject identifier.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidSubject`] when the identifier is blank.
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(CoreError::InvalidSubject);
        }
        Ok(Self(raw))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubjectId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubjectId> for String {
    fn from(value: SubjectId) -> Self {
        value.0
    }
}

/// One on-screen instruction with a fixed display duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionStep {
    /// Short instruction headline.
    pub title: String,
    /// Longer explanation shown under the headline.
    pub description: String,
    /// How long the step is shown, in milliseconds.
    pub duration_ms: u64,
}

impl InstructionStep {
    /// Constructs a validated step.
    ///
    /// # Errors
    /// Returns [`CoreError::ZeroStepDuration`] when `duration_ms == 0`.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        duration_ms: u64,
    ) -> Result<Self, CoreError> {
        let title = title.into();
        if duration_ms == 0 {
            return Err(CoreError::ZeroStepDuration(title));
        }
        Ok(Self {
            title,
            description: description.into(),
            duration_ms,
        })
    }
}

/// Returns the standard five-step liveness script (18 seconds total).
pub fn default_instruction_steps() -> Vec<InstructionStep> {
    [
        (
            "Look at the camera",
            "Position your face in the center of the screen and look directly at the camera.",
            3_000,
        ),
        (
            "Blink twice",
            "Please blink your eyes twice clearly. Make sure your blinks are distinct.",
            5_000,
        ),
        (
            "Turn your head left",
            "Slowly turn your head to the left, then return to center.",
            4_000,
        ),
        (
            "Turn your head right",
            "Slowly turn your head to the right, then return to center.",
            4_000,
        ),
        (
            "Final verification",
            "Hold still while we verify your identity. Almost done!",
            2_000,
        ),
    ]
    .into_iter()
    .map(|(title, description, duration_ms)| InstructionStep {
        title: title.to_string(),
        description: description.to_string(),
        duration_ms,
    })
    .collect()
}

/// Result of mapping an elapsed time onto the instruction script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelinePosition {
    /// Elapsed time falls inside step `index`, which began at `step_start_ms`.
    Step {
        /// Zero-based step index.
        index: usize,
        /// Offset of the step start from the beginning of the script.
        step_start_ms: u64,
    },
    /// Elapsed time reached or passed the end of the final step.
    Complete,
}

/// Ordered, read-only instruction script with precomputed step offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionTimeline {
    steps: Vec<InstructionStep>,
    starts_ms: Vec<u64>,
    total_ms: u64,
}

impl InstructionTimeline {
    /// Builds a timeline from steps in playback order.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyTimeline`] when `steps` is empty and
    /// [`CoreError::ZeroStepDuration`] when any step has no duration.
    pub fn new(steps: Vec<InstructionStep>) -> Result<Self, CoreError> {
        if steps.is_empty() {
            return Err(CoreError::EmptyTimeline);
        }

        if let Some(step) = steps.iter().find(|step| step.duration_ms == 0) {
            return Err(CoreError::ZeroStepDuration(step.title.clone()));
        }

        Ok(Self::from_checked_steps(steps))
    }

    /// Builds the timeline for [`default_instruction_steps`].
    pub fn standard() -> Self {
        Self::from_checked_steps(default_instruction_steps())
    }

    // Callers guarantee a non-empty script with non-zero durations.
    fn from_checked_steps(steps: Vec<InstructionStep>) -> Self {
        let mut starts_ms = Vec::with_capacity(steps.len());
        let mut total_ms: u64 = 0;
        for step in &steps {
            starts_ms.push(total_ms);
            total_ms = total_ms.saturating_add(step.duration_ms);
        }

        Self {
            steps,
            starts_ms,
            total_ms,
        }
    }

    /// Returns the steps in playback order.
    pub fn steps(&self) -> &[InstructionStep] {
        &self.steps
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always `false`; construction rejects empty scripts.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns one step by index.
    pub fn step(&self, index: usize) -> Option<&InstructionStep> {
        self.steps.get(index)
    }

    /// Returns the sum of all step durations.
    pub fn total_duration_ms(&self) -> u64 {
        self.total_ms
    }

    /// Maps elapsed time onto the script.
    ///
    /// # Semantics
    /// A boundary instant belongs to the step that starts there. Once
    /// `elapsed_ms >= total_duration_ms()` the timeline is complete.
    pub fn position(&self, elapsed_ms: u64) -> TimelinePosition {
        if elapsed_ms >= self.total_ms {
            return TimelinePosition::Complete;
        }

        // starts_ms is strictly increasing, so the step is the last one whose
        // start is <= elapsed.
        let index = self
            .starts_ms
            .partition_point(|start| *start <= elapsed_ms)
            .saturating_sub(1);

        TimelinePosition::Step {
            index,
            step_start_ms: self.starts_ms[index],
        }
    }

    /// Returns the step to display at `elapsed_ms`, holding the final step
    /// once the script is complete.
    pub fn display_index(&self, elapsed_ms: u64) -> usize {
        match self.position(elapsed_ms) {
            TimelinePosition::Step { index, .. } => index,
            TimelinePosition::Complete => self.steps.len() - 1,
        }
    }

    /// Returns `min(1, elapsed / total)`.
    pub fn progress_fraction(&self, elapsed_ms: u64) -> f64 {
        (elapsed_ms as f64 / self.total_ms as f64).clamp(0.0, 1.0)
    }

    /// Returns `true` once `elapsed_ms` reached the end of the script.
    pub fn is_complete(&self, elapsed_ms: u64) -> bool {
        elapsed_ms >= self.total_ms
    }
}

/// Tunable constants governing one capture session.
///
/// The default cutoff (15 s) is shorter than the default script (18 s), so
/// default sessions stop on the cutoff during the final step. Check
/// [`SessionConfig::truncates`] when pairing a config with a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Timeline polling interval.
    pub tick_ms: u64,
    /// Unconditional maximum recording duration. Wins over a longer script.
    pub safety_cutoff_ms: u64,
    /// Artifacts below this size are rejected as empty.
    pub min_artifact_bytes: usize,
    /// Artifacts above this size are rejected before upload.
    pub max_artifact_bytes: usize,
}

impl SessionConfig {
    /// Creates validated session configuration.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidConfig`] for a zero tick, a zero cutoff, or
    /// an inverted artifact size range.
    pub fn new(
        tick_ms: u64,
        safety_cutoff_ms: u64,
        min_artifact_bytes: usize,
        max_artifact_bytes: usize,
    ) -> Result<Self, CoreError> {
        let config = Self {
            tick_ms,
            safety_cutoff_ms,
            min_artifact_bytes,
            max_artifact_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Returns `true` when the safety cutoff ends recording before `timeline`
    /// completes.
    pub fn truncates(&self, timeline: &InstructionTimeline) -> bool {
        timeline.total_duration_ms() > self.safety_cutoff_ms
    }

    /// Re-checks the invariants enforced by [`SessionConfig::new`].
    ///
    /// # Errors
    /// See [`SessionConfig::new`].
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.tick_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "tick interval must be greater than zero".to_string(),
            ));
        }
        if self.safety_cutoff_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "safety cutoff must be greater than zero".to_string(),
            ));
        }
        if self.min_artifact_bytes > self.max_artifact_bytes {
            return Err(CoreError::InvalidConfig(format!(
                "minimum artifact size {} exceeds maximum {}",
                self.min_artifact_bytes, self.max_artifact_bytes
            )));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            safety_cutoff_ms: DEFAULT_SAFETY_CUTOFF_MS,
            min_artifact_bytes: DEFAULT_MIN_ARTIFACT_BYTES,
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
        }
    }
}

/// Lifecycle status of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// No session is active.
    Idle,
    /// Camera access was requested and has not resolved yet.
    AwaitingPermission,
    /// Camera is live and the recorder is buffering.
    Recording,
    /// Recorder was asked to finalize.
    Stopping,
    /// Artifact is in flight to the verifier.
    Submitting,
    /// Verifier accepted the subject.
    Succeeded,
    /// Session ended in a failure.
    Failed,
}

impl SessionStatus {
    /// Returns `true` for `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns `true` for states during which the camera resource belongs to
    /// the session.
    pub fn owns_camera(self) -> bool {
        matches!(
            self,
            Self::AwaitingPermission | Self::Recording | Self::Stopping
        )
    }

    /// Returns `true` for states an explicit cancel may interrupt.
    pub fn is_cancellable(self) -> bool {
        self.owns_camera()
    }
}

/// Classification of a terminal session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The platform denied camera access.
    PermissionDenied,
    /// No usable camera is present.
    DeviceUnavailable,
    /// No codec from the preference list is supported by the recorder.
    UnsupportedCodec,
    /// The recorder reported an error while finalizing.
    RecorderFault,
    /// No chunks were recorded or the artifact is below the size floor.
    EmptyArtifact,
    /// The artifact exceeds the verifier's upload ceiling.
    ArtifactTooLarge,
    /// Network or decode failure during submission.
    TransportFault,
    /// The verifier explicitly returned `success: false`.
    VerifierRejected,
}

impl FailureKind {
    /// Corrective message shown when no verifier message is available.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Failed to access camera. Please ensure camera permissions are granted."
            }
            Self::DeviceUnavailable => "No camera was found. Connect a camera and try again.",
            Self::UnsupportedCodec => "This device cannot record video in a supported format.",
            Self::RecorderFault => "Recording failed. Please try again.",
            Self::EmptyArtifact => "No video data recorded",
            Self::ArtifactTooLarge => "Video file too large. Maximum size is 50MB.",
            Self::TransportFault => "Verification failed. Please try again.",
            Self::VerifierRejected => "Verification failed",
        }
    }
}

/// Opaque verifier payload, tagged by the outcome it accompanied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum VerdictDetails {
    /// Details attached to a successful verification.
    Verification(serde_json::Value),
    /// Diagnostics attached to a rejected verification.
    Diagnostics(serde_json::Value),
}

impl VerdictDetails {
    /// Returns the raw payload regardless of tag.
    pub fn payload(&self) -> &serde_json::Value {
        match self {
            Self::Verification(value) | Self::Diagnostics(value) => value,
        }
    }
}

/// Structured verdict returned by the remote verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    /// Whether the verifier accepted the subject.
    pub success: bool,
    /// Human-readable verifier message.
    pub message: String,
    /// Verifier-defined confidence score, not interpreted by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Opaque details payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<VerdictDetails>,
}

impl VerificationVerdict {
    /// Builds a failed verdict that did not come from the verifier.
    pub fn synthesized_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            confidence: None,
            details: None,
        }
    }
}

/// Parses and validates a collaborator service base URL.
///
/// # Policy
/// HTTPS is required, except for loopback hosts used in local development.
///
/// # Errors
/// Returns [`CoreError::InvalidEndpoint`] for unparseable URLs, unsupported
/// schemes, plain HTTP to a non-loopback host, or URLs that cannot carry path
/// segments.
pub fn service_base_url(endpoint: &str) -> Result<Url, CoreError> {
    let parsed = Url::parse(endpoint)
        .map_err(|error| CoreError::InvalidEndpoint(format!("invalid service url: {error}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if is_loopback(&parsed) => {}
        "http" => {
            return Err(CoreError::InvalidEndpoint(
                "service endpoint must use https outside loopback".to_string(),
            ));
        }
        other => {
            return Err(CoreError::InvalidEndpoint(format!(
                "unsupported url scheme '{other}'"
            )));
        }
    }

    if parsed.cannot_be_a_base() {
        return Err(CoreError::InvalidEndpoint(
            "service endpoint cannot carry path segments".to_string(),
        ));
    }

    Ok(parsed)
}

/// Appends `action` and the subject as percent-encoded path segments.
///
/// ```rust
/// use liveness_core::{SubjectId, service_base_url, subject_url};
///
/// let base = service_base_url("https://verifier.example.test/api").unwrap();
/// let subject = SubjectId::new("ana maria").unwrap();
/// assert_eq!(
///     subject_url(&base, "verify", &subject).as_str(),
///     "https://verifier.example.test/api/verify/ana%20maria"
/// );
/// ```
pub fn subject_url(base: &Url, action: &str, subject: &SubjectId) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(action).push(subject.as_str());
    }
    url
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(address)) => address.is_loopback(),
        Some(Host::Ipv6(address)) => address.is_loopback(),
        None => false,
    }
}

/// Error type for core model validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// The instruction script has no steps.
    #[error("instruction timeline must contain at least one step")]
    EmptyTimeline,
    /// A step has zero duration.
    #[error("instruction step '{0}' must have a positive duration")]
    ZeroStepDuration(String),
    /// Session configuration violates an invariant.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    /// Subject identifier is blank.
    #[error("subject identifier is empty")]
    InvalidSubject,
    /// Collaborator endpoint violates transport policy.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
